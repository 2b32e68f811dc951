use crate::types::{Direction, ExchangeOrderId};

/// Price band the ladder is kept inside, derived from the touch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuoteBand {
    pub short_start: f64,
    pub short_end: f64,
    pub long_start: f64,
    pub long_end: f64,
}

impl QuoteBand {
    pub fn new(best_ask: f64, best_bid: f64, distance: f64, width: f64) -> Self {
        let short_start = best_ask + distance;
        let long_start = best_bid - distance;
        Self {
            short_start,
            short_end: short_start + width,
            long_start,
            long_end: long_start - width,
        }
    }

    /// Whether a resting order has drifted outside the band plus `tolerance`.
    pub fn is_outside(&self, direction: Direction, price: f64, tolerance: f64) -> bool {
        match direction {
            Direction::Short => {
                price < self.short_start - tolerance || price > self.short_end + tolerance
            }
            Direction::Long => {
                price > self.long_start + tolerance || price < self.long_end - tolerance
            }
        }
    }
}

/// One rung to place.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LadderOrder {
    pub direction: Direction,
    pub price: f64,
    pub volume: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GridDecision {
    Skip(&'static str),
    /// Open-order count exceeded the runaway threshold.
    CancelAll(Vec<ExchangeOrderId>),
    Adjust {
        cancels: Vec<ExchangeOrderId>,
        places: Vec<LadderOrder>,
    },
}

impl GridDecision {
    pub fn cancels(&self) -> &[ExchangeOrderId] {
        match self {
            GridDecision::Skip(_) => &[],
            GridDecision::CancelAll(ids) => ids,
            GridDecision::Adjust { cancels, .. } => cancels,
        }
    }

    pub fn places(&self) -> &[LadderOrder] {
        match self {
            GridDecision::Adjust { places, .. } => places,
            _ => &[],
        }
    }
}
