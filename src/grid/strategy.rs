use std::{collections::BTreeSet, sync::Arc};

use ordered_float::OrderedFloat;

use super::{
    config::GridConfig,
    types::{GridDecision, LadderOrder, QuoteBand},
};
use crate::{models::Order, types::Direction, ws_client::QuoteSnapshot};

/// Fixed-width grid around the touch: keeps up to `ladder_depth` resting
/// orders per side, cancels drifted ones and fills missing rungs.
///
/// Holds no order state of its own; each evaluation reads the open-order
/// snapshot it is given.
#[derive(Debug)]
pub struct GridStrategy {
    config: GridConfig,
    timer_count: u32,
    last_tick: Option<Arc<QuoteSnapshot>>,
}

impl GridStrategy {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            timer_count: 0,
            last_tick: None,
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn last_tick(&self) -> Option<&Arc<QuoteSnapshot>> {
        self.last_tick.as_ref()
    }

    /// Stores the quote as price reference if it is for this grid's symbol.
    pub fn on_tick(&mut self, tick: &Arc<QuoteSnapshot>) -> bool {
        if !tick.symbol.eq_ignore_ascii_case(&self.config.symbol) {
            return false;
        }
        self.last_tick = Some(Arc::clone(tick));
        true
    }

    /// Counts timer ticks; returns `true` when an evaluation is due.
    pub fn on_timer(&mut self) -> bool {
        if self.last_tick.is_none() {
            return false;
        }
        self.timer_count += 1;
        if self.timer_count < self.config.interval {
            return false;
        }
        self.timer_count = 0;
        true
    }

    pub fn evaluate<'a, I>(&self, open_orders: I) -> GridDecision
    where
        I: IntoIterator<Item = &'a Order>,
    {
        let cfg = &self.config;
        if cfg.volume == 0.0 {
            return GridDecision::Skip("zero_volume");
        }

        let orders: Vec<&Order> = open_orders
            .into_iter()
            .filter(|order| order.is_active() && order.exchange_id.is_some())
            .collect();
        let count = orders.len();

        if count > cfg.runaway_threshold() {
            return GridDecision::CancelAll(orders.iter().filter_map(|o| o.exchange_id).collect());
        }

        let band = match self.band() {
            Ok(band) => band,
            Err(reason) => return GridDecision::Skip(reason),
        };

        let mut resting = BTreeSet::new();
        let mut cancels = Vec::new();
        for order in &orders {
            resting.insert(OrderedFloat(order.price));
            if band.is_outside(order.direction, order.price, cfg.cancel_tolerance) {
                if let Some(id) = order.exchange_id {
                    cancels.push(id);
                }
            }
        }

        let headroom = (2 * cfg.ladder_depth) as i64 - count as i64;
        if headroom < cfg.min_headroom as i64 {
            return GridDecision::Adjust {
                cancels,
                places: Vec::new(),
            };
        }

        GridDecision::Adjust {
            cancels,
            places: self.ladder(&band, &resting),
        }
    }

    /// Places the whole ladder without looking at resting orders. Used once
    /// the gateway has reported that nothing is open for the account.
    pub fn rebuild(&self) -> GridDecision {
        if self.config.volume == 0.0 {
            return GridDecision::Skip("zero_volume");
        }
        match self.band() {
            Ok(band) => GridDecision::Adjust {
                cancels: Vec::new(),
                places: self.ladder(&band, &BTreeSet::new()),
            },
            Err(reason) => GridDecision::Skip(reason),
        }
    }

    fn band(&self) -> Result<QuoteBand, &'static str> {
        let tick = self.last_tick.as_ref().ok_or("no_price_reference")?;
        let (Some(ask), Some(bid)) = (tick.best_ask(), tick.best_bid()) else {
            return Err("empty_book");
        };
        Ok(QuoteBand::new(
            ask.price,
            bid.price,
            self.config.minimum_distance,
            self.config.band_width,
        ))
    }

    /// Rungs of both sides, skipping prices already resting.
    fn ladder(&self, band: &QuoteBand, resting: &BTreeSet<OrderedFloat<f64>>) -> Vec<LadderOrder> {
        let cfg = &self.config;
        let mut places = Vec::new();
        for i in 0..cfg.ladder_depth {
            let offset = cfg.ladder_step * i as f64;
            let short = band.short_start + offset;
            if !resting.contains(&OrderedFloat(short)) {
                places.push(LadderOrder {
                    direction: Direction::Short,
                    price: short,
                    volume: cfg.volume,
                });
            }
            let long = band.long_start - offset;
            if !resting.contains(&OrderedFloat(long)) {
                places.push(LadderOrder {
                    direction: Direction::Long,
                    price: long,
                    volume: cfg.volume,
                });
            }
        }
        places
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        types::{ExchangeOrderId, OrderStatus, OrderType},
        ws_client::PriceLevel,
    };
    use std::time::Instant;

    fn quote(bid: f64, ask: f64) -> Arc<QuoteSnapshot> {
        let mut snapshot = QuoteSnapshot::empty("BTCUSD_P");
        snapshot.bids = vec![PriceLevel {
            price: bid,
            volume: 1.0,
        }];
        snapshot.asks = vec![PriceLevel {
            price: ask,
            volume: 1.0,
        }];
        Arc::new(snapshot)
    }

    fn order(id: i64, direction: Direction, price: f64) -> Order {
        Order {
            exchange_id: Some(ExchangeOrderId::new(id)),
            local_id: None,
            symbol: "BTCUSD_P".to_string(),
            direction,
            order_type: OrderType::Limit,
            price,
            volume: 10.0,
            filled: 0.0,
            status: OrderStatus::Pending,
            created_at_ms: 0,
            updated_at: Instant::now(),
        }
    }

    fn strategy(depth: usize, bid: f64, ask: f64) -> GridStrategy {
        let mut strategy = GridStrategy::new(GridConfig::new("BTCUSD_P", 10.0, 1, 40.0, depth));
        strategy.on_tick(&quote(bid, ask));
        strategy
    }

    fn prices(decision: &GridDecision, direction: Direction) -> Vec<f64> {
        decision
            .places()
            .iter()
            .filter(|order| order.direction == direction)
            .map(|order| order.price)
            .collect()
    }

    #[test]
    fn test_band_tolerance() {
        let strategy = strategy(15, 9999.0, 10000.0);
        let orders = vec![
            order(1, Direction::Short, 10045.0),
            order(2, Direction::Short, 10061.0),
            order(3, Direction::Short, 10034.5),
            order(4, Direction::Long, 9964.0),
            order(5, Direction::Long, 9965.0),
            order(6, Direction::Long, 9938.0),
        ];

        let decision = strategy.evaluate(&orders);
        assert_eq!(
            decision.cancels(),
            &[
                ExchangeOrderId::new(2),
                ExchangeOrderId::new(3),
                ExchangeOrderId::new(5),
                ExchangeOrderId::new(6),
            ]
        );
    }

    #[test]
    fn test_runaway_breaker_cancels_everything() {
        let strategy = strategy(15, 9999.0, 10000.0);
        let orders: Vec<Order> = (0..35)
            .map(|i| order(i, Direction::Short, 10040.0 + 0.5 * i as f64))
            .collect();

        match strategy.evaluate(&orders) {
            GridDecision::CancelAll(ids) => assert_eq!(ids.len(), 35),
            other => panic!("expected CancelAll, got {other:?}"),
        }

        let strategy = strategy_with_depth_13();
        let orders: Vec<Order> = (0..31)
            .map(|i| order(i, Direction::Long, 9959.0 - 0.5 * i as f64))
            .collect();
        assert!(matches!(
            strategy.evaluate(&orders),
            GridDecision::CancelAll(ids) if ids.len() == 31
        ));
    }

    fn strategy_with_depth_13() -> GridStrategy {
        strategy(13, 9999.0, 10000.0)
    }

    #[test]
    fn test_runaway_threshold_is_exclusive() {
        let strategy = strategy(15, 9999.0, 10000.0);
        let orders: Vec<Order> = (0..34)
            .map(|i| order(i, Direction::Short, 10040.0 + 0.5 * (i % 15) as f64))
            .collect();
        let decision = strategy.evaluate(&orders);
        assert!(matches!(decision, GridDecision::Adjust { .. }));
        assert!(decision.places().is_empty());
    }

    #[test]
    fn test_existing_price_is_not_duplicated() {
        let strategy = strategy(3, 9999.0, 10000.0);
        let orders = vec![order(1, Direction::Short, 10040.0)];

        let decision = strategy.evaluate(&orders);
        assert!(decision.cancels().is_empty());
        assert_eq!(prices(&decision, Direction::Short), vec![10040.5, 10041.0]);
        assert_eq!(prices(&decision, Direction::Long), vec![9959.0, 9958.5, 9958.0]);
        assert!(decision.places().iter().all(|order| order.volume == 10.0));
    }

    #[test]
    fn test_headroom_guard_blocks_placement() {
        let strategy = strategy(15, 9999.0, 10000.0);
        let orders: Vec<Order> = (0..27)
            .map(|i| order(i, Direction::Short, 10040.0 + 0.5 * (i % 15) as f64))
            .collect();

        let decision = strategy.evaluate(&orders);
        assert!(decision.places().is_empty());
        assert!(decision.cancels().is_empty());
    }

    #[test]
    fn test_placement_is_idempotent() {
        let mut config = GridConfig::new("BTCUSD_P", 10.0, 1, 40.0, 3);
        config.min_headroom = 0;
        let mut strategy = GridStrategy::new(config);
        strategy.on_tick(&quote(9999.0, 10000.0));

        let first = strategy.evaluate(&Vec::<Order>::new());
        assert_eq!(first.places().len(), 6);

        let resting: Vec<Order> = first
            .places()
            .iter()
            .enumerate()
            .map(|(i, rung)| order(i as i64, rung.direction, rung.price))
            .collect();
        let second = strategy.evaluate(&resting);
        assert!(second.places().is_empty());
        assert!(second.cancels().is_empty());
    }

    #[test]
    fn test_terminal_orders_are_ignored() {
        let strategy = strategy(3, 9999.0, 10000.0);
        let mut filled = order(1, Direction::Short, 10040.0);
        filled.status = OrderStatus::FullyFilled;

        let decision = strategy.evaluate(&[filled]);
        assert_eq!(prices(&decision, Direction::Short), vec![10040.0, 10040.5, 10041.0]);
    }

    #[test]
    fn test_zero_volume_skips() {
        let mut strategy = GridStrategy::new(GridConfig::new("BTCUSD_P", 0.0, 1, 40.0, 3));
        strategy.on_tick(&quote(9999.0, 10000.0));
        assert_eq!(strategy.evaluate(&Vec::<Order>::new()), GridDecision::Skip("zero_volume"));
    }

    #[test]
    fn test_timer_cadence_requires_tick() {
        let mut strategy = GridStrategy::new(GridConfig::new("BTCUSD_P", 10.0, 3, 40.0, 3));
        assert!(!strategy.on_timer());
        assert!(!strategy.on_timer());
        assert!(!strategy.on_timer());

        assert!(!strategy.on_tick(&Arc::new(QuoteSnapshot::empty("ETHUSD_P"))));
        assert!(!strategy.on_timer());

        assert!(strategy.on_tick(&quote(9999.0, 10000.0)));
        let fired: Vec<bool> = (0..6).map(|_| strategy.on_timer()).collect();
        assert_eq!(fired, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn test_empty_book_skips() {
        let mut strategy = GridStrategy::new(GridConfig::new("BTCUSD_P", 10.0, 1, 40.0, 3));
        strategy.on_tick(&Arc::new(QuoteSnapshot::empty("BTCUSD_P")));
        assert_eq!(strategy.evaluate(&Vec::<Order>::new()), GridDecision::Skip("empty_book"));
    }

    #[test]
    fn test_rebuild_places_full_ladder() {
        let strategy = strategy(3, 9999.0, 10000.0);
        let decision = strategy.rebuild();
        assert!(decision.cancels().is_empty());
        assert_eq!(prices(&decision, Direction::Short), vec![10040.0, 10040.5, 10041.0]);
        assert_eq!(prices(&decision, Direction::Long), vec![9959.0, 9958.5, 9958.0]);
    }

    #[test]
    fn test_rebuild_without_price_reference_skips() {
        let strategy = GridStrategy::new(GridConfig::new("BTCUSD_P", 10.0, 1, 40.0, 3));
        assert!(matches!(strategy.rebuild(), GridDecision::Skip("no_price_reference")));

        let mut strategy = GridStrategy::new(GridConfig::new("BTCUSD_P", 0.0, 1, 40.0, 3));
        strategy.on_tick(&quote(9999.0, 10000.0));
        assert!(matches!(strategy.rebuild(), GridDecision::Skip("zero_volume")));
    }
}
