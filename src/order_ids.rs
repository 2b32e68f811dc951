use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, Local, TimeZone};

use crate::types::LocalOrderId;

const SESSION_MULTIPLIER: u64 = 1_000_000;

/// Issues local order ids of the form `yymmddHHMMSS * 1_000_000 + n`.
///
/// The base is fixed when the session starts, so ids from separate runs do not
/// collide unless two sessions start within the same second. Cloning shares the
/// counter, which keeps ids unique across concurrent submitters.
#[derive(Debug, Clone)]
pub struct LocalOrderIds {
    base: u64,
    counter: Arc<AtomicU64>,
}

impl LocalOrderIds {
    pub fn new_session() -> Self {
        Self::starting_at(&Local::now())
    }

    pub fn starting_at<Tz: TimeZone>(connect_time: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let stamp = connect_time.format("%y%m%d%H%M%S").to_string();
        let base = stamp.parse::<u64>().unwrap_or(0) * SESSION_MULTIPLIER;
        Self::with_base(base)
    }

    pub fn with_base(base: u64) -> Self {
        Self {
            base,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn next(&self) -> LocalOrderId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        LocalOrderId::new(self.base + seq)
    }

    pub fn base(&self) -> u64 {
        self.base
    }
}
