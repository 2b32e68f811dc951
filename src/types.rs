use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned to an order by the exchange. Authoritative once known.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeOrderId(pub i64);

impl ExchangeOrderId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn into_inner(self) -> i64 {
        self.0
    }
}

impl From<i64> for ExchangeOrderId {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<ExchangeOrderId> for i64 {
    fn from(value: ExchangeOrderId) -> Self {
        value.into_inner()
    }
}

impl fmt::Display for ExchangeOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence number assigned locally before the exchange id is known.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalOrderId(pub u64);

impl LocalOrderId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl From<u64> for LocalOrderId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for LocalOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_exchange_str(self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn from_exchange(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "LONG" => Some(Direction::Long),
            "SHORT" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_exchange_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
}

impl OrderType {
    pub fn as_exchange_str(self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::Stop => "Stop",
        }
    }

    /// The venue echoes the type in varying case (`Stop`, `STOP`), so matching
    /// is case-insensitive.
    pub fn from_exchange(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "LIMIT" => Some(OrderType::Limit),
            "MARKET" => Some(OrderType::Market),
            "STOP" => Some(OrderType::Stop),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    FullyFilled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Exact translation of the exchange's status codes. Anything else is
    /// unknown and must leave the tracked status untouched.
    pub fn from_exchange(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" | "pending" => Some(OrderStatus::Pending),
            "PARTIAL_FILLED" => Some(OrderStatus::PartiallyFilled),
            "FULLY_FILLED" => Some(OrderStatus::FullyFilled),
            "FULLY_CANCELLED" | "PARTIAL_CANCELLED" => Some(OrderStatus::Cancelled),
            "Rejected" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::FullyFilled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::PartiallyFilled => 1,
            OrderStatus::FullyFilled | OrderStatus::Cancelled | OrderStatus::Rejected => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    /// Terminal states are final; `partially_filled` never falls back to `pending`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::FullyFilled => "fully_filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

/// Deployment the connector talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    #[default]
    #[serde(alias = "REAL", alias = "mainnet")]
    Real,
    #[serde(alias = "TEST", alias = "testnet")]
    Test,
}

impl Venue {
    pub fn rest_host(self) -> &'static str {
        match self {
            Venue::Real => "https://api.fmex.com",
            Venue::Test => "https://api.testnet.fmex.com",
        }
    }

    pub fn ws_host(self) -> &'static str {
        match self {
            Venue::Real => "wss://api.fmex.com/v2/ws",
            Venue::Test => "wss://api.testnet.fmex.com/v2/ws",
        }
    }
}
