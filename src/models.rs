use std::{collections::BTreeMap, time::Instant};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::{Direction, ExchangeOrderId, LocalOrderId, OrderStatus, OrderType};

/// Static instrument metadata, fetched once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub symbol: String,
    pub price_tick: f64,
    pub min_volume: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawContract {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) minimum_price_increment: f64,
}

impl From<RawContract> for Contract {
    fn from(raw: RawContract) -> Self {
        Self {
            symbol: raw.name.to_ascii_uppercase(),
            price_tick: raw.minimum_price_increment,
            min_volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalance {
    pub currency: String,
    pub available: f64,
    pub frozen: f64,
}

impl AccountBalance {
    pub fn balance(&self) -> f64 {
        self.available + self.frozen
    }
}

/// Order record as the venue serializes it, in REST responses and stream pushes alike.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOrder {
    pub id: i64,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(rename = "type", default)]
    pub order_type: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unfilled_quantity: Option<f64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: i64,
}

impl RawOrder {
    pub fn exchange_id(&self) -> ExchangeOrderId {
        ExchangeOrderId::new(self.id)
    }

    pub fn filled(&self) -> f64 {
        let quantity = self.quantity.unwrap_or(0.0);
        let unfilled = self.unfilled_quantity.unwrap_or(quantity);
        (quantity - unfilled).max(0.0)
    }
}

/// What the quoting side asks the gateway to place.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub order_type: OrderType,
    pub price: f64,
    pub volume: f64,
}

impl OrderRequest {
    pub fn limit(symbol: impl Into<String>, direction: Direction, price: f64, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            order_type: OrderType::Limit,
            price,
            volume,
        }
    }

    /// Stop order; `trigger` is sent as `trigger_on`.
    pub fn stop(symbol: impl Into<String>, direction: Direction, trigger: f64, volume: f64) -> Self {
        Self {
            order_type: OrderType::Stop,
            ..Self::limit(symbol, direction, trigger, volume)
        }
    }

    /// Body for `POST /v3/contracts/orders`. Quantity is whole contracts.
    pub fn to_body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert(
            "symbol".to_string(),
            Value::from(self.symbol.to_ascii_uppercase()),
        );
        body.insert(
            "direction".to_string(),
            Value::from(self.direction.as_exchange_str()),
        );
        body.insert(
            "type".to_string(),
            Value::from(self.order_type.as_exchange_str()),
        );
        body.insert(
            "quantity".to_string(),
            Value::from(self.volume.trunc() as i64),
        );
        match self.order_type {
            OrderType::Limit => {
                body.insert("price".to_string(), Value::from(self.price));
            }
            OrderType::Stop => {
                body.insert("trigger_on".to_string(), Value::from(self.price));
            }
            OrderType::Market => {}
        }
        body
    }
}

/// One tracked order. `exchange_id` is `None` only while the order is provisional.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub exchange_id: Option<ExchangeOrderId>,
    pub local_id: Option<LocalOrderId>,
    pub symbol: String,
    pub direction: Direction,
    pub order_type: OrderType,
    pub price: f64,
    pub volume: f64,
    pub filled: f64,
    pub status: OrderStatus,
    pub created_at_ms: i64,
    pub updated_at: Instant,
}

impl Order {
    pub(crate) fn provisional(local_id: LocalOrderId, request: &OrderRequest, now_ms: i64) -> Self {
        Self {
            exchange_id: None,
            local_id: Some(local_id),
            symbol: request.symbol.to_ascii_uppercase(),
            direction: request.direction,
            order_type: request.order_type,
            price: request.price,
            volume: request.volume,
            filled: 0.0,
            status: OrderStatus::Pending,
            created_at_ms: now_ms,
            updated_at: Instant::now(),
        }
    }

    /// Builds a record from the first exchange payload seen for an id.
    pub(crate) fn from_raw(raw: &RawOrder, default_symbol: &str) -> Option<Self> {
        let direction = Direction::from_exchange(&raw.direction)?;
        let order_type = OrderType::from_exchange(&raw.order_type).unwrap_or(OrderType::Limit);
        let symbol = raw
            .symbol
            .as_deref()
            .filter(|symbol| !symbol.is_empty())
            .unwrap_or(default_symbol)
            .to_ascii_uppercase();

        Some(Self {
            exchange_id: Some(raw.exchange_id()),
            local_id: None,
            symbol,
            direction,
            order_type,
            price: raw.price.unwrap_or(0.0),
            volume: raw.quantity.unwrap_or(0.0),
            filled: raw.filled(),
            status: OrderStatus::from_exchange(&raw.status).unwrap_or(OrderStatus::Pending),
            created_at_ms: raw.created_at,
            updated_at: Instant::now(),
        })
    }

    /// Applies an incremental update. Filled volume never decreases and a
    /// terminal order is never touched again. Returns whether anything changed.
    pub fn apply_update(&mut self, filled: f64, status: Option<OrderStatus>) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let mut changed = false;
        if filled > self.filled {
            self.filled = filled;
            changed = true;
        }
        if let Some(next) = status {
            if next != self.status && self.status.can_transition_to(next) {
                self.status = next;
                changed = true;
            }
        }
        if changed {
            self.updated_at = Instant::now();
        }
        changed
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Immutable view of the open-order set handed to readers.
#[derive(Debug, Clone, Default)]
pub struct OpenOrders {
    orders: BTreeMap<ExchangeOrderId, Order>,
}

impl OpenOrders {
    pub fn new(orders: BTreeMap<ExchangeOrderId, Order>) -> Self {
        Self { orders }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn get(&self, id: ExchangeOrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn contains(&self, id: ExchangeOrderId) -> bool {
        self.orders.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ExchangeOrderId, &Order)> {
        self.orders.iter()
    }

    pub fn for_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a Order> + 'a {
        self.orders
            .values()
            .filter(move |order| order.symbol.eq_ignore_ascii_case(symbol))
    }
}
