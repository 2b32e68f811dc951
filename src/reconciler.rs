use std::{
    collections::{btree_map::Entry, BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Instant,
};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    errors::{ReconcileError, ReconcileResult},
    events::GatewayEvent,
    fmex_client::{RequestSink, RestRequest},
    models::{AccountBalance, Contract, OpenOrders, Order, OrderRequest, RawContract, RawOrder},
    order_ids::LocalOrderIds,
    types::{ExchangeOrderId, LocalOrderId, OrderStatus},
};

/// How many terminal ids are remembered to block late updates from reviving them.
const RETIRED_CAPACITY: usize = 50_000;

/// Sole owner of order state. Every mutation goes through here, on the
/// gateway task; readers receive immutable snapshots through a `watch` channel.
pub struct OrderReconciler<S> {
    default_symbol: String,
    ids: LocalOrderIds,
    sink: S,
    contracts: HashMap<String, Contract>,
    balances: HashMap<String, AccountBalance>,
    open: BTreeMap<ExchangeOrderId, Order>,
    provisional: HashMap<LocalOrderId, Order>,
    place_tags: HashMap<LocalOrderId, String>,
    cancel_tags: HashMap<ExchangeOrderId, String>,
    retired: HashSet<ExchangeOrderId>,
    retired_fifo: VecDeque<ExchangeOrderId>,
    snapshot: watch::Sender<Arc<OpenOrders>>,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl<S: RequestSink> OrderReconciler<S> {
    pub fn new(
        default_symbol: impl Into<String>,
        ids: LocalOrderIds,
        sink: S,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) -> (Self, watch::Receiver<Arc<OpenOrders>>) {
        let (snapshot, receiver) = watch::channel(Arc::new(OpenOrders::default()));
        let reconciler = Self {
            default_symbol: default_symbol.into().to_ascii_uppercase(),
            ids,
            sink,
            contracts: HashMap::new(),
            balances: HashMap::new(),
            open: BTreeMap::new(),
            provisional: HashMap::new(),
            place_tags: HashMap::new(),
            cancel_tags: HashMap::new(),
            retired: HashSet::new(),
            retired_fifo: VecDeque::new(),
            snapshot,
            events,
        };
        (reconciler, receiver)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn contract(&self, symbol: &str) -> Option<&Contract> {
        self.contracts.get(&symbol.to_ascii_uppercase())
    }

    pub fn balance(&self, currency: &str) -> Option<&AccountBalance> {
        self.balances.get(&currency.to_ascii_uppercase())
    }

    pub fn open_order(&self, id: ExchangeOrderId) -> Option<&Order> {
        self.open.get(&id)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn provisional_count(&self) -> usize {
        self.provisional.len()
    }

    pub fn query_contracts(&self) {
        self.sink.dispatch(RestRequest::query_contracts());
    }

    pub fn query_accounts(&self) {
        self.sink.dispatch(RestRequest::query_accounts());
    }

    pub fn query_open_orders(&self) {
        self.sink.dispatch(RestRequest::query_open_orders());
    }

    /// Records a provisional order and dispatches the placement. Fails without
    /// side effects when the contract is unknown or the request is dropped.
    /// `algo` tags the logs of this placement until it completes.
    pub fn submit(&mut self, algo: &str, request: OrderRequest) -> ReconcileResult<Order> {
        let symbol = request.symbol.to_ascii_uppercase();
        if !self.contracts.contains_key(&symbol) {
            error!(algo, %symbol, "contract not found, order not sent");
            return Err(ReconcileError::MissingContract(symbol));
        }

        let local_id = self.ids.next();
        let order = Order::provisional(local_id, &request, Utc::now().timestamp_millis());
        if !self
            .sink
            .dispatch(RestRequest::place_order(local_id, &request))
        {
            warn!(algo, %local_id, "placement dropped by transport");
            return Err(ReconcileError::Dispatch(format!("order {local_id}")));
        }

        debug!(
            algo,
            %local_id,
            %symbol,
            direction = %request.direction,
            price = request.price,
            volume = request.volume,
            "order submitted"
        );
        self.provisional.insert(local_id, order.clone());
        self.place_tags.insert(local_id, algo.to_string());
        self.emit(GatewayEvent::Order(order.clone()));
        Ok(order)
    }

    /// Dispatches a cancel for an order in the open set. Unknown ids are a no-op.
    pub fn cancel(&mut self, algo: &str, id: ExchangeOrderId) -> ReconcileResult<()> {
        if !self.open.contains_key(&id) {
            warn!(algo, order_id = %id, "order not found, cancel skipped");
            return Err(ReconcileError::UnknownOrder(id));
        }
        if !self.sink.dispatch(RestRequest::cancel_order(id)) {
            warn!(algo, order_id = %id, "cancel dropped by transport");
            return Err(ReconcileError::Dispatch(format!("cancel {id}")));
        }
        self.cancel_tags.insert(id, algo.to_string());
        Ok(())
    }

    pub fn on_rest_order_update(&mut self, raw: RawOrder) -> Option<Order> {
        self.merge(raw, None)
    }

    pub fn on_stream_order_update(&mut self, payload: &Value) -> Option<Order> {
        let raw = match parse_order(payload) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("ignoring stream order push: {err}");
                return None;
            }
        };
        self.merge(raw, None)
    }

    /// Placement acknowledged: retire the provisional record into the
    /// exchange-keyed one.
    pub fn on_order_acknowledged(&mut self, local_id: LocalOrderId, response: &Value) -> Option<Order> {
        let provisional = self.provisional.remove(&local_id);
        let algo = self.place_tags.remove(&local_id).unwrap_or_default();
        match parse_order(response) {
            Ok(raw) => {
                debug!(%local_id, order_id = raw.id, "order acknowledged");
                self.merge(raw, Some(local_id))
            }
            Err(err) => {
                if provisional.is_some() {
                    warn!(%algo, %local_id, "acknowledgment without order payload: {err}");
                }
                None
            }
        }
    }

    /// Placement rejected or lost: the provisional order becomes `rejected`.
    pub fn on_order_send_failed(&mut self, local_id: LocalOrderId, reason: &str) -> Option<Order> {
        let algo = self.place_tags.remove(&local_id).unwrap_or_default();
        let Some(mut order) = self.provisional.remove(&local_id) else {
            debug!(%local_id, "send failure for unknown provisional order");
            return None;
        };
        order.status = OrderStatus::Rejected;
        order.updated_at = Instant::now();
        warn!(%algo, %local_id, %reason, "order rejected");
        self.emit(GatewayEvent::Order(order.clone()));
        Some(order)
    }

    pub fn on_cancel_acknowledged(&mut self, id: ExchangeOrderId, response: &Value) -> Option<Order> {
        self.cancel_tags.remove(&id);
        match parse_order(response) {
            Ok(raw) => self.merge(raw, None),
            Err(_) => {
                debug!(order_id = %id, "cancel acknowledged without order payload");
                None
            }
        }
    }

    pub fn on_cancel_failed(&mut self, id: ExchangeOrderId, reason: &str) {
        let algo = self.cancel_tags.remove(&id).unwrap_or_default();
        warn!(%algo, order_id = %id, %reason, "cancel failed");
    }

    /// Applies a full open-order poll. The snapshot is authoritative, except
    /// that records touched after `issued_at` are kept: they raced the poll.
    /// Emits `NoOpenOrders` when nothing is left open afterwards.
    pub fn on_open_orders(&mut self, response: &Value, issued_at: Instant) {
        let Some(results) = response
            .pointer("/data/results")
            .and_then(Value::as_array)
        else {
            warn!("open orders response missing data.results");
            return;
        };

        let mut previous = std::mem::take(&mut self.open);
        let mut next = BTreeMap::new();
        for item in results {
            let raw = match serde_json::from_value::<RawOrder>(item.clone()) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("skipping malformed open order: {err}");
                    continue;
                }
            };
            let id = raw.exchange_id();
            if self.retired.contains(&id) {
                continue;
            }

            let status = self.translate_status(&raw);
            let (order, changed) = match previous.remove(&id) {
                Some(mut order) => {
                    let changed = order.apply_update(raw.filled(), status);
                    (order, changed)
                }
                None => match Order::from_raw(&raw, &self.default_symbol) {
                    Some(order) => (order, true),
                    None => {
                        warn!(order_id = raw.id, "skipping open order with unknown direction");
                        continue;
                    }
                },
            };

            if changed {
                self.emit(GatewayEvent::Order(order.clone()));
            }
            if order.status.is_terminal() {
                self.retire(id);
            } else {
                next.insert(id, order);
            }
        }

        for (id, order) in previous {
            if order.updated_at > issued_at {
                next.insert(id, order);
            } else {
                debug!(order_id = %id, "order no longer open");
            }
        }

        if next.is_empty() {
            self.emit(GatewayEvent::NoOpenOrders);
        }
        self.open = next;
        let snapshot = self.publish();
        self.emit(GatewayEvent::Orders(snapshot));
    }

    pub fn on_contracts(&mut self, response: &Value) {
        let Some(items) = response.get("data").and_then(Value::as_array) else {
            warn!("contracts response missing data");
            return;
        };
        for item in items {
            match serde_json::from_value::<RawContract>(item.clone()) {
                Ok(raw) => {
                    let contract = Contract::from(raw);
                    self.contracts
                        .insert(contract.symbol.clone(), contract.clone());
                    self.emit(GatewayEvent::Contract(contract));
                }
                Err(err) => warn!("skipping malformed contract: {err}"),
            }
        }
        info!(count = self.contracts.len(), "contracts loaded");
    }

    /// Balances are replaced wholesale; only non-zero ones are reported.
    pub fn on_accounts(&mut self, response: &Value) {
        let Some(accounts) = response.get("data").and_then(Value::as_object) else {
            warn!("accounts response missing data");
            return;
        };

        let mut balances = HashMap::with_capacity(accounts.len());
        for (currency, amounts) in accounts {
            let amount = |index: usize| {
                amounts
                    .get(index)
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
            };
            let balance = AccountBalance {
                currency: currency.to_ascii_uppercase(),
                available: amount(0),
                frozen: amount(1),
            };
            if balance.balance() != 0.0 {
                self.emit(GatewayEvent::Account(balance.clone()));
            }
            balances.insert(balance.currency.clone(), balance);
        }
        self.balances = balances;
    }

    pub fn snapshot(&self) -> Arc<OpenOrders> {
        Arc::clone(&self.snapshot.borrow())
    }

    fn merge(&mut self, raw: RawOrder, local_id: Option<LocalOrderId>) -> Option<Order> {
        let id = raw.exchange_id();
        if self.retired.contains(&id) {
            debug!(order_id = %id, status = %raw.status, "ignoring update for finished order");
            return None;
        }

        let status = self.translate_status(&raw);
        let (order, changed) = match self.open.entry(id) {
            Entry::Occupied(mut entry) => {
                let order = entry.get_mut();
                let mut changed = order.apply_update(raw.filled(), status);
                if order.local_id.is_none() && local_id.is_some() {
                    order.local_id = local_id;
                    changed = true;
                }
                (order.clone(), changed)
            }
            Entry::Vacant(entry) => {
                let Some(mut order) = Order::from_raw(&raw, &self.default_symbol) else {
                    warn!(order_id = %id, direction = %raw.direction, "order with unknown direction");
                    return None;
                };
                order.local_id = local_id;
                entry.insert(order.clone());
                (order, true)
            }
        };

        if order.status.is_terminal() {
            self.open.remove(&id);
            self.retire(id);
        }
        if changed {
            self.publish();
            self.emit(GatewayEvent::Order(order.clone()));
        }
        Some(order)
    }

    fn translate_status(&self, raw: &RawOrder) -> Option<OrderStatus> {
        let status = OrderStatus::from_exchange(&raw.status);
        if status.is_none() && !raw.status.is_empty() {
            warn!(order_id = raw.id, status = %raw.status, "unknown order status");
        }
        status
    }

    fn retire(&mut self, id: ExchangeOrderId) {
        self.cancel_tags.remove(&id);
        if self.retired.insert(id) {
            self.retired_fifo.push_back(id);
            if self.retired_fifo.len() > RETIRED_CAPACITY {
                if let Some(oldest) = self.retired_fifo.pop_front() {
                    self.retired.remove(&oldest);
                }
            }
        }
    }

    fn publish(&self) -> Arc<OpenOrders> {
        let snapshot = Arc::new(OpenOrders::new(self.open.clone()));
        self.snapshot.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    fn emit(&self, event: GatewayEvent) {
        if self.events.send(event).is_err() {
            debug!("gateway event receiver dropped");
        }
    }
}

/// Order payloads arrive either bare or wrapped in a `data` envelope.
fn parse_order(payload: &Value) -> ReconcileResult<RawOrder> {
    let body = match payload.get("data") {
        Some(data) if data.is_object() => data,
        _ => payload,
    };
    serde_json::from_value(body.clone()).map_err(|err| ReconcileError::MalformedOrder(err.to_string()))
}
