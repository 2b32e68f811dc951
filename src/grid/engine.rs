use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{config::GridConfig, strategy::GridStrategy, types::GridDecision};
use crate::{
    events::EventHandler,
    gateway::OrderRouter,
    models::{OpenOrders, Order, OrderRequest},
    ws_client::QuoteSnapshot,
};

/// Hosts a [`GridStrategy`] and carries out its decisions through an
/// [`OrderRouter`]. All sends and cancels are fire-and-forget; the next
/// evaluation sees their effect through the open-order snapshot.
pub struct GridEngine<R> {
    strategy: GridStrategy,
    router: R,
    ladder_empty: bool,
}

impl<R: OrderRouter> GridEngine<R> {
    pub fn new(config: GridConfig, router: R) -> Self {
        Self {
            strategy: GridStrategy::new(config),
            router,
            ladder_empty: false,
        }
    }

    pub fn strategy(&self) -> &GridStrategy {
        &self.strategy
    }

    fn algo(&self) -> &str {
        &self.strategy.config().algo_name
    }

    /// Evaluates against the router's current snapshot and acts on the result.
    pub fn evaluate(&mut self) -> GridDecision {
        let snapshot: Arc<OpenOrders> = self.router.open_orders();
        let symbol = self.strategy.config().symbol.clone();

        let decision = if self.ladder_empty && snapshot.for_symbol(&symbol).next().is_none() {
            info!(algo = self.algo(), "no open orders, rebuilding ladder");
            self.strategy.rebuild()
        } else {
            self.ladder_empty = false;
            self.strategy.evaluate(snapshot.for_symbol(&symbol))
        };
        self.execute(&decision);
        decision
    }

    fn execute(&mut self, decision: &GridDecision) {
        let cfg = self.strategy.config();
        match decision {
            GridDecision::Skip(reason) => {
                if *reason == "zero_volume" {
                    warn!(algo = %cfg.algo_name, "order volume is zero, skipping");
                } else {
                    debug!(algo = %cfg.algo_name, reason, "evaluation skipped");
                }
            }
            GridDecision::CancelAll(ids) => {
                warn!(
                    algo = %cfg.algo_name,
                    open = ids.len(),
                    threshold = cfg.runaway_threshold(),
                    "open order count exceeds ladder capacity, cancelling all"
                );
                for id in ids {
                    self.router.cancel_order(&cfg.algo_name, *id);
                }
            }
            GridDecision::Adjust { cancels, places } => {
                for id in cancels {
                    debug!(algo = %cfg.algo_name, order_id = %id, "cancelling drifted order");
                    self.router.cancel_order(&cfg.algo_name, *id);
                }
                for rung in places {
                    self.router.send_order(
                        &cfg.algo_name,
                        OrderRequest::limit(cfg.symbol.clone(), rung.direction, rung.price, rung.volume),
                    );
                }
                if !cancels.is_empty() || !places.is_empty() {
                    info!(
                        algo = %cfg.algo_name,
                        cancels = cancels.len(),
                        places = places.len(),
                        "ladder adjusted"
                    );
                }
                if !places.is_empty() {
                    self.ladder_empty = false;
                }
            }
        }
    }
}

impl<R: OrderRouter> EventHandler for GridEngine<R> {
    fn name(&self) -> &str {
        self.algo()
    }

    fn handle_tick(&mut self, tick: &Arc<QuoteSnapshot>) {
        self.strategy.on_tick(tick);
    }

    fn handle_timer(&mut self) {
        if self.strategy.on_timer() {
            self.evaluate();
        }
    }

    fn handle_order_update(&mut self, order: &Order) {
        if order.symbol.eq_ignore_ascii_case(&self.strategy.config().symbol) && order.is_active() {
            self.ladder_empty = false;
        }
    }

    fn handle_no_open_orders(&mut self) {
        self.ladder_empty = true;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use crate::{
        gateway::OrderRouter,
        models::{OpenOrders, OrderRequest},
        types::ExchangeOrderId,
    };

    /// Router that records calls and serves a fixed snapshot.
    #[derive(Clone, Default)]
    pub(crate) struct FakeRouter {
        pub(crate) sent: Arc<Mutex<Vec<OrderRequest>>>,
        pub(crate) cancelled: Arc<Mutex<Vec<ExchangeOrderId>>>,
        pub(crate) snapshot: Arc<Mutex<Arc<OpenOrders>>>,
        pub(crate) tags: Arc<Mutex<Vec<String>>>,
    }

    impl FakeRouter {
        pub(crate) fn set_snapshot(&self, orders: OpenOrders) {
            *self.snapshot.lock().unwrap() = Arc::new(orders);
        }

        pub(crate) fn sent(&self) -> Vec<OrderRequest> {
            self.sent.lock().unwrap().clone()
        }

        pub(crate) fn cancelled(&self) -> Vec<ExchangeOrderId> {
            self.cancelled.lock().unwrap().clone()
        }

        /// Strategy tags of every send and cancel, in call order.
        pub(crate) fn tags(&self) -> Vec<String> {
            self.tags.lock().unwrap().clone()
        }
    }

    impl OrderRouter for FakeRouter {
        fn send_order(&self, algo: &str, request: OrderRequest) {
            self.tags.lock().unwrap().push(algo.to_string());
            self.sent.lock().unwrap().push(request);
        }

        fn cancel_order(&self, algo: &str, id: ExchangeOrderId) {
            self.tags.lock().unwrap().push(algo.to_string());
            self.cancelled.lock().unwrap().push(id);
        }

        fn open_orders(&self) -> Arc<OpenOrders> {
            Arc::clone(&self.snapshot.lock().unwrap())
        }
    }
}
