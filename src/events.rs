use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::{
    gateway::GatewayHandle,
    models::{AccountBalance, Contract, OpenOrders, Order},
    ws_client::QuoteSnapshot,
};

pub const DEFAULT_TIMER_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the gateway reports to the host.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Tick(Arc<QuoteSnapshot>),
    Order(Order),
    /// A full open-order snapshot was applied.
    Orders(Arc<OpenOrders>),
    /// The latest snapshot contained no open orders at all.
    NoOpenOrders,
    Account(AccountBalance),
    Contract(Contract),
}

/// Capabilities a strategy exposes to the host. Every method has a no-op
/// default so implementors only override what they react to.
pub trait EventHandler: Send {
    fn name(&self) -> &str;

    fn handle_tick(&mut self, _tick: &Arc<QuoteSnapshot>) {}

    fn handle_timer(&mut self) {}

    fn handle_order_update(&mut self, _order: &Order) {}

    fn handle_no_open_orders(&mut self) {}
}

/// Minimal host: one timer and the gateway's event feed, fanned out to every
/// registered handler on a single task.
pub struct EventEngine {
    handlers: Vec<Box<dyn EventHandler>>,
    timer_interval: Duration,
    gateway: Option<GatewayHandle>,
}

impl Default for EventEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TIMER_INTERVAL)
    }
}

impl EventEngine {
    pub fn new(timer_interval: Duration) -> Self {
        Self {
            handlers: Vec::new(),
            timer_interval,
            gateway: None,
        }
    }

    /// The gateway also receives every timer tick.
    pub fn with_gateway(mut self, gateway: GatewayHandle) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn register(&mut self, handler: Box<dyn EventHandler>) {
        info!(handler = handler.name(), "handler registered");
        self.handlers.push(handler);
    }

    pub fn dispatch(&mut self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Tick(tick) => {
                for handler in &mut self.handlers {
                    handler.handle_tick(tick);
                }
            }
            GatewayEvent::Order(order) => {
                for handler in &mut self.handlers {
                    handler.handle_order_update(order);
                }
            }
            GatewayEvent::NoOpenOrders => {
                for handler in &mut self.handlers {
                    handler.handle_no_open_orders();
                }
            }
            GatewayEvent::Orders(orders) => {
                debug!(open = orders.len(), "open-order snapshot applied");
            }
            GatewayEvent::Account(balance) => {
                info!(
                    currency = %balance.currency,
                    available = balance.available,
                    frozen = balance.frozen,
                    "account balance"
                );
            }
            GatewayEvent::Contract(contract) => {
                debug!(symbol = %contract.symbol, tick = contract.price_tick, "contract loaded");
            }
        }
    }

    pub fn on_timer(&mut self) {
        if let Some(gateway) = self.gateway.as_ref() {
            gateway.on_timer();
        }
        for handler in &mut self.handlers {
            handler.handle_timer();
        }
    }

    /// Runs until `shutdown` flips to `true` or the event feed closes.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<GatewayEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut timer = tokio::time::interval(self.timer_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => self.on_timer(),
                event = events.recv() => match event {
                    Some(event) => self.dispatch(&event),
                    None => {
                        info!("gateway event feed closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("event engine stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counts {
        ticks: usize,
        timers: usize,
        orders: usize,
        empty: usize,
    }

    struct Recorder(Arc<Mutex<Counts>>);

    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn handle_tick(&mut self, _tick: &Arc<QuoteSnapshot>) {
            self.0.lock().unwrap().ticks += 1;
        }

        fn handle_timer(&mut self) {
            self.0.lock().unwrap().timers += 1;
        }

        fn handle_no_open_orders(&mut self) {
            self.0.lock().unwrap().empty += 1;
        }

        fn handle_order_update(&mut self, _order: &Order) {
            self.0.lock().unwrap().orders += 1;
        }
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let mut engine = EventEngine::default();
        engine.register(Box::new(Recorder(Arc::clone(&counts))));
        engine.register(Box::new(Recorder(Arc::clone(&counts))));

        engine.dispatch(&GatewayEvent::Tick(Arc::new(QuoteSnapshot::empty("BTCUSD_P"))));
        engine.dispatch(&GatewayEvent::NoOpenOrders);
        engine.dispatch(&GatewayEvent::Orders(Arc::new(OpenOrders::default())));
        engine.on_timer();

        let counts = counts.lock().unwrap();
        assert_eq!(counts.ticks, 2);
        assert_eq!(counts.empty, 2);
        assert_eq!(counts.timers, 2);
        assert_eq!(counts.orders, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = EventEngine::new(Duration::from_millis(10));

        let task = tokio::spawn(engine.run(events_rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
