use std::sync::Arc;

use anyhow::Result;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::ConnectionConfig,
    events::GatewayEvent,
    fmex_client::{
        RateLimit, RequestKind, RequestSigner, RequestSink, RestClient, RestEvent, Transport,
    },
    models::{OpenOrders, OrderRequest},
    order_ids::LocalOrderIds,
    reconciler::OrderReconciler,
    types::ExchangeOrderId,
    ws_client::{MarketDataStream, StreamEvent, StreamHandle},
};

/// What a quoting engine needs from the venue. Sends and cancels are
/// fire-and-forget; results come back as order events.
///
/// `algo` names the calling strategy and tags every log record about the request.
pub trait OrderRouter: Send {
    fn send_order(&self, algo: &str, request: OrderRequest);

    fn cancel_order(&self, algo: &str, id: ExchangeOrderId);

    /// Latest published open-order set.
    fn open_orders(&self) -> Arc<OpenOrders>;
}

#[derive(Debug)]
pub enum GatewayCommand {
    SendOrder { algo: String, request: OrderRequest },
    CancelOrder { algo: String, id: ExchangeOrderId },
    Timer,
    Shutdown,
}

/// Cloneable front of a running gateway task.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    commands: mpsc::UnboundedSender<GatewayCommand>,
    open_orders: watch::Receiver<Arc<OpenOrders>>,
}

impl GatewayHandle {
    pub fn new(
        commands: mpsc::UnboundedSender<GatewayCommand>,
        open_orders: watch::Receiver<Arc<OpenOrders>>,
    ) -> Self {
        Self {
            commands,
            open_orders,
        }
    }

    pub fn on_timer(&self) {
        self.send(GatewayCommand::Timer);
    }

    pub fn shutdown(&self) {
        self.send(GatewayCommand::Shutdown);
    }

    fn send(&self, command: GatewayCommand) {
        if let Err(err) = self.commands.send(command) {
            warn!(command = ?err.0, "gateway is not running");
        }
    }
}

impl OrderRouter for GatewayHandle {
    fn send_order(&self, algo: &str, request: OrderRequest) {
        self.send(GatewayCommand::SendOrder {
            algo: algo.to_string(),
            request,
        });
    }

    fn cancel_order(&self, algo: &str, id: ExchangeOrderId) {
        self.send(GatewayCommand::CancelOrder {
            algo: algo.to_string(),
            id,
        });
    }

    fn open_orders(&self) -> Arc<OpenOrders> {
        Arc::clone(&self.open_orders.borrow())
    }
}

/// Owns the reconciler and routes REST completions, stream events and host
/// commands into it from a single task.
pub struct FmexGateway<S> {
    reconciler: OrderReconciler<S>,
    stream: Option<StreamHandle>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    heartbeat_ticks: u32,
    heartbeat_count: u32,
}

impl<S: RequestSink> FmexGateway<S> {
    pub fn new(
        reconciler: OrderReconciler<S>,
        stream: Option<StreamHandle>,
        events: mpsc::UnboundedSender<GatewayEvent>,
        heartbeat_ticks: u32,
    ) -> Self {
        Self {
            reconciler,
            stream,
            events,
            heartbeat_ticks: heartbeat_ticks.max(1),
            heartbeat_count: 0,
        }
    }

    pub fn reconciler(&self) -> &OrderReconciler<S> {
        &self.reconciler
    }

    pub fn into_reconciler(self) -> OrderReconciler<S> {
        self.reconciler
    }

    /// Startup queries: contracts, balances, then open orders.
    pub fn connect(&self) {
        self.reconciler.query_contracts();
        self.reconciler.query_accounts();
        self.reconciler.query_open_orders();
        info!("gateway connected, startup queries sent");
    }

    /// Every tick polls open orders; every `heartbeat_ticks` ticks pings the stream.
    pub fn on_timer(&mut self) {
        self.reconciler.sink().refill();
        self.reconciler.query_open_orders();

        self.heartbeat_count += 1;
        if self.heartbeat_count >= self.heartbeat_ticks {
            self.heartbeat_count = 0;
            if let Some(stream) = self.stream.as_ref() {
                if let Err(err) = stream.heartbeat() {
                    warn!("heartbeat not sent: {err}");
                }
            }
        }
    }

    /// Returns `false` once the gateway should stop.
    pub fn handle_command(&mut self, command: GatewayCommand) -> bool {
        match command {
            GatewayCommand::SendOrder { algo, request } => {
                if let Err(err) = self.reconciler.submit(&algo, request) {
                    debug!(%algo, "order not sent: {err}");
                }
            }
            GatewayCommand::CancelOrder { algo, id } => {
                if let Err(err) = self.reconciler.cancel(&algo, id) {
                    debug!(%algo, "cancel not sent: {err}");
                }
            }
            GatewayCommand::Timer => self.on_timer(),
            GatewayCommand::Shutdown => return false,
        }
        true
    }

    pub fn handle_rest_event(&mut self, event: RestEvent) {
        match event {
            RestEvent::Completed { kind, data } => match kind {
                RequestKind::QueryContracts => self.reconciler.on_contracts(&data),
                RequestKind::QueryAccounts => self.reconciler.on_accounts(&data),
                RequestKind::QueryOpenOrders { issued_at } => {
                    self.reconciler.on_open_orders(&data, issued_at)
                }
                RequestKind::PlaceOrder(local_id) => {
                    self.reconciler.on_order_acknowledged(local_id, &data);
                }
                RequestKind::CancelOrder(id) => {
                    self.reconciler.on_cancel_acknowledged(id, &data);
                }
            },
            RestEvent::Failed { kind, status, body } => match kind {
                RequestKind::PlaceOrder(local_id) => {
                    let reason = format!("status {status}: {body}");
                    self.reconciler.on_order_send_failed(local_id, &reason);
                }
                RequestKind::CancelOrder(id) => {
                    self.reconciler
                        .on_cancel_failed(id, &format!("status {status}: {body}"));
                }
                other => debug!(kind = ?other, status, "query rejected"),
            },
            RestEvent::Errored { kind, error, .. } => match kind {
                RequestKind::PlaceOrder(local_id) => {
                    self.reconciler.on_order_send_failed(local_id, &error);
                }
                RequestKind::CancelOrder(id) => self.reconciler.on_cancel_failed(id, &error),
                // Queries are re-issued on the next timer tick.
                _ => {}
            },
        }
    }

    pub fn handle_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Tick(snapshot) => {
                if self.events.send(GatewayEvent::Tick(snapshot)).is_err() {
                    debug!("gateway event receiver dropped");
                }
            }
            StreamEvent::OrderPush(payload) => {
                self.reconciler.on_stream_order_update(&payload);
            }
            StreamEvent::Connected => info!("market data stream up"),
            StreamEvent::Disconnected => warn!("market data stream down"),
            _ => {}
        }
    }

    /// Drives the gateway until a shutdown command arrives. Returns itself so
    /// the caller can tear down the transport.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<GatewayCommand>,
        mut rest_events: mpsc::UnboundedReceiver<RestEvent>,
        mut stream_events: mpsc::UnboundedReceiver<StreamEvent>,
    ) -> Self {
        self.connect();
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = rest_events.recv() => self.handle_rest_event(event),
                Some(event) = stream_events.recv() => self.handle_stream_event(event),
            }
        }

        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown();
        }
        info!("gateway stopped");
        self
    }
}

impl FmexGateway<Transport> {
    /// See [`spawn`].
    pub fn spawn(
        config: &ConnectionConfig,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Result<(GatewayHandle, JoinHandle<()>)> {
        spawn(config, events)
    }
}

/// Wires transport, reconciler and stream for `config` and starts the gateway
/// task. Gateway events are delivered to `events`.
pub fn spawn(
    config: &ConnectionConfig,
    events: mpsc::UnboundedSender<GatewayEvent>,
) -> Result<(GatewayHandle, JoinHandle<()>)> {
    let signer = RequestSigner::new(&config.api_key, &config.api_secret, config.rest_host())?;
    let options = config.rest_options();
    let clients = (0..config.session_number)
        .map(|_| RestClient::new(signer.clone(), &options))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let (rest_tx, rest_rx) = mpsc::unbounded_channel();
    let transport = Transport::start(
        clients,
        Arc::new(RateLimit::new(config.rate_limit_per_sec)),
        rest_tx,
    );
    info!(
        sessions = transport.session_count(),
        host = config.rest_host(),
        "rest transport started"
    );

    let (reconciler, open_orders) = OrderReconciler::new(
        config.default_symbol(),
        LocalOrderIds::new_session(),
        transport,
        events.clone(),
    );

    let (stream_tx, stream_rx) = mpsc::unbounded_channel();
    let (stream, stream_task) = MarketDataStream::new(config.ws_config())?.spawn(stream_tx);

    let gateway = FmexGateway::new(reconciler, Some(stream), events, config.heartbeat_ticks);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let gateway = gateway.run(commands_rx, rest_rx, stream_rx).await;
        if let Err(err) = stream_task.await {
            warn!("stream task ended abnormally: {err}");
        }
        gateway.into_reconciler().into_sink().shutdown().await;
    });

    Ok((GatewayHandle::new(commands_tx, open_orders), task))
}
