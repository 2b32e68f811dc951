use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::{WsClientError, WsResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

pub const DEFAULT_DEPTH_LEVELS: u32 = 20;
pub const DEFAULT_SNAPSHOT_DEPTH: usize = 10;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ExponentialBackoff {
    fn next(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub symbols: Vec<String>,
    /// Level requested in the `depth.L<N>` channel name.
    pub depth_levels: u32,
    /// Levels per side kept in each snapshot.
    pub snapshot_depth: usize,
    pub subscribe_ticker: bool,
    pub client_id: String,
    pub read_timeout: Duration,
    pub backoff: ExponentialBackoff,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.fmex.com/v2/ws".to_string(),
            symbols: Vec::new(),
            depth_levels: DEFAULT_DEPTH_LEVELS,
            snapshot_depth: DEFAULT_SNAPSHOT_DEPTH,
            subscribe_ticker: true,
            client_id: "fmex-connector".to_string(),
            read_timeout: Duration::from_secs(30),
            backoff: ExponentialBackoff::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub volume: f64,
}

/// Best-of-N book plus ticker fields for one symbol. Replaced as a whole on
/// every depth message and shared read-only behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSnapshot {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub last_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub exchange_ts_ms: i64,
    pub updated_at_ms: i64,
    pub sequence: u64,
}

impl QuoteSnapshot {
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().to_ascii_uppercase(),
            bids: Vec::new(),
            asks: Vec::new(),
            last_price: 0.0,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            volume: 0.0,
            exchange_ts_ms: 0,
            updated_at_ms: 0,
            sequence: 0,
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Connected,
    Disconnected,
    Hello,
    Tick(Arc<QuoteSnapshot>),
    /// Ticker fields were folded into the symbol's state.
    Ticker(String),
    OrderPush(Value),
    Pong,
    Unknown(String),
}

/// Pure per-connection parsing state. Owned by the stream task, which is the
/// only writer of quote snapshots.
#[derive(Debug)]
pub struct StreamState {
    snapshot_depth: usize,
    quotes: HashMap<String, QuoteSnapshot>,
    sequence: u64,
    last_update_ms: i64,
}

impl StreamState {
    pub fn new<I, S>(symbols: I, snapshot_depth: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = Self {
            snapshot_depth,
            quotes: HashMap::new(),
            sequence: 0,
            last_update_ms: 0,
        };
        for symbol in symbols {
            state.subscribe(symbol.as_ref());
        }
        state
    }

    pub fn subscribe(&mut self, symbol: &str) {
        let symbol = symbol.to_ascii_uppercase();
        self.quotes
            .entry(symbol.clone())
            .or_insert_with(|| QuoteSnapshot::empty(symbol));
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.quotes.keys().map(String::as_str)
    }

    pub fn quote(&self, symbol: &str) -> Option<&QuoteSnapshot> {
        self.quotes.get(&symbol.to_ascii_uppercase())
    }

    /// Classifies a packet by substring match on its `type` field.
    pub fn handle_packet(&mut self, packet: &Value) -> WsResult<Option<StreamEvent>> {
        let packet_type = packet
            .get("type")
            .and_then(Value::as_str)
            .ok_or(WsClientError::MissingMessageType)?;

        if packet_type == "hello" {
            return Ok(Some(StreamEvent::Hello));
        }
        if packet_type.contains("ticker") {
            return Ok(self.apply_ticker(packet_type, packet));
        }
        if packet_type.contains("depth") {
            return Ok(self.apply_depth(packet_type, packet));
        }
        if packet_type.starts_with("order") {
            return Ok(Some(StreamEvent::OrderPush(packet.clone())));
        }
        if packet_type == "ping" || packet_type == "pong" {
            return Ok(Some(StreamEvent::Pong));
        }
        Ok(Some(StreamEvent::Unknown(packet_type.to_string())))
    }

    fn apply_depth(&mut self, packet_type: &str, packet: &Value) -> Option<StreamEvent> {
        let symbol = symbol_of(packet_type);
        let depth = self.snapshot_depth;
        let updated_at_ms = self.next_update_ms();
        self.sequence += 1;
        let sequence = self.sequence;

        let Some(current) = self.quotes.get_mut(&symbol) else {
            debug!(%symbol, "depth for unsubscribed symbol dropped");
            return None;
        };

        let snapshot = QuoteSnapshot {
            bids: ladder(packet.get("bids"), depth),
            asks: ladder(packet.get("asks"), depth),
            exchange_ts_ms: packet.get("ts").and_then(Value::as_i64).unwrap_or_default(),
            updated_at_ms,
            sequence,
            ..current.clone()
        };
        *current = snapshot.clone();
        Some(StreamEvent::Tick(Arc::new(snapshot)))
    }

    fn apply_ticker(&mut self, packet_type: &str, packet: &Value) -> Option<StreamEvent> {
        let symbol = symbol_of(packet_type);
        let Some(quote) = self.quotes.get_mut(&symbol) else {
            debug!(%symbol, "ticker for unsubscribed symbol dropped");
            return None;
        };
        let Some(ticker) = packet.get("ticker").and_then(Value::as_array) else {
            warn!(%symbol, "ticker message without ticker array");
            return None;
        };

        let field = |index: usize| ticker.get(index).and_then(Value::as_f64);
        if let Some(last) = field(0) {
            quote.last_price = last;
        }
        if let Some(open) = field(6) {
            quote.open = open;
        }
        if let Some(high) = field(7) {
            quote.high = high;
        }
        if let Some(low) = field(8) {
            quote.low = low;
        }
        if let Some(volume) = field(9) {
            quote.volume = volume;
        }
        Some(StreamEvent::Ticker(symbol))
    }

    fn next_update_ms(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis().max(self.last_update_ms);
        self.last_update_ms = now;
        now
    }
}

/// `depth.L20.btcusd_p` -> `BTCUSD_P`
fn symbol_of(packet_type: &str) -> String {
    packet_type
        .rsplit('.')
        .next()
        .unwrap_or(packet_type)
        .to_ascii_uppercase()
}

/// Flat `[price, volume, price, volume, ...]` array into levels.
fn ladder(values: Option<&Value>, depth: usize) -> Vec<PriceLevel> {
    let Some(values) = values.and_then(Value::as_array) else {
        return Vec::new();
    };
    values
        .chunks_exact(2)
        .filter_map(|pair| {
            Some(PriceLevel {
                price: pair[0].as_f64()?,
                volume: pair[1].as_f64()?,
            })
        })
        .take(depth)
        .collect()
}

pub fn depth_channel(depth_levels: u32, symbol: &str) -> String {
    format!("depth.L{depth_levels}.{}", symbol.to_ascii_lowercase())
}

pub fn ticker_channel(symbol: &str) -> String {
    format!("ticker.{}", symbol.to_ascii_lowercase())
}

pub fn subscribe_message(channel: &str) -> Value {
    json!({"cmd": "sub", "args": [channel]})
}

pub fn heartbeat_message(client_id: &str, epoch_secs: i64) -> Value {
    json!({"cmd": "ping", "args": [epoch_secs], "id": client_id})
}

#[derive(Debug)]
pub enum StreamCommand {
    Heartbeat,
    Subscribe(String),
    Shutdown,
}

/// Cloneable control side of a running [`MarketDataStream`].
#[derive(Debug, Clone)]
pub struct StreamHandle {
    commands: mpsc::UnboundedSender<StreamCommand>,
}

impl StreamHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<StreamCommand>) -> Self {
        Self { commands }
    }

    pub fn heartbeat(&self) -> WsResult<()> {
        self.send(StreamCommand::Heartbeat)
    }

    pub fn subscribe(&self, symbol: impl Into<String>) -> WsResult<()> {
        self.send(StreamCommand::Subscribe(symbol.into()))
    }

    pub fn shutdown(&self) -> WsResult<()> {
        self.send(StreamCommand::Shutdown)
    }

    fn send(&self, command: StreamCommand) -> WsResult<()> {
        self.commands
            .send(command)
            .map_err(|_| WsClientError::ChannelClosed)
    }
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// One persistent connection per venue, reconnecting with backoff.
pub struct MarketDataStream {
    config: WsConfig,
    url: Url,
    state: StreamState,
}

impl MarketDataStream {
    pub fn new(config: WsConfig) -> WsResult<Self> {
        let url = Url::parse(&config.url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(WsClientError::UnsupportedScheme(other.to_string())),
        }
        if config.symbols.is_empty() {
            return Err(WsClientError::EmptySubscriptions);
        }
        let state = StreamState::new(&config.symbols, config.snapshot_depth);
        Ok(Self { config, url, state })
    }

    pub fn spawn(self, events: mpsc::UnboundedSender<StreamEvent>) -> (StreamHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(commands_rx, events));
        (StreamHandle::new(commands_tx), task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<StreamCommand>,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) {
        use rand::Rng;

        let mut delay = self.config.backoff.initial;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    info!(url = %self.url, attempts, "stream connected");
                    attempts = 0;
                    delay = self.config.backoff.initial;
                    let _ = events.send(StreamEvent::Connected);

                    let end = self.drive(stream, &mut commands, &events).await;
                    let _ = events.send(StreamEvent::Disconnected);
                    match end {
                        Ok(SessionEnd::Shutdown) => {
                            info!("stream shut down");
                            return;
                        }
                        Ok(SessionEnd::Disconnected) => warn!("stream disconnected"),
                        Err(err) => warn!("stream error: {err}"),
                    }
                }
                Err(err) => warn!(attempts, "stream connect failed: {err}"),
            }

            let jitter = rand::thread_rng().gen_range(0.9..1.1);
            let wait = delay.mul_f64(jitter);
            warn!("reconnecting in {wait:?}");
            delay = self.config.backoff.next(delay);

            let sleep = tokio::time::sleep(wait);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    command = commands.recv() => match command {
                        Some(StreamCommand::Shutdown) | None => {
                            info!("stream shut down while reconnecting");
                            return;
                        }
                        Some(StreamCommand::Subscribe(symbol)) => self.state.subscribe(&symbol),
                        Some(StreamCommand::Heartbeat) => {}
                    }
                }
            }
        }
    }

    async fn drive(
        &mut self,
        stream: WsStream,
        commands: &mut mpsc::UnboundedReceiver<StreamCommand>,
        events: &mpsc::UnboundedSender<StreamEvent>,
    ) -> WsResult<SessionEnd> {
        let (mut write, mut read) = stream.split();
        let read_timeout = self.config.read_timeout;

        loop {
            tokio::select! {
                message = tokio::time::timeout(read_timeout, read.next()) => match message {
                    Err(_) => {
                        debug!("stream quiet, continuing");
                    }
                    Ok(None) => return Ok(SessionEnd::Disconnected),
                    Ok(Some(Err(err))) => return Err(err.into()),
                    Ok(Some(Ok(Message::Text(text)))) => {
                        self.on_text(&text, &mut write, events).await?;
                    }
                    Ok(Some(Ok(Message::Binary(binary)))) => match decode_binary(binary) {
                        Ok(text) => self.on_text(&text, &mut write, events).await?,
                        Err(err) => warn!("dropping binary frame: {err}"),
                    },
                    Ok(Some(Ok(Message::Ping(payload)))) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Ok(Some(Ok(Message::Close(frame)))) => {
                        info!(?frame, "stream closed by server");
                        return Ok(SessionEnd::Disconnected);
                    }
                    Ok(Some(Ok(_))) => {}
                },
                command = commands.recv() => match command {
                    Some(StreamCommand::Heartbeat) => {
                        let ping = heartbeat_message(&self.config.client_id, Utc::now().timestamp());
                        write.send(Message::Text(ping.to_string())).await?;
                    }
                    Some(StreamCommand::Subscribe(symbol)) => {
                        self.state.subscribe(&symbol);
                        self.send_subscriptions_for(&symbol, &mut write).await?;
                    }
                    Some(StreamCommand::Shutdown) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }

    async fn on_text(
        &mut self,
        text: &str,
        write: &mut WsSink,
        events: &mpsc::UnboundedSender<StreamEvent>,
    ) -> WsResult<()> {
        let packet: Value = match serde_json::from_str(text) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("unparseable stream message: {err}");
                return Ok(());
            }
        };

        let event = match self.state.handle_packet(&packet) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(()),
            Err(err) => {
                debug!(%packet, "skipping stream message: {err}");
                return Ok(());
            }
        };

        match event {
            StreamEvent::Hello => {
                let symbols: Vec<String> = self.state.symbols().map(str::to_string).collect();
                for symbol in symbols {
                    self.send_subscriptions_for(&symbol, write).await?;
                }
            }
            StreamEvent::Tick(_) | StreamEvent::OrderPush(_) => {
                if events.send(event).is_err() {
                    debug!("stream event receiver dropped");
                }
            }
            StreamEvent::Unknown(kind) => debug!(%kind, "unhandled stream message"),
            _ => {}
        }
        Ok(())
    }

    async fn send_subscriptions_for(&self, symbol: &str, write: &mut WsSink) -> WsResult<()> {
        let depth = depth_channel(self.config.depth_levels, symbol);
        info!(channel = %depth, "subscribing");
        write
            .send(Message::Text(subscribe_message(&depth).to_string()))
            .await?;
        if self.config.subscribe_ticker {
            let ticker = ticker_channel(symbol);
            write
                .send(Message::Text(subscribe_message(&ticker).to_string()))
                .await?;
        }
        Ok(())
    }
}

/// Binary frames carry the same JSON as text frames.
fn decode_binary(binary: Vec<u8>) -> WsResult<String> {
    String::from_utf8(binary).map_err(|err| {
        WsClientError::InvalidMessage(format!("{} bytes, not utf8: {err}", err.as_bytes().len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_packet(symbol: &str, bid: f64, ask: f64) -> Value {
        let bids: Vec<f64> = (0..15)
            .flat_map(|i| [bid - 0.5 * i as f64, 100.0 + i as f64])
            .collect();
        let asks: Vec<f64> = (0..15)
            .flat_map(|i| [ask + 0.5 * i as f64, 200.0 + i as f64])
            .collect();
        json!({
            "type": format!("depth.L20.{symbol}"),
            "ts": 1_560_000_000_123i64,
            "seq": 1,
            "bids": bids,
            "asks": asks,
        })
    }

    fn tick(event: Option<StreamEvent>) -> Arc<QuoteSnapshot> {
        match event {
            Some(StreamEvent::Tick(snapshot)) => snapshot,
            other => panic!("expected tick, got {other:?}"),
        }
    }

    #[test]
    fn test_hello_triggers_handshake_event() {
        let mut state = StreamState::new(["BTCUSD_P"], 10);
        let event = state.handle_packet(&json!({"type": "hello", "ts": 1})).unwrap();
        assert!(matches!(event, Some(StreamEvent::Hello)));
    }

    #[test]
    fn test_depth_replaces_ladders_up_to_depth() {
        let mut state = StreamState::new(["BTCUSD_P"], 10);
        let snapshot = tick(
            state
                .handle_packet(&depth_packet("btcusd_p", 9999.5, 10000.0))
                .unwrap(),
        );

        assert_eq!(snapshot.symbol, "BTCUSD_P");
        assert_eq!(snapshot.bids.len(), 10);
        assert_eq!(snapshot.asks.len(), 10);
        assert_eq!(
            snapshot.best_bid(),
            Some(PriceLevel {
                price: 9999.5,
                volume: 100.0
            })
        );
        assert_eq!(snapshot.best_ask().map(|level| level.price), Some(10000.0));
        assert_eq!(snapshot.asks[9].price, 10004.5);
        assert_eq!(snapshot.exchange_ts_ms, 1_560_000_000_123);
    }

    #[test]
    fn test_latest_depth_wins() {
        let mut state = StreamState::new(["BTCUSD_P"], 10);
        let first = tick(state.handle_packet(&depth_packet("btcusd_p", 9999.5, 10000.0)).unwrap());
        let second = tick(state.handle_packet(&depth_packet("btcusd_p", 9990.0, 9990.5)).unwrap());

        assert!(second.sequence > first.sequence);
        assert!(second.updated_at_ms >= first.updated_at_ms);
        assert_eq!(state.quote("btcusd_p").map(|q| q.bids[0].price), Some(9990.0));
        assert_eq!(first.bids[0].price, 9999.5);
    }

    #[test]
    fn test_unsubscribed_symbol_dropped() {
        let mut state = StreamState::new(["BTCUSD_P"], 10);
        let event = state
            .handle_packet(&depth_packet("ethusd_p", 200.0, 200.5))
            .unwrap();
        assert!(event.is_none());
        assert!(state.quote("ETHUSD_P").is_none());
    }

    #[test]
    fn test_short_depth_arrays_are_accepted() {
        let mut state = StreamState::new(["BTCUSD_P"], 10);
        let packet = json!({
            "type": "depth.L20.btcusd_p",
            "bids": [9999.5, 10, 9999.0, 5],
            "asks": [10000.0, 3],
        });
        let snapshot = tick(state.handle_packet(&packet).unwrap());
        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(snapshot.asks.len(), 1);
    }

    #[test]
    fn test_ticker_fields_carry_into_snapshot() {
        let mut state = StreamState::new(["BTCUSD_P"], 10);
        let ticker = json!({
            "type": "ticker.btcusd_p",
            "ticker": [10001.0, 5.0, 10000.5, 3.0, 10001.5, 7.0, 9800.0, 10100.0, 9700.0, 123456.0, 12.3]
        });
        let event = state.handle_packet(&ticker).unwrap();
        assert!(matches!(event, Some(StreamEvent::Ticker(symbol)) if symbol == "BTCUSD_P"));

        let snapshot = tick(state.handle_packet(&depth_packet("btcusd_p", 9999.5, 10000.0)).unwrap());
        assert_eq!(snapshot.last_price, 10001.0);
        assert_eq!(snapshot.open, 9800.0);
        assert_eq!(snapshot.high, 10100.0);
        assert_eq!(snapshot.low, 9700.0);
        assert_eq!(snapshot.volume, 123456.0);
    }

    #[test]
    fn test_classification() {
        let mut state = StreamState::new(["BTCUSD_P"], 10);
        assert!(matches!(
            state.handle_packet(&json!({"type": "orders", "id": 1})).unwrap(),
            Some(StreamEvent::OrderPush(_))
        ));
        assert!(matches!(
            state.handle_packet(&json!({"type": "ping", "ts": 1})).unwrap(),
            Some(StreamEvent::Pong)
        ));
        assert!(matches!(
            state.handle_packet(&json!({"data": []})),
            Err(WsClientError::MissingMessageType)
        ));
    }

    #[test]
    fn test_wire_messages() {
        assert_eq!(depth_channel(20, "BTCUSD_P"), "depth.L20.btcusd_p");
        assert_eq!(
            subscribe_message(&depth_channel(20, "BTCUSD_P")),
            json!({"cmd": "sub", "args": ["depth.L20.btcusd_p"]})
        );
        assert_eq!(
            heartbeat_message("quoter-1", 1_560_000_000),
            json!({"cmd": "ping", "args": [1_560_000_000], "id": "quoter-1"})
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let backoff = ExponentialBackoff::default();
        let mut delay = backoff.initial;
        for _ in 0..20 {
            delay = backoff.next(delay);
        }
        assert_eq!(delay, backoff.max);
    }

    #[test]
    fn test_stream_rejects_bad_config() {
        let config = WsConfig {
            url: "https://api.fmex.com/v2/ws".to_string(),
            symbols: vec!["BTCUSD_P".to_string()],
            ..WsConfig::default()
        };
        assert!(matches!(
            MarketDataStream::new(config),
            Err(WsClientError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            MarketDataStream::new(WsConfig::default()),
            Err(WsClientError::EmptySubscriptions)
        ));
    }

    #[test]
    fn test_binary_frames_decode_or_are_rejected() {
        let packet = br#"{"type":"hello"}"#.to_vec();
        assert_eq!(decode_binary(packet).unwrap(), r#"{"type":"hello"}"#);

        assert!(matches!(
            decode_binary(vec![0x7b, 0xff, 0xfe, 0x7d]),
            Err(WsClientError::InvalidMessage(_))
        ));
    }
}
