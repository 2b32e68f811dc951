use thiserror::Error;

use crate::types::ExchangeOrderId;

pub type WsResult<T> = std::result::Result<T, WsClientError>;

#[derive(Debug, Error)]
pub enum WsClientError {
    #[error("no symbols configured for subscription")]
    EmptySubscriptions,
    #[error("invalid websocket message: {0}")]
    InvalidMessage(String),
    #[error("message missing type field")]
    MissingMessageType,
    #[error("unsupported websocket scheme {0}")]
    UnsupportedScheme(String),
    #[error("stream command channel closed")]
    ChannelClosed,
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;

/// State inconsistencies detected while reconciling orders. Each one aborts a
/// single operation; none of them are fatal to the gateway.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("contract not found for symbol {0}")]
    MissingContract(String),
    #[error("order {0} is not in the open-order set")]
    UnknownOrder(ExchangeOrderId),
    #[error("malformed order payload: {0}")]
    MalformedOrder(String),
    #[error("request queue rejected {0}")]
    Dispatch(String),
}
