use std::{collections::BTreeMap, time::Duration, time::Instant};

use chrono::Utc;
use reqwest::Method;
use serde_json::{Map, Value};

use super::{
    auth::RequestSigner,
    errors::{Error, Result, ServerErr},
};
use crate::{
    models::OrderRequest,
    types::{ExchangeOrderId, LocalOrderId},
};

pub const PATH_CONTRACTS: &str = "/v2/public/contracts/symbols";
pub const PATH_ACCOUNTS: &str = "/v3/contracts/accounts";
pub const PATH_OPEN_ORDERS: &str = "/v3/contracts/orders/open";
pub const PATH_ORDERS: &str = "/v3/contracts/orders";

/// Correlation token carried by every request so completions can be routed
/// back to the operation that issued them.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    QueryContracts,
    QueryAccounts,
    QueryOpenOrders { issued_at: Instant },
    PlaceOrder(LocalOrderId),
    CancelOrder(ExchangeOrderId),
}

#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub body: Option<Map<String, Value>>,
    pub kind: RequestKind,
}

impl RestRequest {
    fn get(path: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            params: BTreeMap::new(),
            body: None,
            kind,
        }
    }

    pub fn query_contracts() -> Self {
        Self::get(PATH_CONTRACTS, RequestKind::QueryContracts)
    }

    pub fn query_accounts() -> Self {
        Self::get(PATH_ACCOUNTS, RequestKind::QueryAccounts)
    }

    pub fn query_open_orders() -> Self {
        Self::get(
            PATH_OPEN_ORDERS,
            RequestKind::QueryOpenOrders {
                issued_at: Instant::now(),
            },
        )
    }

    pub fn place_order(local_id: LocalOrderId, order: &OrderRequest) -> Self {
        Self {
            method: Method::POST,
            path: PATH_ORDERS.to_string(),
            params: BTreeMap::new(),
            body: Some(order.to_body()),
            kind: RequestKind::PlaceOrder(local_id),
        }
    }

    pub fn cancel_order(id: ExchangeOrderId) -> Self {
        Self {
            method: Method::POST,
            path: format!("{PATH_ORDERS}/{id}/cancel"),
            params: BTreeMap::new(),
            body: None,
            kind: RequestKind::CancelOrder(id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestOptions {
    pub proxy: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// One signed HTTP session. Each transport worker owns its own instance so
/// the connection pool size follows the configured session count.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    signer: RequestSigner,
}

impl RestClient {
    pub fn new(signer: RequestSigner, options: &RestOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .pool_max_idle_per_host(1)
            .tcp_nodelay(true);
        if let Some(proxy) = options.proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            http: builder.build()?,
            signer,
        })
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    /// Signs and sends `request`, returning the decoded response envelope.
    pub async fn execute(&self, request: &RestRequest) -> Result<Value> {
        let timestamp = Utc::now().timestamp_millis();
        let headers = self.signer.sign(
            &request.method,
            &request.path,
            &request.params,
            timestamp,
            request.body.as_ref(),
        )?;

        let url = format!("{}{}", self.signer.host(), request.path);
        let mut builder = self.http.request(request.method.clone(), url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.body(encode_body(body)?);
        }
        builder = headers.apply(builder);

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(map_rest_error(status, &text));
        }

        let value: Value = serde_json::from_str(&text)?;
        check_envelope(status, value)
    }
}

/// JSON text sent on the wire. Keys come out sorted, the same order the
/// signed form encoding uses.
pub(crate) fn encode_body(body: &Map<String, Value>) -> Result<String> {
    Ok(serde_json::to_string(body)?)
}

pub(crate) fn map_rest_error(status: u16, text: &str) -> Error {
    if status == 429 {
        let retry_after = serde_json::from_str::<ServerErr>(text)
            .ok()
            .and_then(|server| server.retry_after);
        return Error::RateLimited { retry_after };
    }
    match serde_json::from_str::<Value>(text) {
        Ok(body) => match serde_json::from_value::<ServerErr>(body.clone()) {
            Ok(server) => Error::Server {
                status,
                message: server.msg.unwrap_or_default(),
                code: server.status,
                body,
            },
            Err(_) => Error::Http {
                status,
                body: text.to_string(),
            },
        },
        Err(_) => Error::Http {
            status,
            body: text.to_string(),
        },
    }
}

/// A 2xx answer can still carry a rejection in its `status` field.
pub(crate) fn check_envelope(http_status: u16, value: Value) -> Result<Value> {
    match value.get("status").and_then(Value::as_i64) {
        Some(0) | None => Ok(value),
        Some(code) => {
            let message = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Err(Error::Server {
                status: http_status,
                message,
                code: Some(code),
                body: value,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fmex_client::auth::form_body, types::Direction};
    use serde_json::json;

    #[test]
    fn test_request_builders() {
        let cancel = RestRequest::cancel_order(ExchangeOrderId::new(1_234));
        assert_eq!(cancel.method, Method::POST);
        assert_eq!(cancel.path, "/v3/contracts/orders/1234/cancel");
        assert_eq!(cancel.kind, RequestKind::CancelOrder(ExchangeOrderId::new(1_234)));
        assert!(cancel.body.is_none());

        let order = OrderRequest::limit("btcusd_p", Direction::Long, 9960.0, 2.0);
        let place = RestRequest::place_order(LocalOrderId::new(7), &order);
        assert_eq!(place.path, PATH_ORDERS);
        assert_eq!(place.kind, RequestKind::PlaceOrder(LocalOrderId::new(7)));
        assert_eq!(
            place.body.as_ref().and_then(|body| body.get("symbol")),
            Some(&json!("BTCUSD_P"))
        );

        let open = RestRequest::query_open_orders();
        assert_eq!(open.method, Method::GET);
        assert!(matches!(open.kind, RequestKind::QueryOpenOrders { .. }));
    }

    #[test]
    fn test_envelope_with_nonzero_status_is_rejection() {
        let body = json!({"status": 1016, "msg": "insufficient balance"});
        match check_envelope(200, body) {
            Err(Error::Server {
                status,
                message,
                code,
                ..
            }) => {
                assert_eq!(status, 200);
                assert_eq!(message, "insufficient balance");
                assert_eq!(code, Some(1016));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let ok = json!({"status": 0, "data": {"results": []}});
        assert!(check_envelope(200, ok).is_ok());
    }

    #[test]
    fn test_map_rest_error() {
        assert!(matches!(
            map_rest_error(429, "{\"retry_after\": 3}"),
            Error::RateLimited {
                retry_after: Some(3)
            }
        ));
        assert!(matches!(
            map_rest_error(400, "{\"status\": 9, \"msg\": \"bad price\"}"),
            Error::Server { status: 400, code: Some(9), .. }
        ));
        assert!(matches!(
            map_rest_error(502, "<html>bad gateway</html>"),
            Error::Http { status: 502, .. }
        ));
    }

    #[test]
    fn test_sent_body_matches_signed_form() {
        let order = OrderRequest::stop("btcusd_p", Direction::Long, 10100.0, 3.0);
        let body = order.to_body();
        let sent = encode_body(&body).unwrap();
        let signed = form_body(&body);

        let signed_keys: Vec<&str> = signed
            .split('&')
            .filter_map(|pair| pair.split('=').next())
            .collect();
        assert_eq!(signed_keys.len(), body.len());
        let positions: Vec<usize> = signed_keys
            .iter()
            .map(|key| sent.find(&format!("\"{key}\":")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "{sent} vs {signed}");

        let decoded: Map<String, Value> = serde_json::from_str(&sent).unwrap();
        assert_eq!(decoded, body);
    }
}
