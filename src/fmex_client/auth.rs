use std::{collections::BTreeMap, fmt};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::{header, Method, RequestBuilder};
use serde_json::{Map, Value};
use sha1::Sha1;

use super::errors::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

pub(crate) const HEADER_TIMESTAMP: &str = "FC-ACCESS-TIMESTAMP";
pub(crate) const HEADER_KEY: &str = "FC-ACCESS-KEY";
pub(crate) const HEADER_SIGNATURE: &str = "FC-ACCESS-SIGNATURE";

/// Computes the `FC-ACCESS-*` headers for a request.
///
/// The signed message is
/// `METHOD + host + path + sorted query + timestamp_ms + form-encoded sorted body`,
/// base64-encoded, then HMAC-SHA1'd with the API secret and base64-encoded again.
#[derive(Clone)]
pub struct RequestSigner {
    api_key: String,
    secret: String,
    host: String,
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("api_key", &self.api_key)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub timestamp: String,
    pub api_key: String,
    pub signature: String,
}

impl SignedHeaders {
    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(HEADER_TIMESTAMP, &self.timestamp)
            .header(HEADER_KEY, &self.api_key)
            .header(HEADER_SIGNATURE, &self.signature)
            .header(header::CONTENT_TYPE, "application/json")
    }
}

impl RequestSigner {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        host: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let secret = secret.into();
        if api_key.is_empty() {
            return Err(Error::InvalidConfig {
                field: "api_key",
                why: "must not be empty",
            });
        }
        if secret.is_empty() {
            return Err(Error::InvalidConfig {
                field: "api_secret",
                why: "must not be empty",
            });
        }
        Ok(Self {
            api_key,
            secret,
            host: host.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn signing_payload(
        &self,
        method: &Method,
        path: &str,
        params: &BTreeMap<String, String>,
        timestamp_ms: i64,
        body: Option<&Map<String, Value>>,
    ) -> String {
        let mut message = String::with_capacity(128);
        message.push_str(method.as_str());
        message.push_str(&self.host);
        message.push_str(path);
        message.push_str(&sorted_query(params));
        message.push_str(&timestamp_ms.to_string());
        if let Some(body) = body {
            message.push_str(&form_body(body));
        }
        message
    }

    pub fn sign(
        &self,
        method: &Method,
        path: &str,
        params: &BTreeMap<String, String>,
        timestamp_ms: i64,
        body: Option<&Map<String, Value>>,
    ) -> Result<SignedHeaders> {
        let payload = self.signing_payload(method, path, params, timestamp_ms, body);
        let encoded = STANDARD.encode(payload.as_bytes());

        let mut mac = HmacSha1::new_from_slice(self.secret.as_bytes())
            .map_err(|err| Error::Signing(err.to_string()))?;
        mac.update(encoded.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(SignedHeaders {
            timestamp: timestamp_ms.to_string(),
            api_key: self.api_key.clone(),
            signature,
        })
    }
}

/// `k=v` pairs in key order joined by `&`. Not percent-encoded.
pub(crate) fn sorted_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Body fields sorted by key and form-urlencoded, using each value's JSON text.
pub(crate) fn form_body(body: &Map<String, Value>) -> String {
    let mut fields: Vec<(&String, &Value)> = body.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields {
        serializer.append_pair(key, &form_value(value));
    }
    serializer.finish()
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::OrderRequest, types::Direction};

    const SECRET: &str = "3600d0a74aa3410fb3b1996cca2419c8";
    const TIMESTAMP: i64 = 1_523_069_544_359;

    fn signer(secret: &str) -> RequestSigner {
        RequestSigner::new("test-key", secret, "https://api.fmex.com").unwrap()
    }

    #[test]
    fn test_signature_reference_vector_post() {
        let body = OrderRequest::limit("BTCUSD_P", Direction::Short, 10040.5, 10.0).to_body();
        let signer = signer(SECRET);

        let payload = signer.signing_payload(
            &Method::POST,
            "/v3/contracts/orders",
            &BTreeMap::new(),
            TIMESTAMP,
            Some(&body),
        );
        assert_eq!(
            payload,
            "POSThttps://api.fmex.com/v3/contracts/orders1523069544359\
             direction=SHORT&price=10040.5&quantity=10&symbol=BTCUSD_P&type=LIMIT"
        );

        let headers = signer
            .sign(
                &Method::POST,
                "/v3/contracts/orders",
                &BTreeMap::new(),
                TIMESTAMP,
                Some(&body),
            )
            .unwrap();
        assert_eq!(headers.signature, "13PhfjaV/GcUPrYshgHKfJo1FGM=");
        assert_eq!(headers.timestamp, "1523069544359");
        assert_eq!(headers.api_key, "test-key");
    }

    #[test]
    fn test_signature_reference_vector_get() {
        let headers = signer(SECRET)
            .sign(
                &Method::GET,
                "/v3/contracts/orders/open",
                &BTreeMap::new(),
                TIMESTAMP,
                None,
            )
            .unwrap();
        assert_eq!(headers.signature, "pTrm3cFfwxuD2nNfV3F5QOoM67A=");
    }

    #[test]
    fn test_query_is_sorted_and_appended_without_separator() {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), "btcusd_p".to_string());
        params.insert("limit".to_string(), "20".to_string());

        let signer = signer("secret");
        let payload =
            signer.signing_payload(&Method::GET, "/v3/contracts/orders", &params, TIMESTAMP, None);
        assert_eq!(
            payload,
            "GEThttps://api.fmex.com/v3/contracts/orderslimit=20&symbol=btcusd_p1523069544359"
        );

        let headers = signer
            .sign(&Method::GET, "/v3/contracts/orders", &params, TIMESTAMP, None)
            .unwrap();
        assert_eq!(headers.signature, "Sm6LPyXu3UKmKRORCrif3zy6cUk=");
    }

    #[test]
    fn test_signature_is_deterministic() {
        let body = OrderRequest::limit("BTCUSD_P", Direction::Long, 9960.0, 5.0).to_body();
        let signer = signer(SECRET);
        let a = signer
            .sign(&Method::POST, "/v3/contracts/orders", &BTreeMap::new(), TIMESTAMP, Some(&body))
            .unwrap();
        let b = signer
            .sign(&Method::POST, "/v3/contracts/orders", &BTreeMap::new(), TIMESTAMP, Some(&body))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(matches!(
            RequestSigner::new("", "secret", "https://api.fmex.com"),
            Err(Error::InvalidConfig { field: "api_key", .. })
        ));
        assert!(matches!(
            RequestSigner::new("key", "", "https://api.fmex.com"),
            Err(Error::InvalidConfig { field: "api_secret", .. })
        ));
    }
}
