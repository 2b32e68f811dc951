//! Signed REST access to the FMEX contracts API.
//!
//! [`RestClient`] signs and sends one request at a time; [`Transport`] runs a
//! pool of them behind a non-blocking queue and reports completions as
//! [`RestEvent`]s tagged with the [`RequestKind`] that issued them.

mod auth;
mod errors;
mod rest;
mod transport;

pub use auth::{RequestSigner, SignedHeaders};
pub use errors::{Error, Result};
pub use rest::{
    RequestKind, RestClient, RestOptions, RestRequest, PATH_ACCOUNTS, PATH_CONTRACTS,
    PATH_OPEN_ORDERS, PATH_ORDERS,
};
pub use transport::{RateLimit, RequestSink, RestEvent, Transport, REQUEST_QUEUE_DEPTH};

#[cfg(test)]
pub(crate) use transport::testing;
