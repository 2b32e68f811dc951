use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use serde_json::Value;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

use super::{
    errors::Error,
    rest::{RequestKind, RestClient, RestRequest},
};

/// Pending requests beyond this are dropped; the quoting loop re-issues
/// whatever it still needs on its next evaluation.
pub const REQUEST_QUEUE_DEPTH: usize = 256;

/// Completion of a dispatched request, delivered out of order.
#[derive(Debug, Clone)]
pub enum RestEvent {
    Completed {
        kind: RequestKind,
        data: Value,
    },
    /// The venue answered with a rejection.
    Failed {
        kind: RequestKind,
        status: u16,
        body: Value,
    },
    /// The request never produced an answer.
    Errored {
        kind: RequestKind,
        error: String,
        connectivity: bool,
    },
}

impl RestEvent {
    pub fn kind(&self) -> &RequestKind {
        match self {
            RestEvent::Completed { kind, .. }
            | RestEvent::Failed { kind, .. }
            | RestEvent::Errored { kind, .. } => kind,
        }
    }
}

/// Where the reconciler hands requests. Dispatch never blocks.
pub trait RequestSink: Send {
    /// Returns `false` when the request was dropped.
    fn dispatch(&self, request: RestRequest) -> bool;

    /// Called on every host timer tick.
    fn refill(&self) {}
}

/// Request budget shared by all sessions, refilled on each timer tick.
#[derive(Debug)]
pub struct RateLimit {
    limit: u32,
    remaining: AtomicU32,
}

impl RateLimit {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            remaining: AtomicU32::new(limit),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok()
    }

    pub fn reset(&self) {
        self.remaining.store(self.limit, Ordering::Release);
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }
}

/// Pool of session workers pulling from one shared request queue.
pub struct Transport {
    requests: mpsc::Sender<RestRequest>,
    rate_limit: Arc<RateLimit>,
    workers: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Spawns one worker per client. Completions are sent to `events`.
    pub fn start(
        clients: Vec<RestClient>,
        rate_limit: Arc<RateLimit>,
        events: mpsc::UnboundedSender<RestEvent>,
    ) -> Self {
        let (requests, queue) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let queue = Arc::new(Mutex::new(queue));

        let workers = clients
            .into_iter()
            .enumerate()
            .map(|(session, client)| {
                tokio::spawn(run_session(
                    session,
                    client,
                    Arc::clone(&queue),
                    events.clone(),
                ))
            })
            .collect();

        Self {
            requests,
            rate_limit,
            workers,
        }
    }

    pub fn session_count(&self) -> usize {
        self.workers.len()
    }

    /// Closes the queue and waits for in-flight requests to finish.
    pub async fn shutdown(self) {
        drop(self.requests);
        for worker in self.workers {
            if let Err(err) = worker.await {
                warn!("rest session ended abnormally: {err}");
            }
        }
    }
}

impl RequestSink for Transport {
    fn refill(&self) {
        self.rate_limit.reset();
    }

    fn dispatch(&self, request: RestRequest) -> bool {
        if !self.rate_limit.try_acquire() {
            warn!(
                method = %request.method,
                path = %request.path,
                "rate limit exhausted, dropping request"
            );
            return false;
        }
        match self.requests.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    "request queue full, dropping request"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                warn!(path = %request.path, "request queue closed");
                false
            }
        }
    }
}

async fn run_session(
    session: usize,
    client: RestClient,
    queue: Arc<Mutex<mpsc::Receiver<RestRequest>>>,
    events: mpsc::UnboundedSender<RestEvent>,
) {
    debug!(session, "rest session started");
    loop {
        let next = {
            let mut queue = queue.lock().await;
            queue.recv().await
        };
        let Some(request) = next else {
            debug!(session, "request queue closed, session exiting");
            break;
        };

        let event = match client.execute(&request).await {
            Ok(data) => RestEvent::Completed {
                kind: request.kind.clone(),
                data,
            },
            Err(err) => classify_failure(session, &request, err),
        };

        if events.send(event).is_err() {
            debug!(session, "completion receiver dropped, session exiting");
            break;
        }
    }
}

fn classify_failure(session: usize, request: &RestRequest, err: Error) -> RestEvent {
    if let Some((status, body)) = err.rejection() {
        warn!(
            session,
            status,
            method = %request.method,
            path = %request.path,
            %body,
            "request failed"
        );
        return RestEvent::Failed {
            kind: request.kind.clone(),
            status,
            body,
        };
    }

    let connectivity = err.is_connectivity();
    if connectivity {
        warn!(
            session,
            method = %request.method,
            path = %request.path,
            "connectivity error: {err}"
        );
    } else {
        error!(
            session,
            method = %request.method,
            path = %request.path,
            params = ?request.params,
            body = ?request.body,
            "request errored: {err:#}"
        );
    }
    RestEvent::Errored {
        kind: request.kind.clone(),
        error: err.to_string(),
        connectivity,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::{RequestKind, RequestSink, RestRequest};

    /// Sink that records every request instead of sending it.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        requests: Arc<Mutex<Vec<RestRequest>>>,
    }

    impl RecordingSink {
        pub(crate) fn kinds(&self) -> Vec<RequestKind> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|request| request.kind.clone())
                .collect()
        }

        pub(crate) fn clear(&self) {
            self.requests.lock().unwrap().clear();
        }
    }

    impl RequestSink for RecordingSink {
        fn dispatch(&self, request: RestRequest) -> bool {
            self.requests.lock().unwrap().push(request);
            true
        }
    }
}
