//! A scripted in-memory sync server.
//!
//! Tests enqueue canned replies; the server records every request it
//! sees so assertions can inspect exactly what the engine pushed.

use notelock_protocol::{SyncRequest, SyncResponse};
use notelock_sync::{HttpClient, HttpResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// One canned reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// A successful sync response.
    Response(SyncResponse),
    /// An HTTP status with a body.
    Status(u16, String),
    /// A transport-level failure.
    TransportError(String),
    /// Sleep, then respond (for watchdog tests).
    Delayed(Duration, SyncResponse),
}

/// An `HttpClient` that replays scripted replies in order.
///
/// When the script runs dry it answers with an empty response carrying a
/// fresh sync token, so continuation rounds terminate.
#[derive(Debug, Default)]
pub struct ScriptedServer {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<SyncRequest>>,
}

impl ScriptedServer {
    /// Creates a server with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a successful response.
    pub fn push_response(&self, response: SyncResponse) {
        self.replies.lock().push_back(ScriptedReply::Response(response));
    }

    /// Enqueues an HTTP error status.
    pub fn push_status(&self, status: u16, body: impl Into<String>) {
        self.replies
            .lock()
            .push_back(ScriptedReply::Status(status, body.into()));
    }

    /// Enqueues a transport failure.
    pub fn push_transport_error(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .push_back(ScriptedReply::TransportError(message.into()));
    }

    /// Enqueues a delayed response.
    pub fn push_delayed(&self, delay: Duration, response: SyncResponse) {
        self.replies
            .lock()
            .push_back(ScriptedReply::Delayed(delay, response));
    }

    /// Every request body received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn fallback_response(&self) -> SyncResponse {
        SyncResponse {
            sync_token: Some(format!("t-auto-{}", self.request_count())),
            ..SyncResponse::default()
        }
    }
}

impl HttpClient for ScriptedServer {
    fn post_json(
        &self,
        _url: &str,
        body: &str,
        _bearer_token: Option<&str>,
    ) -> Result<HttpResponse, String> {
        let request: SyncRequest =
            serde_json::from_str(body).map_err(|e| format!("bad request body: {e}"))?;
        self.requests.lock().push(request);

        let reply = self.replies.lock().pop_front();
        match reply {
            None => Ok(HttpResponse::ok(
                serde_json::to_string(&self.fallback_response()).expect("serializable"),
            )),
            Some(ScriptedReply::Response(response)) => Ok(HttpResponse::ok(
                serde_json::to_string(&response).expect("serializable"),
            )),
            Some(ScriptedReply::Status(status, body)) => {
                Ok(HttpResponse::with_status(status, body))
            }
            Some(ScriptedReply::TransportError(message)) => Err(message),
            Some(ScriptedReply::Delayed(delay, response)) => {
                std::thread::sleep(delay);
                Ok(HttpResponse::ok(
                    serde_json::to_string(&response).expect("serializable"),
                ))
            }
        }
    }
}
