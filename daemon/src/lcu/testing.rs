//! Fakes shared by the session and handler tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::api::{ApiResponse, RequestError, Requester};
use super::connection::{ConnectionError, EventTransport};

/// Encodes a WAMP event frame.
pub fn frame(kind: &str, uri: &str, data: Value) -> String {
    json!([8, "OnJsonApiEvent", { "eventType": kind, "uri": uri, "data": data }]).to_string()
}

/// Transport fed from a channel. Dropping every sender reads as a peer close.
pub struct ChannelTransport {
    rx: mpsc::UnboundedReceiver<Result<String, ConnectionError>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<String, ConnectionError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }
}

#[async_trait]
impl EventTransport for ChannelTransport {
    async fn next_frame(&mut self) -> Option<Result<String, ConnectionError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Records every request. Responds `204` unless a failure is queued.
#[derive(Default)]
pub struct FakeRequester {
    calls: Mutex<Vec<RecordedRequest>>,
    failures: Mutex<VecDeque<u16>>,
}

impl FakeRequester {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next request answers with `status` instead of succeeding.
    pub fn fail_next(&self, status: u16) {
        self.failures.lock().push_back(status);
    }

    pub fn calls(&self) -> Vec<RecordedRequest> {
        self.calls.lock().clone()
    }

    /// `"METHOD /path"` for each recorded request.
    pub fn paths(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|c| format!("{} {}", c.method, c.path))
            .collect()
    }
}

#[async_trait]
impl Requester for FakeRequester {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, RequestError> {
        self.calls.lock().push(RecordedRequest {
            method: method.clone(),
            path: path.to_string(),
            body,
        });
        if let Some(status) = self.failures.lock().pop_front() {
            return Err(RequestError::Status {
                method,
                path: path.to_string(),
                status,
                body: String::new(),
            });
        }
        Ok(ApiResponse {
            status: 204,
            body: Value::Null,
        })
    }
}
