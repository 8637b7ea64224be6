//! Completion relay: forwards upstream deltas as a raw chunked text body.
//!
//! Lifecycle of one relayed request:
//! 1. Validate the browser request and apply parameter defaults
//! 2. Open the upstream stream and wait for the first non-empty delta
//!    (failures up to here become JSON error responses)
//! 3. Commit headers and forward each delta as one body chunk, in order
//! 4. On upstream failure or timeout mid-stream, abort the body so the
//!    client sees a truncated transfer instead of a clean end
//!
//! The body is pull-driven: the upstream is only read when hyper asks for the
//! next chunk, so a slow client slows the upstream read instead of filling
//! memory. Dropping the body (client gone) drops the upstream stream with it.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use thiserror::Error;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::CompletionDefaults;
use crate::contract::{ChatMessage, CompletionRequest};
use crate::server::error::RelayError;
use crate::upstream::{ChatStreamRequest, CompletionProvider, DeltaStream};

/// Why a committed body was cut short.
#[derive(Error, Debug)]
pub enum RelayAbort {
    #[error("upstream failed mid-stream: {0}")]
    Upstream(String),

    #[error("stream exceeded its time budget")]
    Timeout,
}

#[derive(Debug, Clone, Copy)]
pub struct RelayLimits {
    /// Bound on opening the stream and on the wait for the first delta.
    pub connect: Duration,
    /// Bound on the whole exchange, first byte to last.
    pub total: Duration,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Turn a browser request into the upstream call.
///
/// Prompts and model must be present and non-empty. Falsy temperature and
/// token budget (absent or zero) take the configured defaults. Ranges are not
/// checked here.
pub fn prepare_request(
    request: CompletionRequest,
    defaults: &CompletionDefaults,
) -> Result<ChatStreamRequest, RelayError> {
    let (Some(system_prompt), Some(user_prompt), Some(model)) = (
        non_empty(request.system_prompt),
        non_empty(request.user_prompt),
        non_empty(request.model),
    ) else {
        return Err(RelayError::MissingParameter);
    };

    let temperature = request
        .temperature
        .filter(|t| *t != 0.0 && !t.is_nan())
        .unwrap_or(defaults.temperature);
    let max_tokens = request
        .max_tokens
        .filter(|n| *n > 0)
        .unwrap_or(defaults.max_tokens);

    Ok(ChatStreamRequest {
        model,
        messages: vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ],
        temperature,
        max_tokens,
    })
}

/// An opened relay whose headers have not been sent yet.
pub struct RelayStream {
    request_id: String,
    first: Option<String>,
    upstream: DeltaStream,
    deadline: Instant,
}

impl std::fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStream")
            .field("request_id", &self.request_id)
            .field("first", &self.first)
            .finish()
    }
}

/// Open the upstream stream and read up to the first non-empty delta.
pub async fn open_relay(
    provider: Arc<dyn CompletionProvider>,
    request: ChatStreamRequest,
    limits: RelayLimits,
    request_id: String,
) -> Result<RelayStream, RelayError> {
    let deadline = Instant::now() + limits.total;

    let mut upstream = match timeout(limits.connect, provider.stream_completion(request)).await {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(e)) => {
            error!(%request_id, error = %e, "Upstream completion request failed");
            return Err(RelayError::UpstreamUnavailable(e.to_string()));
        }
        Err(_) => {
            warn!(%request_id, "Timed out opening upstream stream");
            return Err(RelayError::Timeout("opening completion stream".to_string()));
        }
    };

    let first_deadline = deadline.min(Instant::now() + limits.connect);
    let first = loop {
        match timeout_at(first_deadline, upstream.next()).await {
            Ok(Some(Ok(delta))) if delta.is_empty() => continue,
            Ok(Some(Ok(delta))) => break Some(delta),
            Ok(Some(Err(e))) => {
                error!(%request_id, error = %e, "Upstream failed before first delta");
                return Err(RelayError::UpstreamUnavailable(e.to_string()));
            }
            Ok(None) => break None,
            Err(_) => {
                warn!(%request_id, "Timed out waiting for first delta");
                return Err(RelayError::Timeout("waiting for first delta".to_string()));
            }
        }
    };

    debug!(%request_id, empty = first.is_none(), "Upstream stream open");

    Ok(RelayStream {
        request_id,
        first,
        upstream,
        deadline,
    })
}

/// Per-body state. Owns the upstream stream, so dropping it releases both sides.
struct BodyState {
    request_id: String,
    first: Option<String>,
    upstream: DeltaStream,
    deadline: Instant,
    fragments: usize,
    bytes: usize,
    outcome: Option<&'static str>,
}

impl BodyState {
    fn emit(&mut self, delta: String) -> Bytes {
        self.fragments += 1;
        self.bytes += delta.len();
        Bytes::from(delta)
    }

    /// Record why the body ended; read by the closing log line.
    fn close(&mut self, outcome: &'static str) {
        self.outcome = Some(outcome);
    }
}

impl Drop for BodyState {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or("client disconnected");
        info!(
            request_id = %self.request_id,
            fragments = self.fragments,
            bytes = self.bytes,
            outcome,
            "Relay closed"
        );
    }
}

impl RelayStream {
    /// The response body as a stream of chunks, one per non-empty delta.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, RelayAbort>> + Send {
        let state = BodyState {
            request_id: self.request_id,
            first: self.first,
            upstream: self.upstream,
            deadline: self.deadline,
            fragments: 0,
            bytes: 0,
            outcome: None,
        };

        stream::unfold(state, |mut state| async move {
            if state.outcome.is_some() {
                return None;
            }
            if let Some(first) = state.first.take() {
                let chunk = state.emit(first);
                return Some((Ok(chunk), state));
            }

            loop {
                match timeout_at(state.deadline, state.upstream.next()).await {
                    Ok(Some(Ok(delta))) if delta.is_empty() => continue,
                    Ok(Some(Ok(delta))) => {
                        let chunk = state.emit(delta);
                        return Some((Ok(chunk), state));
                    }
                    Ok(Some(Err(e))) => {
                        error!(request_id = %state.request_id, error = %e, "Upstream failed mid-stream, aborting body");
                        state.close("upstream error");
                        return Some((Err(RelayAbort::Upstream(e.to_string())), state));
                    }
                    Ok(None) => {
                        state.close("completed");
                        return None;
                    }
                    Err(_) => {
                        warn!(request_id = %state.request_id, "Stream time budget exhausted, aborting body");
                        state.close("timeout");
                        return Some((Err(RelayAbort::Timeout), state));
                    }
                }
            }
        })
    }
}

impl IntoResponse for RelayStream {
    fn into_response(self) -> Response {
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(self.into_stream()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}
