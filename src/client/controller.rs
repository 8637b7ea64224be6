//! Chat session controller: drives the relay endpoints and renders the
//! streamed answer as it arrives.

use std::fmt::Display;
use std::future::Future;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::decoder::ChunkDecoder;
use crate::client::session::{CancelHandle, SessionState, SubmitOutcome, ABORTED_MESSAGE};
use crate::contract::{CompletionRequest, ModelCatalog};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{}", ABORTED_MESSAGE)]
    StreamAborted,

    #[error("HTTP error! status: {status}")]
    Http { status: u16 },

    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

/// Read a response body chunk by chunk into the session's answer.
///
/// Each chunk is decoded and appended before the next one is awaited, and
/// `render` sees the whole answer after every append. Cancellation wins over a
/// ready chunk: once `cancel` fires nothing more is appended.
pub async fn consume_stream<S, E, F>(
    session: &mut SessionState,
    body: S,
    cancel: &CancellationToken,
    mut render: F,
) -> Result<(), ClientError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
    F: FnMut(&str),
{
    let mut body = std::pin::pin!(body);
    let mut decoder = ChunkDecoder::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(ClientError::StreamAborted),

            next = body.next() => match next {
                Some(Ok(chunk)) => {
                    let text = decoder.decode(&chunk);
                    debug!(bytes = chunk.len(), chars = text.len(), "Received chunk");
                    if session.append_fragment(&text) {
                        render(session.answer().as_str());
                    }
                }
                Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
                None => {
                    let tail = decoder.finish();
                    if session.append_fragment(&tail) {
                        render(session.answer().as_str());
                    }
                    return Ok(());
                }
            },
        }
    }
}

/// Apply the terminal transition for a finished submission. Every path clears
/// the streaming flag.
pub fn settle(session: &mut SessionState, result: Result<(), ClientError>) -> SubmitOutcome {
    match result {
        Ok(()) => session.finish(),
        Err(ClientError::StreamAborted) => {
            info!("Request aborted");
            session.cancel()
        }
        Err(e) => {
            warn!(error = %e, "Streaming failed");
            session.fail(&e.to_string())
        }
    }
}

/// Client for the relay's completion API, owning one session.
pub struct ChatController {
    http: reqwest::Client,
    base_url: String,
    session: SessionState,
}

/// Cancel whatever request is in flight each time `signal` resolves `true`.
///
/// Keeps listening after every cancellation until `signal` resolves `false`
/// or the returned task is aborted.
pub fn cancel_on_signal<F, Fut>(canceller: CancelHandle, mut signal: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    tokio::spawn(async move {
        while signal().await {
            if !canceller.cancel() {
                debug!("Interrupt with no request in flight");
            }
        }
    })
}

impl ChatController {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base: String = base_url.into();
        Self {
            http,
            base_url: base.trim_end_matches('/').to_string(),
            session: SessionState::new(),
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    /// Handle that aborts whichever request is in flight when it fires.
    pub fn canceller(&self) -> CancelHandle {
        self.session.cancel_handle()
    }

    /// Fetch the model catalog into the session.
    pub async fn load_models(&mut self) -> Result<(), ClientError> {
        match self.fetch_catalog().await {
            Ok(catalog) => {
                info!(count = catalog.models.len(), "Models loaded");
                self.session.catalog_loaded(catalog.models);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch models");
                self.session.catalog_failed(&e.to_string());
                Err(e)
            }
        }
    }

    async fn fetch_catalog(&self) -> Result<ModelCatalog, ClientError> {
        let url = format!("{}/api/completion/models", self.base_url);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Http {
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// Submit the current prompts and stream the answer into the session.
    ///
    /// Any request still in flight is cancelled first. `render` is called with
    /// the full answer text after every appended chunk.
    pub async fn submit<F>(&mut self, render: F) -> SubmitOutcome
    where
        F: FnMut(&str),
    {
        let token = CancellationToken::new();
        let request = self.session.start_submit(token.clone());
        debug!(model = ?request.model, "Submitting completion request");

        let result = self.stream_answer(&request, &token, render).await;
        settle(&mut self.session, result)
    }

    async fn stream_answer<F>(
        &mut self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
        render: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(&str),
    {
        let url = format!("{}/api/completion", self.base_url);
        let send = self.http.post(&url).json(request).send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::StreamAborted),
            response = send => response?,
        };

        if !response.status().is_success() {
            return Err(ClientError::Http {
                status: response.status().as_u16(),
            });
        }

        consume_stream(&mut self.session, response.bytes_stream(), cancel, render).await
    }
}
