//! In-memory provider that replays a fixed script.
//!
//! Used by the test suites and by `--offline` runs of the relay binary, where
//! no network access to a real provider is wanted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::Mutex;

use crate::upstream::{
    ChatStreamRequest, CompletionProvider, DeltaStream, UpstreamError, UpstreamModel,
};

/// One step of a scripted completion.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Yield this delta.
    Delta(String),
    /// Sleep before the next step.
    Pause(Duration),
    /// Fail the stream with this message.
    Fail(String),
}

/// Scripted provider; cheap to clone, clones share call counters.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    models: Option<Vec<UpstreamModel>>,
    open_error: Option<String>,
    steps: Vec<ScriptStep>,
    list_calls: Arc<AtomicUsize>,
    stream_calls: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Option<ChatStreamRequest>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream that yields each delta in order, then ends.
    pub fn with_deltas<I, S>(mut self, deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = deltas
            .into_iter()
            .map(|d| ScriptStep::Delta(d.into()))
            .collect();
        self
    }

    pub fn with_steps(mut self, steps: Vec<ScriptStep>) -> Self {
        self.steps = steps;
        self
    }

    /// Model list returned by `list_models`; without one the call fails.
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<u32>)>,
        S: Into<String>,
    {
        self.models = Some(
            models
                .into_iter()
                .map(|(id, max_tokens)| UpstreamModel {
                    id: id.into(),
                    max_tokens,
                })
                .collect(),
        );
        self
    }

    /// Make `stream_completion` fail before yielding anything.
    pub fn failing_open(mut self, message: impl Into<String>) -> Self {
        self.open_error = Some(message.into());
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub async fn last_request(&self) -> Option<ChatStreamRequest> {
        self.last_request.lock().await.clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn list_models(&self) -> Result<Vec<UpstreamModel>, UpstreamError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.models
            .clone()
            .ok_or_else(|| UpstreamError::Transport("connection refused".to_string()))
    }

    async fn stream_completion(
        &self,
        request: ChatStreamRequest,
    ) -> Result<DeltaStream, UpstreamError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().await = Some(request);

        if let Some(message) = &self.open_error {
            return Err(UpstreamError::Other(message.clone()));
        }

        let steps = self.steps.clone().into_iter();
        Ok(Box::pin(stream::unfold(Some(steps), |steps| async move {
            let mut steps = steps?;
            loop {
                match steps.next()? {
                    ScriptStep::Delta(text) => return Some((Ok(text), Some(steps))),
                    ScriptStep::Pause(d) => tokio::time::sleep(d).await,
                    ScriptStep::Fail(message) => {
                        return Some((Err(UpstreamError::Other(message)), None))
                    }
                }
            }
        })))
    }
}
