//! Upstream LLM provider access.
//!
//! The relay only needs two capabilities from a provider, both captured by
//! [`CompletionProvider`]:
//! - [`openai`]: HTTP client for OpenAI-compatible APIs
//! - [`scripted`]: in-memory provider replaying canned deltas and failures

pub mod openai;
pub mod scripted;

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use thiserror::Error;

use crate::contract::ChatMessage;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("malformed upstream payload: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        UpstreamError::Transport(e.to_string())
    }
}

/// A model entry as reported by the provider, before catalog shaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamModel {
    pub id: String,
    /// Context ceiling, when the provider reports one.
    pub max_tokens: Option<u32>,
}

/// Parameters of one streaming chat completion.
#[derive(Debug, Clone)]
pub struct ChatStreamRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Lazy, finite, non-restartable sequence of text deltas.
///
/// An `Err` item ends the sequence; nothing is yielded after it.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

/// The two provider capabilities the relay depends on.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// List every model the provider exposes.
    async fn list_models(&self) -> Result<Vec<UpstreamModel>, UpstreamError>;

    /// Open a streaming chat completion.
    ///
    /// Errors returned here happen before any delta exists. Failures after the
    /// stream is open arrive as an `Err` item of the returned stream.
    async fn stream_completion(
        &self,
        request: ChatStreamRequest,
    ) -> Result<DeltaStream, UpstreamError>;
}
