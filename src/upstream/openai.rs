//! OpenAI-compatible provider over HTTP.
//!
//! - `GET  {base}/models` for the model list
//! - `POST {base}/chat/completions` with `stream: true`, answered as an
//!   event stream whose last message is `[DONE]`

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::contract::ChatMessage;
use crate::upstream::{
    ChatStreamRequest, CompletionProvider, DeltaStream, UpstreamError, UpstreamModel,
};

/// Data of the final event of a completion stream.
const DONE_MARKER: &str = "[DONE]";

#[derive(Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ApiModelList {
    data: Vec<ApiModel>,
}

#[derive(Deserialize)]
struct ApiModel {
    id: String,
    #[serde(default)]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    choices: Vec<ApiChunkChoice>,
    #[serde(default)]
    error: Option<ApiStreamError>,
}

#[derive(Deserialize)]
struct ApiChunkChoice {
    #[serde(default)]
    delta: ApiChunkDelta,
}

#[derive(Deserialize, Default)]
struct ApiChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiStreamError {
    message: String,
}

/// HTTP client for an OpenAI-compatible chat API.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        let base: String = base_url.into();
        Ok(Self {
            client,
            base_url: base.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Build from the upstream section of the config, reading the key from the environment.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let api_key = config.api_key();
        if api_key.is_none() {
            warn!(
                env = %config.api_key_env,
                "No provider API key set; upstream calls will likely be rejected"
            );
        }
        Self::new(config.base_url.clone(), api_key, config.connect_timeout())
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(UpstreamError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

/// Map an event-source failure, reading the error body of a rejected request.
async fn event_error(error: reqwest_eventsource::Error) -> UpstreamError {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => UpstreamError::Http {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        },
        reqwest_eventsource::Error::Transport(e) => UpstreamError::from(e),
        other => UpstreamError::Decode(other.to_string()),
    }
}

/// Extract the text delta from one message's JSON data.
///
/// Chunks without content (the opening role chunk, the final usage chunk)
/// yield an empty delta.
fn parse_chunk(data: &str) -> Result<String, UpstreamError> {
    let chunk: ApiStreamChunk =
        serde_json::from_str(data).map_err(|e| UpstreamError::Decode(e.to_string()))?;
    if let Some(err) = chunk.error {
        return Err(UpstreamError::Other(err.message));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .unwrap_or_default())
}

/// Deltas of an opened event source. The source is dropped, closing the
/// connection, on `[DONE]`, on the first error, or when the stream is dropped.
fn deltas(source: EventSource) -> DeltaStream {
    Box::pin(stream::unfold(Some(source), |source| async move {
        let mut source = source?;
        loop {
            match source.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(message))) => {
                    if message.data == DONE_MARKER {
                        source.close();
                        return None;
                    }
                    return match parse_chunk(&message.data) {
                        Ok(delta) => Some((Ok(delta), Some(source))),
                        Err(e) => {
                            source.close();
                            Some((Err(e), None))
                        }
                    };
                }
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => return None,
                Some(Err(e)) => {
                    source.close();
                    return Some((Err(event_error(e).await), None));
                }
            }
        }
    }))
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn list_models(&self) -> Result<Vec<UpstreamModel>, UpstreamError> {
        let url = format!("{}/models", self.base_url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = Self::check_status(response).await?;
        let list: ApiModelList = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        debug!(count = list.data.len(), "Upstream model list received");

        Ok(list
            .data
            .into_iter()
            .map(|m| UpstreamModel {
                id: m.id,
                max_tokens: m.max_tokens,
            })
            .collect())
    }

    async fn stream_completion(
        &self,
        request: ChatStreamRequest,
    ) -> Result<DeltaStream, UpstreamError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ApiChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let builder = self.authorize(self.client.post(&url)).json(&body);
        let mut source =
            EventSource::new(builder).map_err(|e| UpstreamError::Other(e.to_string()))?;
        // A completion is not resumable; never replay the POST.
        source.set_retry_policy(Box::new(Never));

        // Wait for the response so a rejected request fails here, before any delta.
        match source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(_))) => {
                source.close();
                return Err(UpstreamError::Decode("message before stream open".to_string()));
            }
            Some(Err(e)) => {
                source.close();
                return Err(event_error(e).await);
            }
            None => return Err(UpstreamError::Other("stream closed before opening".to_string())),
        }

        debug!(model = %request.model, "Upstream event stream open");
        Ok(deltas(source))
    }
}
