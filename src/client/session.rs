//! Client-side session state for one chat turn.
//!
//! All mutation goes through named transitions:
//! - input edits: `set_system_prompt`, `set_user_prompt`, `select_model`,
//!   `set_temperature`, `set_max_tokens`
//! - catalog: `catalog_loaded`, `catalog_failed`
//! - streaming: `start_submit`, `append_fragment`, `finish`, `fail`, `cancel`
//!
//! Every terminal streaming transition clears the streaming flag and freezes
//! the answer buffer.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::tokens::{estimate_prompts, estimate_tokens};
use crate::contract::{CompletionRequest, ModelDescriptor};

pub const FALLBACK_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 150;
pub const ABORTED_MESSAGE: &str = "Request was aborted.";
pub const NO_MODELS_MESSAGE: &str = "No models available. Please check your API key and try again.";

/// A user-prompt edit rejected by the token-budget guard.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("You've reached the maximum token limit for this model ({max_tokens} tokens).")]
pub struct BudgetExceeded {
    pub max_tokens: u32,
    pub estimate: usize,
}

/// Append-only answer buffer for one request.
#[derive(Debug, Default, Clone)]
pub struct StreamingAnswer {
    fragments: Vec<String>,
    text: String,
    finalized: bool,
}

impl StreamingAnswer {
    fn push(&mut self, fragment: &str) -> bool {
        if self.finalized || fragment.is_empty() {
            return false;
        }
        self.text.push_str(fragment);
        self.fragments.push(fragment.to_string());
        true
    }

    fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// Shared slot holding the cancellation token of the in-flight request.
///
/// Clones share the slot, so a handle taken before `submit` can cancel
/// whatever request is running when it fires.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl CancelHandle {
    /// Abort the in-flight request, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match self.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    /// Install the token for a new request, cancelling the previous one.
    fn arm(&self, token: CancellationToken) {
        if let Some(previous) = self.lock().replace(token) {
            if !previous.is_cancelled() {
                warn!("Cancelling previous in-flight request");
                previous.cancel();
            }
        }
    }

    fn disarm(&self) {
        self.lock().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// How a submission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// The client's transient view of one conversation turn.
#[derive(Debug)]
pub struct SessionState {
    system_prompt: String,
    user_prompt: String,
    models: Vec<ModelDescriptor>,
    selected_model: String,
    temperature: f64,
    max_tokens: u32,
    current_tokens: usize,
    is_loading: bool,
    is_streaming: bool,
    answer: StreamingAnswer,
    error: Option<String>,
    cancel: CancelHandle,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_prompt: String::new(),
            models: Vec::new(),
            selected_model: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            current_tokens: 0,
            is_loading: true,
            is_streaming: false,
            answer: StreamingAnswer::default(),
            error: None,
            cancel: CancelHandle::default(),
        }
    }

    // ─── Accessors ─────────────────────────────────────────────────────────

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn user_prompt(&self) -> &str {
        &self.user_prompt
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn current_tokens(&self) -> usize {
        self.current_tokens
    }

    /// The "Tokens: n / max" counter shown next to the prompts.
    pub fn token_display(&self) -> String {
        format!("Tokens: {} / {}", self.current_tokens, self.max_tokens)
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn answer(&self) -> &StreamingAnswer {
        &self.answer
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    // ─── Catalog ───────────────────────────────────────────────────────────

    /// Install the catalog and pick the default model (`gpt-4o-mini` when
    /// offered, else the first one).
    pub fn catalog_loaded(&mut self, models: Vec<ModelDescriptor>) {
        self.is_loading = false;
        self.models = models;

        let default = self
            .models
            .iter()
            .find(|m| m.id == DEFAULT_MODEL)
            .or_else(|| self.models.first())
            .cloned();

        match default {
            Some(model) => {
                self.selected_model = model.id;
                self.max_tokens = ceiling(model.max_tokens);
                self.recompute_tokens();
            }
            None => {
                self.selected_model.clear();
                self.error = Some(NO_MODELS_MESSAGE.to_string());
            }
        }
    }

    pub fn catalog_failed(&mut self, message: &str) {
        self.is_loading = false;
        self.error = Some(format!("Failed to fetch models: {message}"));
    }

    // ─── Input edits ───────────────────────────────────────────────────────

    /// System-prompt edits are always accepted; only the estimate changes.
    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        self.system_prompt = text.into();
        self.recompute_tokens();
    }

    /// Accept a user-prompt edit unless it pushes the estimate over the budget.
    /// A rejected edit leaves the previous prompt in place.
    pub fn set_user_prompt(&mut self, text: impl Into<String>) -> Result<(), BudgetExceeded> {
        let text = text.into();
        let estimate = estimate_tokens(&self.system_prompt) + estimate_tokens(&text);
        if estimate > self.max_tokens as usize {
            debug!(estimate, max_tokens = self.max_tokens, "User prompt edit rejected");
            return Err(BudgetExceeded {
                max_tokens: self.max_tokens,
                estimate,
            });
        }
        self.user_prompt = text;
        self.current_tokens = estimate;
        Ok(())
    }

    /// Switch model and adopt its token ceiling. Existing prompts are not
    /// re-validated against the new ceiling.
    pub fn select_model(&mut self, id: &str) {
        let (selected, max_tokens) = match self.models.iter().find(|m| m.id == id) {
            Some(model) => (model.id.clone(), ceiling(model.max_tokens)),
            None => {
                warn!(model = id, "Selected model not in catalog, falling back");
                match self.models.first() {
                    Some(first) => (first.id.clone(), ceiling(first.max_tokens)),
                    None => (String::new(), FALLBACK_MAX_TOKENS),
                }
            }
        };
        self.selected_model = selected;
        self.max_tokens = max_tokens;
        self.recompute_tokens();
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.temperature = if temperature.is_nan() {
            DEFAULT_TEMPERATURE
        } else {
            temperature.clamp(0.0, 1.0)
        };
    }

    /// Set the token budget, kept within `1..=` the selected model's ceiling.
    pub fn set_max_tokens(&mut self, max_tokens: u32) {
        let upper = self
            .models
            .iter()
            .find(|m| m.id == self.selected_model)
            .map(|m| ceiling(m.max_tokens))
            .unwrap_or(FALLBACK_MAX_TOKENS);
        self.max_tokens = max_tokens.clamp(1, upper);
    }

    fn recompute_tokens(&mut self) {
        self.current_tokens = estimate_prompts(&self.system_prompt, &self.user_prompt);
    }

    // ─── Streaming transitions ─────────────────────────────────────────────

    /// Begin a submission: reset answer and error, arm `token` as the
    /// cancellation handle (aborting any previous request) and snapshot the
    /// request to send.
    pub fn start_submit(&mut self, token: CancellationToken) -> CompletionRequest {
        self.cancel.arm(token);
        self.answer = StreamingAnswer::default();
        self.error = None;
        self.is_streaming = true;

        CompletionRequest {
            system_prompt: Some(self.system_prompt.clone()),
            user_prompt: Some(self.user_prompt.clone()),
            model: Some(self.selected_model.clone()),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        }
    }

    /// Append decoded text to the answer. Ignored once the answer is final.
    pub fn append_fragment(&mut self, fragment: &str) -> bool {
        self.is_streaming && self.answer.push(fragment)
    }

    /// Stream ended normally.
    pub fn finish(&mut self) -> SubmitOutcome {
        self.settle(None);
        SubmitOutcome::Completed
    }

    /// Transport or HTTP failure. The partial answer is kept.
    pub fn fail(&mut self, message: &str) -> SubmitOutcome {
        self.settle(Some(format!("Error during streaming: {message}")));
        SubmitOutcome::Failed
    }

    /// User abort. The partial answer is kept.
    pub fn cancel(&mut self) -> SubmitOutcome {
        self.settle(Some(ABORTED_MESSAGE.to_string()));
        SubmitOutcome::Cancelled
    }

    fn settle(&mut self, error: Option<String>) {
        self.answer.finalize();
        self.error = error;
        self.is_streaming = false;
        self.cancel.disarm();
    }
}

fn ceiling(max_tokens: u32) -> u32 {
    if max_tokens == 0 {
        FALLBACK_MAX_TOKENS
    } else {
        max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor { id: "gpt-4o".into(), max_tokens: 8 },
            ModelDescriptor { id: "gpt-4o-mini".into(), max_tokens: 16 },
        ]
    }

    fn loaded() -> SessionState {
        let mut session = SessionState::new();
        session.catalog_loaded(catalog());
        session
    }

    #[test]
    fn test_catalog_prefers_default_model() {
        let session = loaded();
        assert!(!session.is_loading());
        assert_eq!(session.selected_model(), "gpt-4o-mini");
        assert_eq!(session.max_tokens(), 16);
        assert_eq!(session.current_tokens(), 5);
    }

    #[test]
    fn test_catalog_falls_back_to_first() {
        let mut session = SessionState::new();
        session.catalog_loaded(vec![ModelDescriptor { id: "gpt-4".into(), max_tokens: 0 }]);
        assert_eq!(session.selected_model(), "gpt-4");
        assert_eq!(session.max_tokens(), FALLBACK_MAX_TOKENS);
    }

    #[test]
    fn test_empty_catalog_sets_error() {
        let mut session = SessionState::new();
        session.catalog_loaded(vec![]);
        assert_eq!(session.error(), Some(NO_MODELS_MESSAGE));
    }

    #[test]
    fn test_user_prompt_over_budget_is_rejected() {
        let mut session = loaded();
        session.set_system_prompt("one two");
        session.set_user_prompt("three four").unwrap();

        let err = session
            .set_user_prompt("a b c d e f g h i j k l m n o")
            .unwrap_err();
        assert_eq!(err.max_tokens, 16);
        assert_eq!(err.estimate, 17);
        assert_eq!(session.user_prompt(), "three four");
        assert_eq!(session.current_tokens(), 4);
        assert_eq!(
            err.to_string(),
            "You've reached the maximum token limit for this model (16 tokens)."
        );
    }

    #[test]
    fn test_user_prompt_at_budget_is_accepted() {
        let mut session = loaded();
        session.set_system_prompt("one");
        session
            .set_user_prompt("a b c d e f g h i j k l m n o")
            .unwrap();
        assert_eq!(session.current_tokens(), 16);
    }

    #[test]
    fn test_system_prompt_never_rejected() {
        let mut session = loaded();
        let long = vec!["word"; 40].join(" ");
        session.set_system_prompt(long.clone());
        assert_eq!(session.system_prompt(), long);
        assert_eq!(session.current_tokens(), 40);
    }

    #[test]
    fn test_select_model_updates_ceiling_and_estimate() {
        let mut session = loaded();
        session.set_user_prompt("hello there").unwrap();
        session.select_model("gpt-4o");
        assert_eq!(session.selected_model(), "gpt-4o");
        assert_eq!(session.max_tokens(), 8);
        // Existing prompts are kept even though they exceed the new ceiling.
        assert_eq!(session.current_tokens(), 7);
        assert_eq!(session.token_display(), "Tokens: 7 / 8");
    }

    #[test]
    fn test_select_unknown_model_falls_back() {
        let mut session = loaded();
        session.select_model("claude");
        assert_eq!(session.selected_model(), "gpt-4o");
        assert_eq!(session.max_tokens(), 8);

        let mut empty = SessionState::new();
        empty.select_model("anything");
        assert_eq!(empty.selected_model(), "");
        assert_eq!(empty.max_tokens(), FALLBACK_MAX_TOKENS);
    }

    #[test]
    fn test_parameter_setters_clamp() {
        let mut session = loaded();
        session.set_temperature(1.7);
        assert_eq!(session.temperature(), 1.0);
        session.set_max_tokens(0);
        assert_eq!(session.max_tokens(), 1);
        session.set_max_tokens(100);
        assert_eq!(session.max_tokens(), 16);
    }

    #[test]
    fn test_submit_lifecycle() {
        let mut session = loaded();
        session.set_user_prompt("Say hi.").unwrap();

        let request = session.start_submit(CancellationToken::new());
        assert!(session.is_streaming());
        assert!(session.cancel_handle().is_armed());
        assert_eq!(request.user_prompt.as_deref(), Some("Say hi."));
        assert_eq!(request.model.as_deref(), Some("gpt-4o-mini"));

        assert!(session.append_fragment("Hi"));
        assert!(!session.append_fragment(""));
        assert!(session.append_fragment(" there"));
        assert_eq!(session.finish(), SubmitOutcome::Completed);

        assert!(!session.is_streaming());
        assert!(!session.cancel_handle().is_armed());
        assert!(session.answer().is_finalized());
        assert_eq!(session.answer().as_str(), "Hi there");
        assert!(!session.append_fragment("late"));
        assert_eq!(session.answer().as_str(), "Hi there");
    }

    #[test]
    fn test_cancel_keeps_partial_answer() {
        let mut session = loaded();
        session.start_submit(CancellationToken::new());
        session.append_fragment("partial");
        assert_eq!(session.cancel(), SubmitOutcome::Cancelled);
        assert_eq!(session.answer().as_str(), "partial");
        assert_eq!(session.error(), Some(ABORTED_MESSAGE));
        assert!(!session.is_streaming());
    }

    #[test]
    fn test_new_submit_resets_and_cancels_previous() {
        let mut session = loaded();
        let first = CancellationToken::new();
        session.start_submit(first.clone());
        session.append_fragment("old");
        session.fail("boom");

        let second = CancellationToken::new();
        let third = CancellationToken::new();
        session.start_submit(second.clone());
        assert_eq!(session.answer().as_str(), "");
        assert!(session.error().is_none());

        session.start_submit(third);
        assert!(second.is_cancelled());
        assert!(!first.is_cancelled());
    }

    #[test]
    fn test_cancel_handle_fires_token() {
        let mut session = loaded();
        let token = CancellationToken::new();
        let handle = session.cancel_handle();
        assert!(!handle.cancel());

        session.start_submit(token.clone());
        assert!(handle.cancel());
        assert!(token.is_cancelled());
    }
}
