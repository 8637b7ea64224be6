//! End-to-end tests: ChatController against a live relay on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use stream_relay::client::controller::ChatController;
use stream_relay::client::session::{SubmitOutcome, ABORTED_MESSAGE};
use stream_relay::config::Config;
use stream_relay::server::api::{build_router, AppState};
use stream_relay::upstream::scripted::{ScriptStep, ScriptedProvider};

async fn spawn_relay(provider: &ScriptedProvider) -> SocketAddr {
    let state = AppState::new(Arc::new(provider.clone()), Arc::new(Config::default()));
    let app = build_router(Arc::new(state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn paced(deltas: &[&str]) -> Vec<ScriptStep> {
    deltas
        .iter()
        .flat_map(|d| {
            [
                ScriptStep::Delta(d.to_string()),
                ScriptStep::Pause(Duration::from_millis(20)),
            ]
        })
        .collect()
}

async fn ready_controller(provider: &ScriptedProvider) -> ChatController {
    let addr = spawn_relay(provider).await;
    let mut controller = ChatController::new(format!("http://{addr}"));
    controller.load_models().await.unwrap();

    let session = controller.session_mut();
    session.set_system_prompt("You are terse.");
    session.set_temperature(0.2);
    session.set_max_tokens(16);
    session.set_user_prompt("Say hi.").unwrap();
    controller
}

fn chat_models() -> ScriptedProvider {
    ScriptedProvider::new().with_models([("gpt-4o", Some(8192)), ("gpt-4o-mini", None)])
}

#[tokio::test]
async fn test_catalog_load_selects_default_model() {
    let provider = chat_models();
    let addr = spawn_relay(&provider).await;
    let mut controller = ChatController::new(format!("http://{addr}/"));

    assert!(controller.session().is_loading());
    controller.load_models().await.unwrap();

    let session = controller.session();
    assert!(!session.is_loading());
    assert_eq!(session.models().len(), 2);
    assert_eq!(session.selected_model(), "gpt-4o-mini");
    assert_eq!(session.max_tokens(), 4096);
}

#[tokio::test]
async fn test_catalog_failure_sets_error() {
    let provider = ScriptedProvider::new().with_models([("dall-e-3", None)]);
    let addr = spawn_relay(&provider).await;
    let mut controller = ChatController::new(format!("http://{addr}"));

    assert!(controller.load_models().await.is_err());
    let error = controller.session().error().unwrap();
    assert!(error.starts_with("Failed to fetch models"));
    assert!(error.contains("500"));
    assert!(!controller.session().is_loading());
}

#[tokio::test]
async fn test_rendered_answer_matches_forwarded_deltas() {
    let provider = chat_models().with_steps(paced(&["Hi", " there", "!"]));
    let mut controller = ready_controller(&provider).await;

    let mut frames: Vec<String> = Vec::new();
    let outcome = controller.submit(|answer| frames.push(answer.to_string())).await;

    assert_eq!(outcome, SubmitOutcome::Completed);
    let session = controller.session();
    assert_eq!(session.answer().as_str(), "Hi there!");
    assert!(session.error().is_none());
    assert!(!session.is_streaming());

    // Frames only ever grow, and end at the full answer.
    assert!(!frames.is_empty());
    for pair in frames.windows(2) {
        assert!(pair[1].starts_with(&pair[0]) && pair[1].len() > pair[0].len());
    }
    assert_eq!(frames.last().map(String::as_str), Some("Hi there!"));

    let sent = provider.last_request().await.unwrap();
    assert_eq!(sent.model, "gpt-4o-mini");
    assert_eq!(sent.max_tokens, 16);
    assert_eq!(sent.temperature, 0.2);
}

#[tokio::test]
async fn test_multibyte_answer_survives_streaming() {
    let provider = chat_models().with_steps(paced(&["Grüße", " 🦀", " 日本"]));
    let mut controller = ready_controller(&provider).await;

    let outcome = controller.submit(|_| {}).await;
    assert_eq!(outcome, SubmitOutcome::Completed);
    assert_eq!(controller.session().answer().as_str(), "Grüße 🦀 日本");
}

#[tokio::test]
async fn test_cancel_mid_stream_keeps_received_text() {
    let provider = chat_models().with_steps(vec![
        ScriptStep::Delta("first".into()),
        ScriptStep::Pause(Duration::from_secs(30)),
        ScriptStep::Delta(" second".into()),
    ]);
    let mut controller = ready_controller(&provider).await;
    let canceller = controller.canceller();

    let outcome = controller
        .submit(|answer| {
            if answer == "first" {
                canceller.cancel();
            }
        })
        .await;

    assert_eq!(outcome, SubmitOutcome::Cancelled);
    let session = controller.session();
    assert_eq!(session.answer().as_str(), "first");
    assert_eq!(session.error(), Some(ABORTED_MESSAGE));
    assert!(!session.is_streaming());
}

#[tokio::test]
async fn test_upstream_failure_reports_http_status() {
    let provider = chat_models().failing_open("invalid api key");
    let mut controller = ready_controller(&provider).await;

    let outcome = controller.submit(|_| {}).await;
    assert_eq!(outcome, SubmitOutcome::Failed);
    let session = controller.session();
    assert!(session.error().unwrap().contains("500"));
    assert!(!session.is_streaming());
    assert_eq!(session.answer().as_str(), "");
}

#[tokio::test]
async fn test_empty_user_prompt_is_rejected_by_relay() {
    let provider = chat_models().with_deltas(["unused"]);
    let addr = spawn_relay(&provider).await;
    let mut controller = ChatController::new(format!("http://{addr}"));
    controller.load_models().await.unwrap();

    let outcome = controller.submit(|_| {}).await;
    assert_eq!(outcome, SubmitOutcome::Failed);
    assert!(controller.session().error().unwrap().contains("400"));
    assert_eq!(provider.stream_calls(), 0);
}

#[tokio::test]
async fn test_mid_stream_failure_surfaces_as_error() {
    let provider = chat_models().with_steps(vec![
        ScriptStep::Delta("partial".into()),
        ScriptStep::Pause(Duration::from_millis(20)),
        ScriptStep::Fail("connection reset".into()),
    ]);
    let mut controller = ready_controller(&provider).await;

    let outcome = controller.submit(|_| {}).await;
    assert_eq!(outcome, SubmitOutcome::Failed);
    let session = controller.session();
    assert!(session.error().unwrap().starts_with("Error during streaming:"));
    assert!(!session.is_streaming());
}
