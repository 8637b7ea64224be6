//! Terminal front-end for a stream-relay server.
//!
//! Loads the model catalog, applies the prompt and parameters through the
//! session's edit guards, then prints the answer as it streams in. Ctrl-C
//! aborts the request and keeps what was already printed.

use std::io::Write;

use clap::Parser;
use tracing::debug;

use stream_relay::client::controller::{cancel_on_signal, ChatController};
use stream_relay::client::session::SubmitOutcome;
use stream_relay::config::ChatCli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = ChatCli::parse();

    let filter = if cli.verbose { "stream_relay=debug" } else { "stream_relay=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut controller = ChatController::new(cli.server.clone());
    if controller.load_models().await.is_err() || controller.session().models().is_empty() {
        let message = controller.session().error().unwrap_or("No models available.");
        anyhow::bail!("{message}");
    }

    let session = controller.session_mut();
    if let Some(model) = &cli.model {
        session.select_model(model);
    }
    if let Some(system) = cli.system.clone() {
        session.set_system_prompt(system);
    }
    if let Some(temperature) = cli.temperature {
        session.set_temperature(temperature);
    }
    if let Some(max_tokens) = cli.max_tokens {
        session.set_max_tokens(max_tokens);
    }
    session.set_user_prompt(cli.prompt.clone())?;

    debug!(
        model = session.selected_model(),
        tokens = %session.token_display(),
        "Prompt accepted"
    );

    let interrupts = cancel_on_signal(controller.canceller(), || async {
        tokio::signal::ctrl_c().await.is_ok()
    });

    let mut printed = 0;
    let mut stdout = std::io::stdout();
    let outcome = controller
        .submit(|answer| {
            let _ = stdout.write_all(answer[printed..].as_bytes());
            let _ = stdout.flush();
            printed = answer.len();
        })
        .await;
    interrupts.abort();
    println!();

    match outcome {
        SubmitOutcome::Completed => Ok(()),
        SubmitOutcome::Cancelled | SubmitOutcome::Failed => {
            let message = controller.session().error().unwrap_or("request failed");
            anyhow::bail!("{message}")
        }
    }
}
