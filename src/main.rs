//! stream-relay: relay server binary.
//!
//! Serves the chat client's API and forwards completions to the configured
//! OpenAI-compatible provider, streaming the answer back as it is generated.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use stream_relay::config::{Cli, Config};
use stream_relay::server::api::{build_router, AppState};
use stream_relay::upstream::openai::OpenAiProvider;
use stream_relay::upstream::scripted::{ScriptStep, ScriptedProvider};
use stream_relay::upstream::CompletionProvider;

fn offline_provider() -> ScriptedProvider {
    let words = "This relay is running offline. Start it without --offline to reach the provider.";
    let mut steps = Vec::new();
    for (i, word) in words.split(' ').enumerate() {
        let delta = if i == 0 { word.to_string() } else { format!(" {word}") };
        steps.push(ScriptStep::Delta(delta));
        steps.push(ScriptStep::Pause(std::time::Duration::from_millis(80)));
    }
    ScriptedProvider::new()
        .with_models([("gpt-4o-mini", Some(4096)), ("gpt-4o", Some(8192))])
        .with_steps(steps)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "stream_relay=debug,tower_http=debug"
    } else {
        "stream_relay=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("stream-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen.clone() {
        config.server.listen = listen;
    }
    let config = Arc::new(config);

    info!(
        upstream = %config.upstream.base_url,
        connect_timeout_secs = config.upstream.connect_timeout_secs,
        stream_timeout_secs = config.upstream.stream_timeout_secs,
        origins = ?config.server.allowed_origins,
        "Configuration loaded"
    );

    // The provider key is read once, here.
    let provider: Arc<dyn CompletionProvider> = if cli.offline {
        info!("Offline mode: serving canned answers");
        Arc::new(offline_provider())
    } else {
        Arc::new(OpenAiProvider::from_config(&config.upstream)?)
    };

    let state = Arc::new(AppState::new(provider, config.clone()));
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
