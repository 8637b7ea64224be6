//! Runtime configuration for stream-relay.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Every section has defaults, so a missing file or a partial file is fine.
//! The provider credential is never stored in the file: only the name of the
//! environment variable holding it.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "stream-relay", about = "Streaming chat completion relay")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "relay.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Serve canned answers instead of calling the provider.
    #[arg(long)]
    pub offline: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Command-line arguments of the terminal chat front-end.
#[derive(Parser, Debug, Clone)]
#[command(name = "chat", about = "Stream one chat answer from a stream-relay server")]
pub struct ChatCli {
    /// The user prompt.
    pub prompt: String,

    /// Relay base URL.
    #[arg(long, default_value = "http://localhost:5001")]
    pub server: String,

    /// Model id (defaults to the relay's preferred model).
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt.
    #[arg(short, long)]
    pub system: Option<String>,

    /// Sampling temperature, 0 to 1.
    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Token budget for the answer.
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Upstream provider configuration.
    pub upstream: UpstreamConfig,

    /// Model catalog shaping.
    pub catalog: CatalogConfig,

    /// Completion parameter defaults.
    pub completion: CompletionDefaults,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:5001").
    pub listen: String,

    /// Browser origins allowed to call the API.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5001".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
                "http://localhost:3002".to_string(),
            ],
        }
    }
}

/// Upstream provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Bound on opening the stream and receiving the first delta, in seconds.
    pub connect_timeout_secs: u64,

    /// Bound on the total streaming duration, in seconds.
    pub stream_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            connect_timeout_secs: 30,
            stream_timeout_secs: 300,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    /// Read the API key from the configured environment variable.
    ///
    /// Returns `None` when the variable is unset or empty. Callers still start:
    /// a missing key only surfaces when the first upstream call is rejected.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Model catalog shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Substring identifying chat-capable model ids.
    pub family_marker: String,

    /// Token ceiling used when the upstream omits one.
    pub fallback_max_tokens: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            family_marker: "gpt".to_string(),
            fallback_max_tokens: 4096,
        }
    }
}

/// Defaults applied when a completion request leaves a parameter falsy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionDefaults {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for CompletionDefaults {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 150,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
