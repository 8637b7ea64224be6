//! Model catalog: the provider's model list, shaped for the chat client.

use tracing::{info, warn};

use crate::config::CatalogConfig;
use crate::contract::{ModelCatalog, ModelDescriptor};
use crate::server::error::RelayError;
use crate::upstream::{CompletionProvider, UpstreamModel};

/// Keep chat-capable models and attach a token ceiling to each.
pub fn shape_models(models: Vec<UpstreamModel>, config: &CatalogConfig) -> Vec<ModelDescriptor> {
    models
        .into_iter()
        .filter(|m| m.id.contains(&config.family_marker))
        .map(|m| ModelDescriptor {
            id: m.id,
            max_tokens: m
                .max_tokens
                .filter(|&n| n > 0)
                .unwrap_or(config.fallback_max_tokens),
        })
        .collect()
}

/// Query the provider and build the catalog. Never cached.
///
/// An empty result is an error, not an empty success.
pub async fn fetch_catalog(
    provider: &dyn CompletionProvider,
    config: &CatalogConfig,
) -> Result<ModelCatalog, RelayError> {
    let upstream = provider.list_models().await.map_err(|e| {
        warn!(error = %e, "Model listing failed");
        RelayError::CatalogUnavailable(e.to_string())
    })?;

    let listed = upstream.len();
    let models = shape_models(upstream, config);
    if models.is_empty() {
        warn!(listed, marker = %config.family_marker, "No chat models in upstream list");
        return Err(RelayError::CatalogUnavailable(
            "No models fetched from upstream API".to_string(),
        ));
    }

    info!(listed, kept = models.len(), "Model catalog built");
    Ok(ModelCatalog { models })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::scripted::ScriptedProvider;

    #[test]
    fn test_filters_and_defaults() {
        let models = vec![
            UpstreamModel { id: "gpt-4o".into(), max_tokens: Some(128000) },
            UpstreamModel { id: "whisper-1".into(), max_tokens: None },
            UpstreamModel { id: "gpt-4o-mini".into(), max_tokens: None },
        ];
        let shaped = shape_models(models, &CatalogConfig::default());
        assert_eq!(
            shaped,
            vec![
                ModelDescriptor { id: "gpt-4o".into(), max_tokens: 128000 },
                ModelDescriptor { id: "gpt-4o-mini".into(), max_tokens: 4096 },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_filtered_list_is_error() {
        let provider = ScriptedProvider::new().with_models([("dall-e-3", None), ("tts-1", None)]);
        let err = fetch_catalog(&provider, &CatalogConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::CatalogUnavailable(_)));
    }

    #[tokio::test]
    async fn test_every_call_requeries() {
        let provider = ScriptedProvider::new().with_models([("gpt-4o", Some(8192))]);
        let config = CatalogConfig::default();
        fetch_catalog(&provider, &config).await.unwrap();
        fetch_catalog(&provider, &config).await.unwrap();
        assert_eq!(provider.list_calls(), 2);
    }
}
