//! `edgequake_llm` provider as a [`GenerationEngine`].
//!
//! Hosted VLM APIs have no device to fragment, but they still go away,
//! rate-limit and hang. Wrapping them in the same lifecycle gives one code
//! path for local and remote backends: "initialization" resolves a provider,
//! "shutdown" drops it.
//!
//! ## Provider resolution
//!
//! 1. Pre-built provider passed to [`LlmEngineFactory::with_provider`]
//! 2. `EngineConfig::provider_name` (+ `model`, default `gpt-4.1-nano`)
//! 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
//! 4. `OPENAI_API_KEY` present → OpenAI
//! 5. `ProviderFactory::from_env()` auto-detection

use super::{EngineFactory, GenerationEngine, GenerationRequest, OutputStream};
use crate::config::EngineConfig;
use crate::error::{BackendInitError, EngineError};
use crate::prompts::strip_image_placeholder;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Builds [`LlmEngine`]s from a provider name and model.
#[derive(Default)]
pub struct LlmEngineFactory {
    provider: Option<Arc<dyn LLMProvider>>,
}

impl LlmEngineFactory {
    /// Resolve the provider from [`EngineConfig`] and the environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always hand out this provider.
    pub fn with_provider(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    fn resolve(&self, config: &EngineConfig) -> Result<Arc<dyn LLMProvider>, BackendInitError> {
        if let Some(ref provider) = self.provider {
            return Ok(Arc::clone(provider));
        }

        if let Some(ref name) = config.provider_name {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider(name, model);
        }

        if let (Ok(prov), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                return create_provider(&prov, &model);
            }
        }

        if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
            if !openai_key.is_empty() {
                let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
                return create_provider("openai", model);
            }
        }

        let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
            BackendInitError::new(format!(
                "no LLM provider could be auto-detected from environment \
                 (set OPENAI_API_KEY, ANTHROPIC_API_KEY, or EDGEQUAKE_LLM_PROVIDER): {e}"
            ))
        })?;
        Ok(llm_provider)
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, BackendInitError> {
    ProviderFactory::create_llm_provider(name, model)
        .map_err(|e| BackendInitError::new(format!("provider '{name}' is not configured: {e}")))
}

impl EngineFactory for LlmEngineFactory {
    fn initialize<'a>(
        &'a self,
        config: &'a EngineConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn GenerationEngine>, BackendInitError>> {
        Box::pin(async move {
            let provider = self.resolve(config)?;
            let options = CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            };
            Ok(Arc::new(LlmEngine { provider, options }) as Arc<dyn GenerationEngine>)
        })
    }
}

/// One session against a VLM provider.
pub struct LlmEngine {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmEngine {
    fn build_messages(request: &GenerationRequest) -> Vec<ChatMessage> {
        let text = strip_image_placeholder(&request.prompt);
        let images = request
            .image
            .iter()
            .cloned()
            .map(|img| img.with_detail(if request.crop { "high" } else { "low" }))
            .collect::<Vec<_>>();
        vec![ChatMessage::user_with_images(&text, images)]
    }
}

impl GenerationEngine for LlmEngine {
    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
        request_id: &'a str,
    ) -> OutputStream<'a> {
        let messages = Self::build_messages(request);
        Box::pin(futures::stream::once(async move {
            let response = self
                .provider
                .chat(&messages, Some(&self.options))
                .await
                .map_err(|e| EngineError::new(e.to_string()))?;
            debug!(
                "{}: {} input tokens, {} output tokens",
                request_id, response.prompt_tokens, response.completion_tokens
            );
            Ok(response.content)
        }))
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async { Ok(()) })
    }
}
