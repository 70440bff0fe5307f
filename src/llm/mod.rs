//! LLM integration for Mail Tasks.
//!
//! One backend: any OpenAI-compatible `/chat/completions` endpoint, reached
//! through `OpenAiProvider`. Callers depend only on the `LlmProvider` trait.

pub mod openai;
pub mod provider;

pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Base URL up to (not including) `/chat/completions`.
    pub base_url: String,
    pub timeout: Duration,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiProvider::new(config)?;
    tracing::info!(model = %config.model, base_url = %config.base_url, "Using OpenAI-compatible LLM");
    Ok(Arc::new(provider))
}
