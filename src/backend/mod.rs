mod ollama;
mod preamble;
mod types;

use crate::config::Config;
use anyhow::Result;
pub use ollama::OllamaClient;
use std::sync::Arc;
pub use types::{GenerationOutcome, GenerationResult, ModelBackend, StreamEvent};

pub fn create_model_backend(config: &Config) -> Result<Arc<dyn ModelBackend>> {
    let client = OllamaClient::new(
        &config.ollama_url,
        &config.ollama_model,
        config.ollama_timeout,
    )?;
    Ok(Arc::new(client))
}
