use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Success(String),
    Failure(String),
}

/// What a single generate call produced. Never an error: the caller branches
/// on `outcome`.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub outcome: GenerationOutcome,
    pub elapsed: Duration,
    pub model: String,
}

impl GenerationResult {
    pub fn processing_time(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    Done,
    Error(String),
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn model(&self) -> &str;

    fn base_url(&self) -> &str;

    async fn probe(&self) -> bool;

    async fn generate(&self, message: &str, context: Option<&str>) -> GenerationResult;

    async fn generate_stream(
        &self,
        message: &str,
        context: Option<&str>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> GenerationResult;
}
