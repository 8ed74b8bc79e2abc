use super::preamble::build_prompt;
use super::types::{GenerationOutcome, GenerationResult, ModelBackend, StreamEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const TEMPERATURE: f32 = 0.7;
const TOP_P: f32 = 0.9;
const MAX_TOKENS: u32 = 150;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        info!(
            "Ollama client initialized (url: {}, model: {}, timeout: {}s)",
            base_url,
            model,
            timeout.as_secs()
        );
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        })
    }

    fn request_body<'a>(&'a self, prompt: &'a str, stream: bool) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt,
            stream,
            options: GenerateOptions {
                temperature: TEMPERATURE,
                top_p: TOP_P,
                max_tokens: MAX_TOKENS,
            },
        }
    }

    fn finish(&self, started: Instant, outcome: GenerationOutcome) -> GenerationResult {
        GenerationResult {
            outcome,
            elapsed: started.elapsed(),
            model: self.model.clone(),
        }
    }

    async fn send_generate(&self, prompt: &str, stream: bool) -> Result<reqwest::Response, String> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&self.request_body(prompt, stream))
            .send()
            .await
            .map_err(describe_transport_error)?;

        if response.status() != StatusCode::OK {
            return Err(format!("HTTP error {}", response.status().as_u16()));
        }
        Ok(response)
    }
}

/// Returns true once the backend marks the stream as done.
async fn forward_line(line: &[u8], text: &mut String, tx: &mpsc::Sender<StreamEvent>) -> bool {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return false;
    }

    let Ok(chunk) = serde_json::from_str::<StreamChunk>(line) else {
        debug!("Skipping undecodable stream line");
        return false;
    };

    if let Some(fragment) = chunk.response.filter(|f| !f.is_empty()) {
        text.push_str(&fragment);
        let _ = tx.send(StreamEvent::TextDelta(fragment)).await;
    }
    chunk.done
}

fn describe_transport_error(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "timeout while generating the response".to_string()
    } else {
        format!("connection error: {}", e)
    }
}

#[async_trait]
impl ModelBackend for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("Ollama probe failed: {}", e);
                false
            }
        }
    }

    async fn generate(&self, message: &str, context: Option<&str>) -> GenerationResult {
        let started = Instant::now();
        let prompt = build_prompt(message, context);

        let response = match self.send_generate(&prompt, false).await {
            Ok(response) => response,
            Err(error) => return self.finish(started, GenerationOutcome::Failure(error)),
        };

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return self.finish(
                    started,
                    GenerationOutcome::Failure(describe_transport_error(e)),
                );
            }
        };

        let outcome = match serde_json::from_slice::<GenerateResponse>(&body) {
            Ok(parsed) => {
                let text = parsed.response.trim();
                if text.is_empty() {
                    GenerationOutcome::Failure("empty response".to_string())
                } else {
                    GenerationOutcome::Success(text.to_string())
                }
            }
            Err(e) => GenerationOutcome::Failure(format!("decode error: {}", e)),
        };

        self.finish(started, outcome)
    }

    /// Streams the reply fragment by fragment over `tx`.
    ///
    /// The body is newline-delimited JSON; undecodable lines are skipped and a
    /// chunk with `done: true` ends the stream. The returned result carries
    /// the concatenated text.
    async fn generate_stream(
        &self,
        message: &str,
        context: Option<&str>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> GenerationResult {
        let started = Instant::now();
        let prompt = build_prompt(message, context);

        let response = match self.send_generate(&prompt, true).await {
            Ok(response) => response,
            Err(error) => {
                let _ = tx.send(StreamEvent::Error(error.clone())).await;
                return self.finish(started, GenerationOutcome::Failure(error));
            }
        };

        let mut body = std::pin::pin!(response.bytes_stream());
        let mut pending: Vec<u8> = Vec::new();
        let mut text = String::new();
        let mut done = false;

        while !done {
            let Some(chunk) = body.next().await else {
                break;
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let error = describe_transport_error(e);
                    let _ = tx.send(StreamEvent::Error(error.clone())).await;
                    return self.finish(started, GenerationOutcome::Failure(error));
                }
            };
            pending.extend_from_slice(&chunk);

            while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();
                if forward_line(&line, &mut text, &tx).await {
                    done = true;
                    break;
                }
            }
        }

        if !done && !pending.is_empty() {
            forward_line(&pending, &mut text, &tx).await;
        }

        debug!("Streamed {} chars from {}", text.len(), self.model);

        let text = text.trim();
        if text.is_empty() {
            let error = "empty response".to_string();
            let _ = tx.send(StreamEvent::Error(error.clone())).await;
            return self.finish(started, GenerationOutcome::Failure(error));
        }
        let _ = tx.send(StreamEvent::Done).await;
        self.finish(started, GenerationOutcome::Success(text.to_string()))
    }
}
