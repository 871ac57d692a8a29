//! Provider clients and the ordered fallback chain.
//!
//! The Tier-3 agent needs exactly one operation from a provider:
//! `generate(prompt) -> content`. Providers are tried in order; the first
//! success wins, with no per-provider retries.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::types::GenerateResponse;

/// Single-operation provider contract.
#[async_trait]
pub trait GenerateClient: Send + Sync {
    /// Generate a completion for the prompt.
    async fn generate(&self, prompt: &str) -> Result<GenerateResponse>;

    /// Stable provider name for logs and stats.
    fn name(&self) -> &'static str;
}

/// Configuration shared by HTTP provider clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key, where the provider needs one
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Model identifier
    pub model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: None,
            timeout_secs: 30,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Client {
    let timeout = Duration::from_secs(timeout_secs);

    // The default builder probes system proxy settings, which can panic in
    // locked-down environments. Retry proxy-free if the first attempt dies.
    let attempt = catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    }));
    if let Ok(Ok(client)) = attempt {
        return client;
    }

    Client::builder()
        .no_proxy()
        .timeout(timeout)
        .build()
        .expect("HTTP client construction failed twice")
}

/// Groq client (OpenAI-compatible chat completions; primary remote provider).
pub struct GroqClient {
    config: ClientConfig,
    http: Client,
}

impl GroqClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.groq.com/openai";
    const DEFAULT_MODEL: &'static str = "llama-3.3-70b-versatile";

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }

    fn model(&self) -> &str {
        self.config.model.as_deref().unwrap_or(Self::DEFAULT_MODEL)
    }
}

#[derive(Debug, Serialize)]
struct GroqRequest<'a> {
    model: &'a str,
    messages: Vec<GroqMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct GroqMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct GroqResponse {
    model: String,
    choices: Vec<GroqChoice>,
}

#[derive(Debug, Deserialize)]
struct GroqChoice {
    message: GroqChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct GroqChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct GroqError {
    error: GroqErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GroqErrorDetail {
    message: String,
}

#[async_trait]
impl GenerateClient for GroqClient {
    async fn generate(&self, prompt: &str) -> Result<GenerateResponse> {
        let api_request = GroqRequest {
            model: self.model(),
            messages: vec![GroqMessage {
                role: "user",
                content: prompt,
            }],
            // Deterministic decoding for judgments
            temperature: 0.0,
        };

        let url = format!("{}/v1/chat/completions", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::provider("groq", format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::provider("groq", format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<GroqError>(&body) {
                return Err(Error::provider("groq", error.error.message));
            }
            return Err(Error::provider("groq", format!("{}: {}", status, body)));
        }

        let api_response: GroqResponse = serde_json::from_str(&body)
            .map_err(|e| Error::provider("groq", format!("Failed to parse response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("groq", "No choices in response"))?;

        Ok(GenerateResponse {
            provider: "groq".to_string(),
            model: api_response.model,
            content: choice.message.content,
        })
    }

    fn name(&self) -> &'static str {
        "groq"
    }
}

/// Ollama client (local model; secondary provider in the fallback chain).
pub struct OllamaClient {
    config: ClientConfig,
    http: Client,
}

impl OllamaClient {
    const DEFAULT_BASE_URL: &'static str = "http://localhost:11434";
    const DEFAULT_MODEL: &'static str = "llama3.2";

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }

    fn model(&self) -> &str {
        self.config.model.as_deref().unwrap_or(Self::DEFAULT_MODEL)
    }

    /// Probe the local server.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url());
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[async_trait]
impl GenerateClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<GenerateResponse> {
        let api_request = OllamaRequest {
            model: self.model(),
            prompt,
            stream: false,
            options: OllamaOptions { temperature: 0.0 },
        };

        let url = format!("{}/api/generate", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::provider("ollama", format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::provider("ollama", format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::provider("ollama", format!("{}: {}", status, body)));
        }

        let api_response: OllamaResponse = serde_json::from_str(&body)
            .map_err(|e| Error::provider("ollama", format!("Failed to parse response: {}", e)))?;

        Ok(GenerateResponse {
            provider: "ollama".to_string(),
            model: self.model().to_string(),
            content: api_response.response,
        })
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

/// Ordered provider list with first-success-wins fallback.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn GenerateClient>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Append a provider to the chain.
    pub fn with_provider(mut self, provider: Arc<dyn GenerateClient>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Provider names in fallback order.
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Try each provider in order; first success wins, no retries.
    pub async fn generate(&self, prompt: &str) -> Result<GenerateResponse> {
        if self.providers.is_empty() {
            return Err(Error::provider("none", "No LLM providers configured"));
        }

        let mut last_error = None;
        for provider in &self.providers {
            match provider.generate(prompt).await {
                Ok(response) => {
                    debug!(provider = provider.name(), "provider succeeded");
                    return Ok(response);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::provider("none", "All LLM providers failed")))
    }
}
