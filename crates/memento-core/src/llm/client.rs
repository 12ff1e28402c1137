//! HTTP client for the local inference server.
//!
//! The wire protocol is Ollama-shaped: `/api/generate` for completion,
//! `/api/embed` for embeddings, `/api/tags` for the model list and
//! `/api/version` for the health probe. Every call carries its own deadline;
//! a fired deadline aborts the in-flight request.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of the inference server
    pub base_url: String,
    /// Model used for completion
    pub model: String,
    /// Model used for embeddings
    pub embedding_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
        }
    }
}

/// Seam between the enrichment pipeline and the inference server.
///
/// Implementations must be safe for concurrent use; the worker pool shares
/// one client across all workers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Text completion for a prompt.
    async fn complete(&self, prompt: &str, deadline: Duration) -> Result<String>;

    /// Embedding vector for a text. Zero-length responses are transport
    /// errors.
    async fn embed(&self, text: &str, deadline: Duration) -> Result<Vec<f32>>;

    /// Probe the server.
    async fn health_check(&self, deadline: Duration) -> Result<()>;

    /// Names of available models.
    async fn list_models(&self, deadline: Duration) -> Result<Vec<String>>;

    /// Name of the embedding model, recorded on stored vectors.
    fn embedding_model(&self) -> &str;
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[allow(dead_code)]
    version: String,
}

// ============================================================================
// HTTP CLIENT
// ============================================================================

/// Stateless reqwest-backed [`LlmClient`].
pub struct HttpLlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_send_error(err: reqwest::Error, deadline: Duration) -> Error {
        if err.is_timeout() {
            Error::DeadlineExceeded(deadline)
        } else {
            Error::Transient(format!("llm request failed: {}", err))
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transient(format!(
                "llm server returned {}",
                status
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str, deadline: Duration) -> Result<String> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };
        let response = self
            .http
            .post(self.url("/api/generate"))
            .timeout(deadline)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, deadline))?;
        let response = Self::check_status(response).await?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Transient(format!("invalid llm response: {}", e)))?;
        if !body.done {
            return Err(Error::Transient("llm response not marked done".to_string()));
        }
        Ok(body.response)
    }

    async fn embed(&self, text: &str, deadline: Duration) -> Result<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.config.embedding_model,
            input: text,
        };
        let response = self
            .http
            .post(self.url("/api/embed"))
            .timeout(deadline)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, deadline))?;
        let response = Self::check_status(response).await?;

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Transient(format!("invalid embed response: {}", e)))?;
        let vector = body
            .embeddings
            .into_iter()
            .next()
            .unwrap_or_default();
        if vector.is_empty() {
            return Err(Error::Transient("llm returned an empty embedding".to_string()));
        }
        Ok(vector)
    }

    async fn health_check(&self, deadline: Duration) -> Result<()> {
        let response = self
            .http
            .get(self.url("/api/version"))
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, deadline))?;
        let response = Self::check_status(response).await?;
        response
            .json::<VersionResponse>()
            .await
            .map_err(|e| Error::Transient(format!("invalid version response: {}", e)))?;
        Ok(())
    }

    async fn list_models(&self, deadline: Duration) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.url("/api/tags"))
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, deadline))?;
        let response = Self::check_status(response).await?;

        let body: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::Transient(format!("invalid tags response: {}", e)))?;
        Ok(body.models.into_iter().map(|m| m.name).collect())
    }

    fn embedding_model(&self) -> &str {
        &self.config.embedding_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let client = HttpLlmClient::new(LlmConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..Default::default()
        });
        assert_eq!(client.url("/api/generate"), "http://localhost:11434/api/generate");
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        // Nothing listens on this port.
        let client = HttpLlmClient::new(LlmConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        });
        let err = client
            .complete("hello", Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transient);
    }
}
