//! Client for the external embeddings/chat backend (Ollama's HTTP API).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// The embed/chat/health contract the indexer and retrieval layer depend on.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn chat(&self, system: Option<&str>, user: &str, temperature: f32, max_tokens: u32) -> Result<String>;
    async fn healthy(&self) -> bool;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

/// Ollama-backed implementation of [`EmbeddingBackend`].
pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
    embedding_model: String,
    llm_model: String,
}

impl OllamaClient {
    pub fn new(host: impl Into<String>, embedding_model: impl Into<String>, llm_model: impl Into<String>) -> Self {
        OllamaClient {
            client: reqwest::Client::new(),
            host: host.into(),
            embedding_model: embedding_model.into(),
            llm_model: llm_model.into(),
        }
    }

    /// Build a structured RAG explanation prompt and call [`chat`](Self::chat).
    pub async fn explain_code(&self, code: &str, context: &str, question: &str) -> Result<String> {
        let system = "You are an expert C# developer explaining code to another engineer. \
            Be precise, reference the provided context, and call out non-obvious behavior.";
        let user = format!(
            "## Related Codebase Context\n{context}\n\n## Code to Explain\n```csharp\n{code}\n```\n\n## Specific Question\n{question}"
        );
        self.chat(Some(system), &user, 0.2, 2000).await
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.host);
        let resp = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.embedding_model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| CoreError::Backend(format!("embeddings request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(CoreError::Backend(format!(
                "embeddings request returned {}",
                resp.status()
            )));
        }

        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Backend(format!("invalid embeddings response: {e}")))?;
        Ok(body.embedding)
    }

    async fn chat(&self, system: Option<&str>, user: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        let url = format!("{}/api/chat", self.host);
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: user });

        let resp = self
            .client
            .post(&url)
            .json(&ChatRequest {
                model: &self.llm_model,
                messages,
                stream: false,
                options: ChatOptions { temperature, num_predict: max_tokens },
            })
            .send()
            .await
            .map_err(|e| CoreError::Backend(format!("chat request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(CoreError::Backend(format!("chat request returned {}", resp.status())));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Backend(format!("invalid chat response: {e}")))?;
        Ok(body.message.content)
    }

    async fn healthy(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        matches!(self.client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }
}

/// An in-memory fake used by unit tests that exercises the chunking and
/// indexing pipeline without a network dependency.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeEmbeddingBackend {
    pub dimension: usize,
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl EmbeddingBackend for FakeEmbeddingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // Deterministic, content-derived vector so tests can assert stability
        // without depending on a real model.
        let mut vec = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            vec[i % self.dimension] += byte as f32;
        }
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
        for v in vec.iter_mut() {
            *v /= norm;
        }
        Ok(vec)
    }

    async fn chat(&self, _system: Option<&str>, user: &str, _temperature: f32, _max_tokens: u32) -> Result<String> {
        Ok(format!("fake explanation for: {user}"))
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_backend_is_deterministic() {
        let backend = FakeEmbeddingBackend { dimension: 8 };
        let a = backend.embed("hello world").await.unwrap();
        let b = backend.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }
}
