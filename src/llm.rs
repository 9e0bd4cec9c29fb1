//! Minimal client for an OpenAI-compatible REST API.
//!
//! Shared by the vectorstore, chat and translate handlers. The base URL is
//! configurable so tests can point it at a mock server and deployments can
//! use any compatible gateway. Request timeouts come from node
//! configuration and double as the per-handler timeout bound: an elapsed
//! request surfaces as a handler error for that one message.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::handlers::HandlerError;

/// One message of a chat completion request.
#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// HTTP client bound to one API base URL and optional bearer key.
#[derive(Clone, Debug)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HandlerError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Embeds a batch of texts, returning one vector per input in order.
    pub async fn embed(
        &self,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, HandlerError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let response: EmbeddingsResponse = self
            .post("embeddings", &EmbeddingsRequest { model, input: inputs })
            .await?;
        if response.data.len() != inputs.len() {
            return Err(HandlerError::Llm(format!(
                "embeddings api returned {} vectors for {} inputs",
                response.data.len(),
                inputs.len()
            )));
        }
        Ok(response.data.into_iter().map(|item| item.embedding).collect())
    }

    /// Runs one chat completion and returns the first choice's content.
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, HandlerError> {
        let response: ChatResponse = self
            .post("chat/completions", &ChatRequest { model, messages })
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| HandlerError::Llm("chat api returned no choices".to_string()))
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, HandlerError>
    where
        B: Serialize,
        R: serde::de::DeserializeOwned,
    {
        let mut request = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HandlerError::Llm(format!(
                "{path} returned {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> LlmClient {
        LlmClient::new(server.base_url(), Some("key".to_string()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn embed_returns_vectors_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/embeddings")
                    .header("authorization", "Bearer key");
                then.status(200).json_body(json!({
                    "data": [
                        {"embedding": [0.1, 0.2]},
                        {"embedding": [0.3, 0.4]}
                    ]
                }));
            })
            .await;

        let vectors = client(&server)
            .embed("test-model", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn embed_rejects_count_mismatch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200)
                    .json_body(json!({"data": [{"embedding": [0.1]}]}));
            })
            .await;

        let err = client(&server)
            .embed("m", &["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Llm(_)));
    }

    #[tokio::test]
    async fn embed_of_nothing_skips_the_network() {
        let server = MockServer::start_async().await;
        let vectors = client(&server).embed("m", &[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn chat_returns_first_choice() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": "the answer"}}
                    ]
                }));
            })
            .await;

        let answer = client(&server)
            .chat("m", &[ChatMessage::user("question")])
            .await
            .unwrap();
        assert_eq!(answer, "the answer");
    }

    #[tokio::test]
    async fn api_errors_become_handler_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429).body("rate limited");
            })
            .await;

        let err = client(&server)
            .chat("m", &[ChatMessage::user("q")])
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("429"));
        assert!(message.contains("rate limited"));
    }
}
