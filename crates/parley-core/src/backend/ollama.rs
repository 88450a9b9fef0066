use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use super::{ChatBackend, ChunkStream};
use crate::conversation::ChatMessage;
use crate::error::TransportError;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a GenerateOptions>,
}

/// Sampling knobs for the non-streaming generate call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Single-shot completion of a raw prompt (`stream: false`).
    pub async fn generate(
        &self,
        prompt: &str,
        options: Option<&GenerateOptions>,
    ) -> Result<String, TransportError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options,
        };

        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "generate request");
        let response = self.client.post(&url).json(&request).send().await?;
        let response = check_status(response).await?;

        let generated: GenerateResponse = response.json().await?;
        Ok(generated.response)
    }

    pub async fn list_models(&self) -> Result<Vec<String>, TransportError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;
        let response = check_status(response).await?;

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }

    pub async fn has_model(&self, name: &str) -> Result<bool, TransportError> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m == name))
    }
}

impl ChatBackend for OllamaClient {
    async fn open_chat_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<ChunkStream, TransportError> {
        let url = format!("{}/api/chat", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        tracing::debug!(model = %self.model, messages = messages.len(), "opening chat stream");
        let response = self.client.post(&url).json(&request).send().await?;
        let response = check_status(response).await?;

        if response.content_length() == Some(0) {
            return Err(TransportError::MissingBody);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Read(e.to_string())));
        Ok(Box::pin(body))
    }
}

/// Turn a non-2xx response into [`TransportError::Status`], keeping the body
/// text for the error message.
async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), body = %body, "backend request failed");
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}
