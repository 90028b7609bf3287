//! Response generation.
//!
//! The engine treats generation as a remote service behind the
//! [`GenerationService`] trait: given the owner's style profile, conversation
//! context and mood, produce one candidate reply. The HTTP client here talks
//! to a twin-model sidecar; tests swap in mocks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GenerationError;
use crate::profile::{Mood, PersonalityProfile};

/// One prior message supplied as generation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    /// "contact" or "owner".
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl ContextMessage {
    pub fn contact(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: "contact".into(),
            content: content.into(),
            at,
        }
    }

    pub fn owner(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: "owner".into(),
            content: content.into(),
            at,
        }
    }
}

/// Produces candidate replies in the owner's voice.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        profile: &PersonalityProfile,
        context: &[ContextMessage],
        mood: Mood,
    ) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    style: &'a serde_json::Value,
    mood: Mood,
    context: &'a [ContextMessage],
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: String,
}

/// HTTP client for a generation sidecar exposing a single POST endpoint.
pub struct HttpGenerationClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpGenerationClient {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl GenerationService for HttpGenerationClient {
    async fn generate(
        &self,
        profile: &PersonalityProfile,
        context: &[ContextMessage],
        mood: Mood,
    ) -> Result<String, GenerationError> {
        let body = GenerateRequest {
            style: &profile.style,
            mood,
            context,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout)
            } else {
                GenerationError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::RequestFailed(format!(
                "generation service returned {}",
                status
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        if parsed.text.trim().is_empty() {
            return Err(GenerationError::InvalidResponse(
                "empty candidate text".into(),
            ));
        }

        debug!(mood = ?mood, chars = parsed.text.len(), "Generated candidate");
        Ok(parsed.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_serializes_context() {
        let style = serde_json::json!({ "tone": "short, dry, lowercase" });
        let body = GenerateRequest {
            style: &style,
            mood: Mood::Casual,
            context: &[ContextMessage::contact("dinner tonight?", Utc::now())],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["style"]["tone"], "short, dry, lowercase");
        assert_eq!(json["mood"], "casual");
        assert_eq!(json["context"][0]["role"], "contact");
    }
}
