//! Gemini-shaped remote responder over the `generateContent` HTTP API.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{Responder, ResponderError};

/// Default API base.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Remote responder backed by a Gemini-style `generateContent` endpoint.
///
/// `model` is either a plain model name (`gemini-1.5-flash`) or a tuned
/// model reference (`tunedModels/<name>`).
pub struct GeminiResponder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    system_instruction: Option<String>,
    base_url: String,
}

impl std::fmt::Debug for GeminiResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiResponder")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiResponder {
    /// Build a responder for a model.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        system_instruction: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            system_instruction,
            base_url: DEFAULT_BASE_URL.to_owned(),
        }
    }

    /// Override the API base URL (used by tests against a local server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The model this responder targets.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// List the account's tuned model names (e.g. `tunedModels/foo-123`).
    ///
    /// # Errors
    ///
    /// Returns a [`ResponderError`] when the listing call fails; callers
    /// treat that as "no tuned model available" and fall back.
    pub async fn list_tuned_models(&self) -> Result<Vec<String>, ResponderError> {
        let url = format!("{}/tunedModels?key={}", self.base_url, self.api_key);
        let resp = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ResponderError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let body: Value = resp.json().await?;
        let names = body
            .get("tunedModels")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    /// Resolve the URL path segment for the configured model.
    fn model_path(&self) -> String {
        if self.model.starts_with("tunedModels/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    /// Issue one `generateContent` call with the given generation config.
    async fn generate_with_config(
        &self,
        prompt: &str,
        generation_config: Option<Value>,
    ) -> Result<String, ResponderError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url,
            self.model_path(),
            self.api_key
        );

        let mut body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
        });
        if let Some(instruction) = &self.system_instruction {
            body["systemInstruction"] = json!({"parts": [{"text": instruction}]});
        }
        if let Some(config) = generation_config {
            body["generationConfig"] = config;
        }

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ResponderError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let payload: Value = resp.json().await?;
        let text = extract_candidate_text(&payload)?;
        debug!(model = %self.model, chars = text.len(), "responder generated text");
        Ok(text)
    }
}

/// Pull the first candidate's text parts out of a `generateContent`
/// response.
fn extract_candidate_text(payload: &Value) -> Result<String, ResponderError> {
    let parts = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .ok_or_else(|| ResponderError::Malformed("no candidates in response".to_owned()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();

    if text.is_empty() {
        return Err(ResponderError::Malformed(
            "candidate carried no text parts".to_owned(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl Responder for GeminiResponder {
    async fn generate(&self, prompt: &str) -> Result<String, ResponderError> {
        self.generate_with_config(prompt, None).await
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        output_mime_type: &str,
        output_schema: &Value,
    ) -> Result<String, ResponderError> {
        let config = json!({
            "responseMimeType": output_mime_type,
            "responseSchema": output_schema,
        });
        self.generate_with_config(prompt, Some(config)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_first_candidate() {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hello "}, {"text": "world"}]}
            }]
        });
        let text = extract_candidate_text(&payload).expect("text present");
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn missing_candidates_is_malformed() {
        let payload = json!({"promptFeedback": {}});
        assert!(matches!(
            extract_candidate_text(&payload),
            Err(ResponderError::Malformed(_))
        ));
    }

    #[test]
    fn empty_parts_is_malformed() {
        let payload = json!({"candidates": [{"content": {"parts": []}}]});
        assert!(extract_candidate_text(&payload).is_err());
    }

    #[test]
    fn tuned_model_path_used_verbatim() {
        let responder = GeminiResponder::new("key", "tunedModels/my-tune-1", None);
        assert_eq!(responder.model_path(), "tunedModels/my-tune-1");
    }

    #[test]
    fn plain_model_gets_models_prefix() {
        let responder = GeminiResponder::new("key", "gemini-1.5-flash", None);
        assert_eq!(responder.model_path(), "models/gemini-1.5-flash");
    }

    #[test]
    fn debug_redacts_api_key() {
        let responder = GeminiResponder::new("super-secret", "gemini-1.5-flash", None);
        let debug = format!("{responder:?}");
        assert!(!debug.contains("super-secret"));
    }
}
