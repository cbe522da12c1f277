//! AI responder capability consumed by the platform adapters.
//!
//! The orchestrator treats text generation as an opaque collaborator:
//! a prompt goes in, reply text comes out. Adapters must catch every
//! [`ResponderError`] and convert it to user-visible fallback text --
//! a generation failure is never allowed to reach the platform transport.
//!
//! One implementation is provided: [`gemini::GeminiResponder`], a remote
//! HTTP provider with tuned-model discovery. Each adapter should hold its
//! own responder session when the implementation keeps per-session history,
//! so platform conversations never bleed into each other.

use async_trait::async_trait;
use thiserror::Error;

pub mod gemini;

pub use gemini::GeminiResponder;

/// Errors surfaced by a responder implementation.
#[derive(Debug, Error)]
pub enum ResponderError {
    /// HTTP transport failure.
    #[error("responder HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider returned an error response.
    #[error("responder API error (status {status}): {message}")]
    Api {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Error body or description.
        message: String,
    },
    /// The provider returned a payload we could not interpret.
    #[error("malformed responder payload: {0}")]
    Malformed(String),
}

/// The text-generation capability shared by all adapters.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Generate reply text for a prompt.
    ///
    /// # Errors
    ///
    /// Returns a [`ResponderError`] when generation fails; callers must
    /// degrade to fixed fallback text.
    async fn generate(&self, prompt: &str) -> Result<String, ResponderError>;

    /// Generate text constrained to an output MIME type and schema.
    ///
    /// The default implementation ignores the constraints and delegates
    /// to [`Responder::generate`].
    ///
    /// # Errors
    ///
    /// Same contract as [`Responder::generate`].
    async fn generate_structured(
        &self,
        prompt: &str,
        _output_mime_type: &str,
        _output_schema: &serde_json::Value,
    ) -> Result<String, ResponderError> {
        self.generate(prompt).await
    }
}
