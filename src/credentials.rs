//! Immutable per-adapter credential bundles.
//!
//! Each bundle is validated at construction time and construction fails
//! closed: a missing or empty required secret means the adapter never
//! starts. Secrets are redacted from `Debug` output.

use thiserror::Error;

use crate::config::{ChatSection, MicroblogSection};

/// A required credential was absent or empty.
#[derive(Debug, Error)]
#[error("missing required credential: {0}")]
pub struct MissingCredential(pub &'static str);

/// Require a non-empty optional config value.
fn require(
    value: &Option<String>,
    name: &'static str,
) -> Result<String, MissingCredential> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(MissingCredential(name)),
    }
}

// ── Microblog ───────────────────────────────────────────────────

/// Validated microblog API credentials.
#[derive(Clone)]
pub struct MicroblogCredentials {
    /// OAuth 1.0a consumer key.
    pub api_key: String,
    /// OAuth 1.0a consumer secret.
    pub api_secret: String,
    /// OAuth 1.0a access token.
    pub access_token: String,
    /// OAuth 1.0a access token secret.
    pub access_secret: String,
    /// Key for the third-party search endpoint.
    pub rapidapi_key: String,
}

impl std::fmt::Debug for MicroblogCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroblogCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .field("access_secret", &"[REDACTED]")
            .field("rapidapi_key", &"[REDACTED]")
            .finish()
    }
}

impl MicroblogCredentials {
    /// Build and validate the bundle from a config section.
    ///
    /// # Errors
    ///
    /// Returns [`MissingCredential`] naming the first absent secret.
    pub fn from_config(section: &MicroblogSection) -> Result<Self, MissingCredential> {
        Ok(Self {
            api_key: require(&section.api_key, "microblog.api_key")?,
            api_secret: require(&section.api_secret, "microblog.api_secret")?,
            access_token: require(&section.access_token, "microblog.access_token")?,
            access_secret: require(&section.access_secret, "microblog.access_secret")?,
            rapidapi_key: require(&section.rapidapi_key, "microblog.rapidapi_key")?,
        })
    }
}

// ── Chat ────────────────────────────────────────────────────────

/// Validated chat platform credentials.
#[derive(Clone)]
pub struct ChatCredentials {
    /// Bot API token.
    pub api_token: String,
}

impl std::fmt::Debug for ChatCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCredentials")
            .field("api_token", &"[REDACTED]")
            .finish()
    }
}

impl ChatCredentials {
    /// Build and validate the bundle from a config section.
    ///
    /// # Errors
    ///
    /// Returns [`MissingCredential`] when the token is absent or empty.
    pub fn from_config(section: &ChatSection) -> Result<Self, MissingCredential> {
        Ok(Self {
            api_token: require(&section.api_token, "chat.api_token")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_microblog_section() -> MicroblogSection {
        MicroblogSection {
            api_key: Some("ck".to_owned()),
            api_secret: Some("cs".to_owned()),
            access_token: Some("at".to_owned()),
            access_secret: Some("as".to_owned()),
            rapidapi_key: Some("rk".to_owned()),
            ..MicroblogSection::default()
        }
    }

    #[test]
    fn microblog_bundle_from_complete_section() {
        let creds =
            MicroblogCredentials::from_config(&full_microblog_section()).expect("complete");
        assert_eq!(creds.api_key, "ck");
        assert_eq!(creds.rapidapi_key, "rk");
    }

    #[test]
    fn microblog_fails_closed_on_any_missing_secret() {
        let mut section = full_microblog_section();
        section.access_secret = None;
        let err = MicroblogCredentials::from_config(&section).expect_err("must fail");
        assert_eq!(err.0, "microblog.access_secret");

        let mut blank = full_microblog_section();
        blank.rapidapi_key = Some("   ".to_owned());
        assert!(MicroblogCredentials::from_config(&blank).is_err());
    }

    #[test]
    fn chat_requires_token() {
        let section = ChatSection::default();
        assert!(ChatCredentials::from_config(&section).is_err());

        let with_token = ChatSection {
            api_token: Some("123:abc".to_owned()),
            ..ChatSection::default()
        };
        let creds = ChatCredentials::from_config(&with_token).expect("token present");
        assert_eq!(creds.api_token, "123:abc");
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds =
            MicroblogCredentials::from_config(&full_microblog_section()).expect("complete");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("\"cs\""));
        assert!(!debug.contains("\"rk\""));
        assert!(debug.contains("[REDACTED]"));
    }
}
