//! OAuth 1.0a request signing (HMAC-SHA1) for the microblog write API.
//!
//! The platform verifies signatures byte-for-byte, so every step here must
//! match RFC 5849 exactly: RFC 3986 percent-encoding with the unreserved
//! set only, parameters sorted by encoded key, base string
//! `METHOD&enc(url)&enc(param_string)`, signing key
//! `enc(consumer_secret)&enc(token_secret)`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986: only ALPHA / DIGIT / "-" / "." / "_" / "~" stay unescaped.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a string per RFC 3986 (stricter than form encoding).
fn encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE_SET).to_string()
}

/// Signs outbound microblog API requests with OAuth 1.0a.
///
/// The signer is deterministic given a timestamp and nonce; the
/// convenience [`OauthSigner::authorization_header`] injects the current
/// time and a fresh v4-UUID nonce.
#[derive(Clone)]
pub struct OauthSigner {
    consumer_key: String,
    consumer_secret: String,
    access_token: String,
    token_secret: String,
}

impl std::fmt::Debug for OauthSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OauthSigner")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"[REDACTED]")
            .field("access_token", &self.access_token)
            .field("token_secret", &"[REDACTED]")
            .finish()
    }
}

impl OauthSigner {
    /// Build a signer from the four credential strings.
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        access_token: impl Into<String>,
        token_secret: impl Into<String>,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            access_token: access_token.into(),
            token_secret: token_secret.into(),
        }
    }

    /// Build the `Authorization` header for a request, using the current
    /// unix time and a fresh nonce.
    ///
    /// `params` must contain the request's scalar query/body parameters;
    /// JSON bodies are not part of the signature base string.
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
    ) -> String {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.authorization_header_at(method, url, params, &timestamp, &nonce)
    }

    /// Deterministic variant of [`OauthSigner::authorization_header`] with
    /// an injected timestamp and nonce.
    pub fn authorization_header_at(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        timestamp: &str,
        nonce: &str,
    ) -> String {
        let mut oauth_params: Vec<(String, String)> = vec![
            ("oauth_consumer_key".to_owned(), self.consumer_key.clone()),
            ("oauth_nonce".to_owned(), nonce.to_owned()),
            (
                "oauth_signature_method".to_owned(),
                "HMAC-SHA1".to_owned(),
            ),
            ("oauth_timestamp".to_owned(), timestamp.to_owned()),
            ("oauth_token".to_owned(), self.access_token.clone()),
            ("oauth_version".to_owned(), "1.0".to_owned()),
        ];

        let signature = self.sign(method, url, params, &oauth_params);
        oauth_params.push(("oauth_signature".to_owned(), signature));
        oauth_params.sort_by(|a, b| a.0.cmp(&b.0));

        let header_parts: Vec<String> = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect();

        format!("OAuth {}", header_parts.join(", "))
    }

    /// Compute the base64 HMAC-SHA1 signature over the base string.
    fn sign(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        oauth_params: &[(String, String)],
    ) -> String {
        // Merge request parameters with oauth parameters, encode both
        // sides, then sort by encoded key (ties broken by encoded value).
        let mut pairs: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (encode(k), encode(v)))
            .chain(oauth_params.iter().map(|(k, v)| (encode(k), encode(v))))
            .collect();
        pairs.sort();

        let param_string = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        // Query string is carried in `params`, never in the base URL.
        let base_url = url.split('?').next().unwrap_or(url);
        let base_string = format!(
            "{}&{}&{}",
            method.to_uppercase(),
            encode(base_url),
            encode(&param_string)
        );

        let signing_key = format!(
            "{}&{}",
            encode(&self.consumer_secret),
            encode(&self.token_secret)
        );

        let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes())
            .expect("HMAC-SHA1 accepts keys of any length");
        mac.update(base_string.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }
}
