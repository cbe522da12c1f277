//! Microblog platform adapter.
//!
//! Polls a third-party search endpoint for fresh mentions of the
//! monitored accounts, routes each mention's text through the responder,
//! and posts the reply through the platform's v2 API with an OAuth 1.0a
//! signed request. The adapter runs on its own dedicated OS thread with a
//! single-threaded runtime so a wedged polling loop can never starve the
//! chat adapter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::MicroblogSection;
use crate::credentials::MicroblogCredentials;
use crate::responder::Responder;
use crate::retry::{AttemptError, FailureClass, RetryExecutor, RetryPolicy};

pub mod mentions;
pub mod oauth;

use mentions::{extract_mentions, filter_new, Mention};
use oauth::OauthSigner;

/// Base URL for the platform's authenticated write API.
const DEFAULT_API_BASE: &str = "https://api.twitter.com/2";

/// Hard platform limit on post length, in characters.
const MAX_POST_CHARS: usize = 280;

/// Per-request timeout for both search and write calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between accounts inside one sweep, to spread request load.
const ACCOUNT_PAUSE: Duration = Duration::from_secs(1);

/// Retry budget for mention searches: 2s, 4s, 8s. Only rate limits are
/// retried; any other search failure degrades to an empty result.
const SEARCH_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2), 1);

/// Retry budget for posting replies. Rate limits back off hard
/// (10s, 20s, 40s) because the write API enforces strict quotas.
const REPLY_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1), 10);

/// Posted when the responder fails and the author still deserves an
/// answer.
const FALLBACK_TEXT: &str = "We're experiencing some difficulties. Please try again later.";

/// Failures surfaced by the microblog transport.
#[derive(Debug, Error)]
pub enum MicroblogError {
    /// Transport-level failure.
    #[error("microblog HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The platform returned a non-success status.
    #[error("microblog API error (status {status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Classify a transport error for retry purposes.
fn classify_transport(error: &reqwest::Error) -> FailureClass {
    if error.is_timeout() {
        FailureClass::Timeout
    } else {
        FailureClass::Server
    }
}

/// Classify a non-success HTTP status for reply retry purposes.
fn classify_status(status: u16) -> FailureClass {
    match status {
        429 => FailureClass::RateLimited,
        500..=599 => FailureClass::Server,
        _ => FailureClass::Permanent,
    }
}

/// Classify a non-success HTTP status for search retry purposes.
///
/// Searches retry only on rate limits; everything else is abandoned at
/// once and the caller degrades to an empty result.
fn classify_search_status(status: u16) -> FailureClass {
    if status == 429 {
        FailureClass::RateLimited
    } else {
        FailureClass::Permanent
    }
}

/// Truncate reply text to the platform's length limit.
///
/// Replies over the limit keep their first 277 characters and gain a
/// trailing `...`. Counts characters, not bytes.
pub fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= MAX_POST_CHARS {
        return text.to_owned();
    }
    let head: String = text.chars().take(MAX_POST_CHARS.saturating_sub(3)).collect();
    format!("{head}...")
}

/// Adapter for the microblog platform.
///
/// Built fail-closed from validated [`MicroblogCredentials`]; an instance
/// always holds a complete signing key set.
pub struct MicroblogAdapter {
    client: reqwest::Client,
    signer: OauthSigner,
    rapidapi_key: String,
    rapidapi_host: String,
    search_base: String,
    api_base: String,
    accounts: Vec<String>,
    polling_interval: Duration,
    responder: Arc<dyn Responder>,
}

impl std::fmt::Debug for MicroblogAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroblogAdapter")
            .field("rapidapi_host", &self.rapidapi_host)
            .field("accounts", &self.accounts)
            .field("polling_interval", &self.polling_interval)
            .finish()
    }
}

impl MicroblogAdapter {
    /// Build the adapter from validated credentials and its config
    /// section.
    pub fn new(
        credentials: &MicroblogCredentials,
        section: &MicroblogSection,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            signer: OauthSigner::new(
                credentials.api_key.clone(),
                credentials.api_secret.clone(),
                credentials.access_token.clone(),
                credentials.access_secret.clone(),
            ),
            rapidapi_key: credentials.rapidapi_key.clone(),
            rapidapi_host: section.rapidapi_host.clone(),
            search_base: format!("https://{}", section.rapidapi_host),
            api_base: DEFAULT_API_BASE.to_owned(),
            accounts: section.accounts.clone(),
            polling_interval: Duration::from_secs(section.polling_interval_seconds),
            responder,
        }
    }

    /// Override the write API base URL (used by tests against a local
    /// server).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Override the search endpoint base URL (used by tests).
    #[must_use]
    pub fn with_search_base(mut self, base: impl Into<String>) -> Self {
        self.search_base = base.into();
        self
    }

    /// Search for recent posts mentioning `account` (leading `@`
    /// included).
    ///
    /// Never fails: rate limits are retried on the search budget, and
    /// every other failure (bad status, transport error, unrecognized
    /// payload shape) is logged and degrades to an empty list, so one
    /// broken account can never starve the rest of a sweep.
    pub async fn search_mentions(&self, account: &str) -> Vec<Mention> {
        let url = format!("{}/search-v2", self.search_base);
        let result = RetryExecutor::run(&SEARCH_RETRY, "search_mentions", |_| {
            self.search_once(&url, account)
        })
        .await;
        match result {
            Ok(payload) => extract_mentions(&payload),
            Err(e) => {
                warn!(account, error = %e, "mention search failed, treating as no mentions");
                Vec::new()
            }
        }
    }

    /// One search request, classified for the retry loop.
    async fn search_once(
        &self,
        url: &str,
        account: &str,
    ) -> Result<Value, AttemptError<MicroblogError>> {
        let resp = self
            .client
            .get(url)
            .header("x-rapidapi-host", &self.rapidapi_host)
            .header("x-rapidapi-key", &self.rapidapi_key)
            .query(&[("query", account), ("count", "20"), ("type", "Latest")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| AttemptError::new(FailureClass::Permanent, MicroblogError::Http(e)))?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return resp
                .json::<Value>()
                .await
                .map_err(|e| AttemptError::new(FailureClass::Permanent, MicroblogError::Http(e)));
        }

        let body = resp.text().await.unwrap_or_default();
        Err(AttemptError::new(
            classify_search_status(status),
            MicroblogError::Api { status, body },
        ))
    }

    /// Post `text` as a reply to `post_id`.
    ///
    /// Returns the created post's id, or `None` when the reply could not
    /// be delivered after every retry. Delivery failure is terminal for
    /// the mention, never for the adapter.
    pub async fn reply(&self, post_id: &str, text: &str) -> Option<String> {
        let url = format!("{}/tweets", self.api_base);
        let payload = json!({
            "text": text,
            "reply": {"in_reply_to_tweet_id": post_id},
        });

        let result =
            RetryExecutor::run(&REPLY_RETRY, "reply", |_| self.post_once(&url, &payload)).await;
        match result {
            Ok(id) => {
                info!(post_id, reply_id = %id, "posted reply");
                Some(id)
            }
            Err(e) => {
                error!(post_id, error = %e, "giving up on reply");
                None
            }
        }
    }

    /// One signed write request, classified for the retry loop.
    ///
    /// The OAuth signature covers only the oauth parameters: a JSON body
    /// is not part of the 1.0a signature base string.
    async fn post_once(
        &self,
        url: &str,
        payload: &Value,
    ) -> Result<String, AttemptError<MicroblogError>> {
        let authorization = self.signer.authorization_header("POST", url, &[]);
        let resp = self
            .client
            .post(url)
            .header("Authorization", authorization)
            .json(payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| AttemptError::new(classify_transport(&e), MicroblogError::Http(e)))?;

        let status = resp.status().as_u16();
        if status == 200 || status == 201 {
            let body: Value = resp
                .json()
                .await
                .map_err(|e| AttemptError::new(FailureClass::Permanent, MicroblogError::Http(e)))?;
            return match body.get("data").and_then(|d| d.get("id")).and_then(Value::as_str) {
                Some(id) if !id.is_empty() => Ok(id.to_owned()),
                _ => Err(AttemptError::new(
                    FailureClass::Permanent,
                    MicroblogError::Api {
                        status,
                        body: "success response without data.id".to_owned(),
                    },
                )),
            };
        }

        let body = resp.text().await.unwrap_or_default();
        Err(AttemptError::new(
            classify_status(status),
            MicroblogError::Api { status, body },
        ))
    }

    /// Answer one fresh mention: prompt the responder with the mention
    /// text minus addressing handles, then reply.
    ///
    /// A responder failure degrades to [`FALLBACK_TEXT`] addressed at the
    /// author; it never propagates.
    async fn handle_mention(&self, mention: &Mention) {
        info!(id = %mention.id, author = %mention.author, "handling mention");
        let prompt = mention.text_without_handles();

        match self.responder.generate(&prompt).await {
            Ok(text) => {
                let reply_text = truncate_reply(&text);
                if self.reply(&mention.id, &reply_text).await.is_none() {
                    warn!(id = %mention.id, "reply was not delivered");
                }
            }
            Err(e) => {
                error!(id = %mention.id, error = %e, "responder failed, posting fallback");
                let fallback = format!("@{} {}", mention.author, FALLBACK_TEXT);
                let _ = self.reply(&mention.id, &truncate_reply(&fallback)).await;
            }
        }
    }

    /// One pass over every monitored account. Per-account failures are
    /// absorbed inside [`MicroblogAdapter::search_mentions`] and
    /// [`MicroblogAdapter::reply`], so a sweep always visits every
    /// account.
    pub async fn sweep(&self) {
        for (idx, account) in self.accounts.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(ACCOUNT_PAUSE).await;
            }
            let mentions = self.search_mentions(account).await;
            let window = i64::try_from(self.polling_interval.as_secs()).unwrap_or(i64::MAX);
            let fresh = filter_new(&mentions, account, window);
            debug!(
                account,
                found = mentions.len(),
                fresh = fresh.len(),
                "mention sweep"
            );
            for mention in &fresh {
                self.handle_mention(mention).await;
            }
        }
    }

    /// The polling loop. Never returns; every failure is handled at its
    /// site within the sweep.
    async fn run_loop(&self) {
        info!(
            accounts = ?self.accounts,
            interval_secs = self.polling_interval.as_secs(),
            "microblog polling loop started"
        );
        loop {
            self.sweep().await;
            tokio::time::sleep(self.polling_interval).await;
        }
    }

    /// Move the adapter onto its own OS thread with a single-threaded
    /// runtime and start polling.
    ///
    /// The thread is never joined; it dies with the process.
    ///
    /// # Errors
    ///
    /// Returns an error when the OS refuses to spawn the thread.
    pub fn spawn(self) -> std::io::Result<MicroblogHandle> {
        let live = Arc::new(AtomicBool::new(true));
        let live_flag = Arc::clone(&live);

        let thread = std::thread::Builder::new()
            .name("microblog-adapter".to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(error = %e, "failed to build microblog runtime");
                        live_flag.store(false, Ordering::SeqCst);
                        return;
                    }
                };
                runtime.block_on(self.run_loop());
                live_flag.store(false, Ordering::SeqCst);
            })?;

        Ok(MicroblogHandle { live, thread })
    }
}

/// Handle to a running microblog adapter thread.
#[derive(Debug)]
pub struct MicroblogHandle {
    live: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
}

impl MicroblogHandle {
    /// Whether the polling thread is still running.
    pub fn is_alive(&self) -> bool {
        self.live.load(Ordering::SeqCst) && !self.thread.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- truncate_reply --

    #[test]
    fn short_reply_untouched() {
        assert_eq!(truncate_reply("hello"), "hello");
    }

    #[test]
    fn reply_at_limit_untouched() {
        let text = "x".repeat(280);
        assert_eq!(truncate_reply(&text), text);
    }

    #[test]
    fn long_reply_truncated_with_ellipsis() {
        let text = "x".repeat(300);
        let truncated = truncate_reply(&text);
        assert_eq!(truncated.chars().count(), 280);
        assert!(truncated.ends_with("..."));
        assert!(truncated.starts_with("xxx"));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        // Multibyte characters must not be split.
        let text = "é".repeat(300);
        let truncated = truncate_reply(&text);
        assert_eq!(truncated.chars().count(), 280);
        assert!(truncated.ends_with("..."));
    }

    // -- failure classification --

    #[test]
    fn rate_limit_status_is_retryable() {
        assert_eq!(classify_status(429), FailureClass::RateLimited);
        assert!(classify_status(429).is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        assert_eq!(classify_status(500), FailureClass::Server);
        assert_eq!(classify_status(503), FailureClass::Server);
    }

    #[test]
    fn client_errors_are_permanent() {
        assert_eq!(classify_status(400), FailureClass::Permanent);
        assert_eq!(classify_status(403), FailureClass::Permanent);
        assert!(!classify_status(403).is_retryable());
    }

    #[test]
    fn search_retries_only_rate_limits() {
        assert_eq!(classify_search_status(429), FailureClass::RateLimited);
        assert_eq!(classify_search_status(500), FailureClass::Permanent);
        assert_eq!(classify_search_status(403), FailureClass::Permanent);
    }

    // -- retry budgets --

    #[test]
    fn search_backoff_schedule() {
        assert_eq!(
            SEARCH_RETRY.delay_for(FailureClass::RateLimited, 0),
            Duration::from_secs(2)
        );
        assert_eq!(
            SEARCH_RETRY.delay_for(FailureClass::RateLimited, 2),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn reply_rate_limit_backs_off_hard() {
        assert_eq!(
            REPLY_RETRY.delay_for(FailureClass::RateLimited, 0),
            Duration::from_secs(10)
        );
        assert_eq!(
            REPLY_RETRY.delay_for(FailureClass::Server, 0),
            Duration::from_secs(2)
        );
    }
}
