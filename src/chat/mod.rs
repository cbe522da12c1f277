//! Chat platform adapter.
//!
//! Long-polls the bot API for updates and answers text messages through
//! the responder. Private chats answer every message from an allowed
//! user; group chats answer only when the bot is addressed (see
//! [`addressing`]). Slash commands (`/start`, `/help`, `/debug`) are
//! dispatched before free-text handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ChatSection;
use crate::credentials::ChatCredentials;
use crate::responder::Responder;

pub mod addressing;

/// Default bot API base.
const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Server-side long-poll timeout passed to `getUpdates`.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Extra client-side timeout on top of the long-poll window.
const CLIENT_TIMEOUT_MARGIN_SECS: u64 = 10;

/// First backoff after a failed poll.
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Backoff ceiling; polling retries forever at this pace.
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Prompt used when a group mention carries no other text.
const DEFAULT_GREETING: &str = "Hello";

/// Sent to unauthorized users in private chats.
const UNAUTHORIZED_TEXT: &str = "Sorry, you're not authorized to use this bot.";

/// Sent when the responder fails.
const APOLOGY_TEXT: &str = "I'm having trouble processing your request. Please try again later.";

/// Reply to `/help`.
const HELP_TEXT: &str = "Commands:\n\
    /start - introduction\n\
    /help - this message\n\
    /debug - connection details\n\
    \n\
    Anything else you send is answered by the AI.";

/// Failures surfaced by the chat transport.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Transport-level failure.
    #[error("chat HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The bot API rejected the call.
    #[error("chat API error: {0}")]
    Api(String),
}

// ── Wire types ──────────────────────────────────────────────────

/// Standard bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// One polled update.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    /// Monotonic update id, used as the next poll offset.
    pub update_id: i64,
    /// The message, when this update carries one.
    pub message: Option<Message>,
}

/// An inbound or sent message.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Platform message id.
    pub message_id: i64,
    /// Sender; absent for channel posts.
    pub from: Option<User>,
    /// The chat the message belongs to.
    pub chat: Chat,
    /// Text content, when present.
    pub text: Option<String>,
    /// Entities annotating the text (mentions, commands).
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    /// The message this one replies to, when present.
    pub reply_to_message: Option<Box<Message>>,
}

/// A platform user.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// Platform user id.
    pub id: i64,
    /// Display first name.
    pub first_name: String,
    /// Handle without the leading `@`, when set.
    pub username: Option<String>,
}

/// A chat (private, group, supergroup, channel).
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    /// Platform chat id.
    pub id: i64,
    /// Chat type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
}

/// A span annotation on message text.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    /// Entity type, e.g. `mention` or `bot_command`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Start of the span, in characters.
    pub offset: usize,
    /// Length of the span, in characters.
    pub length: usize,
}

/// The bot's own identity, fetched once at startup via `getMe`.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    /// The bot's user id.
    pub id: i64,
    /// The bot's handle without the leading `@`.
    pub username: String,
    /// The bot's display name.
    pub first_name: String,
}

/// Whether a chat type is a multi-user room.
fn is_group_chat(kind: &str) -> bool {
    matches!(kind, "group" | "supergroup" | "channel")
}

/// Split a leading slash command into `(name, target_bot)`.
///
/// `/start` yields `("start", None)`; the group form `/start@SomeBot`
/// yields `("start", Some("somebot"))`. Non-command text yields `None`.
fn parse_command(text: &str) -> Option<(String, Option<String>)> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    if name.is_empty() {
        return None;
    }
    match name.split_once('@') {
        Some((name, target)) => Some((name.to_lowercase(), Some(target.to_lowercase()))),
        None => Some((name.to_lowercase(), None)),
    }
}

// ── Adapter ─────────────────────────────────────────────────────

/// Adapter for the chat platform.
pub struct ChatAdapter {
    token: String,
    api_base: String,
    client: reqwest::Client,
    responder: Arc<dyn Responder>,
    allowed_user_ids: Vec<i64>,
    polling_interval: Duration,
    identity: RwLock<Option<BotIdentity>>,
    last_processed: Mutex<HashMap<i64, i64>>,
    running: AtomicBool,
    stop: watch::Sender<bool>,
}

impl std::fmt::Debug for ChatAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatAdapter")
            .field("token", &"[REDACTED]")
            .field("allowed_user_ids", &self.allowed_user_ids)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl ChatAdapter {
    /// Build the adapter from validated credentials and its config
    /// section.
    pub fn new(
        credentials: ChatCredentials,
        section: &ChatSection,
        responder: Arc<dyn Responder>,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            token: credentials.api_token,
            api_base: DEFAULT_API_BASE.to_owned(),
            client: reqwest::Client::new(),
            responder,
            allowed_user_ids: section.allowed_user_ids.clone(),
            polling_interval: Duration::from_secs(section.polling_interval_seconds),
            identity: RwLock::new(None),
            last_processed: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            stop,
        }
    }

    /// Override the API base URL (used by tests against a local server).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// URL for one bot API method.
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Issue one bot API call and unwrap its envelope.
    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, ChatError> {
        let timeout =
            Duration::from_secs(POLL_TIMEOUT_SECS.saturating_add(CLIENT_TIMEOUT_MARGIN_SECS));
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .timeout(timeout)
            .send()
            .await?;

        let envelope: ApiEnvelope<T> = resp.json().await?;
        if !envelope.ok {
            return Err(ChatError::Api(
                envelope
                    .description
                    .unwrap_or_else(|| "unknown API error".to_owned()),
            ));
        }
        envelope
            .result
            .ok_or_else(|| ChatError::Api("ok response without result".to_owned()))
    }

    /// Fetch the bot's identity and cache it.
    ///
    /// Must complete before [`ChatAdapter::run`]: group addressing needs
    /// the bot's username, and a bad token should fail startup, not the
    /// poll loop.
    ///
    /// # Errors
    ///
    /// Returns a [`ChatError`] when `getMe` fails, typically an invalid
    /// token.
    pub async fn initialize(&self) -> Result<(), ChatError> {
        let me: User = self.call("getMe", &json!({})).await?;
        let identity = BotIdentity {
            id: me.id,
            username: me.username.unwrap_or_default(),
            first_name: me.first_name,
        };
        info!(username = %identity.username, id = identity.id, "chat adapter initialized");
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(identity);
        Ok(())
    }

    /// The cached bot identity, once [`ChatAdapter::initialize`] ran.
    pub fn identity(&self) -> Option<BotIdentity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a user may talk to the bot. An empty allow-list means
    /// public access.
    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.allowed_user_ids.is_empty() || self.allowed_user_ids.contains(&user_id)
    }

    /// Whether the polling loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request the polling loop to stop. Idempotent; safe before
    /// [`ChatAdapter::run`] ever started.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
        info!("chat adapter shutdown requested");
    }

    /// When the bot last answered in a chat, as a unix timestamp. For
    /// diagnostics.
    pub fn last_processed_at(&self, chat_id: i64) -> Option<i64> {
        self.last_processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat_id)
            .copied()
    }

    fn record_processed(&self, chat_id: i64) {
        self.last_processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chat_id, chrono::Utc::now().timestamp());
    }

    /// The update polling loop.
    ///
    /// Poll failures back off exponentially from 1s to a 30s ceiling and
    /// retry forever; only [`ChatAdapter::shutdown`] ends the loop.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut stop_rx = self.stop.subscribe();
        let mut offset: i64 = 0;
        let mut backoff = BACKOFF_INITIAL;
        info!("chat adapter polling started");

        loop {
            if *stop_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = stop_rx.changed() => break,
                result = self.get_updates(offset) => match result {
                    Ok(updates) => {
                        backoff = BACKOFF_INITIAL;
                        let idle = updates.is_empty();
                        for update in updates {
                            offset = offset.max(update.update_id.saturating_add(1));
                            self.handle_update(update).await;
                        }
                        if idle {
                            tokio::select! {
                                _ = stop_rx.changed() => break,
                                () = tokio::time::sleep(self.polling_interval) => {}
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "update poll failed, backing off"
                        );
                        tokio::select! {
                            _ = stop_rx.changed() => break,
                            () = tokio::time::sleep(backoff) => {}
                        }
                        backoff = backoff.saturating_mul(2).min(BACKOFF_MAX);
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("chat adapter stopped");
    }

    /// One long-poll for updates past `offset`.
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ChatError> {
        let body = json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &body).await
    }

    /// Route one update to command or free-text handling.
    async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.clone() else {
            debug!(chat_id = message.chat.id, "ignoring non-text message");
            return;
        };

        if let Some((command, target)) = parse_command(&text) {
            self.handle_command(&command, target.as_deref(), &message)
                .await;
        } else {
            self.on_message(&message, &text).await;
        }
    }

    /// Dispatch a slash command. Commands addressed at another bot
    /// (`/cmd@OtherBot`) and unknown commands are ignored.
    async fn handle_command(&self, command: &str, target: Option<&str>, message: &Message) {
        let Some(user) = &message.from else {
            return;
        };
        if let (Some(target), Some(me)) = (target, self.identity()) {
            if target != me.username.to_lowercase() {
                return;
            }
        }

        if !self.is_allowed(user.id) {
            warn!(user_id = user.id, command, "unauthorized command");
            if !is_group_chat(&message.chat.kind) {
                self.send_checked(message, UNAUTHORIZED_TEXT).await;
            }
            return;
        }

        let reply = match command {
            "start" => format!(
                "Hi {}! I'm ready to chat. Send me a message, or use /help to see what I can do.",
                user.first_name
            ),
            "help" => HELP_TEXT.to_owned(),
            "debug" => {
                let bot = self
                    .identity()
                    .map(|me| me.username)
                    .unwrap_or_default();
                format!(
                    "bot: @{bot}\nchat_id: {}\nchat_type: {}\nuser_id: {}",
                    message.chat.id, message.chat.kind, user.id
                )
            }
            other => {
                debug!(command = other, "ignoring unknown command");
                return;
            }
        };
        self.send_checked(message, &reply).await;
    }

    /// Handle free text: apply group addressing, authorization, then
    /// generate and send a reply.
    async fn on_message(&self, message: &Message, text: &str) {
        let Some(user) = &message.from else {
            return;
        };
        let chat_id = message.chat.id;
        let is_group = is_group_chat(&message.chat.kind);
        let mut prompt = text.to_owned();

        if is_group {
            let Some(me) = self.identity() else {
                warn!(chat_id, "group message before identity is known, ignoring");
                return;
            };
            let is_reply_to_bot = message
                .reply_to_message
                .as_deref()
                .and_then(|r| r.from.as_ref())
                .is_some_and(|f| f.id == me.id);
            let (addressed, cleaned) = addressing::resolve_group_mention(
                &me.username,
                text,
                &message.entities,
                is_reply_to_bot,
            );
            if !addressed {
                debug!(chat_id, "group message does not address the bot");
                return;
            }
            prompt = if cleaned.is_empty() {
                DEFAULT_GREETING.to_owned()
            } else {
                cleaned
            };
        }

        if !self.is_allowed(user.id) {
            warn!(user_id = user.id, chat_id, is_group, "unauthorized message");
            if !is_group {
                self.send_checked(message, UNAUTHORIZED_TEXT).await;
            }
            return;
        }

        if let Err(e) = self.send_chat_action(chat_id, "typing").await {
            debug!(error = %e, chat_id, "typing indicator failed");
        }

        match self.responder.generate(&prompt).await {
            Ok(reply) => {
                self.record_processed(chat_id);
                self.send_checked(message, &reply).await;
            }
            Err(e) => {
                error!(error = %e, chat_id, "responder failed, sending apology");
                self.send_checked(message, APOLOGY_TEXT).await;
            }
        }
    }

    /// Send a reply to a message, logging a delivery failure instead of
    /// propagating it.
    async fn send_checked(&self, message: &Message, text: &str) {
        if let Err(e) = self
            .send_message(message.chat.id, text, Some(message.message_id))
            .await
        {
            error!(error = %e, chat_id = message.chat.id, "failed to send message");
        }
    }

    /// Send a text message, optionally as a reply.
    ///
    /// # Errors
    ///
    /// Returns a [`ChatError`] when the API call fails.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<Message, ChatError> {
        let mut body = json!({"chat_id": chat_id, "text": text});
        if let Some(message_id) = reply_to {
            body["reply_to_message_id"] = json!(message_id);
        }
        self.call("sendMessage", &body).await
    }

    /// Send a chat action (e.g. `typing`).
    async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<bool, ChatError> {
        self.call("sendChatAction", &json!({"chat_id": chat_id, "action": action}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::ResponderError;

    struct EchoResponder;

    #[async_trait::async_trait]
    impl Responder for EchoResponder {
        async fn generate(&self, prompt: &str) -> Result<String, ResponderError> {
            Ok(prompt.to_owned())
        }
    }

    fn adapter(allowed: Vec<i64>) -> ChatAdapter {
        let credentials = ChatCredentials {
            api_token: "123:abc".to_owned(),
        };
        let section = ChatSection {
            allowed_user_ids: allowed,
            ..ChatSection::default()
        };
        ChatAdapter::new(credentials, &section, Arc::new(EchoResponder))
    }

    // -- parse_command --

    #[test]
    fn plain_command() {
        assert_eq!(parse_command("/start"), Some(("start".to_owned(), None)));
    }

    #[test]
    fn command_with_arguments() {
        assert_eq!(parse_command("/help me now"), Some(("help".to_owned(), None)));
    }

    #[test]
    fn group_form_carries_target() {
        assert_eq!(
            parse_command("/debug@MyBot"),
            Some(("debug".to_owned(), Some("mybot".to_owned())))
        );
    }

    #[test]
    fn free_text_is_not_a_command() {
        assert_eq!(parse_command("hello /start"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("/"), None);
    }

    // -- authorization --

    #[test]
    fn empty_allow_list_is_public() {
        let adapter = adapter(Vec::new());
        assert!(adapter.is_allowed(1));
        assert!(adapter.is_allowed(-42));
    }

    #[test]
    fn allow_list_restricts_access() {
        let adapter = adapter(vec![42, 77]);
        assert!(adapter.is_allowed(42));
        assert!(!adapter.is_allowed(43));
    }

    // -- misc --

    #[test]
    fn group_chat_kinds() {
        assert!(is_group_chat("group"));
        assert!(is_group_chat("supergroup"));
        assert!(is_group_chat("channel"));
        assert!(!is_group_chat("private"));
    }

    #[test]
    fn api_url_embeds_token() {
        let adapter = adapter(Vec::new());
        assert_eq!(
            adapter.api_url("getMe"),
            "https://api.telegram.org/bot123:abc/getMe"
        );
    }

    #[test]
    fn shutdown_before_run_is_safe_and_idempotent() {
        let adapter = adapter(Vec::new());
        adapter.shutdown();
        adapter.shutdown();
        assert!(!adapter.is_running());
    }

    #[test]
    fn identity_empty_until_initialized() {
        let adapter = adapter(Vec::new());
        assert!(adapter.identity().is_none());
    }

    #[test]
    fn envelope_parses_error_response() {
        let raw = r#"{"ok":false,"description":"Unauthorized"}"#;
        let envelope: ApiEnvelope<User> = serde_json::from_str(raw).expect("parses");
        assert!(!envelope.ok);
        assert_eq!(envelope.description.as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn update_parses_with_entities() {
        let raw = r#"{
            "update_id": 7,
            "message": {
                "message_id": 1,
                "from": {"id": 9, "first_name": "Ann", "username": "ann"},
                "chat": {"id": -100, "type": "supergroup"},
                "text": "hello @Bot",
                "entities": [{"type": "mention", "offset": 6, "length": 4}]
            }
        }"#;
        let update: Update = serde_json::from_str(raw).expect("parses");
        let message = update.message.expect("message present");
        assert_eq!(message.entities.len(), 1);
        assert_eq!(message.entities[0].kind, "mention");
        assert_eq!(message.chat.kind, "supergroup");
    }
}
