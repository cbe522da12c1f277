//! Adapter lifecycle supervision.
//!
//! The supervisor owns the shared responder and every platform adapter.
//! A periodic liveness sweep restarts an unhealthy adapter once; an
//! adapter that is unhealthy again on a later sweep without having been
//! healthy in between is removed from supervision for good. Supervision
//! errors are logged, never propagated: one broken platform must not
//! take down the others.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::chat::ChatAdapter;
use crate::config::{AviaryConfig, ChatSection, MicroblogSection};
use crate::credentials::{ChatCredentials, MicroblogCredentials};
use crate::microblog::{MicroblogAdapter, MicroblogHandle};
use crate::responder::{GeminiResponder, Responder};

/// A platform adapter as seen by the supervisor's liveness sweep.
///
/// Implemented by the built-in chat and microblog entries; tests inject
/// their own implementations through [`BotSupervisor::adopt`].
#[async_trait]
pub trait SupervisedAdapter: Send {
    /// Stable display name used in logs and [`BotSupervisor::active_bots`].
    fn name(&self) -> &str;

    /// Whether the adapter's work loop is currently alive.
    fn is_healthy(&self) -> bool;

    /// Tear down and start a fresh instance. Returns whether the new
    /// instance came up.
    async fn restart(&mut self) -> bool;

    /// Stop the adapter. Must be safe to call more than once.
    async fn shutdown(&mut self);
}

/// One supervised adapter plus its restart bookkeeping.
struct Supervised {
    adapter: Box<dyn SupervisedAdapter>,
    restart_attempted: bool,
}

// ── Built-in entries ────────────────────────────────────────────

/// Chat adapter under supervision: the adapter, its polling task, and
/// everything needed to rebuild both.
struct ChatEntry {
    adapter: Arc<ChatAdapter>,
    task: Option<tokio::task::JoinHandle<()>>,
    credentials: ChatCredentials,
    section: ChatSection,
    responder: Arc<dyn Responder>,
}

#[async_trait]
impl SupervisedAdapter for ChatEntry {
    fn name(&self) -> &str {
        "Telegram"
    }

    fn is_healthy(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    async fn restart(&mut self) -> bool {
        self.adapter.shutdown();
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let adapter = Arc::new(ChatAdapter::new(
            self.credentials.clone(),
            &self.section,
            Arc::clone(&self.responder),
        ));
        if let Err(e) = adapter.initialize().await {
            error!(error = %e, "chat adapter failed to reinitialize");
            return false;
        }
        self.task = Some(tokio::spawn(Arc::clone(&adapter).run()));
        self.adapter = adapter;
        true
    }

    async fn shutdown(&mut self) {
        self.adapter.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Microblog adapter under supervision. The polling thread is daemonic:
/// shutdown leaves it to die with the process, restart spawns a fresh
/// thread.
struct MicroblogEntry {
    handle: MicroblogHandle,
    credentials: MicroblogCredentials,
    section: MicroblogSection,
    responder: Arc<dyn Responder>,
}

#[async_trait]
impl SupervisedAdapter for MicroblogEntry {
    fn name(&self) -> &str {
        "Twitter"
    }

    fn is_healthy(&self) -> bool {
        self.handle.is_alive()
    }

    async fn restart(&mut self) -> bool {
        let adapter = MicroblogAdapter::new(
            &self.credentials,
            &self.section,
            Arc::clone(&self.responder),
        );
        match adapter.spawn() {
            Ok(handle) => {
                self.handle = handle;
                true
            }
            Err(e) => {
                error!(error = %e, "failed to respawn microblog thread");
                false
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("microblog adapter left to terminate with the process");
    }
}

// ── Supervisor ──────────────────────────────────────────────────

/// Owns the responder and all platform adapters and keeps them alive.
pub struct BotSupervisor {
    config: AviaryConfig,
    responder: Option<Arc<dyn Responder>>,
    supervised: Vec<Supervised>,
}

impl BotSupervisor {
    /// Build a supervisor with no adapters started yet.
    pub fn new(config: AviaryConfig) -> Self {
        Self {
            config,
            responder: None,
            supervised: Vec::new(),
        }
    }

    /// The shared responder, once initialized.
    pub fn responder(&self) -> Option<Arc<dyn Responder>> {
        self.responder.as_ref().map(Arc::clone)
    }

    /// Initialize the shared responder from config.
    ///
    /// When a tuned model is configured it is used only if the provider's
    /// tuned-model listing confirms it exists; otherwise the default
    /// model is used. Returns whether a responder is now available --
    /// without an API key there is none, and no adapter can start.
    pub async fn initialize_responder(&mut self) -> bool {
        let Some(api_key) = self.config.responder.api_key.clone() else {
            warn!("no responder API key configured");
            return false;
        };

        let mut model = self.config.responder.model.clone();
        if let Some(tuned) = &self.config.responder.tuned_model {
            let tuned_ref = format!("tunedModels/{}", tuned.trim_start_matches("tunedModels/"));
            let probe = GeminiResponder::new(api_key.clone(), model.clone(), None);
            match probe.list_tuned_models().await {
                Ok(names) if names.contains(&tuned_ref) => {
                    info!(model = %tuned_ref, "using tuned model");
                    model = tuned_ref;
                }
                Ok(_) => {
                    warn!(tuned = %tuned, default = %model, "tuned model not listed, using default");
                }
                Err(e) => {
                    warn!(error = %e, default = %model, "tuned model listing failed, using default");
                }
            }
        }

        let responder = GeminiResponder::new(
            api_key,
            model,
            self.config.responder.system_instruction.clone(),
        );
        info!(model = %responder.model(), "responder initialized");
        self.responder = Some(Arc::new(responder));
        true
    }

    /// Place an adapter under supervision. Used by the built-in starters
    /// and by tests injecting fakes.
    pub fn adopt(&mut self, adapter: Box<dyn SupervisedAdapter>) {
        info!(adapter = adapter.name(), "adapter under supervision");
        self.supervised.push(Supervised {
            adapter,
            restart_attempted: false,
        });
    }

    /// Names of the supervised adapters, in start order.
    pub fn active_bots(&self) -> Vec<String> {
        self.supervised
            .iter()
            .map(|s| s.adapter.name().to_owned())
            .collect()
    }

    /// Start the microblog adapter if it is enabled and fully
    /// configured. Returns whether it started.
    pub fn start_microblog_adapter(&mut self) -> bool {
        if !self.config.microblog.enabled {
            info!("microblog adapter disabled by config");
            return false;
        }
        if self.config.microblog.accounts.is_empty() {
            warn!("microblog adapter enabled but no accounts to monitor");
            return false;
        }
        let credentials = match MicroblogCredentials::from_config(&self.config.microblog) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "microblog adapter not started");
                return false;
            }
        };
        let Some(responder) = self.responder() else {
            warn!("microblog adapter needs a responder");
            return false;
        };

        let adapter =
            MicroblogAdapter::new(&credentials, &self.config.microblog, Arc::clone(&responder));
        match adapter.spawn() {
            Ok(handle) => {
                self.adopt(Box::new(MicroblogEntry {
                    handle,
                    credentials,
                    section: self.config.microblog.clone(),
                    responder,
                }));
                true
            }
            Err(e) => {
                error!(error = %e, "failed to spawn microblog thread");
                false
            }
        }
    }

    /// Start the chat adapter if it is enabled and fully configured.
    /// Returns whether it started.
    pub async fn start_chat_adapter(&mut self) -> bool {
        if !self.config.chat.enabled {
            info!("chat adapter disabled by config");
            return false;
        }
        let credentials = match ChatCredentials::from_config(&self.config.chat) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "chat adapter not started");
                return false;
            }
        };
        let Some(responder) = self.responder() else {
            warn!("chat adapter needs a responder");
            return false;
        };

        let adapter = Arc::new(ChatAdapter::new(
            credentials.clone(),
            &self.config.chat,
            Arc::clone(&responder),
        ));
        if let Err(e) = adapter.initialize().await {
            error!(error = %e, "chat adapter failed to initialize");
            return false;
        }
        let task = tokio::spawn(Arc::clone(&adapter).run());

        self.adopt(Box::new(ChatEntry {
            adapter,
            task: Some(task),
            credentials,
            section: self.config.chat.clone(),
            responder,
        }));
        true
    }

    /// Run liveness sweeps until no adapters remain under supervision.
    pub async fn monitor_loop(&mut self) {
        let interval = Duration::from_secs(self.config.supervisor.monitor_interval_seconds);
        info!(
            interval_secs = interval.as_secs(),
            adapters = ?self.active_bots(),
            "supervision loop started"
        );
        while !self.supervised.is_empty() {
            tokio::time::sleep(interval).await;
            self.sweep_once().await;
        }
        info!("no adapters remain under supervision");
    }

    /// One liveness pass over every supervised adapter.
    ///
    /// A healthy adapter clears its restart marker. An unhealthy adapter
    /// is restarted on first sight and removed on the second.
    pub async fn sweep_once(&mut self) {
        let mut idx = 0;
        while idx < self.supervised.len() {
            let entry = &mut self.supervised[idx];
            let name = entry.adapter.name().to_owned();

            if entry.adapter.is_healthy() {
                entry.restart_attempted = false;
                idx = idx.saturating_add(1);
                continue;
            }

            if entry.restart_attempted {
                error!(adapter = %name, "adapter failed again after restart, removing");
                let mut removed = self.supervised.remove(idx);
                removed.adapter.shutdown().await;
                continue;
            }

            warn!(adapter = %name, "adapter unhealthy, restarting");
            entry.restart_attempted = true;
            if entry.adapter.restart().await {
                info!(adapter = %name, "adapter restarted");
                idx = idx.saturating_add(1);
            } else {
                error!(adapter = %name, "restart failed, removing");
                self.supervised.remove(idx);
            }
        }
    }

    /// Stop every adapter and drop it from supervision. Idempotent.
    pub async fn shutdown(&mut self) {
        info!("supervisor shutting down");
        for mut entry in self.supervised.drain(..) {
            entry.adapter.shutdown().await;
        }
        info!("supervisor shutdown complete");
    }
}
