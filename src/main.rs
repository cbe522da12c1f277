//! Aviary entry point: load config, initialize logging and the shared
//! responder, start the platform adapters, and supervise them until a
//! shutdown signal arrives.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use aviary::config::AviaryConfig;
use aviary::logging;
use aviary::supervisor::BotSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real environments set variables directly.
    dotenvy::dotenv().ok();

    // Precedence: env vars > ./aviary.toml > defaults.
    let config = AviaryConfig::load().context("failed to load configuration")?;

    let _logging_guard = logging::init_production(Path::new(&config.supervisor.logs_dir))
        .context("failed to initialize logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "aviary starting");

    let mut supervisor = BotSupervisor::new(config);

    if !supervisor.initialize_responder().await {
        anyhow::bail!("no responder available; set AVIARY_GEMINI_API_KEY or [responder].api_key");
    }

    let microblog_started = supervisor.start_microblog_adapter();
    let chat_started = supervisor.start_chat_adapter().await;

    if !microblog_started && !chat_started {
        warn!("no adapters could be started, exiting");
        return Ok(());
    }
    info!(active = ?supervisor.active_bots(), "adapters running");

    tokio::select! {
        () = supervisor.monitor_loop() => {
            info!("all adapters retired");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    supervisor.shutdown().await;
    info!("aviary shut down cleanly");
    Ok(())
}
