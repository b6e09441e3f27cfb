//! Headless reminder daemon speaking newline-delimited JSON on stdin/stdout.
//!
//! All tracing output goes to stderr so that stdout remains a clean
//! protocol channel. The config path defaults to the platform config dir
//! and can be overridden with `CHIME_CONFIG`.

use anyhow::Context;
use chime::config::ChimeConfig;
use chime::host::stdio::run_stdio_bridge;
use chime::resolver::KeywordResolver;
use chime::scheduler::Scheduler;
use chime::service::ReminderService;
use chime::store::SqliteReminderStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chime=info,chimed=info")),
        )
        .init();

    let config_path = std::env::var_os("CHIME_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(ChimeConfig::default_config_path);
    let config = ChimeConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(
        config = %config_path.display(),
        db = %config.store.db_path.display(),
        "chimed starting"
    );

    let store = Arc::new(
        SqliteReminderStore::open(&config.store.db_path).context("opening reminder store")?,
    );

    let mut scheduler = Scheduler::new(store.clone(), store.clone(), config.scheduler.clone())
        .with_notification_prefix(config.notifications.prefix.clone());
    if let Err(e) = scheduler.recover() {
        tracing::error!(error = %e, "recovery failed; starting with an empty schedule");
    }
    let running = scheduler.start();

    let resolver = Arc::new(KeywordResolver::new().context("building resolver")?);
    let service = ReminderService::new(store, running.handle(), resolver, &config);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received");
            on_signal.cancel();
        }
    });

    let bridge = run_stdio_bridge(service, running.handle(), shutdown).await;
    running
        .stop()
        .await
        .map_err(|e| anyhow::anyhow!("scheduler shutdown failed: {e}"))?;
    bridge.map_err(|e| {
        tracing::error!(error = %e, "chimed exited with error");
        anyhow::anyhow!("chimed failed: {e}")
    })?;

    tracing::info!("chimed shut down cleanly");
    Ok(())
}
