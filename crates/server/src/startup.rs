//! Assembly of the configured backends into a running service.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};

use depesche_core::{Config, SystemClock};
use depesche_engine::{build_tick_lock, spawn_scheduler_loop, TickScheduler};
use depesche_notify::telegram::TelegramNotifier;
use depesche_notify::webhook::WebhookNotifier;
use depesche_notify::{Dispatcher, Notifier};
use depesche_source::{MessageSource, ScriptedSource};
use depesche_store::db::init_pg_pool;
use depesche_store::traits::Stores;

use crate::router::build_router;
use crate::state::AppState;

pub async fn build_stores(config: &Config) -> anyhow::Result<Stores> {
    match config.store.backend.as_str() {
        "postgres" => {
            let pool = init_pg_pool(&config.postgres)
                .await
                .context("postgres init failed")?;
            Ok(Stores::postgres(pool))
        }
        "memory" => {
            warn!("memory store backend: nothing is persisted across restarts");
            Ok(Stores::memory())
        }
        other => bail!("unknown store backend '{other}' (expected postgres or memory)"),
    }
}

pub fn build_source(config: &Config) -> anyhow::Result<Arc<dyn MessageSource>> {
    match config.source.backend.as_str() {
        "scripted" => {
            let source = match config.source.script_path.as_deref() {
                Some(path) => {
                    info!(path, "loading source script");
                    ScriptedSource::from_file(Path::new(path))
                        .with_context(|| format!("failed to load source script {path}"))?
                }
                None => ScriptedSource::new(),
            };
            Ok(Arc::new(source))
        }
        other => bail!("unknown source backend '{other}'"),
    }
}

pub fn build_dispatcher(config: &Config) -> Arc<Dispatcher> {
    let mut channels: Vec<Box<dyn Notifier>> = Vec::new();
    if let (Some(token), Some(chat)) = (
        &config.notify.telegram_bot_token,
        &config.notify.telegram_chat_id,
    ) {
        match TelegramNotifier::from_config(token.clone(), chat.clone()) {
            Ok(notifier) => channels.push(Box::new(notifier)),
            Err(err) => warn!(error = %err, "telegram notifier disabled"),
        }
    }
    if let Some(url) = &config.notify.webhook_url {
        match WebhookNotifier::from_config(url.clone()) {
            Ok(notifier) => channels.push(Box::new(notifier)),
            Err(err) => warn!(error = %err, "webhook notifier disabled"),
        }
    }
    if channels.is_empty() {
        info!("no alert channels configured, alerts go to the log only");
        Arc::new(Dispatcher::empty())
    } else {
        info!(channels = channels.len(), "alert dispatcher ready");
        Arc::new(Dispatcher::with_channels(channels))
    }
}

pub async fn build_scheduler(config: &Config, stores: Stores) -> anyhow::Result<TickScheduler> {
    let lock = build_tick_lock(&config.redis)
        .await
        .context("tick lock init failed")?;
    let source = build_source(config)?;
    let dispatcher = build_dispatcher(config);
    Ok(TickScheduler::new(
        stores,
        lock,
        source,
        dispatcher,
        Arc::new(SystemClock),
        config.scheduler.clone(),
    ))
}

/// Run the API server with the scheduler loop alongside it.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    config.log_summary();

    let stores = build_stores(&config).await?;
    let scheduler = Arc::new(build_scheduler(&config, stores.clone()).await?);

    let (trigger, _scheduler_task) = spawn_scheduler_loop(
        scheduler,
        config.scheduler.interval(),
        config.scheduler.resume_after_abort(),
    );

    let state = Arc::new(AppState {
        stores,
        trigger,
        config_summary: config.redacted_summary(),
    });
    let app = build_router(state, &config.server);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("API listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
