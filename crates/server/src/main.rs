use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ray_core::config::SafetyCfg;
use ray_core::detection::RuleSet;
use ray_core::incident::{IncidentPolicy, IncidentStore, MemoryStore, PgIncidentStore};
use ray_notify::resend::{NotifyConfig, ResendDispatcher};
use ray_server::server::{self, AppState};
use ray_server::shutdown::Shutdown;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;
const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_DRAIN_SECS: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_target(true))
        .init();

    // Fail fast: no alert channel means no point accepting transcripts.
    let notify_cfg = NotifyConfig::from_env().context("notification channel misconfigured")?;

    let (store, cfg, rules): (Arc<dyn IncidentStore>, SafetyCfg, RuleSet) =
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                let pool = tokio::time::timeout(
                    Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
                    sqlx::postgres::PgPoolOptions::new()
                        .max_connections(8)
                        .connect(&url),
                )
                .await
                .with_context(|| format!("connecting to database timed out ({DB_CONNECT_TIMEOUT_SECS}s)"))?
                .context("cannot connect to DATABASE_URL")?;
                sqlx::migrate!("../../migrations")
                    .run(&pool)
                    .await
                    .context("database migration failed")?;
                let cfg = SafetyCfg::load(&pool).await.context("loading safety_config")?;
                let rules = RuleSet::load(&pool).await.context("loading trigger_phrases")?;
                (Arc::new(PgIncidentStore::new(pool)) as Arc<dyn IncidentStore>, cfg, rules)
            }
            Err(_) if ephemeral_allowed() => {
                tracing::warn!("DATABASE_URL not set, running with in-memory incident store; incidents will not survive restart");
                (Arc::new(MemoryStore::new()) as Arc<dyn IncidentStore>, SafetyCfg::default(), RuleSet::default())
            }
            Err(_) => anyhow::bail!("DATABASE_URL is not set (set RAY_ALLOW_EPHEMERAL=1 for an in-memory store)"),
        };

    tracing::info!(
        rules_version = rules.version(),
        dedupe_enabled = cfg.dedupe_enabled,
        snippet_max_chars = cfg.snippet_max_chars,
        "detection configured"
    );

    let body_limit = cfg.webhook_body_limit_bytes;
    let policy = IncidentPolicy::new(
        store,
        Arc::new(ResendDispatcher::new(&notify_cfg)),
        Arc::new(rules),
        Arc::new(cfg),
        notify_cfg.recipient.clone(),
    )?;
    let app = server::router(Arc::new(AppState::new(policy)), body_limit);

    let bind = std::env::var("RAY_HTTP_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_owned());
    let addr: SocketAddr = bind.parse().with_context(|| format!("invalid RAY_HTTP_BIND {bind:?}"))?;

    let drain_secs = std::env::var("RAY_SHUTDOWN_DRAIN_SECS")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_DRAIN_SECS);
    let shutdown = Shutdown::new(Duration::from_secs(drain_secs));
    shutdown.listen_for_signals();
    let token = shutdown.token();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "ray-safety listening");
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move { token.cancelled().await });
    if let Some(result) = shutdown.run_until_drained(serve.into_future()).await {
        result?;
    }
    tracing::info!("ray-safety stopped");
    Ok(())
}

fn ephemeral_allowed() -> bool {
    std::env::var("RAY_ALLOW_EPHEMERAL")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
