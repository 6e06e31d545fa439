use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sessiond::config::Config;
use sessiond::router::build_router;
use sessiond::services::sessions::SessionStore;
use sessiond::state::AppState;

/// Periodically prunes index entries whose session record is gone.
fn spawn_reconcile_job(sessions: SessionStore, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            tracing::info!("🧹 Running scheduled reconcile of session indices...");
            match sessions.reconcile().await {
                Ok(pruned) => {
                    tracing::info!("✅ Reconcile completed, {} stale references pruned", pruned);
                }
                Err(e) => {
                    tracing::error!("❌ Reconcile failed: {}", e);
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");
    if config.admin_token.is_none() {
        tracing::warn!("⚠️ ADMIN_TOKEN is not set, session management routes will refuse every request");
    }

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    match config.reconcile_interval {
        Some(interval) => {
            spawn_reconcile_job(state.sessions.clone(), interval);
            tracing::info!("✅ Background reconcile job started (every {:?})", interval);
        }
        None => tracing::info!("Background reconcile job disabled"),
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("🚀 Server listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
