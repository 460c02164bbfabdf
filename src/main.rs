use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cryptfails::config::Config;
use cryptfails::state::AppState;

const REVOCATION_PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).context("Failed to open stores")?;
    tracing::info!("✅ AppState initialized");

    let keys = state.keys.clone();
    match tokio::task::spawn_blocking(move || keys.initialize_keys()).await? {
        Ok(kids) => {
            tracing::info!("✅ Signing keys ready: {}", kids.join(", "));
        }
        Err(e) => {
            tracing::error!("❌ Failed to initialize signing keys: {}", e);
            return Err(e.into());
        }
    }

    let revocations = state.revocations.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REVOCATION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = revocations.purge_expired();
            if purged > 0 {
                tracing::info!("🧹 Purged {} expired revocations", purged);
            }
        }
    });

    let app = cryptfails::router(state);

    let addr = config.listen_addr;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("🔗 Share links point at {}", config.external_url);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
