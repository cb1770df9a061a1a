//! muvi API server entry point.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use muvi_api::{create_router, ApiConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "muvi_api=info,muvi_engine=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ApiConfig::from_env();
    info!(
        "starting muvi API on {}:{} (workspace {})",
        config.host,
        config.port,
        config.workspace_root.display()
    );

    let state = AppState::new(config.clone()).context("building application state")?;

    // ffmpeg availability is a hard requirement for export; surface it at
    // startup rather than mid-export.
    if let Err(e) = muvi_media::check_ffmpeg() {
        tracing::warn!("ffmpeg not found: export will fail until it is installed ({e})");
    }

    if let Some(url) = &config.price_sheet_url {
        state.ctx.pricing.refresh_from(url).await;
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    axum::serve(listener, create_router(state))
        .await
        .context("serving")?;
    Ok(())
}
