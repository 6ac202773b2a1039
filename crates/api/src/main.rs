use anyhow::Context;
use policy_api::config::AppConfig;
use policy_api::{AppState, build_extractor, router};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the process environment still applies.
    dotenv::dotenv().ok();

    // Initialize tracing
    init_tracing();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(
        model = %config.backend.model,
        base_url = %config.backend.base_url,
        strategy = ?config.extraction.strategy,
        result_log = %config.extraction.result_log_path.display(),
        "Configuration loaded"
    );

    let extractor = build_extractor(&config).context("Failed to build extraction pipeline")?;
    let state = Arc::new(AppState::new(extractor));
    let app = router(state, config.server.max_upload_bytes);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    tracing::info!("Server listening on http://{}", config.server.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
