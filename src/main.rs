use std::sync::Arc;

use roomkeeper::{app, config::AppConfig, db, ratelimit, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "roomkeeper=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let (host, port) = (config.host.clone(), config.port);
    let app_state = AppState::init(config).await?;

    db::migrate(&app_state.db).await;

    let sweeper = ratelimit::spawn_sweeper(
        Arc::clone(&app_state.limiter),
        app_state.config.rate_limit_window(),
    );

    let db = app_state.db.clone();
    let result = app::serve(app::build_app(app_state), &host, port).await;

    sweeper.abort();
    db.close().await;
    tracing::info!("shutdown complete");
    result
}
