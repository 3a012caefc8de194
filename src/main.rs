use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use wayfarer::{
    app,
    auth::rate_limit::spawn_sweeper,
    config::AppConfig,
    state::AppState,
};

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "wayfarer=debug,axum=info,tower_http=debug,sqlx=warn"
    } else {
        "wayfarer=info,axum=info,tower_http=info,sqlx=warn"
    };
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
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
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(config.debug);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid APP_HOST/APP_PORT")?;
    let sweep_every = Duration::from_secs(config.rate_limit_sweep_secs);
    tracing::info!(environment = %config.environment, debug = config.debug, "starting wayfarer");

    let state = AppState::init(config).await?;
    let _sweeper = spawn_sweeper(state.limiter.clone(), sweep_every);

    app::serve(app::build_app(state), addr).await
}
