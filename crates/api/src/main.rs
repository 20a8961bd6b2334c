use std::sync::Arc;

use anyhow::Context;

use gatekeeper_api::config::ApiConfig;
use gatekeeper_infra::RequestDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::from_env().context("invalid configuration")?;
    gatekeeper_observability::init(config.log_format);

    if config.api_token.is_none() {
        tracing::warn!("GATEKEEPER_API_TOKEN not set; RPC routes are unauthenticated");
    }

    let dispatcher = Arc::new(RequestDispatcher::with_defaults(config.sql_max_connections));
    let app = gatekeeper_api::app::build_app(dispatcher, config.api_token);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
