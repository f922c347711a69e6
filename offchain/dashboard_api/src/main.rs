use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod backend;
mod config;
mod error;
mod feed;
mod poller;
mod routes;
mod state;
#[cfg(test)]
mod test_support;

use backend::BackendClient;
use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&config.log_filter)).init();
    config.validate()?;

    let backend = BackendClient::new(&config.backend_url, config.token.clone())?;
    let app_state = AppState::new(backend, config.thresholds());

    // Background: live prices and the periodic account/operations poll
    tokio::spawn(feed::run(config.feed_url.clone(), app_state.clone(), config.reconnect_delay()));
    tokio::spawn(poller::run(app_state.clone(), config.poll_interval()));

    let app = routes::router(app_state);
    let listener = TcpListener::bind(&config.listen).await?;
    info!(target: "dashboard", "Listening on {}", config.listen);
    axum::serve(listener, app).await?;
    Ok(())
}
