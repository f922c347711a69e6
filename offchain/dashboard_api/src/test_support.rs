//! Local stand-in for the trading backend, served on an ephemeral port.

use axum::Router;
use engine::MarginThresholds;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::backend::BackendClient;
use crate::state::AppState;

/// Serve `routes` on `127.0.0.1:0` and return its base URL.
pub async fn mock_backend(routes: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, routes).await });
    format!("http://{addr}")
}

/// A base URL nothing listens on.
pub async fn dead_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub fn app_state(base_url: &str) -> AppState {
    AppState::new(BackendClient::new(base_url, None).unwrap(), MarginThresholds::default())
}

/// An open BTC long as the backend lists it.
pub fn operation(id: u64) -> Value {
    json!({
        "id": id,
        "asset": "BTC-USDT",
        "side": "buy",
        "volume": 0.1,
        "leverage": 10,
        "entryPrice": 50000,
        "committedMargin": 500,
    })
}
