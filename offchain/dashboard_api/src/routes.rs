use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use engine::{CommissionConfig, EngineError, LevelsRequest, TicketForm, TicketPreview};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::poller;
use crate::state::{AppState, StatePayload};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/state", get(get_state))
        .route("/ticket", post(ticket))
        .route("/orders", post(place_order))
        .route("/orders/close", post(close_order))
        .route("/orders/levels", post(update_levels))
        .route("/commissions", get(get_commissions).put(update_commissions))
        .route("/session", post(start_session))
        .route("/logout", post(logout))
        .route("/ws", get(ws))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseBody { operation_id: u64 }

/// Accepted but not echoed: reconcile from the backend right away instead of
/// waiting for the next tick.
async fn reconcile(state: &AppState) {
    if let Err(e) = poller::refresh(state).await {
        warn!(target: "dashboard", "reconcile after ack failed: {e:#}");
    }
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let s = state.session();
    Json(json!({
        "ok": true,
        "active": state.is_active(),
        "revision": s.revision(),
        "prices": s.prices().len(),
        "openPositions": s.positions().open().count(),
    }))
}

async fn get_state(State(state): State<AppState>) -> Json<StatePayload> {
    Json(StatePayload::from_session(&state.session(), &state.thresholds))
}

async fn ticket(State(state): State<AppState>, Json(form): Json<TicketForm>) -> Json<TicketPreview> {
    Json(state.session().ticket_preview(&form))
}

async fn place_order(State(state): State<AppState>, Json(form): Json<TicketForm>) -> Result<Json<Value>, ApiError> {
    let order = {
        let session = state.session();
        form.to_order_request(session.price_of(&form.asset))?
    };
    let placed = state.backend.place_order(&order).await?;
    info!(target: "dashboard", asset = %order.asset, side = ?order.side, volume = order.volume, "order accepted");
    let id = match placed {
        Some(position) => {
            let id = position.id;
            let inserted = state.session().confirm_order(position);
            if let Err(e) = inserted {
                warn!(target: "dashboard", "backend echoed an unusable operation: {e}");
                reconcile(&state).await;
            }
            Some(id)
        }
        None => {
            reconcile(&state).await;
            None
        }
    };
    Ok(Json(json!({ "ok": true, "id": id })))
}

async fn close_order(State(state): State<AppState>, Json(body): Json<CloseBody>) -> Result<Json<Value>, ApiError> {
    let req = {
        let session = state.session();
        session.close_request(body.operation_id)?
    };
    // nothing changes locally unless this succeeds
    let confirmed = state.backend.close_operation(&req).await?;
    match confirmed {
        Some(close) => {
            let applied = state.session().confirm_close(&close).map(|_| ());
            match applied {
                Ok(()) => info!(target: "dashboard", operation = close.operation_id, pnl = close.realized_pnl, "operation closed"),
                // the feed may have pushed the close first
                Err(EngineError::AlreadyClosed(_)) => {}
                Err(e) => warn!(target: "dashboard", "close acknowledged but not applied: {e}"),
            }
            Ok(Json(json!({ "ok": true, "operationId": close.operation_id, "realizedPnl": close.realized_pnl })))
        }
        None => {
            reconcile(&state).await;
            Ok(Json(json!({ "ok": true, "operationId": req.operation_id })))
        }
    }
}

fn valid_level(level: Option<f64>) -> bool { level.map_or(true, |v| v.is_finite() && v > 0.0) }

async fn update_levels(State(state): State<AppState>, Json(req): Json<LevelsRequest>) -> Result<Json<Value>, ApiError> {
    if !valid_level(req.take_profit) || !valid_level(req.stop_loss) {
        return Err(EngineError::InvalidInput("take profit and stop loss must be positive prices").into());
    }
    {
        let session = state.session();
        let p = session.positions().get(req.operation_id).ok_or(EngineError::UnknownOperation(req.operation_id))?;
        if p.is_closed { return Err(EngineError::AlreadyClosed(p.id).into()); }
    }
    state.backend.update_levels(&req).await?;
    let applied = state.session().confirm_levels(req.operation_id, req.take_profit, req.stop_loss).map(|_| ());
    applied?;
    Ok(Json(json!({ "ok": true })))
}

async fn get_commissions(State(state): State<AppState>) -> Json<CommissionConfig> {
    Json(state.session().commissions())
}

async fn update_commissions(State(state): State<AppState>, Json(cfg): Json<CommissionConfig>) -> Result<Json<CommissionConfig>, ApiError> {
    let fields = [cfg.spread_percentage, cfg.commission_percentage, cfg.swap_daily_percentage];
    if fields.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(EngineError::InvalidInput("percentages must be non-negative numbers").into());
    }
    state.backend.update_commissions(&cfg).await?;
    state.session().set_commissions(cfg);
    info!(target: "dashboard", ?cfg, "commission config updated");
    Ok(Json(cfg))
}

async fn start_session(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.start();
    poller::load_commissions(&state).await?;
    poller::refresh(&state).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn logout(State(state): State<AppState>) -> Json<Value> {
    state.logout();
    info!(target: "dashboard", "session reset");
    Json(json!({ "ok": true }))
}

async fn ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|socket| async move { handle_ws(state, socket).await })
}

async fn handle_ws(state: AppState, mut socket: WebSocket) {
    // only push when something changed
    let mut last_revision: Option<u64> = None;
    loop {
        let frame = {
            let session = state.session();
            let revision = session.revision();
            if last_revision == Some(revision) {
                None
            } else {
                last_revision = Some(revision);
                Some(StatePayload::from_session(&session, &state.thresholds))
            }
        };
        if let Some(payload) = frame {
            let text = match serde_json::to_string(&payload) {
                Ok(t) => t,
                Err(e) => {
                    warn!(target: "dashboard", "state encode failed: {e}");
                    break;
                }
            };
            if socket.send(Message::Text(text)).await.is_err() { break; }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use engine::{FeedMessage, Position};

    use super::*;
    use crate::test_support::{app_state, dead_backend, mock_backend, operation};

    fn with_open_position(state: &AppState) -> u64 {
        let position: Position = serde_json::from_value(operation(1)).unwrap();
        let mut session = state.session();
        session.replace_positions(vec![position]);
        session.apply_feed(&FeedMessage::Prices(vec![("BTCUSDT".into(), 51_000.0)])).unwrap();
        session.revision()
    }

    fn close_body(id: u64) -> Json<CloseBody> { Json(CloseBody { operation_id: id }) }

    #[tokio::test]
    async fn test_rejected_close_leaves_position_open() {
        let backend = Router::new().route(
            "/cerrar-operacion",
            post(|| async { Json(json!({ "success": false, "mensaje": "market closed" })) }),
        );
        let state = app_state(&mock_backend(backend).await);
        let revision = with_open_position(&state);

        let err = close_order(State(state.clone()), close_body(1)).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("market closed"));

        let session = state.session();
        let p = session.positions().get(1).unwrap();
        assert!(!p.is_closed);
        assert_eq!(p.realized_pnl, None);
        assert_eq!(session.revision(), revision);
    }

    #[tokio::test]
    async fn test_unreachable_backend_changes_nothing() {
        let state = app_state(&dead_backend().await);
        let revision = with_open_position(&state);

        let err = close_order(State(state.clone()), close_body(1)).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);

        let form: TicketForm = serde_json::from_value(json!({"asset":"BTC-USDT","side":"buy","volume":0.1,"leverage":10})).unwrap();
        let err = place_order(State(state.clone()), Json(form)).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);

        let levels = LevelsRequest { operation_id: 1, take_profit: Some(55_000.0), stop_loss: None };
        let err = update_levels(State(state.clone()), Json(levels)).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);

        let session = state.session();
        assert_eq!(session.revision(), revision);
        assert_eq!(session.positions().len(), 1);
        assert_eq!(session.positions().get(1).unwrap().take_profit, None);
    }

    #[tokio::test]
    async fn test_echoed_order_is_inserted() {
        let backend = Router::new().route(
            "/operar",
            post(|| async { Json(json!({ "success": true, "operacion": operation(7) })) }),
        );
        let state = app_state(&mock_backend(backend).await);
        with_open_position(&state);

        let form: TicketForm = serde_json::from_value(json!({"asset":"btc/usdt","side":"buy","volume":"0.1","leverage":"10"})).unwrap();
        let Json(body) = place_order(State(state.clone()), Json(form)).await.ok().unwrap();
        assert_eq!(body["id"], 7);

        let session = state.session();
        assert_eq!(session.positions().open().count(), 2);
        assert_eq!(session.positions().get(7).unwrap().entry_price, 50_000.0);
    }

    #[tokio::test]
    async fn test_acknowledged_close_applies() {
        let backend = Router::new().route(
            "/cerrar-operacion",
            post(|| async { Json(json!({ "success": true, "precioCierre": 51_000, "ganancia": "100" })) }),
        );
        let state = app_state(&mock_backend(backend).await);
        with_open_position(&state);

        let Json(body) = close_order(State(state.clone()), close_body(1)).await.ok().unwrap();
        assert_eq!(body["realizedPnl"], 100.0);
        let session = state.session();
        assert!(session.positions().get(1).unwrap().is_closed);
        assert_eq!(session.metrics().used_margin, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_not_sent() {
        let state = app_state(&dead_backend().await);
        let err = close_order(State(state.clone()), close_body(99)).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_valid_level() {
        assert!(valid_level(None));
        assert!(valid_level(Some(1.5)));
        assert!(!valid_level(Some(0.0)));
        assert!(!valid_level(Some(f64::NAN)));
    }

    #[test]
    fn test_close_body_wire_name() {
        let body: CloseBody = serde_json::from_str(r#"{"operationId":12}"#).unwrap();
        assert_eq!(body.operation_id, 12);
    }
}
