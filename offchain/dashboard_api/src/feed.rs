use std::sync::Mutex;
use std::time::Duration;

use engine::session::FeedOutcome;
use engine::{FeedMessage, Session};
use futures::StreamExt;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::state::{lock, AppState};

/// Consume the price socket forever, reconnecting after a fixed delay.
pub async fn run(url: String, state: AppState, reconnect_delay: Duration) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((mut ws, _)) => {
                info!(target: "dashboard", "price feed connected ({url})");
                while let Some(message) = ws.next().await {
                    match message {
                        Ok(Message::Text(txt)) => {
                            if state.is_active() { handle_text(&state.session, &txt); }
                        }
                        Ok(Message::Binary(bin)) => {
                            if let (true, Ok(txt)) = (state.is_active(), String::from_utf8(bin)) {
                                handle_text(&state.session, &txt);
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            warn!(target: "dashboard", "price feed closed: {:?}", frame);
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(target: "dashboard", "price feed error: {err}");
                            break;
                        }
                    }
                }
            }
            Err(err) => warn!(target: "dashboard", "price feed connect error: {err}"),
        }
        warn!(target: "dashboard", "price feed reconnecting in {}ms", reconnect_delay.as_millis());
        sleep(reconnect_delay).await;
    }
}

/// Decode one frame and merge it into the session. Malformed frames and
/// closes for operations we do not know are dropped; the poller reconciles.
pub fn handle_text(session: &Mutex<Session>, text: &str) -> Option<FeedOutcome> {
    let msg = match FeedMessage::parse(text) {
        Ok(msg) => msg,
        Err(e) => {
            trace!(target: "dashboard", "dropping feed frame: {e}");
            return None;
        }
    };
    let outcome = lock(session, "session").apply_feed(&msg);
    match outcome {
        Ok(FeedOutcome::Closed(id)) => {
            info!(target: "dashboard", operation = id, "operation closed by server");
            Some(FeedOutcome::Closed(id))
        }
        Ok(outcome) => Some(outcome),
        Err(e) => {
            debug!(target: "dashboard", "ignoring pushed close: {e}");
            None
        }
    }
}
