use std::time::Duration;

use anyhow::Result;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Poll balances and operations on a fixed interval. Commissions are loaded
/// once per session; a failed load is retried on the next tick.
pub async fn run(state: AppState, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut commissions_epoch: Option<u64> = None;
    loop {
        ticker.tick().await;
        if !state.is_active() { continue; }
        if commissions_epoch != Some(state.epoch()) {
            match load_commissions(&state).await {
                Ok(loaded) => commissions_epoch = loaded.or(commissions_epoch),
                Err(e) => warn!(target: "dashboard", "commission config fetch failed: {e:#}"),
            }
        }
        if let Err(e) = refresh(&state).await {
            warn!(target: "dashboard", "account poll failed, keeping last snapshot: {e:#}");
        }
    }
}

/// Pull the authoritative balances and operations. On any failure the session
/// is left exactly as it was. A result that lands after `/logout` or a new
/// `/session` is discarded.
pub async fn refresh(state: &AppState) -> Result<()> {
    let epoch = state.epoch();
    let (balances, operations) = tokio::try_join!(state.backend.fetch_account(), state.backend.fetch_operations())?;
    let total = operations.len();
    let kept = state.session_for(epoch).map(|mut session| {
        session.set_balances(balances);
        session.replace_positions(operations)
    });
    match kept {
        Some(kept) => debug!(target: "dashboard", total, kept, "operations refreshed"),
        None => debug!(target: "dashboard", epoch, "session changed during poll, result dropped"),
    }
    Ok(())
}

/// Returns the session epoch the config was applied to, `None` when the
/// session changed while the request was in flight.
pub async fn load_commissions(state: &AppState) -> Result<Option<u64>> {
    let epoch = state.epoch();
    let cfg = state.backend.fetch_commissions().await?;
    let Some(mut session) = state.session_for(epoch) else { return Ok(None) };
    session.set_commissions(cfg);
    drop(session);
    info!(target: "dashboard", ?cfg, "commission config loaded");
    Ok(Some(epoch))
}
