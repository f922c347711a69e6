use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use engine::session::PositionView;
use engine::{margin_status, AccountSnapshot, MarginStatus, MarginThresholds, Session};
use serde::Serialize;
use tracing::warn;

use crate::backend::BackendClient;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Mutex<Session>>,
    pub backend: BackendClient,
    pub thresholds: MarginThresholds,
    // false between /logout and the next /session; feed and poller stop writing
    active: Arc<AtomicBool>,
    // bumped under the session lock on every /session and /logout
    epoch: Arc<AtomicU64>,
}

/// Recover from a poisoned mutex instead of panicking the handler.
pub fn lock<'a, T>(m: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    match m.lock() {
        Ok(g) => g,
        Err(e) => {
            warn!(target: "dashboard", "Recovered from poisoned mutex: {}", name);
            e.into_inner()
        }
    }
}

impl AppState {
    pub fn new(backend: BackendClient, thresholds: MarginThresholds) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::new())),
            backend,
            thresholds,
            active: Arc::new(AtomicBool::new(true)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Never hold the guard across an `.await`.
    pub fn session(&self) -> MutexGuard<'_, Session> { lock(&self.session, "session") }

    pub fn is_active(&self) -> bool { self.active.load(Ordering::Acquire) }

    pub fn epoch(&self) -> u64 { self.epoch.load(Ordering::Acquire) }

    /// Lock the session for a write computed from data fetched during
    /// `epoch`. `None` when the session was started again or logged out in
    /// the meantime; the caller drops what it fetched.
    pub fn session_for(&self, epoch: u64) -> Option<MutexGuard<'_, Session>> {
        let guard = self.session();
        (self.is_active() && self.epoch() == epoch).then_some(guard)
    }

    pub fn start(&self) {
        let _guard = self.session();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.active.store(true, Ordering::Release);
    }

    pub fn logout(&self) {
        let mut session = self.session();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.active.store(false, Ordering::Release);
        session.reset();
    }
}

/// Body of `GET /state` and of every `/ws` push.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub revision: u64,
    pub account: AccountSnapshot,
    pub floating_pnl: f64,
    pub margin_status: MarginStatus,
    pub positions: Vec<PositionView>,
}

impl StatePayload {
    pub fn from_session(session: &Session, thresholds: &MarginThresholds) -> Self {
        let metrics = session.metrics();
        Self {
            revision: session.revision(),
            account: session.snapshot().rounded(),
            floating_pnl: metrics.rounded().floating_pnl,
            margin_status: margin_status(&metrics, thresholds),
            positions: session.position_views(),
        }
    }
}
