use serde::Serialize;

use crate::symbol::normalize;
use crate::types::{Position, PositionState, Side};

/// Derived account figures at full precision. Round with [`AccountMetrics::rounded`]
/// only when presenting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetrics {
    pub floating_pnl: f64,
    pub equity: f64,
    pub used_margin: f64,
    pub free_margin: f64,
    pub margin_level: f64,
}

impl AccountMetrics {
    pub fn rounded(&self) -> Self {
        Self {
            floating_pnl: round2(self.floating_pnl),
            equity: round2(self.equity),
            used_margin: round2(self.used_margin),
            free_margin: round2(self.free_margin),
            margin_level: round2(self.margin_level),
        }
    }
}

pub fn round2(v: f64) -> f64 {
    if !v.is_finite() { return 0.0; }
    (v * 100.0).round() / 100.0
}

/// Unrealized PnL of one position at `current`. `None` when the price is
/// unknown or the inputs are not numbers.
pub fn floating_pnl(position: &Position, current: Option<f64>) -> Option<f64> {
    let current = current.filter(|p| p.is_finite())?;
    let diff = match position.side {
        Side::Buy => current - position.entry_price,
        Side::Sell => position.entry_price - current,
    };
    let pnl = diff * position.volume;
    pnl.is_finite().then_some(pnl)
}

/// Recompute equity and margin figures from the authoritative balance, the
/// open positions and a price lookup keyed by normalized symbol. A position
/// without a usable price counts as flat.
pub fn compute_metrics<'a, I, F>(balance: f64, positions: I, get_price: F) -> AccountMetrics
where
    I: IntoIterator<Item = &'a Position>,
    F: Fn(&str) -> Option<f64>,
{
    let mut total_pnl = 0.0;
    let mut used_margin = 0.0;
    for p in positions.into_iter().filter(|p| p.state() == PositionState::Open) {
        total_pnl += floating_pnl(p, get_price(&normalize(&p.asset))).unwrap_or(0.0);
        if p.committed_margin.is_finite() { used_margin += p.committed_margin; }
    }
    let balance = if balance.is_finite() { balance } else { 0.0 };
    let equity = balance + total_pnl;
    let margin_level = if used_margin > 0.0 { equity / used_margin * 100.0 } else { 0.0 };
    AccountMetrics {
        floating_pnl: total_pnl,
        equity,
        used_margin,
        free_margin: equity - used_margin,
        margin_level,
    }
}

/// Margin-level bands, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginThresholds {
    pub margin_call: f64,
    pub stop_out: f64,
}

impl Default for MarginThresholds {
    fn default() -> Self { Self { margin_call: 100.0, stop_out: 50.0 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginStatus {
    NoExposure,
    Healthy,
    MarginCall,
    StopOut,
}

/// Display warning only; the backend owns liquidation.
pub fn margin_status(metrics: &AccountMetrics, thresholds: &MarginThresholds) -> MarginStatus {
    if metrics.used_margin <= 0.0 { return MarginStatus::NoExposure; }
    let level = metrics.margin_level;
    if level <= thresholds.stop_out {
        MarginStatus::StopOut
    } else if level <= thresholds.margin_call {
        MarginStatus::MarginCall
    } else {
        MarginStatus::Healthy
    }
}
