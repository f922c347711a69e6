use serde::Serialize;

use crate::error::EngineError;
use crate::positions::PositionSet;
use crate::price::{FeedMessage, PriceStore};
use crate::risk::{compute_metrics, floating_pnl, AccountMetrics};
use crate::ticket::{TicketForm, TicketPreview};
use crate::types::{AccountBalances, AccountSnapshot, CloseConfirmation, CloseRequest, CommissionConfig, Position, Side};

/// Everything the dashboard knows for one authenticated user. Built at login,
/// dropped or [`reset`](Session::reset) at logout.
///
/// Each piece has exactly one write path: prices from the feed, positions and
/// balances from backend responses, commissions from config fetch/update.
/// The calculators only read.
#[derive(Debug, Clone, Default)]
pub struct Session {
    prices: PriceStore,
    positions: PositionSet,
    balances: AccountBalances,
    commissions: CommissionConfig,
    // bumped on balance/commission writes; prices and positions keep their own
    revision: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub id: u64,
    pub asset: String,
    pub side: Side,
    pub volume: f64,
    pub leverage: u32,
    pub entry_price: f64,
    pub current_price: Option<f64>,
    pub floating_pnl: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub committed_margin: f64,
}

/// What a feed message did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    Prices(usize),
    Closed(u64),
    Ignored,
}

impl Session {
    pub fn new() -> Self { Self::default() }

    pub fn with_commissions(commissions: CommissionConfig) -> Self {
        Self { commissions, ..Self::default() }
    }

    pub fn prices(&self) -> &PriceStore { &self.prices }

    pub fn positions(&self) -> &PositionSet { &self.positions }

    pub fn balances(&self) -> AccountBalances { self.balances }

    pub fn commissions(&self) -> CommissionConfig { self.commissions }

    pub fn price_of(&self, asset: &str) -> Option<f64> { self.prices.get(asset) }

    /// Combined change counter for push-on-change consumers.
    pub fn revision(&self) -> u64 {
        self.prices
            .revision()
            .wrapping_add(self.positions.revision())
            .wrapping_add(self.revision)
    }

    pub fn apply_feed(&mut self, msg: &FeedMessage) -> Result<FeedOutcome, EngineError> {
        match msg {
            FeedMessage::Prices(quotes) => Ok(FeedOutcome::Prices(self.prices.apply(quotes))),
            FeedMessage::Closed(close) => {
                self.positions.apply_close(close)?;
                Ok(FeedOutcome::Closed(close.operation_id))
            }
            FeedMessage::Ignored => Ok(FeedOutcome::Ignored),
        }
    }

    pub fn set_balances(&mut self, balances: AccountBalances) {
        if balances != self.balances {
            self.balances = balances;
            self.bump();
        }
    }

    pub fn set_commissions(&mut self, commissions: CommissionConfig) {
        if commissions != self.commissions {
            self.commissions = commissions;
            self.bump();
        }
    }

    pub fn replace_positions(&mut self, records: Vec<Position>) -> usize {
        self.positions.replace_all(records)
    }

    pub fn confirm_order(&mut self, position: Position) -> Result<(), EngineError> {
        self.positions.insert_confirmed(position)
    }

    pub fn confirm_close(&mut self, close: &CloseConfirmation) -> Result<&Position, EngineError> {
        self.positions.apply_close(close)
    }

    pub fn confirm_levels(&mut self, id: u64, take_profit: Option<f64>, stop_loss: Option<f64>) -> Result<&Position, EngineError> {
        self.positions.apply_levels(id, take_profit, stop_loss)
    }

    pub fn metrics(&self) -> AccountMetrics {
        compute_metrics(self.balances.balance, self.positions.open(), |key| self.prices.get(key))
    }

    /// Full-precision snapshot; call [`AccountSnapshot::rounded`] to display it.
    pub fn snapshot(&self) -> AccountSnapshot {
        let m = self.metrics();
        AccountSnapshot {
            balance: self.balances.balance,
            credit: self.balances.credit,
            used_margin: m.used_margin,
            equity: m.equity,
            free_margin: m.free_margin,
            margin_level: m.margin_level,
        }
    }

    pub fn position_views(&self) -> Vec<PositionView> {
        self.positions
            .open()
            .map(|p| {
                let current_price = self.price_of(&p.asset);
                PositionView {
                    id: p.id,
                    asset: p.asset.clone(),
                    side: p.side,
                    volume: p.volume,
                    leverage: p.leverage,
                    entry_price: p.entry_price,
                    current_price,
                    floating_pnl: floating_pnl(p, current_price),
                    take_profit: p.take_profit,
                    stop_loss: p.stop_loss,
                    committed_margin: p.committed_margin,
                }
            })
            .collect()
    }

    pub fn ticket_preview(&self, form: &TicketForm) -> TicketPreview {
        form.preview(self.price_of(&form.asset), &self.commissions, self.metrics().free_margin)
    }

    /// Close payload for an open operation, with the live PnL as a hint when
    /// a price is known.
    pub fn close_request(&self, id: u64) -> Result<CloseRequest, EngineError> {
        let p = self.positions.get(id).ok_or(EngineError::UnknownOperation(id))?;
        if p.is_closed { return Err(EngineError::AlreadyClosed(id)); }
        Ok(CloseRequest { operation_id: id, ganancia: floating_pnl(p, self.price_of(&p.asset)) })
    }

    /// Logout teardown.
    pub fn reset(&mut self) {
        self.prices.clear();
        self.positions.clear();
        self.balances = AccountBalances::default();
        self.commissions = CommissionConfig::default();
        self.bump();
    }

    fn bump(&mut self) { self.revision = self.revision.wrapping_add(1); }
}
