//! Pre-trade cost preview for the order ticket.
//!
//! The calculators are total: a missing or non-numeric price yields `0`, and
//! leverage below 1 (including 0) is treated as 1.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::price::coerce_price;
use crate::symbol::normalize;
use crate::types::{CommissionConfig, OrderRequest, Side};

pub fn effective_leverage(leverage: u32) -> f64 { leverage.max(1) as f64 }

/// Missing, non-numeric or sub-1 leverage falls back to 1. Fractions floor.
pub fn coerce_leverage(v: &Value) -> u32 {
    coerce_price(v)
        .filter(|l| *l >= 1.0)
        .map(|l| l.min(u32::MAX as f64) as u32)
        .unwrap_or(1)
}

fn notional(price: f64, volume: f64) -> f64 {
    let n = price * volume;
    if n.is_finite() { n } else { 0.0 }
}

fn pct(value: f64, percentage: f64) -> f64 {
    let v = value * (percentage / 100.0);
    if v.is_finite() { v } else { 0.0 }
}

pub fn required_margin(price: f64, volume: f64, leverage: u32) -> f64 {
    notional(price, volume) / effective_leverage(leverage)
}

pub fn opening_commission_cost(price: f64, volume: f64, commission_percentage: f64) -> f64 {
    pct(notional(price, volume), commission_percentage)
}

pub fn spread_cost(price: f64, volume: f64, spread_percentage: f64) -> f64 {
    pct(notional(price, volume), spread_percentage)
}

/// Swap is charged on the committed margin, not on notional.
pub fn estimated_daily_swap_cost(price: f64, volume: f64, swap_percentage: f64, leverage: u32) -> f64 {
    pct(required_margin(price, volume, leverage), swap_percentage)
}

/// PnL if the position were closed at `target`, net of the opening commission.
/// `None` when there is no target to project to.
pub fn projected_pnl_at_price(entry: f64, target: Option<f64>, volume: f64, side: Side, commission: f64) -> Option<f64> {
    let target = target.filter(|t| t.is_finite())?;
    let diff = match side {
        Side::Buy => target - entry,
        Side::Sell => entry - target,
    };
    let pnl = diff * volume - commission;
    Some(if pnl.is_finite() { pnl } else { 0.0 })
}

/// A raw ticket as the browser submits it. Numeric fields may arrive as
/// numbers, numeric strings or empty strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketForm {
    pub asset: String,
    pub side: Side,
    #[serde(default)]
    pub volume: Value,
    #[serde(default)]
    pub leverage: Value,
    #[serde(default)]
    pub take_profit: Value,
    #[serde(default)]
    pub stop_loss: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPreview {
    pub price: Option<f64>,
    pub required_margin: f64,
    pub commission: f64,
    pub spread_cost: f64,
    pub daily_swap: f64,
    pub total_opening_cost: f64,
    pub take_profit_pnl: Option<f64>,
    pub stop_loss_pnl: Option<f64>,
    pub sufficient_margin: bool,
    pub can_confirm: bool,
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn positive(v: &Value) -> Option<f64> { coerce_price(v).filter(|x| *x > 0.0) }

impl TicketForm {
    pub fn volume(&self) -> Option<f64> { positive(&self.volume) }

    pub fn leverage(&self) -> u32 { coerce_leverage(&self.leverage) }

    pub fn take_profit(&self) -> Option<f64> { positive(&self.take_profit) }

    pub fn stop_loss(&self) -> Option<f64> { positive(&self.stop_loss) }

    /// Cost preview at the current `price`. `config` is read on every call so
    /// an admin update shows up on the next keystroke.
    pub fn preview(&self, price: Option<f64>, config: &CommissionConfig, free_margin: f64) -> TicketPreview {
        let price = price.filter(|p| p.is_finite());
        let volume = self.volume();
        let (px, vol) = (price.unwrap_or(f64::NAN), volume.unwrap_or(0.0));
        let leverage = self.leverage();

        let required_margin = required_margin(px, vol, leverage);
        let commission = opening_commission_cost(px, vol, config.commission_percentage);
        let spread = spread_cost(px, vol, config.spread_percentage);
        let daily_swap = estimated_daily_swap_cost(px, vol, config.swap_daily_percentage, leverage);
        let total_opening_cost = commission + spread;
        let can_confirm = price.is_some() && volume.is_some();

        TicketPreview {
            price,
            required_margin,
            commission,
            spread_cost: spread,
            daily_swap,
            total_opening_cost,
            take_profit_pnl: projected_pnl_at_price(px, self.take_profit(), vol, self.side, commission),
            stop_loss_pnl: projected_pnl_at_price(px, self.stop_loss(), vol, self.side, commission),
            sufficient_margin: can_confirm && required_margin + total_opening_cost <= free_margin,
            can_confirm,
        }
    }

    /// Build the order payload. Unlike the preview this is strict: a missing
    /// price, a bad volume or a TP/SL on the wrong side of the price is an error.
    pub fn to_order_request(&self, price: Option<f64>) -> Result<OrderRequest, EngineError> {
        let asset = self.asset.trim();
        if normalize(asset).is_empty() { return Err(EngineError::InvalidInput("asset is required")); }
        let entry_price = price
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| EngineError::PriceUnavailable(asset.to_string()))?;
        let volume = self.volume().ok_or(EngineError::InvalidInput("volume must be a positive number"))?;

        let take_profit = match (is_blank(&self.take_profit), self.take_profit()) {
            (true, _) => None,
            (false, Some(tp)) => Some(tp),
            (false, None) => return Err(EngineError::InvalidInput("take profit is not a valid price")),
        };
        let stop_loss = match (is_blank(&self.stop_loss), self.stop_loss()) {
            (true, _) => None,
            (false, Some(sl)) => Some(sl),
            (false, None) => return Err(EngineError::InvalidInput("stop loss is not a valid price")),
        };

        let (tp_ok, sl_ok) = match self.side {
            Side::Buy => (take_profit.map_or(true, |tp| tp > entry_price), stop_loss.map_or(true, |sl| sl < entry_price)),
            Side::Sell => (take_profit.map_or(true, |tp| tp < entry_price), stop_loss.map_or(true, |sl| sl > entry_price)),
        };
        if !tp_ok { return Err(EngineError::InvalidInput("take profit is on the wrong side of the price")); }
        if !sl_ok { return Err(EngineError::InvalidInput("stop loss is on the wrong side of the price")); }

        Ok(OrderRequest {
            asset: asset.to_string(),
            side: self.side,
            volume,
            leverage: self.leverage(),
            entry_price,
            take_profit,
            stop_loss,
        })
    }
}
