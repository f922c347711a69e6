use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::risk::round2;
use crate::ticket::coerce_leverage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "Buy", alias = "BUY", alias = "compra")]
    Buy,
    #[serde(alias = "Sell", alias = "SELL", alias = "venta")]
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState { Open, Closed }

/// One operation as the backend reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: u64,
    pub asset: String,
    pub side: Side,
    pub volume: f64,
    #[serde(default = "unit_leverage", deserialize_with = "lenient_leverage")]
    pub leverage: u32,
    pub entry_price: f64,
    #[serde(default)]
    pub close_price: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    pub committed_margin: f64,
    #[serde(default)]
    pub is_closed: bool,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
}

fn unit_leverage() -> u32 { 1 }

// Backends send leverage as a number, a string, a float or not at all.
fn lenient_leverage<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(coerce_leverage(&Value::deserialize(d)?))
}

impl Position {
    pub fn state(&self) -> PositionState {
        if self.is_closed { PositionState::Closed } else { PositionState::Open }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason| Err(EngineError::InvalidPosition { id: self.id, reason });
        if !(self.volume.is_finite() && self.volume > 0.0) { return invalid("volume must be positive"); }
        if self.leverage < 1 { return invalid("leverage must be at least 1"); }
        if !self.entry_price.is_finite() { return invalid("entry price is not a number"); }
        if self.is_closed {
            if self.close_price.is_none() { return invalid("closed operation without close price"); }
            if self.realized_pnl.is_none() { return invalid("closed operation without realized pnl"); }
        } else if self.realized_pnl.is_some() {
            return invalid("open operation with realized pnl");
        }
        Ok(())
    }
}

/// Authoritative balances pulled from the backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountBalances {
    pub balance: f64,
    #[serde(default)]
    pub credit: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub balance: f64,
    pub credit: f64,
    pub used_margin: f64,
    pub equity: f64,
    pub free_margin: f64,
    pub margin_level: f64,
}

impl AccountSnapshot {
    /// Two-decimal copy for display. Never feed it back into a computation.
    pub fn rounded(&self) -> Self {
        Self {
            balance: round2(self.balance),
            credit: round2(self.credit),
            used_margin: round2(self.used_margin),
            equity: round2(self.equity),
            free_margin: round2(self.free_margin),
            margin_level: round2(self.margin_level),
        }
    }
}

/// Percentages, so `0.1` means 0.1%.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommissionConfig {
    pub spread_percentage: f64,
    pub commission_percentage: f64,
    pub swap_daily_percentage: f64,
}

/// Payload for `POST /operar`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub asset: String,
    pub side: Side,
    pub volume: f64,
    pub leverage: u32,
    pub entry_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
}

/// Payload for `POST /cerrar-operacion`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    pub operation_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ganancia: Option<f64>,
}

/// Payload for `POST /actualizar-operacion`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LevelsRequest {
    pub operation_id: u64,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    Manual,
    TakeProfit,
    StopLoss,
    StopOut,
    Unknown,
}

impl CloseKind {
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "manual" | "usuario" => CloseKind::Manual,
            "take_profit" | "tp" => CloseKind::TakeProfit,
            "stop_loss" | "sl" => CloseKind::StopLoss,
            "stop_out" | "stopout" | "margin_call" | "liquidacion" => CloseKind::StopOut,
            _ => CloseKind::Unknown,
        }
    }
}

/// A confirmed Open -> Closed transition, either acknowledged by the close
/// endpoint or pushed by the server for TP/SL/stop-out.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloseConfirmation {
    pub operation_id: u64,
    pub close_price: f64,
    pub realized_pnl: f64,
    pub kind: CloseKind,
}
