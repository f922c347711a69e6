use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::error::EngineError;
use crate::symbol::normalize;
use crate::types::{CloseConfirmation, CloseKind};

/// Coerce a wire price (number or numeric string) to a finite float.
pub fn coerce_price(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Latest known price per normalized symbol. Last write wins.
#[derive(Debug, Clone, Default)]
pub struct PriceStore {
    prices: HashMap<String, f64>,
    revision: u64,
}

impl PriceStore {
    pub fn new() -> Self { Self::default() }

    /// Returns false (and stores nothing) for an empty key or a non-finite price.
    pub fn set(&mut self, symbol: &str, price: f64) -> bool {
        let key = normalize(symbol);
        if key.is_empty() || !price.is_finite() { return false; }
        self.prices.insert(key, price);
        self.revision = self.revision.wrapping_add(1);
        true
    }

    pub fn apply(&mut self, quotes: &[(String, f64)]) -> usize {
        quotes.iter().filter(|(symbol, price)| self.set(symbol, *price)).count()
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.prices.get(&normalize(symbol)).copied()
    }

    pub fn revision(&self) -> u64 { self.revision }

    pub fn len(&self) -> usize { self.prices.len() }

    pub fn is_empty(&self) -> bool { self.prices.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.prices.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn clear(&mut self) {
        self.prices.clear();
        self.revision = self.revision.wrapping_add(1);
    }
}

/// One decoded message from the price socket.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Prices(Vec<(String, f64)>),
    Closed(CloseConfirmation),
    Ignored,
}

const CLOSE_TYPE: &str = "operation_closed";
const CLOSE_TIPO: &str = "operacion_cerrada";

impl FeedMessage {
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(&value))
    }

    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else { return FeedMessage::Ignored };
        let kind = obj.get("type").and_then(Value::as_str);
        let tipo = obj.get("tipo").and_then(Value::as_str);

        if kind == Some(CLOSE_TYPE) || tipo == Some(CLOSE_TIPO) {
            return match parse_close(obj) {
                Some(close) => FeedMessage::Closed(close),
                None => {
                    debug!("dropping close notification without id, close price or pnl");
                    FeedMessage::Ignored
                }
            };
        }
        match (kind, tipo) {
            (Some("price_update"), _) => match obj.get("prices").and_then(Value::as_object) {
                Some(prices) => FeedMessage::Prices(valid_quotes(prices)),
                None => FeedMessage::Ignored,
            },
            // bare {symbol: price} map
            (None, None) if !obj.contains_key("type") => FeedMessage::Prices(valid_quotes(obj)),
            _ => FeedMessage::Ignored,
        }
    }
}

fn valid_quotes(prices: &Map<String, Value>) -> Vec<(String, f64)> {
    prices
        .iter()
        .filter_map(|(symbol, raw)| {
            let quote = coerce_price(raw).filter(|_| !symbol.trim().is_empty());
            if quote.is_none() { trace!(%symbol, %raw, "dropping invalid price entry"); }
            quote.map(|p| (symbol.clone(), p))
        })
        .collect()
}

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn parse_close(obj: &Map<String, Value>) -> Option<CloseConfirmation> {
    let operation_id = match first(obj, &["operationId", "operacionId", "id"])? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    let close_price = first(obj, &["closePrice", "precioCierre"]).and_then(coerce_price)?;
    let realized_pnl = first(obj, &["realizedPnl", "ganancia"]).and_then(coerce_price)?;
    let kind = ["tipoCierre", "tipo", "reason"]
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .find(|raw| *raw != CLOSE_TIPO)
        .map(CloseKind::from_wire)
        .unwrap_or(CloseKind::Unknown);
    Some(CloseConfirmation { operation_id, close_price, realized_pnl, kind })
}
