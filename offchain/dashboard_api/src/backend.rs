//! REST client for the trading backend.
//! Every write returns `Ok` only when the backend answered `success: true`;
//! callers mutate the session after that and never before.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use engine::price::coerce_price;
use engine::{AccountBalances, CloseConfirmation, CloseKind, CloseRequest, CommissionConfig, LevelsRequest, OrderRequest, Position};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ack<T> {
    success: bool,
    #[serde(default, alias = "mensaje")]
    message: Option<String>,
    #[serde(flatten)]
    data: T,
}

impl<T> Ack<T> {
    fn into_result(self) -> Result<T> {
        if self.success { return Ok(self.data); }
        Err(anyhow!(self.message.unwrap_or_else(|| "request rejected".to_string())))
    }
}

#[derive(Debug, Default, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    #[serde(default, alias = "operacion")]
    operation: Option<Position>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseAck {
    #[serde(default, alias = "precioCierre")]
    close_price: Option<Value>,
    #[serde(default, alias = "ganancia")]
    realized_pnl: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OperationsListing {
    Bare(Vec<Value>),
    Wrapped {
        #[serde(alias = "operaciones")]
        operations: Vec<Value>,
    },
}

fn decode<T: DeserializeOwned>(status: reqwest::StatusCode, body: &str) -> Result<T> {
    match serde_json::from_str::<T>(body) {
        Ok(v) => Ok(v),
        Err(e) if status.is_success() => Err(e).context("unexpected backend response"),
        Err(_) => bail!("backend returned {status}: {}", body.chars().take(200).collect::<String>()),
    }
}

/// Records are decoded one by one; a record that does not decode is skipped
/// so the rest of the listing still refreshes.
fn decode_operations(status: reqwest::StatusCode, body: &str) -> Result<Vec<Position>> {
    let raw = match decode::<OperationsListing>(status, body)? {
        OperationsListing::Bare(ops) | OperationsListing::Wrapped { operations: ops } => ops,
    };
    Ok(raw
        .into_iter()
        .filter_map(|v| {
            let id = v.get("id").cloned();
            serde_json::from_value::<Position>(v)
                .map_err(|e| warn!(target: "dashboard", ?id, "skipping undecodable operation: {e}"))
                .ok()
        })
        .collect())
}

fn close_confirmation(operation_id: u64, ack: CloseAck) -> Option<CloseConfirmation> {
    Some(CloseConfirmation {
        operation_id,
        close_price: ack.close_price.as_ref().and_then(coerce_price)?,
        realized_pnl: ack.realized_pnl.as_ref().and_then(coerce_price)?,
        kind: CloseKind::Manual,
    })
}

impl BackendClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string(), token })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<(reqwest::StatusCode, String)> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(target: "dashboard", %status, "backend response");
        Ok((status, body))
    }

    pub async fn fetch_account(&self) -> Result<AccountBalances> {
        let (status, body) = self.send(self.request(reqwest::Method::GET, "/usuarios/me")).await?;
        decode(status, &body)
    }

    pub async fn fetch_operations(&self) -> Result<Vec<Position>> {
        let (status, body) = self.send(self.request(reqwest::Method::GET, "/operaciones")).await?;
        decode_operations(status, &body)
    }

    pub async fn fetch_commissions(&self) -> Result<CommissionConfig> {
        let (status, body) = self.send(self.request(reqwest::Method::GET, "/comisiones")).await?;
        decode(status, &body)
    }

    pub async fn update_commissions(&self, cfg: &CommissionConfig) -> Result<()> {
        let (status, body) = self.send(self.request(reqwest::Method::PUT, "/comisiones").json(cfg)).await?;
        decode::<Ack<Empty>>(status, &body)?.into_result().map(|_| ())
    }

    /// `Ok(Some(_))` carries the placed operation when the backend echoes it;
    /// `Ok(None)` means accepted but the next poll has to pick it up.
    pub async fn place_order(&self, order: &OrderRequest) -> Result<Option<Position>> {
        let (status, body) = self.send(self.request(reqwest::Method::POST, "/operar").json(order)).await?;
        Ok(decode::<Ack<OrderAck>>(status, &body)?.into_result()?.operation)
    }

    /// Same contract as [`place_order`](Self::place_order): `None` when the close
    /// was accepted without close price or pnl in the answer.
    pub async fn close_operation(&self, req: &CloseRequest) -> Result<Option<CloseConfirmation>> {
        let (status, body) = self.send(self.request(reqwest::Method::POST, "/cerrar-operacion").json(req)).await?;
        let ack = decode::<Ack<CloseAck>>(status, &body)?.into_result()?;
        Ok(close_confirmation(req.operation_id, ack))
    }

    pub async fn update_levels(&self, req: &LevelsRequest) -> Result<()> {
        let (status, body) = self.send(self.request(reqwest::Method::POST, "/actualizar-operacion").json(req)).await?;
        decode::<Ack<Empty>>(status, &body)?.into_result().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    const OP: &str = r#"{"id":3,"asset":"BTC-USDT","side":"buy","volume":0.1,"leverage":10,"entryPrice":50000,"committedMargin":500}"#;

    #[test]
    fn test_decode_operations_both_shapes() {
        let bare = format!("[{OP}]");
        assert_eq!(decode_operations(StatusCode::OK, &bare).unwrap().len(), 1);
        let wrapped = format!(r#"{{"operaciones":[{OP},{OP}]}}"#);
        assert_eq!(decode_operations(StatusCode::OK, &wrapped).unwrap().len(), 2);
    }

    #[test]
    fn test_decode_operations_skips_bad_records() {
        let no_leverage = r#"{"id":4,"asset":"ETH-USDT","side":"sell","volume":1,"entryPrice":3000,"committedMargin":3000}"#;
        let no_margin = r#"{"id":5,"asset":"ETH-USDT","side":"sell","volume":1,"leverage":5,"entryPrice":3000}"#;
        let body = format!(r#"[{OP},{no_leverage},{no_margin},"garbage"]"#);
        let ops = decode_operations(StatusCode::OK, &body).unwrap();
        assert_eq!(ops.iter().map(|p| p.id).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(ops[1].leverage, 1);

        assert!(decode_operations(StatusCode::OK, r#"{"unexpected":true}"#).is_err());
    }

    #[test]
    fn test_decode_error_status() {
        let err = decode::<AccountBalances>(StatusCode::INTERNAL_SERVER_ERROR, "oops").unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(decode::<AccountBalances>(StatusCode::OK, "{}").is_err());
        let ok: AccountBalances = decode(StatusCode::OK, r#"{"balance":1000.5}"#).unwrap();
        assert_eq!(ok.credit, 0.0);
    }

    #[test]
    fn test_order_ack() {
        let body = format!(r#"{{"success":true,"operacion":{OP}}}"#);
        let op = decode::<Ack<OrderAck>>(StatusCode::OK, &body).unwrap().into_result().unwrap().operation;
        assert_eq!(op.map(|p| p.id), Some(3));

        let body = r#"{"success":true}"#;
        assert!(decode::<Ack<OrderAck>>(StatusCode::OK, body).unwrap().into_result().unwrap().operation.is_none());
    }

    #[test]
    fn test_rejection_keeps_backend_message() {
        let body = r#"{"success":false,"message":"insufficient margin"}"#;
        let err = decode::<Ack<OrderAck>>(StatusCode::BAD_REQUEST, body).unwrap().into_result().unwrap_err();
        assert_eq!(err.to_string(), "insufficient margin");

        let body = r#"{"success":false}"#;
        let err = decode::<Ack<Empty>>(StatusCode::OK, body).unwrap().into_result().unwrap_err();
        assert_eq!(err.to_string(), "request rejected");
    }

    #[test]
    fn test_close_ack_to_confirmation() {
        let ack = decode::<Ack<CloseAck>>(StatusCode::OK, r#"{"success":true,"precioCierre":"110.5","ganancia":21}"#)
            .unwrap()
            .into_result()
            .unwrap();
        let close = close_confirmation(3, ack).unwrap();
        assert_eq!(close.close_price, 110.5);
        assert_eq!(close.realized_pnl, 21.0);
        assert_eq!(close.kind, CloseKind::Manual);

        let ack = decode::<Ack<CloseAck>>(StatusCode::OK, r#"{"success":true}"#).unwrap().into_result().unwrap();
        assert!(close_confirmation(3, ack).is_none());
    }
}
