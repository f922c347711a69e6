use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use engine::MarginThresholds;

#[derive(Parser, Debug, Clone)]
#[command(name = "dashboard-api", about = "Serves live account metrics and order-ticket previews for the trading dashboard")]
pub struct Config {
    #[arg(long, env = "DASHBOARD_LISTEN", default_value = "0.0.0.0:8787")]
    pub listen: String,

    /// Base URL of the trading backend REST API.
    #[arg(long, env = "BACKEND_URL", default_value = "http://127.0.0.1:3000")]
    pub backend_url: String,

    #[arg(long, env = "PRICE_FEED_URL", default_value = "ws://127.0.0.1:3001/precios")]
    pub feed_url: String,

    /// Bearer token forwarded to the backend.
    #[arg(long, env = "BACKEND_TOKEN")]
    pub token: Option<String>,

    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 5_000)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "FEED_RECONNECT_DELAY_MS", default_value_t = 3_000)]
    pub reconnect_delay_ms: u64,

    #[arg(long, env = "MARGIN_CALL_LEVEL", default_value_t = 100.0)]
    pub margin_call_level: f64,

    #[arg(long, env = "STOP_OUT_LEVEL", default_value_t = 50.0)]
    pub stop_out_level: f64,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 { bail!("poll interval must be non-zero"); }
        if self.reconnect_delay_ms == 0 { bail!("reconnect delay must be non-zero"); }
        if !(self.stop_out_level.is_finite() && self.margin_call_level.is_finite()) {
            bail!("margin levels must be numbers");
        }
        if self.stop_out_level > self.margin_call_level {
            bail!("stop-out level {} exceeds margin-call level {}", self.stop_out_level, self.margin_call_level);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }

    pub fn reconnect_delay(&self) -> Duration { Duration::from_millis(self.reconnect_delay_ms) }

    pub fn thresholds(&self) -> MarginThresholds {
        MarginThresholds { margin_call: self.margin_call_level, stop_out: self.stop_out_level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::try_parse_from(["dashboard-api"]).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:8787");
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(cfg.thresholds(), MarginThresholds::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_flags_override() {
        let cfg = Config::try_parse_from([
            "dashboard-api",
            "--backend-url", "https://api.example.test",
            "--token", "abc",
            "--poll-interval-ms", "750",
            "--stop-out-level", "30",
        ])
        .unwrap();
        assert_eq!(cfg.backend_url, "https://api.example.test");
        assert_eq!(cfg.token.as_deref(), Some("abc"));
        assert_eq!(cfg.poll_interval(), Duration::from_millis(750));
        assert_eq!(cfg.thresholds().stop_out, 30.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = Config::try_parse_from(["dashboard-api", "--poll-interval-ms", "0"]).unwrap();
        assert!(cfg.validate().is_err());
        let cfg = Config::try_parse_from(["dashboard-api", "--stop-out-level", "150"]).unwrap();
        assert!(cfg.validate().is_err());
    }
}
