//! Live Coinbase Advanced Trade adapter.
//!
//! HMAC-SHA256 signed REST requests with timestamped signatures. The secret
//! is held only for signing and never logged or serialised.
//!
//! Error ladder: every failed request increments `consecutive_errors`; a
//! successful request resets it. Health reports `degraded` after 2
//! consecutive errors and `offline` after 5.
//!
//! Retry policy: idempotent reads may be retried by callers; `place_order`
//! is NEVER retried here — a failure surfaces as an error and
//! reconciliation catches up with whatever the venue actually did.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{error, info, warn};
use uuid::Uuid;

use cxd_domain::{
    DataQuality, MarketSnapshot, Order, OrderStatus, Side, VenueHealth, VenueStatus,
};
use cxd_marketdata::TtlCache;
use cxd_venues::{AdapterError, VenueAdapter, VenueOrderRow, VenuePositionRow};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_BASE_URL: &str = "https://api.coinbase.com";
const API_VERSION: &str = "2024-02-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const DEGRADED_AFTER_ERRORS: u32 = 2;
const OFFLINE_AFTER_ERRORS: u32 = 5;

/// API credentials. The secret is deliberately not `Debug`/`Clone`-printable.
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read credentials from the configured env vars.
    pub fn from_env(key_var: &str, secret_var: &str) -> Result<Self, AdapterError> {
        let api_key = std::env::var(key_var)
            .map_err(|_| AdapterError::Rejected(format!("missing env var {key_var}")))?;
        let api_secret = std::env::var(secret_var)
            .map_err(|_| AdapterError::Rejected(format!("missing env var {secret_var}")))?;
        Ok(Self::new(api_key, api_secret))
    }
}

struct LiveState {
    connected: bool,
    consecutive_errors: u32,
}

/// How long a ticker snapshot may be served from cache. Health checks and
/// the market-data pump both poll tickers; this keeps them off the venue's
/// rate limits.
const TICKER_CACHE_TTL: Duration = Duration::from_secs(1);

/// Live Coinbase venue adapter.
pub struct CoinbaseVenue {
    venue_id: Uuid,
    base_url: String,
    client: reqwest::Client,
    creds: Credentials,
    state: Mutex<LiveState>,
    supported_instruments: Vec<String>,
    ticker_cache: TtlCache<String, MarketSnapshot>,
}

impl CoinbaseVenue {
    pub fn new(creds: Credentials) -> Self {
        Self::with_base_url(creds, DEFAULT_BASE_URL)
    }

    /// Test entry point: point the adapter at a mock server.
    pub fn with_base_url(creds: Credentials, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static config");

        Self {
            venue_id: Uuid::new_v4(),
            base_url: base_url.into(),
            client,
            creds,
            state: Mutex::new(LiveState {
                connected: false,
                consecutive_errors: 0,
            }),
            supported_instruments: vec![
                "BTC-USD".to_string(),
                "ETH-USD".to_string(),
                "SOL-USD".to_string(),
            ],
            ticker_cache: TtlCache::new(64),
        }
    }

    pub fn venue_id(&self) -> Uuid {
        self.venue_id
    }

    /// HMAC-SHA256 hex signature over `timestamp + method + path + body`.
    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let message = format!("{timestamp}{method}{path}{body}");
        let mut mac = HmacSha256::new_from_slice(self.creds.api_secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn note_error(&self) -> u32 {
        let mut g = self.state.lock().unwrap();
        g.consecutive_errors += 1;
        g.consecutive_errors
    }

    fn note_success(&self) {
        let mut g = self.state.lock().unwrap();
        g.consecutive_errors = 0;
    }

    async fn authenticated_request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, AdapterError> {
        {
            let g = self.state.lock().unwrap();
            if !g.connected {
                return Err(AdapterError::NotConnected);
            }
        }

        let timestamp = Utc::now().timestamp().to_string();
        let body_str = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        let signature = self.sign(&timestamp, method.as_str(), path, &body_str);

        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json")
            .header("CB-VERSION", API_VERSION)
            .header("CB-ACCESS-KEY", &self.creds.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp);
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                self.note_error();
                if e.is_timeout() {
                    return Err(AdapterError::Timeout);
                }
                return Err(AdapterError::Transport(e.to_string()));
            }
        };

        let status = resp.status();
        let payload: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                self.note_error();
                return Err(AdapterError::Transport(format!("bad response body: {e}")));
            }
        };

        if !status.is_success() {
            let n = self.note_error();
            error!(status = %status, path, consecutive_errors = n, "coinbase_api_error");
            return Err(AdapterError::Api {
                code: Some(status.as_u16() as i64),
                message: payload.to_string(),
            });
        }

        self.note_success();
        Ok(payload)
    }

    async fn public_request(&self, path: &str) -> Result<serde_json::Value, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .header("CB-VERSION", API_VERSION)
            .send()
            .await
            .map_err(|e| {
                self.note_error();
                if e.is_timeout() {
                    AdapterError::Timeout
                } else {
                    AdapterError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        let payload: serde_json::Value = resp.json().await.map_err(|e| {
            self.note_error();
            AdapterError::Transport(format!("bad response body: {e}"))
        })?;

        if !status.is_success() {
            self.note_error();
            return Err(AdapterError::Api {
                code: Some(status.as_u16() as i64),
                message: payload.to_string(),
            });
        }
        self.note_success();
        Ok(payload)
    }
}

fn parse_venue_side(s: &str) -> Side {
    if s.eq_ignore_ascii_case("sell") {
        Side::Sell
    } else {
        Side::Buy
    }
}

fn f64_field(v: &serde_json::Value, key: &str) -> f64 {
    match &v[key] {
        serde_json::Value::String(s) => s.parse().unwrap_or(0.0),
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[async_trait]
impl VenueAdapter for CoinbaseVenue {
    fn name(&self) -> &str {
        "coinbase"
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        if self.creds.api_key.is_empty() || self.creds.api_secret.is_empty() {
            return Err(AdapterError::Rejected("missing credentials".into()));
        }
        {
            let mut g = self.state.lock().unwrap();
            g.connected = true;
        }
        // Probe connectivity with the accounts endpoint.
        match self
            .authenticated_request(reqwest::Method::GET, "/api/v3/brokerage/accounts", None)
            .await
        {
            Ok(_) => {
                info!(venue = "coinbase", mode = "live", "venue_connected");
                Ok(())
            }
            Err(e) => {
                let mut g = self.state.lock().unwrap();
                g.connected = false;
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        let mut g = self.state.lock().unwrap();
        g.connected = false;
        info!(venue = "coinbase", "venue_disconnected");
    }

    async fn place_order(&self, mut order: Order) -> Result<Order, AdapterError> {
        let side = match order.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let body = serde_json::json!({
            "client_order_id": order.id.to_string(),
            "product_id": order.instrument,
            "side": side,
            "order_configuration": {
                "market_market_ioc": { "base_size": format!("{}", order.size) }
            }
        });

        let start = Instant::now();
        let resp = self
            .authenticated_request(reqwest::Method::POST, "/api/v3/brokerage/orders", Some(body))
            .await?;
        order.latency_ms = Some(start.elapsed().as_millis() as i64);

        if resp["success"].as_bool().unwrap_or(false) {
            order.venue_order_id = resp["success_response"]["order_id"]
                .as_str()
                .map(|s| s.to_string());
            // Fill details arrive asynchronously; the order stays open and
            // reconciliation promotes it once the venue reports the fill.
            order.status = OrderStatus::Open;
            order.updated_at = Utc::now();
            info!(
                order_id = %order.id,
                venue_order_id = ?order.venue_order_id,
                latency_ms = ?order.latency_ms,
                "live_order_placed"
            );
            Ok(order)
        } else {
            let message = resp["error_response"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            error!(order_id = %order.id, message = %message, "live_order_rejected");
            Err(AdapterError::Rejected(message))
        }
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<bool, AdapterError> {
        let body = serde_json::json!({ "order_ids": [venue_order_id] });
        let resp = self
            .authenticated_request(
                reqwest::Method::POST,
                "/api/v3/brokerage/orders/batch_cancel",
                Some(body),
            )
            .await?;
        let ok = resp["results"][0]["success"].as_bool().unwrap_or(false);
        if ok {
            info!(venue_order_id, "live_order_cancelled");
        } else {
            warn!(venue_order_id, "live_order_cancel_failed");
        }
        Ok(ok)
    }

    async fn get_balance(&self) -> Result<BTreeMap<String, f64>, AdapterError> {
        let resp = self
            .authenticated_request(reqwest::Method::GET, "/api/v3/brokerage/accounts", None)
            .await?;
        let mut balances = BTreeMap::new();
        if let Some(accounts) = resp["accounts"].as_array() {
            for acc in accounts {
                let currency = acc["currency"].as_str().unwrap_or_default().to_string();
                let available = f64_field(&acc["available_balance"], "value");
                if !currency.is_empty() {
                    balances.insert(currency, available);
                }
            }
        }
        Ok(balances)
    }

    async fn get_positions(&self) -> Result<Vec<VenuePositionRow>, AdapterError> {
        // Spot venue: positions are non-quote balances.
        let balances = self.get_balance().await?;
        Ok(balances
            .into_iter()
            .filter(|(asset, qty)| asset != "USD" && asset != "USDC" && *qty != 0.0)
            .map(|(asset, qty)| VenuePositionRow {
                instrument: format!("{asset}-USD"),
                side: if qty >= 0.0 { Side::Buy } else { Side::Sell },
                size: qty.abs(),
                entry_price: None,
            })
            .collect())
    }

    async fn get_open_orders(&self) -> Result<Vec<VenueOrderRow>, AdapterError> {
        let resp = self
            .authenticated_request(
                reqwest::Method::GET,
                "/api/v3/brokerage/orders/historical/batch?order_status=OPEN",
                None,
            )
            .await?;
        let mut rows = Vec::new();
        if let Some(orders) = resp["orders"].as_array() {
            for o in orders {
                rows.push(VenueOrderRow {
                    venue_order_id: o["order_id"].as_str().unwrap_or_default().to_string(),
                    client_order_id: o["client_order_id"]
                        .as_str()
                        .and_then(|s| Uuid::parse_str(s).ok()),
                    instrument: o["product_id"].as_str().unwrap_or_default().to_string(),
                    side: parse_venue_side(o["side"].as_str().unwrap_or("BUY")),
                    size: f64_field(o, "base_size"),
                    filled_size: f64_field(o, "filled_size"),
                    avg_fill_price: {
                        let p = f64_field(o, "average_filled_price");
                        (p > 0.0).then_some(p)
                    },
                    status: o["status"].as_str().unwrap_or("unknown").to_lowercase(),
                });
            }
        }
        Ok(rows)
    }

    async fn get_ticker(&self, instrument: &str) -> Result<Option<MarketSnapshot>, AdapterError> {
        let cache_key = instrument.to_uppercase();
        if let Some(snapshot) = self.ticker_cache.get(&cache_key) {
            return Ok(Some(snapshot));
        }

        let path = format!("/api/v3/brokerage/products/{instrument}/ticker");
        let resp = self.public_request(&path).await?;

        let bid = f64_field(&resp, "best_bid");
        let ask = f64_field(&resp, "best_ask");
        let last = {
            let trades = resp["trades"].as_array();
            trades
                .and_then(|t| t.first())
                .map(|t| f64_field(t, "price"))
                .unwrap_or((bid + ask) / 2.0)
        };
        if bid <= 0.0 || ask <= 0.0 {
            return Ok(None);
        }
        let now = Utc::now();
        let snapshot = MarketSnapshot::from_quote(
            "coinbase",
            instrument,
            bid,
            ask,
            last,
            now,
            now,
            DataQuality::Realtime,
        );
        self.ticker_cache
            .set(cache_key, snapshot.clone(), TICKER_CACHE_TTL);
        Ok(Some(snapshot))
    }

    async fn health_check(&self) -> VenueHealth {
        let (connected, errors) = {
            let g = self.state.lock().unwrap();
            (g.connected, g.consecutive_errors)
        };

        let status = if !connected || errors >= OFFLINE_AFTER_ERRORS {
            VenueStatus::Offline
        } else if errors >= DEGRADED_AFTER_ERRORS {
            VenueStatus::Degraded
        } else {
            VenueStatus::Healthy
        };

        // Measure real latency when we can.
        let mut latency_ms = 0i64;
        if connected {
            let start = Instant::now();
            if self.get_ticker("BTC-USD").await.is_ok() {
                latency_ms = start.elapsed().as_millis() as i64;
            }
        }

        let mut health = VenueHealth::healthy(self.venue_id, "coinbase", latency_ms);
        health.status = status;
        health.error_rate = (errors as f64 * 2.0).min(100.0);
        health.is_enabled = connected;
        health.supported_instruments = self.supported_instruments.clone();
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_and_keyed() {
        let a = CoinbaseVenue::with_base_url(Credentials::new("k", "secret-1"), "http://x");
        let b = CoinbaseVenue::with_base_url(Credentials::new("k", "secret-1"), "http://x");
        let c = CoinbaseVenue::with_base_url(Credentials::new("k", "secret-2"), "http://x");

        let sig_a = a.sign("1700000000", "POST", "/api/v3/brokerage/orders", "{}");
        let sig_b = b.sign("1700000000", "POST", "/api/v3/brokerage/orders", "{}");
        let sig_c = c.sign("1700000000", "POST", "/api/v3/brokerage/orders", "{}");

        assert_eq!(sig_a, sig_b);
        assert_ne!(sig_a, sig_c);
        assert_eq!(sig_a.len(), 64, "hex-encoded sha256");
    }

    #[test]
    fn signature_covers_every_component() {
        let v = CoinbaseVenue::with_base_url(Credentials::new("k", "s"), "http://x");
        let base = v.sign("1", "GET", "/p", "");
        assert_ne!(base, v.sign("2", "GET", "/p", ""));
        assert_ne!(base, v.sign("1", "POST", "/p", ""));
        assert_ne!(base, v.sign("1", "GET", "/q", ""));
        assert_ne!(base, v.sign("1", "GET", "/p", "{}"));
    }
}
