//! Binance spot venue integration.
//!
//! Live side of the venue contract: public endpoints for quotes and
//! symbol filters, signed endpoints for balances and orders.
//!
//! API docs: https://developers.binance.com/docs/binance-spot-api-docs
//! Base URL: https://api.binance.com
//! Auth: `X-MBX-APIKEY` header; signed endpoints append an HMAC-SHA256
//! hex signature of the query string.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::{
    buy_quantity, market_symbol, sell_quantity, BuyEstimate, PriceSource, SellEstimate,
};
use crate::types::{HopperError, OrderResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const VENUE_NAME: &str = "binance";

/// Signed-request validity window in milliseconds.
const RECV_WINDOW_MS: u64 = 5_000;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// API response types (Binance JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TickerPriceResponse {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    #[allow(dead_code)]
    symbol: String,
    filters: Vec<RawFilter>,
}

/// One entry of the per-symbol filter list. Only the filter types we
/// consume are modelled; the rest deserialize into the defaults.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFilter {
    filter_type: String,
    #[serde(default)]
    step_size: Option<String>,
    #[serde(default)]
    min_notional: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    #[serde(default)]
    taker_commission: i64,
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
}

/// Response from POST `/api/v3/order`. Binance spells the quote total
/// with a double `m`; keep their field name.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    #[serde(default)]
    executed_qty: String,
    #[serde(rename = "cummulativeQuoteQty", default)]
    cumulative_quote_qty: String,
    #[serde(default)]
    status: String,
}

// ---------------------------------------------------------------------------
// Symbol filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct SymbolFilters {
    quantity_decimals: i32,
    min_notional: f64,
}

/// Decimal places implied by a step size string, e.g. "0.01000000" → 2.
fn decimals_from_step(step: &str) -> i32 {
    match step.find('.') {
        None => 0,
        Some(dot) => match step[dot + 1..].find('1') {
            Some(pos) => pos as i32 + 1,
            None => 0,
        },
    }
}

fn parse_amount(raw: &str, what: &str) -> Result<f64> {
    raw.parse::<f64>()
        .with_context(|| format!("Failed to parse {what}: {raw:?}"))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Binance spot client.
pub struct BinanceClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: SecretString,
    /// LOT_SIZE / NOTIONAL filters cached per market after first use.
    filters: Mutex<HashMap<String, SymbolFilters>>,
    /// Account taker fee rate cached after first fetch.
    taker_fee: Mutex<Option<f64>>,
}

impl BinanceClient {
    pub fn new(
        base_url: Option<String>,
        api_key: String,
        api_secret: SecretString,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("HOPPER/0.1.0 (rotation-trading-engine)")
            .build()
            .context("Failed to build HTTP client for Binance")?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            api_secret,
            filters: Mutex::new(HashMap::new()),
            taker_fee: Mutex::new(None),
        })
    }

    // -- Internal helpers ------------------------------------------------

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// HMAC-SHA256 hex signature over the query string.
    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(
            self.api_secret.expose_secret().as_bytes(),
        )
        .context("Invalid API secret")?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String> {
        let mut all = params.to_vec();
        let timestamp = Utc::now().timestamp_millis().to_string();
        let recv_window = RECV_WINDOW_MS.to_string();
        all.push(("timestamp", timestamp));
        all.push(("recvWindow", recv_window));
        let query = Self::build_query(&all);
        let signature = self.sign(&query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn signed_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query = self.signed_query(params)?;
        let url = format!("{}{path}?{query}", self.base_url);

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Binance request failed: {path}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {status} on {path}: {body}");
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse Binance response from {path}"))
    }

    async fn signed_post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query = self.signed_query(params)?;
        let url = format!("{}{path}?{query}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Binance request failed: {path}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {status} on {path}: {body}");
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse Binance response from {path}"))
    }

    /// LOT_SIZE and NOTIONAL filters for a market, fetched once and cached.
    async fn symbol_filters(&self, market: &str) -> Result<SymbolFilters> {
        if let Some(cached) = self.filters.lock().unwrap().get(market) {
            return Ok(*cached);
        }

        let url = format!(
            "{}/api/v3/exchangeInfo?symbol={}",
            self.base_url,
            urlencoding::encode(market),
        );
        debug!(market = %market, "Fetching Binance symbol filters");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Binance exchangeInfo request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Binance exchangeInfo error {status}: {body}");
        }

        let info: ExchangeInfoResponse = resp
            .json()
            .await
            .context("Failed to parse Binance exchangeInfo response")?;

        let symbol = info
            .symbols
            .into_iter()
            .next()
            .with_context(|| format!("No exchange info for market {market}"))?;

        let mut parsed = SymbolFilters {
            quantity_decimals: 0,
            min_notional: 0.0,
        };
        for filter in symbol.filters {
            match filter.filter_type.as_str() {
                "LOT_SIZE" => {
                    if let Some(step) = filter.step_size.as_deref() {
                        parsed.quantity_decimals = decimals_from_step(step);
                    }
                }
                // Older deployments report MIN_NOTIONAL instead of NOTIONAL.
                "NOTIONAL" | "MIN_NOTIONAL" => {
                    if let Some(raw) = filter.min_notional.as_deref() {
                        parsed.min_notional = parse_amount(raw, "minNotional")?;
                    }
                }
                _ => {}
            }
        }

        self.filters
            .lock()
            .unwrap()
            .insert(market.to_string(), parsed);
        Ok(parsed)
    }

    async fn fetch_account(&self) -> Result<AccountResponse> {
        self.signed_get("/api/v3/account", &[]).await
    }

    async fn place_market_order(
        &self,
        market: &str,
        side: &str,
        quantity: f64,
        decimals: i32,
    ) -> Result<OrderResponse> {
        let params = [
            ("symbol", market.to_string()),
            ("side", side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", format!("{quantity:.decimals$}", decimals = decimals.max(0) as usize)),
        ];

        let order: OrderResponse = self.signed_post("/api/v3/order", &params).await?;
        info!(
            market = %market,
            side = %side,
            order_id = order.order_id,
            status = %order.status,
            "Binance order placed"
        );
        Ok(order)
    }

    fn to_order_result(market: &str, order: OrderResponse) -> Result<OrderResult> {
        let filled = parse_amount(&order.executed_qty, "executedQty")?;
        let quote = parse_amount(&order.cumulative_quote_qty, "cummulativeQuoteQty")?;
        let price = if filled > 0.0 { quote / filled } else { 0.0 };

        Ok(OrderResult {
            order_id: order.order_id.to_string(),
            market: market.to_string(),
            price,
            cumulative_filled_quantity: filled,
            cumulative_quote_qty: quote,
            timestamp: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// PriceSource trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl PriceSource for BinanceClient {
    /// Latest traded price from `/api/v3/ticker/price`.
    ///
    /// An unknown symbol comes back as HTTP 400; that is "no quote", not
    /// an error.
    async fn ticker_price(&self, market: &str) -> Result<Option<f64>> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url,
            urlencoding::encode(market),
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Binance ticker request failed")?;

        if resp.status() == reqwest::StatusCode::BAD_REQUEST {
            debug!(market = %market, "No Binance quote for market");
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Binance ticker error {status}: {body}");
        }

        let ticker: TickerPriceResponse = resp
            .json()
            .await
            .context("Failed to parse Binance ticker response")?;

        Ok(Some(parse_amount(&ticker.price, "ticker price")?))
    }

    /// Top-of-book sell estimate: gross proceeds of `quantity` at the
    /// last traded price.
    async fn market_sell_estimate(
        &self,
        market: &str,
        quantity: f64,
    ) -> Result<Option<SellEstimate>> {
        Ok(self.ticker_price(market).await?.map(|price| SellEstimate {
            price,
            quote_proceeds: price * quantity,
        }))
    }

    async fn market_buy_estimate(
        &self,
        market: &str,
        quote_amount: f64,
    ) -> Result<Option<BuyEstimate>> {
        Ok(self.ticker_price(market).await?.map(|price| BuyEstimate {
            price,
            base_quantity: quote_amount / price,
        }))
    }

    /// Account-wide taker rate; Binance reports basis points.
    async fn fee(&self, _base: &str, _quote: &str, _is_sell: bool) -> Result<f64> {
        if let Some(rate) = *self.taker_fee.lock().unwrap() {
            return Ok(rate);
        }
        let account = self.fetch_account().await?;
        let rate = account.taker_commission as f64 / 10_000.0;
        *self.taker_fee.lock().unwrap() = Some(rate);
        Ok(rate)
    }

    async fn min_notional(&self, base: &str, quote: &str) -> Result<f64> {
        let filters = self.symbol_filters(&market_symbol(base, quote)).await?;
        Ok(filters.min_notional)
    }

    async fn balance(&self, symbol: &str) -> Result<f64> {
        let account = self.fetch_account().await?;
        for entry in account.balances {
            if entry.asset == symbol {
                return parse_amount(&entry.free, "free balance");
            }
        }
        Ok(0.0)
    }

    /// Sell the quantized free balance of `base` into `quote`.
    ///
    /// The limit price is a protective pre-trade check against the
    /// current ticker; the submitted order is a market order.
    async fn execute_sell(
        &self,
        base: &str,
        quote: &str,
        limit_price: f64,
    ) -> Result<OrderResult> {
        let market = market_symbol(base, quote);
        let price = self
            .ticker_price(&market)
            .await?
            .ok_or_else(|| HopperError::NoQuote {
                market: market.clone(),
            })?;
        if limit_price > 0.0 && limit_price > price * (1.0 + f64::EPSILON) {
            return Err(HopperError::PriceViolation {
                market,
                limit: limit_price,
                market_price: price,
            }
            .into());
        }

        let filters = self.symbol_filters(&market).await?;
        let held = self.balance(base).await?;
        let quantity = sell_quantity(held, filters.quantity_decimals);
        if quantity <= 0.0 {
            return Err(HopperError::InsufficientBalance {
                symbol: base.to_string(),
                needed: 10f64.powi(-filters.quantity_decimals),
                available: held,
            }
            .into());
        }

        let order = self
            .place_market_order(&market, "SELL", quantity, filters.quantity_decimals)
            .await?;
        Self::to_order_result(&market, order)
    }

    /// Buy `base` with the quantized free `quote` balance.
    async fn execute_buy(
        &self,
        base: &str,
        quote: &str,
        limit_price: f64,
    ) -> Result<OrderResult> {
        let market = market_symbol(base, quote);
        let price = self
            .ticker_price(&market)
            .await?
            .ok_or_else(|| HopperError::NoQuote {
                market: market.clone(),
            })?;
        if limit_price > 0.0 && limit_price > price * (1.0 + f64::EPSILON) {
            return Err(HopperError::PriceViolation {
                market,
                limit: limit_price,
                market_price: price,
            }
            .into());
        }

        let filters = self.symbol_filters(&market).await?;
        let quote_held = self.balance(quote).await?;
        let quantity = buy_quantity(quote_held, price, filters.quantity_decimals);
        if quantity <= 0.0 {
            warn!(
                market = %market,
                quote_balance = quote_held,
                "Quote balance too small to buy one step"
            );
            return Err(HopperError::InsufficientBalance {
                symbol: quote.to_string(),
                needed: price * 10f64.powi(-filters.quantity_decimals),
                available: quote_held,
            }
            .into());
        }

        let order = self
            .place_market_order(&market, "BUY", quantity, filters.quantity_decimals)
            .await?;
        Self::to_order_result(&market, order)
    }

    fn name(&self) -> &str {
        VENUE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
