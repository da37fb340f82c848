use crate::models::{OrderReceipt, Side};
use crate::{Error, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;

const BINGX_LIVE_BASE: &str = "https://open-api.bingx.com";
const BINGX_TESTNET_BASE: &str = "https://open-api-vst.bingx.com";

const ORDER_PATH: &str = "/openApi/swap/v2/trade/order";
const LEVERAGE_PATH: &str = "/openApi/swap/v2/trade/leverage";
const SERVER_TIME_PATH: &str = "/openApi/swap/v2/server/time";
const MARK_PRICE_PATH: &str = "/openApi/swap/v2/quote/premiumIndex";

const RECV_WINDOW: &str = "5000";

/// Authenticated client for the trading venue (BingX perpetual swaps).
///
/// Every signed request sorts its parameters lexicographically, appends a
/// millisecond timestamp (local clock + venue offset), signs the query with
/// HMAC-SHA256 and sends the API key in the `X-BX-APIKEY` header.
///
/// No call here is retried; retry policy belongs to the caller.
#[derive(Clone)]
pub struct BingxClient {
    client: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    time_offset_ms: i64,
}

/// Outcome of one level of a split stop/take-profit submission.
///
/// Levels are submitted independently; a failed level never aborts the
/// remaining ones, so callers get the full per-level picture.
#[derive(Debug)]
pub struct SplitOrderOutcome {
    pub trigger_price: f64,
    pub result: Result<OrderReceipt>,
}

#[derive(Debug, Deserialize)]
struct VenueEnvelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl BingxClient {
    /// Connect and fetch the venue clock offset.
    ///
    /// An unreachable time endpoint degrades to a zero offset rather than
    /// failing the connection.
    pub async fn connect(
        api_key: String,
        api_secret: String,
        testnet: bool,
        timeout: Duration,
    ) -> Self {
        let base_url = if testnet {
            BINGX_TESTNET_BASE.to_string()
        } else {
            BINGX_LIVE_BASE.to_string()
        };
        let mut client = Self::with_base_url(api_key, api_secret, base_url, timeout);

        client.time_offset_ms = match client.server_time_offset().await {
            Ok(offset) => offset,
            Err(e) => {
                tracing::warn!("Could not fetch venue clock offset, using 0: {}", e);
                0
            }
        };
        client
    }

    /// Construct against an explicit base URL without touching the network
    pub fn with_base_url(
        api_key: String,
        api_secret: String,
        base_url: String,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            api_secret,
            base_url,
            time_offset_ms: 0,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() + self.time_offset_ms
    }

    async fn signed_post(&self, path: &str, mut params: Vec<(String, String)>) -> Result<serde_json::Value> {
        params.push(("timestamp".to_string(), self.timestamp_ms().to_string()));
        let query = canonical_query(&params);
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .client
            .post(&url)
            .header("X-BX-APIKEY", &self.api_key)
            .send()
            .await?;

        decode_envelope(response).await
    }

    async fn public_get(&self, path: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;
        decode_envelope(response).await
    }

    /// Venue clock offset in milliseconds (serverTime - local time)
    pub async fn server_time_offset(&self) -> Result<i64> {
        let data = self.public_get(SERVER_TIME_PATH, &[]).await?;
        let server_time = data
            .get("serverTime")
            .and_then(json_i64)
            .ok_or_else(|| Error::Decode("serverTime missing from time response".to_string()))?;
        Ok(server_time - chrono::Utc::now().timestamp_millis())
    }

    /// Current mark price for a symbol
    pub async fn mark_price(&self, symbol: &str) -> Result<f64> {
        let params = [("symbol", to_venue_symbol(symbol))];
        let data = self.public_get(MARK_PRICE_PATH, &params).await?;

        // The venue returns a bare object for one symbol, an array otherwise
        let entry = match &data {
            serde_json::Value::Array(items) => items.first(),
            other => Some(other),
        };
        entry
            .and_then(|e| e.get("markPrice"))
            .and_then(json_f64)
            .ok_or_else(|| Error::Decode("markPrice missing from premium index".to_string()))
    }

    /// Set leverage for one side of a symbol
    pub async fn set_leverage(&self, symbol: &str, side: Side, leverage: u32) -> Result<()> {
        let params = vec![
            ("symbol".to_string(), to_venue_symbol(symbol)),
            ("side".to_string(), side.position_side().to_string()),
            ("leverage".to_string(), leverage.to_string()),
        ];
        self.signed_post(LEVERAGE_PATH, params).await?;
        Ok(())
    }

    /// Submit a market entry, optionally with attached conditional close
    /// orders evaluated against mark price.
    ///
    /// `one_way_mode` submits with positionSide=BOTH (operator test account).
    pub async fn place_market_entry(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        stop_price: Option<f64>,
        take_profit_price: Option<f64>,
        one_way_mode: bool,
    ) -> Result<OrderReceipt> {
        let position_side = if one_way_mode {
            "BOTH"
        } else {
            side.position_side()
        };

        let mut params = vec![
            ("symbol".to_string(), to_venue_symbol(symbol)),
            ("side".to_string(), side.entry_order_side().to_string()),
            ("positionSide".to_string(), position_side.to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), format_number(quantity)),
            ("recvWindow".to_string(), RECV_WINDOW.to_string()),
            ("timeInForce".to_string(), "GTC".to_string()),
        ];

        if let Some(stop) = stop_price {
            params.push(("stopLoss".to_string(), attached_order("STOP_MARKET", stop)));
        }
        if let Some(tp) = take_profit_price {
            params.push((
                "takeProfit".to_string(),
                attached_order("TAKE_PROFIT_MARKET", tp),
            ));
        }

        let data = self.signed_post(ORDER_PATH, params).await?;
        Ok(receipt_from(data))
    }

    /// Split `total_quantity` evenly across the given stop levels and submit
    /// each as an independent STOP_MARKET order.
    ///
    /// Per-level quantity rounding depends on the decimal precision of the
    /// entry price: >=3 decimals rounds to an integer, 2 to 1 decimal, 1 to
    /// 2 decimals, 0 to 3 decimals.
    pub async fn place_split_stops(
        &self,
        symbol: &str,
        total_quantity: f64,
        entry_price: f64,
        side: Side,
        stop_prices: &[f64],
    ) -> Vec<SplitOrderOutcome> {
        if stop_prices.is_empty() {
            return Vec::new();
        }

        let precision = count_decimal_places(entry_price);
        let qty_decimals = stop_qty_decimals(precision);
        let level_qty = round_to(total_quantity / stop_prices.len() as f64, qty_decimals);

        let mut outcomes = Vec::with_capacity(stop_prices.len());
        for &stop in stop_prices {
            let params = vec![
                ("symbol".to_string(), to_venue_symbol(symbol)),
                ("side".to_string(), side.close_order_side().to_string()),
                ("positionSide".to_string(), side.position_side().to_string()),
                ("type".to_string(), "STOP_MARKET".to_string()),
                ("stopPrice".to_string(), format_number(stop)),
                ("price".to_string(), format_number(stop)),
                ("quantity".to_string(), format_number(level_qty)),
                ("workingType".to_string(), "MARK_PRICE".to_string()),
                ("recvWindow".to_string(), RECV_WINDOW.to_string()),
            ];

            let result = self.signed_post(ORDER_PATH, params).await.map(receipt_from);
            if let Err(ref e) = result {
                tracing::warn!("Stop level {} on {} failed: {}", stop, symbol, e);
            }
            outcomes.push(SplitOrderOutcome {
                trigger_price: stop,
                result,
            });
        }

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        if failed > 0 {
            tracing::warn!(
                "{}: {}/{} stop levels failed",
                symbol,
                failed,
                outcomes.len()
            );
        }
        outcomes
    }

    /// Split `total_quantity` evenly across take-profit levels.
    ///
    /// The precision-to-rounding table here is NOT the split-stop table:
    /// precision 2 maps to 2 decimals, 1 to 3, 0 to 4. The divergence is a
    /// known quirk of the venue integration and is kept as-is.
    pub async fn place_split_take_profits(
        &self,
        symbol: &str,
        total_quantity: f64,
        mark_price: f64,
        side: Side,
        tp_prices: &[f64],
    ) -> Vec<SplitOrderOutcome> {
        if tp_prices.is_empty() {
            return Vec::new();
        }

        let precision = count_decimal_places(mark_price);
        let qty_decimals = tp_qty_decimals(precision);
        let level_qty = round_to(total_quantity / tp_prices.len() as f64, qty_decimals);

        let mut outcomes = Vec::with_capacity(tp_prices.len());
        for &tp in tp_prices {
            let params = vec![
                ("symbol".to_string(), to_venue_symbol(symbol)),
                ("side".to_string(), side.close_order_side().to_string()),
                ("positionSide".to_string(), side.position_side().to_string()),
                ("type".to_string(), "TAKE_PROFIT_MARKET".to_string()),
                ("stopPrice".to_string(), format_number(tp)),
                ("quantity".to_string(), format_number(level_qty)),
                ("workingType".to_string(), "MARK_PRICE".to_string()),
            ];

            let result = self.signed_post(ORDER_PATH, params).await.map(receipt_from);
            if let Err(ref e) = result {
                tracing::warn!("Take-profit level {} on {} failed: {}", tp, symbol, e);
            }
            outcomes.push(SplitOrderOutcome {
                trigger_price: tp,
                result,
            });
        }

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        if failed > 0 {
            tracing::warn!(
                "{}: {}/{} take-profit levels failed",
                symbol,
                failed,
                outcomes.len()
            );
        }
        outcomes
    }

    /// Submit one trailing stop referenced against contract price.
    ///
    /// `price_rate` is the trailing rate as a fraction (percent / 100).
    pub async fn set_trailing_stop(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        activation_price: f64,
        price_rate: f64,
    ) -> Result<OrderReceipt> {
        let params = vec![
            ("symbol".to_string(), to_venue_symbol(symbol)),
            ("side".to_string(), side.close_order_side().to_string()),
            ("positionSide".to_string(), side.position_side().to_string()),
            ("type".to_string(), "TRAILING_TP_SL".to_string()),
            ("quantity".to_string(), format_number(quantity)),
            ("recvWindow".to_string(), RECV_WINDOW.to_string()),
            ("workingType".to_string(), "CONTRACT_PRICE".to_string()),
            ("activationPrice".to_string(), format_number(activation_price)),
            ("newClientOrderId".to_string(), String::new()),
            ("priceRate".to_string(), format_number(price_rate)),
        ];
        let data = self.signed_post(ORDER_PATH, params).await?;
        Ok(receipt_from(data))
    }
}

async fn decode_envelope(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Gateway {
            code: status.as_u16() as i64,
            message: format!("trading venue returned {}", status),
        });
    }

    let envelope: VenueEnvelope = response.json().await?;
    if envelope.code != 0 {
        return Err(Error::Gateway {
            code: envelope.code,
            message: envelope.msg,
        });
    }
    Ok(envelope.data)
}

/// Conditional close order embedded in the entry request as a JSON string
fn attached_order(order_type: &str, trigger_price: f64) -> String {
    serde_json::json!({
        "type": order_type,
        "stopPrice": trigger_price,
        "price": trigger_price,
        "workingType": "MARK_PRICE",
    })
    .to_string()
}

fn receipt_from(data: serde_json::Value) -> OrderReceipt {
    let order_id = data
        .get("order")
        .and_then(|o| o.get("orderId"))
        .or_else(|| data.get("orderId"))
        .map(json_display)
        .unwrap_or_default();
    OrderReceipt {
        order_id,
        raw: data,
    }
}

fn json_display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Sort params lexicographically by key and join as key=value pairs
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Spot-style symbol to venue form: BTCUSDT -> BTC-USDT
pub fn to_venue_symbol(symbol: &str) -> String {
    if symbol.contains('-') {
        symbol.to_string()
    } else {
        symbol.replace("USDT", "-USDT")
    }
}

/// Decimal places in the shortest display form of a price
pub fn count_decimal_places(number: f64) -> u32 {
    let s = format!("{}", number);
    match s.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

/// Round half away from zero to a number of decimal places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Per-level quantity decimals for split stops, keyed by price precision
pub fn stop_qty_decimals(price_precision: u32) -> u32 {
    match price_precision {
        0 => 3,
        1 => 2,
        2 => 1,
        _ => 0,
    }
}

/// Per-level quantity decimals for split take-profits.
///
/// Deliberately different from the stop table for precision 0..=2.
pub fn tp_qty_decimals(price_precision: u32) -> u32 {
    match price_precision {
        0 => 4,
        1 => 3,
        2 => 2,
        _ => 0,
    }
}

fn format_number(value: f64) -> String {
    format!("{}", value)
}
