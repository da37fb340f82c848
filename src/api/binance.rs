use crate::models::{Candle, OiSample};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const BINANCE_FAPI_BASE: &str = "https://fapi.binance.com";

/// Samples required for the 24-hour horizon at 5-minute granularity.
/// A shorter window than this is treated as insufficient data.
pub const LONG_WINDOW: usize = 288;
/// Samples for the 4-hour horizon. Intentionally NOT length-checked;
/// the reference system only validates the 24-hour window.
pub const SHORT_WINDOW: usize = 48;

/// Read-only client for the market-data venue (Binance USDT-M futures)
#[derive(Clone)]
pub struct MarketDataClient {
    client: Client,
    base_url: String,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    contract_type: String,
    quote_asset: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OiHistRaw {
    symbol: String,
    sum_open_interest: String,
    sum_open_interest_value: String,
    timestamp: i64,
}

// ============== Implementation ==============

impl MarketDataClient {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(BINANCE_FAPI_BASE.to_string(), timeout)
    }

    /// Construct against an alternative base URL (test servers)
    pub fn with_base_url(base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, base_url }
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;

        if !response.status().is_success() {
            return Err(Error::Gateway {
                code: response.status().as_u16() as i64,
                message: format!("market data venue returned {}", response.status()),
            });
        }

        Ok(response.json().await?)
    }

    /// Fetch symbols that are perpetual, USDT-quoted and actively trading
    pub async fn fetch_tradable_symbols(&self) -> Result<Vec<String>> {
        let value = self.get_json("/fapi/v1/exchangeInfo", &[]).await?;
        let info: ExchangeInfo = serde_json::from_value(value)?;

        let symbols = info
            .symbols
            .into_iter()
            .filter(|s| {
                s.contract_type == "PERPETUAL"
                    && s.quote_asset == "USDT"
                    && s.status == "TRADING"
            })
            .map(|s| s.symbol)
            .collect();

        Ok(symbols)
    }

    /// Fetch open-interest history at 5m granularity, most-recent last.
    ///
    /// Returns whatever the venue has; window-completeness is the caller's
    /// concern (only the 24-hour horizon requires a full window).
    pub async fn fetch_open_interest_history(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<OiSample>> {
        let params = [
            ("symbol", symbol.to_string()),
            ("period", "5m".to_string()),
            ("limit", limit.to_string()),
        ];
        let value = self
            .get_json("/futures/data/openInterestHist", &params)
            .await?;
        let raw: Vec<OiHistRaw> = serde_json::from_value(value)?;

        raw.into_iter()
            .map(|r| {
                Ok(OiSample {
                    symbol: r.symbol,
                    timestamp: millis_to_utc(r.timestamp)?,
                    open_interest: parse_f64(&r.sum_open_interest, "sumOpenInterest")?,
                    open_interest_value: parse_f64(
                        &r.sum_open_interest_value,
                        "sumOpenInterestValue",
                    )?,
                })
            })
            .collect()
    }

    /// Fetch 5m OHLCV bars, most-recent last.
    ///
    /// Kline rows come back as heterogeneous JSON arrays:
    /// [openTime, open, high, low, close, volume, closeTime, ...]
    pub async fn fetch_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", "5m".to_string()),
            ("limit", limit.to_string()),
        ];
        let value = self.get_json("/fapi/v1/klines", &params).await?;

        let rows = value
            .as_array()
            .ok_or_else(|| Error::Decode("klines response is not an array".to_string()))?;

        rows.iter()
            .map(|row| parse_kline_row(symbol, row))
            .collect()
    }
}

fn parse_kline_row(symbol: &str, row: &serde_json::Value) -> Result<Candle> {
    let fields = row
        .as_array()
        .filter(|f| f.len() >= 6)
        .ok_or_else(|| Error::Decode("kline row too short".to_string()))?;

    let open_time = fields[0]
        .as_i64()
        .ok_or_else(|| Error::Decode("kline open time is not an integer".to_string()))?;

    Ok(Candle {
        symbol: symbol.to_string(),
        timestamp: millis_to_utc(open_time)?,
        open: value_f64(&fields[1], "open")?,
        high: value_f64(&fields[2], "high")?,
        low: value_f64(&fields[3], "low")?,
        close: value_f64(&fields[4], "close")?,
        volume: value_f64(&fields[5], "volume")?,
    })
}

fn value_f64(value: &serde_json::Value, field: &str) -> Result<f64> {
    match value {
        serde_json::Value::String(s) => parse_f64(s, field),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::Decode(format!("{} is not a finite number", field))),
        _ => Err(Error::Decode(format!("{} has unexpected type", field))),
    }
}

fn parse_f64(s: &str, field: &str) -> Result<f64> {
    s.parse()
        .map_err(|_| Error::Decode(format!("{} is not numeric: {}", field, s)))
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Decode(format!("timestamp out of range: {}", millis)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(server: &mockito::ServerGuard) -> MarketDataClient {
        MarketDataClient::with_base_url(server.url(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_fetch_tradable_symbols_filters() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "symbols": [
                {"symbol": "BTCUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "TRADING"},
                {"symbol": "ETHBTC", "contractType": "PERPETUAL", "quoteAsset": "BTC", "status": "TRADING"},
                {"symbol": "SOLUSDT_240927", "contractType": "CURRENT_QUARTER", "quoteAsset": "USDT", "status": "TRADING"},
                {"symbol": "XRPUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "SETTLING"},
                {"symbol": "ETHUSDT", "contractType": "PERPETUAL", "quoteAsset": "USDT", "status": "TRADING"}
            ]
        });
        let _m = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_body(body.to_string())
            .create_async()
            .await;

        let symbols = test_client(&server).fetch_tradable_symbols().await.unwrap();
        assert_eq!(symbols, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_open_interest_history_parses_strings() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!([
            {"symbol": "BTCUSDT", "sumOpenInterest": "80000.5", "sumOpenInterestValue": "5200000.25", "timestamp": 1700000000000i64},
            {"symbol": "BTCUSDT", "sumOpenInterest": "81000.0", "sumOpenInterestValue": "5300000.00", "timestamp": 1700000300000i64}
        ]);
        let _m = server
            .mock("GET", "/futures/data/openInterestHist")
            .match_query(mockito::Matcher::Any)
            .with_body(body.to_string())
            .create_async()
            .await;

        let samples = test_client(&server)
            .fetch_open_interest_history("BTCUSDT", 2)
            .await
            .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].open_interest_value, 5_200_000.25);
        assert_eq!(samples[1].open_interest_value, 5_300_000.0);
        assert!(samples[0].timestamp < samples[1].timestamp);
    }

    #[tokio::test]
    async fn test_fetch_candles_parses_mixed_rows() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!([
            [1700000000000i64, "100.0", "101.5", "99.5", "101.0", "1500.0", 1700000299999i64, "0", 10, "0", "0", "0"],
            [1700000300000i64, "101.0", "102.0", "100.0", "101.5", "2000.0", 1700000599999i64, "0", 12, "0", "0", "0"]
        ]);
        let _m = server
            .mock("GET", "/fapi/v1/klines")
            .match_query(mockito::Matcher::Any)
            .with_body(body.to_string())
            .create_async()
            .await;

        let candles = test_client(&server).fetch_candles("BTCUSDT", 2).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[1].volume, 2000.0);
        assert_eq!(candles[0].symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn test_http_error_maps_to_gateway() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_status(500)
            .create_async()
            .await;

        let err = test_client(&server).fetch_tradable_symbols().await.unwrap_err();
        assert!(matches!(err, Error::Gateway { code: 500, .. }));
    }
}
