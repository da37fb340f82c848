use crate::api::binance::{MarketDataClient, LONG_WINDOW, SHORT_WINDOW};
use crate::models::SignalResult;
use crate::strategy::{evaluate, SignalConfig};
use crate::{Error, Result};

/// Per-symbol anomaly scan: fetch the two OI windows and the two candle
/// windows, then run the pure evaluator over them.
#[derive(Clone)]
pub struct Scanner {
    market: MarketDataClient,
    config: SignalConfig,
}

impl Scanner {
    pub fn new(market: MarketDataClient, config: SignalConfig) -> Self {
        Self { market, config }
    }

    /// Evaluate one symbol.
    ///
    /// `DataUnavailable` when the 24-hour OI window is incomplete; the
    /// 4-hour window is deliberately not length-checked (young listings can
    /// still signal on the short horizon once the long window fills).
    pub async fn scan_symbol(&self, symbol: &str) -> Result<Option<SignalResult>> {
        let oi_short = self
            .market
            .fetch_open_interest_history(symbol, SHORT_WINDOW)
            .await?;
        let oi_long = self
            .market
            .fetch_open_interest_history(symbol, LONG_WINDOW)
            .await?;

        if oi_long.len() < LONG_WINDOW {
            return Err(Error::DataUnavailable {
                symbol: symbol.to_string(),
                got: oi_long.len(),
                need: LONG_WINDOW,
            });
        }

        let candles_short = self.market.fetch_candles(symbol, SHORT_WINDOW).await?;
        let candles_long = self.market.fetch_candles(symbol, LONG_WINDOW).await?;

        Ok(evaluate(
            symbol,
            &oi_short,
            &oi_long,
            &candles_short,
            &candles_long,
            &self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn oi_body(symbol: &str, count: usize, first: f64, last: f64) -> String {
        let step = if count > 1 {
            (last - first) / (count - 1) as f64
        } else {
            0.0
        };
        let rows: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "symbol": symbol,
                    "sumOpenInterest": "1000",
                    "sumOpenInterestValue": format!("{}", first + step * i as f64),
                    "timestamp": 1_700_000_000_000i64 + (i as i64) * 300_000,
                })
            })
            .collect();
        serde_json::Value::Array(rows).to_string()
    }

    fn kline_body(count: usize, first_close: f64, last_close: f64) -> String {
        let step = if count > 1 {
            (last_close - first_close) / (count - 1) as f64
        } else {
            0.0
        };
        let rows: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                let close = first_close + step * i as f64;
                serde_json::json!([
                    1_700_000_000_000i64 + (i as i64) * 300_000,
                    format!("{}", close),
                    format!("{}", close),
                    format!("{}", close),
                    format!("{}", close),
                    "1000",
                    1_700_000_299_999i64,
                ])
            })
            .collect();
        serde_json::Value::Array(rows).to_string()
    }

    #[tokio::test]
    async fn test_scan_symbol_fires_on_anomaly() {
        let mut server = mockito::Server::new_async().await;

        // Same response for both OI requests: 288 rows covers 48 as well
        let _oi = server
            .mock("GET", "/futures/data/openInterestHist")
            .match_query(mockito::Matcher::Any)
            .with_body(oi_body("TESTUSDT", 288, 10_000_000.0, 11_200_000.0))
            .expect(2)
            .create_async()
            .await;
        let _klines = server
            .mock("GET", "/fapi/v1/klines")
            .match_query(mockito::Matcher::Any)
            .with_body(kline_body(288, 100.0, 103.0))
            .expect(2)
            .create_async()
            .await;

        let scanner = Scanner::new(
            MarketDataClient::with_base_url(server.url(), Duration::from_secs(5)),
            SignalConfig::default(),
        );

        let signal = scanner.scan_symbol("TESTUSDT").await.unwrap();
        assert!(signal.is_some());
        assert_eq!(signal.unwrap().symbol, "TESTUSDT");
    }

    #[tokio::test]
    async fn test_short_long_window_is_data_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _oi = server
            .mock("GET", "/futures/data/openInterestHist")
            .match_query(mockito::Matcher::Any)
            .with_body(oi_body("NEWUSDT", 100, 10_000_000.0, 12_000_000.0))
            .expect(2)
            .create_async()
            .await;

        let scanner = Scanner::new(
            MarketDataClient::with_base_url(server.url(), Duration::from_secs(5)),
            SignalConfig::default(),
        );

        let err = scanner.scan_symbol("NEWUSDT").await.unwrap_err();
        assert!(matches!(
            err,
            Error::DataUnavailable { got: 100, need: 288, .. }
        ));
    }

    #[tokio::test]
    async fn test_quiet_symbol_yields_none() {
        let mut server = mockito::Server::new_async().await;
        let _oi = server
            .mock("GET", "/futures/data/openInterestHist")
            .match_query(mockito::Matcher::Any)
            .with_body(oi_body("TESTUSDT", 288, 10_000_000.0, 10_100_000.0))
            .expect(2)
            .create_async()
            .await;
        let _klines = server
            .mock("GET", "/fapi/v1/klines")
            .match_query(mockito::Matcher::Any)
            .with_body(kline_body(288, 100.0, 100.2))
            .expect(2)
            .create_async()
            .await;

        let scanner = Scanner::new(
            MarketDataClient::with_base_url(server.url(), Duration::from_secs(5)),
            SignalConfig::default(),
        );

        let signal = scanner.scan_symbol("TESTUSDT").await.unwrap();
        assert!(signal.is_none());
    }
}
