use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One open-interest sample at 5-minute granularity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OiSample {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    /// Open interest in contracts
    pub open_interest: f64,
    /// Open interest notional in quote currency (USDT)
    pub open_interest_value: f64,
}

/// OHLCV candlestick data at 5-minute granularity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Lookback horizon over which growth is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Horizon {
    /// 4 hours (48 five-minute samples)
    Short,
    /// 24 hours (288 five-minute samples)
    Long,
}

impl Horizon {
    pub fn label(&self) -> &'static str {
        match self {
            Horizon::Short => "4h",
            Horizon::Long => "24h",
        }
    }
}

/// Outcome of one symbol evaluation when thresholds are met.
///
/// Scan-local: produced by the evaluator, consumed immediately by the
/// orchestrator, never persisted.
#[derive(Debug, Clone)]
pub struct SignalResult {
    pub symbol: String,
    pub horizon: Horizon,
    pub oi_growth_short: f64,
    pub oi_growth_long: f64,
    pub price_growth_short: f64,
    pub price_growth_long: f64,
    pub current_price: f64,
    pub current_open_interest: f64,
}

/// Position direction on the trading venue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side for opening a position in this direction
    pub fn entry_order_side(&self) -> &'static str {
        match self {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }

    /// Order side for a close order (stop / take-profit / trailing)
    pub fn close_order_side(&self) -> &'static str {
        match self {
            Side::Long => "SELL",
            Side::Short => "BUY",
        }
    }

    pub fn position_side(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

/// Acknowledgement returned by the trading venue for one placed order
#[derive(Debug, Clone, Default)]
pub struct OrderReceipt {
    pub order_id: String,
    pub raw: serde_json::Value,
}
