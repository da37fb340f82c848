use crate::config::Config;
use crate::models::{Candle, Horizon, OiSample, SignalResult};

/// Thresholds for the anomaly check
#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// Minimum OI growth over the 4h window, percent
    pub short_threshold: f64,
    /// Minimum OI growth over the 24h window, percent
    pub long_threshold: f64,
    /// Price growth must stay <= OI growth * ratio
    pub price_oi_ratio: f64,
    /// Symbols with current OI notional below this are never signaled
    pub min_open_interest: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            short_threshold: 10.0,
            long_threshold: 16.0,
            price_oi_ratio: 0.5,
            min_open_interest: 5_000_000.0,
        }
    }
}

impl From<&Config> for SignalConfig {
    fn from(config: &Config) -> Self {
        Self {
            short_threshold: config.oi_short_threshold,
            long_threshold: config.oi_long_threshold,
            price_oi_ratio: config.price_oi_ratio,
            min_open_interest: config.min_open_interest_usdt,
        }
    }
}

/// Percentage growth from `past` to `now`; zero when there is no base
pub fn growth(now: f64, past: f64) -> f64 {
    if past == 0.0 {
        return 0.0;
    }
    (now - past) / past * 100.0
}

/// Evaluate one symbol's windows for the open-interest anomaly.
///
/// Each window is oldest-first; growth is measured from the first to the
/// last sample. A signal fires on a horizon when OI growth reaches its
/// threshold (inclusive) while price growth stays within
/// `oi_growth * ratio` (inclusive). When both horizons fire, the short one
/// is reported.
pub fn evaluate(
    symbol: &str,
    oi_short: &[OiSample],
    oi_long: &[OiSample],
    candles_short: &[Candle],
    candles_long: &[Candle],
    config: &SignalConfig,
) -> Option<SignalResult> {
    let oi_now = oi_short.last()?.open_interest_value;
    let oi_short_ago = oi_short.first()?.open_interest_value;
    let oi_long_ago = oi_long.first()?.open_interest_value;

    // Dust filter: ignore thin markets outright
    if oi_now < config.min_open_interest {
        return None;
    }

    let oi_growth_short = growth(oi_now, oi_short_ago);
    let oi_growth_long = growth(oi_now, oi_long_ago);

    let price_now = candles_short.last()?.close;
    let price_short_ago = candles_short.first()?.close;
    let price_long_ago = candles_long.first()?.close;

    let price_growth_short = growth(price_now, price_short_ago);
    let price_growth_long = growth(price_now, price_long_ago);

    let short_fires = oi_growth_short >= config.short_threshold
        && price_growth_short <= oi_growth_short * config.price_oi_ratio;
    let long_fires = oi_growth_long >= config.long_threshold
        && price_growth_long <= oi_growth_long * config.price_oi_ratio;

    if !(short_fires || long_fires) {
        return None;
    }

    let horizon = if short_fires {
        Horizon::Short
    } else {
        Horizon::Long
    };

    Some(SignalResult {
        symbol: symbol.to_string(),
        horizon,
        oi_growth_short,
        oi_growth_long,
        price_growth_short,
        price_growth_long,
        current_price: price_now,
        current_open_interest: oi_now,
    })
}
