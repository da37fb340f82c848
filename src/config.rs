use std::time::Duration;

/// Process-wide scan and threshold configuration, set once at startup.
///
/// Every value has a hard default matching the reference deployment and can
/// be overridden through the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum seconds between two scan passes (floored at 60)
    pub scan_interval_secs: u64,
    /// OI growth threshold over the 4h horizon, percent
    pub oi_short_threshold: f64,
    /// OI growth threshold over the 24h horizon, percent
    pub oi_long_threshold: f64,
    /// Price growth must stay <= OI growth * ratio for a signal to fire
    pub price_oi_ratio: f64,
    /// Symbols below this open-interest notional (USDT) are never signaled
    pub min_open_interest_usdt: f64,
    /// Minimum hours between two signals for the same (user, symbol)
    pub cooldown_hours: i64,
    /// HTTP request timeout, seconds
    pub request_timeout_secs: u64,
    /// Bars in the volume-confirmation window
    pub volume_window: usize,
    /// Fixed delay between symbols within a pass (venue rate limits)
    pub symbol_delay_ms: u64,
    /// Operator test account: skips set_leverage and trades in one-way mode
    pub operator_chat_id: Option<i64>,
    pub telegram_token: String,
    pub profiles_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            oi_short_threshold: 10.0,
            oi_long_threshold: 16.0,
            price_oi_ratio: 0.5,
            min_open_interest_usdt: 5_000_000.0,
            cooldown_hours: 3,
            request_timeout_secs: 10,
            volume_window: 60,
            symbol_delay_ms: 150,
            operator_chat_id: None,
            telegram_token: String::new(),
            profiles_path: "users.json".to_string(),
        }
    }
}

impl Config {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Config::default();
        Self {
            scan_interval_secs: env_parse("SCAN_INTERVAL_SECS", d.scan_interval_secs).max(60),
            oi_short_threshold: env_parse("OI_4H_THRESHOLD", d.oi_short_threshold),
            oi_long_threshold: env_parse("OI_24H_THRESHOLD", d.oi_long_threshold),
            price_oi_ratio: env_parse("PRICE_OI_RATIO", d.price_oi_ratio),
            min_open_interest_usdt: env_parse("MIN_OI_USDT", d.min_open_interest_usdt),
            cooldown_hours: env_parse("SIGNAL_COOLDOWN_HOURS", d.cooldown_hours),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", d.request_timeout_secs),
            volume_window: env_parse("VOLUME_WINDOW", d.volume_window),
            symbol_delay_ms: env_parse("SYMBOL_DELAY_MS", d.symbol_delay_ms),
            operator_chat_id: std::env::var("OPERATOR_CHAT_ID")
                .ok()
                .and_then(|v| v.parse().ok()),
            telegram_token: std::env::var("TELEGRAM_TOKEN").unwrap_or_default(),
            profiles_path: std::env::var("USERS_FILE").unwrap_or(d.profiles_path),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cooldown_hours)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
