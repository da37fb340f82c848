use crate::models::SignalResult;
use crate::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// How long the venue holds a getUpdates long poll open
const POLL_TIMEOUT_SECS: u64 = 30;

/// Client for the Telegram Bot API: outbound alerts plus the long-poll
/// update stream that drives the settings commands.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    token: String,
    base_url: String,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

// ============== Implementation ==============

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, TELEGRAM_API_BASE.to_string())
    }

    /// Construct against an alternative base URL (test servers)
    pub fn with_base_url(token: String, base_url: String) -> Self {
        // Timeout must outlive the long-poll hold
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            token,
            base_url,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Send one HTML-formatted message
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        let parsed: ApiResponse<serde_json::Value> = response.json().await?;
        if !parsed.ok {
            return Err(Error::Gateway {
                code: -1,
                message: parsed
                    .description
                    .unwrap_or_else(|| "telegram returned ok=false".to_string()),
            });
        }
        Ok(())
    }

    /// Send an alert; delivery failures are logged, never surfaced.
    pub async fn send_alert(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.send_message(chat_id, text).await {
            tracing::warn!("Telegram delivery to {} failed: {}", chat_id, e);
        }
    }

    /// Long-poll for inbound updates past `offset`
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"],
        });

        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .json(&body)
            .send()
            .await?;

        let parsed: ApiResponse<Vec<Update>> = response.json().await?;
        if !parsed.ok {
            return Err(Error::Gateway {
                code: -1,
                message: parsed
                    .description
                    .unwrap_or_else(|| "telegram returned ok=false".to_string()),
            });
        }
        Ok(parsed.result.unwrap_or_default())
    }
}

/// Alert card for a fired signal
pub fn format_signal_alert(signal: &SignalResult) -> String {
    format!(
        "<b>${}</b>\n\
         🚨 <b>OI ALERT</b>\n\
         ⏱ Horizon: {}\n\n\
         OI 4h: {:.1}%\n\
         OI 24h: {:.1}%\n\n\
         Price 4h: {:.1}%\n\
         Price 24h: {:.1}%\n\n\
         Current price: {:.4}\n\
         OI: {:.1}M USDT\n\n\
         <i>OI rising faster than price → possible accumulation</i>",
        signal.symbol.replace("USDT", ""),
        signal.horizon.label(),
        signal.oi_growth_short,
        signal.oi_growth_long,
        signal.price_growth_short,
        signal.price_growth_long,
        signal.current_price,
        signal.current_open_interest / 1e6,
    )
}

/// Alert sent when order placement fails for one user
pub fn format_trade_error(symbol: &str, error: &Error) -> String {
    format!("Failed to open a position on {}: {}", symbol, error)
}
