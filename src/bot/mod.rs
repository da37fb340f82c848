use crate::api::telegram::{TelegramClient, Update};
use crate::persistence::{ProfileStore, UserProfile};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Profile field awaiting a value from the user.
///
/// The settings dialog is an explicit state machine keyed by chat id: a
/// `/set <field>` command parks the chat here, and the next plain message
/// is parsed as the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingField {
    ApiKey,
    ApiSecret,
    Leverage,
    Margin,
    StopLoss,
    TakeProfit,
    TrailingActivation,
    TrailingRate,
    VolumeMultiplier,
}

impl PendingField {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "api_key" => Some(Self::ApiKey),
            "api_secret" => Some(Self::ApiSecret),
            "leverage" => Some(Self::Leverage),
            "margin" => Some(Self::Margin),
            "sl" | "stop_loss" => Some(Self::StopLoss),
            "tp" | "take_profit" => Some(Self::TakeProfit),
            "trail_activation" => Some(Self::TrailingActivation),
            "trail_rate" => Some(Self::TrailingRate),
            "volume_multiplier" => Some(Self::VolumeMultiplier),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::ApiSecret => "api_secret",
            Self::Leverage => "leverage",
            Self::Margin => "margin",
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::TrailingActivation => "trail_activation",
            Self::TrailingRate => "trail_rate",
            Self::VolumeMultiplier => "volume_multiplier",
        }
    }

    /// Parse and validate a raw value; assignment happens separately so a
    /// rejected value never touches the profile.
    pub fn parse_value(&self, raw: &str) -> Result<FieldValue> {
        let raw = raw.trim();
        match self {
            Self::ApiKey | Self::ApiSecret => {
                if raw.is_empty() {
                    Err(Error::validation(self.name(), "must not be empty"))
                } else {
                    Ok(FieldValue::Text(raw.to_string()))
                }
            }
            Self::Leverage => {
                let value: u32 = raw
                    .parse()
                    .map_err(|_| Error::validation(self.name(), "expected a whole number"))?;
                if value < 1 {
                    return Err(Error::validation(self.name(), "must be at least 1"));
                }
                Ok(FieldValue::Int(value))
            }
            Self::Margin => {
                let value = parse_positive(raw, self.name())?;
                Ok(FieldValue::Float(value))
            }
            Self::VolumeMultiplier => {
                let value = parse_positive(raw, self.name())?;
                Ok(FieldValue::Float(value))
            }
            Self::StopLoss | Self::TakeProfit | Self::TrailingActivation | Self::TrailingRate => {
                let value: f64 = raw
                    .parse()
                    .map_err(|_| Error::validation(self.name(), "expected a number"))?;
                if !(value >= 0.0 && value.is_finite()) {
                    return Err(Error::validation(self.name(), "must be zero or positive"));
                }
                Ok(FieldValue::Float(value))
            }
        }
    }

    pub fn assign(&self, profile: &mut UserProfile, value: FieldValue) {
        match (self, value) {
            (Self::ApiKey, FieldValue::Text(v)) => profile.api_key = v,
            (Self::ApiSecret, FieldValue::Text(v)) => profile.api_secret = v,
            (Self::Leverage, FieldValue::Int(v)) => profile.leverage = v,
            (Self::Margin, FieldValue::Float(v)) => profile.margin_usdt = v,
            (Self::StopLoss, FieldValue::Float(v)) => profile.stop_loss_pct = v,
            (Self::TakeProfit, FieldValue::Float(v)) => profile.take_profit_pct = v,
            (Self::TrailingActivation, FieldValue::Float(v)) => {
                profile.trailing_activation_pct = v
            }
            (Self::TrailingRate, FieldValue::Float(v)) => profile.trailing_rate_pct = v,
            (Self::VolumeMultiplier, FieldValue::Float(v)) => profile.volume_multiplier = v,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(u32),
    Float(f64),
}

fn parse_positive(raw: &str, field: &str) -> Result<f64> {
    let value: f64 = raw
        .parse()
        .map_err(|_| Error::validation(field, "expected a number"))?;
    if !(value > 0.0 && value.is_finite()) {
        return Err(Error::validation(field, "must be positive"));
    }
    Ok(value)
}

/// Long-poll command loop for subscriptions and settings.
///
/// Runs on its own schedule so configuration stays responsive while a
/// scan pass is in flight; all profile writes go through the store.
pub struct SettingsBot {
    telegram: TelegramClient,
    store: Arc<ProfileStore>,
    pending: HashMap<i64, PendingField>,
}

impl SettingsBot {
    pub fn new(telegram: TelegramClient, store: Arc<ProfileStore>) -> Self {
        Self {
            telegram,
            store,
            pending: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        let mut offset = 0i64;
        loop {
            match self.telegram.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle_update(&update).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("Update poll failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    pub async fn handle_update(&mut self, update: &Update) {
        let Some(message) = &update.message else {
            return;
        };
        let Some(text) = &message.text else { return };
        self.handle_message(message.chat.id, text).await;
    }

    async fn handle_message(&mut self, chat_id: i64, text: &str) {
        let text = text.trim();

        // A parked field consumes the next non-command message
        if !text.starts_with('/') {
            if let Some(field) = self.pending.get(&chat_id).copied() {
                self.apply_pending(chat_id, field, text).await;
            }
            return;
        }

        let mut parts = text.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match command {
            "/start" => self.cmd_start(chat_id).await,
            "/stop" => self.cmd_stop(chat_id).await,
            "/settings" => self.cmd_settings(chat_id).await,
            "/trading" => self.cmd_toggle(chat_id, "Trading", |p| &mut p.trading_enabled).await,
            "/testnet" => self.cmd_toggle(chat_id, "Testnet", |p| &mut p.testnet).await,
            "/trailing" => {
                self.cmd_toggle(chat_id, "Trailing", |p| &mut p.trailing_enabled)
                    .await
            }
            "/volumefilter" => {
                self.cmd_toggle(chat_id, "Volume filter", |p| &mut p.volume_filter_enabled)
                    .await
            }
            "/set" => self.cmd_set(chat_id, &args).await,
            "/blacklist" => self.cmd_blacklist(chat_id, &args).await,
            _ => {
                self.telegram
                    .send_alert(chat_id, "Unknown command. See /settings.")
                    .await;
            }
        }
    }

    async fn apply_pending(&mut self, chat_id: i64, field: PendingField, raw: &str) {
        match field.parse_value(raw) {
            Ok(value) => {
                self.pending.remove(&chat_id);
                let result = self
                    .store
                    .update(chat_id, |profile| field.assign(profile, value))
                    .await;
                match result {
                    Ok(true) => {
                        self.telegram
                            .send_alert(chat_id, &format!("✅ {} updated", field.name()))
                            .await;
                        self.cmd_settings(chat_id).await;
                    }
                    Ok(false) => {
                        self.telegram
                            .send_alert(chat_id, "Not subscribed. Send /start first.")
                            .await;
                    }
                    Err(e) => {
                        tracing::error!("Profile save for {} failed: {}", chat_id, e);
                    }
                }
            }
            Err(e) => {
                // Prior value stays; the prompt stays armed for a retry
                self.telegram
                    .send_alert(chat_id, &format!("❌ {}. Try again.", e))
                    .await;
            }
        }
    }

    async fn cmd_start(&self, chat_id: i64) {
        match self.store.insert_default(chat_id).await {
            Ok(_) => {
                self.telegram
                    .send_alert(
                        chat_id,
                        "✅ Subscribed to OI signals. Use /settings to configure trading.",
                    )
                    .await;
                self.cmd_settings(chat_id).await;
            }
            Err(e) => tracing::error!("Subscribe for {} failed: {}", chat_id, e),
        }
    }

    async fn cmd_stop(&mut self, chat_id: i64) {
        self.pending.remove(&chat_id);
        if let Err(e) = self.store.remove(chat_id).await {
            tracing::error!("Unsubscribe for {} failed: {}", chat_id, e);
            return;
        }
        self.telegram.send_alert(chat_id, "❌ Unsubscribed").await;
    }

    async fn cmd_settings(&self, chat_id: i64) {
        let Some(profile) = self.store.get(chat_id).await else {
            self.telegram
                .send_alert(chat_id, "Not subscribed. Send /start first.")
                .await;
            return;
        };
        self.telegram
            .send_alert(chat_id, &render_settings(&profile))
            .await;
    }

    async fn cmd_toggle<F>(&self, chat_id: i64, label: &str, field: F)
    where
        F: FnOnce(&mut UserProfile) -> &mut bool,
    {
        let mut enabled = false;
        let result = self
            .store
            .update(chat_id, |profile| {
                let flag = field(profile);
                *flag = !*flag;
                enabled = *flag;
            })
            .await;

        match result {
            Ok(true) => {
                let state = if enabled { "on" } else { "off" };
                self.telegram
                    .send_alert(chat_id, &format!("{} is now {}", label, state))
                    .await;
            }
            Ok(false) => {
                self.telegram
                    .send_alert(chat_id, "Not subscribed. Send /start first.")
                    .await;
            }
            Err(e) => tracing::error!("Toggle for {} failed: {}", chat_id, e),
        }
    }

    async fn cmd_set(&mut self, chat_id: i64, args: &[&str]) {
        let Some(field) = args.first().copied().and_then(PendingField::from_name) else {
            self.telegram
                .send_alert(
                    chat_id,
                    "Usage: /set <api_key|api_secret|leverage|margin|sl|tp|trail_activation|trail_rate|volume_multiplier>",
                )
                .await;
            return;
        };

        if !self.store.contains(chat_id).await {
            self.telegram
                .send_alert(chat_id, "Not subscribed. Send /start first.")
                .await;
            return;
        }

        self.pending.insert(chat_id, field);
        self.telegram
            .send_alert(chat_id, &format!("Send a new value for <b>{}</b>:", field.name()))
            .await;
    }

    async fn cmd_blacklist(&self, chat_id: i64, args: &[&str]) {
        match args {
            ["add", symbol] => {
                let symbol = symbol.to_uppercase();
                let updated = self
                    .store
                    .update(chat_id, |p| {
                        p.blacklist.insert(symbol.clone());
                    })
                    .await;
                if matches!(updated, Ok(true)) {
                    self.telegram
                        .send_alert(chat_id, &format!("⛔ {} blacklisted", symbol))
                        .await;
                }
            }
            ["remove", symbol] => {
                let symbol = symbol.to_uppercase();
                let updated = self
                    .store
                    .update(chat_id, |p| {
                        p.blacklist.remove(&symbol);
                    })
                    .await;
                if matches!(updated, Ok(true)) {
                    self.telegram
                        .send_alert(chat_id, &format!("✅ {} removed from blacklist", symbol))
                        .await;
                }
            }
            ["show"] => {
                let Some(profile) = self.store.get(chat_id).await else {
                    return;
                };
                if profile.blacklist.is_empty() {
                    self.telegram.send_alert(chat_id, "📭 Blacklist is empty").await;
                } else {
                    let mut symbols: Vec<&String> = profile.blacklist.iter().collect();
                    symbols.sort();
                    let listing = symbols
                        .iter()
                        .map(|s| format!("• {}", s))
                        .collect::<Vec<_>>()
                        .join("\n");
                    self.telegram
                        .send_alert(chat_id, &format!("<b>⛔ Blacklist:</b>\n\n{}", listing))
                        .await;
                }
            }
            _ => {
                self.telegram
                    .send_alert(chat_id, "Usage: /blacklist add|remove|show [SYMBOL]")
                    .await;
            }
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "✅ on"
    } else {
        "❌ off"
    }
}

fn render_settings(profile: &UserProfile) -> String {
    format!(
        "<b>⚙️ Trading settings</b>\n\n\
         Trading: {}\n\
         API key: {}\n\
         API secret: {}\n\
         Network: {}\n\
         Leverage: {}x\n\
         Margin: {} USDT\n\
         SL: {}%\n\
         TP: {}%\n\
         Trailing: {}\n\
         Trailing activation: {}%\n\
         Trailing rate: {}%\n\
         Volume filter: {}\n\
         Volume multiplier: x{}\n\
         Blacklisted symbols: {}",
        on_off(profile.trading_enabled),
        if profile.api_key.is_empty() { "❌ not set" } else { "✅ set" },
        if profile.api_secret.is_empty() { "❌ not set" } else { "✅ set" },
        if profile.testnet { "testnet" } else { "live" },
        profile.leverage,
        profile.margin_usdt,
        profile.stop_loss_pct,
        profile.take_profit_pct,
        on_off(profile.trailing_enabled),
        profile.trailing_activation_pct,
        profile.trailing_rate_pct,
        on_off(profile.volume_filter_enabled),
        profile.volume_multiplier,
        profile.blacklist.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> Arc<ProfileStore> {
        let path = std::env::temp_dir().join(format!(
            "oibot-bot-{}-{}.json",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        let _ = std::fs::remove_file(&path);
        Arc::new(ProfileStore::load(path).unwrap())
    }

    async fn test_bot(server: &mockito::ServerGuard) -> (SettingsBot, Arc<ProfileStore>) {
        let store = temp_store();
        let telegram = TelegramClient::with_base_url("token".to_string(), server.url());
        (SettingsBot::new(telegram, store.clone()), store)
    }

    async fn accept_all_sends(server: &mut mockito::ServerGuard) {
        server
            .mock("POST", "/bottoken/sendMessage")
            .with_body(r#"{"ok": true, "result": {}}"#)
            .expect_at_least(0)
            .create_async()
            .await;
    }

    #[test]
    fn test_field_names_roundtrip() {
        for field in [
            PendingField::ApiKey,
            PendingField::ApiSecret,
            PendingField::Leverage,
            PendingField::Margin,
            PendingField::StopLoss,
            PendingField::TakeProfit,
            PendingField::TrailingActivation,
            PendingField::TrailingRate,
            PendingField::VolumeMultiplier,
        ] {
            assert_eq!(PendingField::from_name(field.name()), Some(field));
        }
        assert_eq!(PendingField::from_name("bogus"), None);
    }

    #[test]
    fn test_leverage_validation() {
        assert!(matches!(
            PendingField::Leverage.parse_value("10"),
            Ok(FieldValue::Int(10))
        ));
        assert!(matches!(
            PendingField::Leverage.parse_value("0"),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            PendingField::Leverage.parse_value("ten"),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            PendingField::Leverage.parse_value("2.5"),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_margin_must_be_positive() {
        assert!(matches!(
            PendingField::Margin.parse_value("50"),
            Ok(FieldValue::Float(v)) if v == 50.0
        ));
        assert!(matches!(
            PendingField::Margin.parse_value("-5"),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            PendingField::Margin.parse_value("0"),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_rejected_value_never_touches_profile() {
        let profile = UserProfile::default();
        let before = profile.clone();
        assert!(PendingField::StopLoss.parse_value("abc").is_err());
        // No assignment happened; profile is untouched
        assert_eq!(profile, before);
    }

    #[tokio::test]
    async fn test_start_then_set_leverage_flow() {
        let mut server = mockito::Server::new_async().await;
        accept_all_sends(&mut server).await;
        let (mut bot, store) = test_bot(&server).await;

        bot.handle_message(42, "/start").await;
        assert!(store.contains(42).await);

        bot.handle_message(42, "/set leverage").await;
        assert_eq!(bot.pending.get(&42), Some(&PendingField::Leverage));

        bot.handle_message(42, "20").await;
        assert!(bot.pending.get(&42).is_none());
        assert_eq!(store.get(42).await.unwrap().leverage, 20);
    }

    #[tokio::test]
    async fn test_invalid_value_keeps_prior_and_stays_pending() {
        let mut server = mockito::Server::new_async().await;
        accept_all_sends(&mut server).await;
        let (mut bot, store) = test_bot(&server).await;

        bot.handle_message(42, "/start").await;
        bot.handle_message(42, "/set leverage").await;
        bot.handle_message(42, "lots").await;

        // Prior value unchanged, prompt still armed
        assert_eq!(store.get(42).await.unwrap().leverage, 10);
        assert_eq!(bot.pending.get(&42), Some(&PendingField::Leverage));

        bot.handle_message(42, "15").await;
        assert_eq!(store.get(42).await.unwrap().leverage, 15);
    }

    #[tokio::test]
    async fn test_toggle_and_blacklist_commands() {
        let mut server = mockito::Server::new_async().await;
        accept_all_sends(&mut server).await;
        let (mut bot, store) = test_bot(&server).await;

        bot.handle_message(42, "/start").await;
        bot.handle_message(42, "/trading").await;
        assert!(store.get(42).await.unwrap().trading_enabled);
        bot.handle_message(42, "/trading").await;
        assert!(!store.get(42).await.unwrap().trading_enabled);

        bot.handle_message(42, "/blacklist add dogeusdt").await;
        assert!(store.get(42).await.unwrap().blacklist.contains("DOGEUSDT"));
        bot.handle_message(42, "/blacklist remove DOGEUSDT").await;
        assert!(store.get(42).await.unwrap().blacklist.is_empty());
    }

    #[tokio::test]
    async fn test_stop_unsubscribes() {
        let mut server = mockito::Server::new_async().await;
        accept_all_sends(&mut server).await;
        let (mut bot, store) = test_bot(&server).await;

        bot.handle_message(42, "/start").await;
        bot.handle_message(42, "/stop").await;
        assert!(!store.contains(42).await);
    }

    #[tokio::test]
    async fn test_plain_text_without_pending_is_ignored() {
        let mut server = mockito::Server::new_async().await;
        accept_all_sends(&mut server).await;
        let (mut bot, store) = test_bot(&server).await;

        bot.handle_message(42, "/start").await;
        bot.handle_message(42, "hello there").await;
        assert_eq!(store.get(42).await.unwrap(), UserProfile::default());
    }
}
