use crate::api::bingx::{count_decimal_places, round_to, BingxClient};
use crate::api::telegram::{format_signal_alert, format_trade_error, TelegramClient};
use crate::api::MarketDataClient;
use crate::config::Config;
use crate::models::{SignalResult, Side};
use crate::persistence::{ProfileStore, UserProfile};
use crate::strategy::volume_confirmed;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// First decision for a (user, symbol) pair when a signal fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// User is not subscribed to trading: alert only, no order flow
    AlertOnly,
    /// Symbol signaled for this user inside the cooldown window: silent skip
    CoolingDown,
    /// Proceed to the order sequence
    Trade,
}

/// Subscription and cooldown gating, pure over the profile snapshot
pub fn evaluate_gates(
    profile: &UserProfile,
    symbol: &str,
    now: DateTime<Utc>,
    cooldown: chrono::Duration,
) -> Gate {
    if !profile.trading_enabled {
        return Gate::AlertOnly;
    }

    if let Some(last) = profile.last_signal_time.get(symbol) {
        if now - *last < cooldown {
            return Gate::CoolingDown;
        }
    }

    Gate::Trade
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub quantity: f64,
    pub stop_price: f64,
    pub take_profit_price: f64,
    pub trailing: Option<TrailingPlan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrailingPlan {
    pub activation_price: f64,
    /// Trailing rate as a fraction (percent / 100), 3 decimals
    pub price_rate: f64,
}

/// Position sizing and risk prices, pure over the profile snapshot.
///
/// Quantity is margin x leverage at the current price, rounded to whole
/// units for coarse prices (precision < 2) and one decimal otherwise.
/// Stop and take-profit are rounded to the price's own precision.
pub fn build_trade_plan(profile: &UserProfile, current_price: f64) -> TradePlan {
    let precision = count_decimal_places(current_price);

    let raw_quantity = (profile.margin_usdt * profile.leverage as f64) / current_price;
    let quantity = round_to(raw_quantity, if precision < 2 { 0 } else { 1 });

    let stop_price = round_to(
        current_price * (1.0 - profile.stop_loss_pct / 100.0),
        precision,
    );
    let take_profit_price = round_to(
        current_price * (1.0 + profile.take_profit_pct / 100.0),
        precision,
    );

    let trailing = profile.trailing_enabled.then(|| TrailingPlan {
        activation_price: current_price * (1.0 + profile.trailing_activation_pct / 100.0),
        price_rate: round_to(profile.trailing_rate_pct / 100.0, 3),
    });

    TradePlan {
        quantity,
        stop_price,
        take_profit_price,
        trailing,
    }
}

/// Drives the per-user sequence for every fired signal: gating, cooldown
/// recording, alerting, sizing and the venue order chain.
///
/// Failures are contained per user; one user's venue trouble never stops
/// the pass for anyone else.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<ProfileStore>,
    notifier: TelegramClient,
    market: MarketDataClient,
    config: Config,
    /// Overrides the venue base URL (test servers)
    venue_base: Option<String>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ProfileStore>,
        notifier: TelegramClient,
        market: MarketDataClient,
        config: Config,
    ) -> Self {
        Self {
            store,
            notifier,
            market,
            config,
            venue_base: None,
        }
    }

    pub fn with_venue_base(mut self, base_url: String) -> Self {
        self.venue_base = Some(base_url);
        self
    }

    /// Fan a fired signal out to every known user
    pub async fn dispatch(&self, signal: &SignalResult) {
        for (chat_id, profile) in self.store.all().await {
            self.process_user(chat_id, &profile, signal).await;
        }
    }

    async fn process_user(&self, chat_id: i64, profile: &UserProfile, signal: &SignalResult) {
        let now = Utc::now();
        match evaluate_gates(profile, &signal.symbol, now, self.config.cooldown()) {
            Gate::AlertOnly => {
                self.notifier
                    .send_alert(chat_id, &format_signal_alert(signal))
                    .await;
            }
            Gate::CoolingDown => {
                tracing::debug!(
                    "{} for user {} still cooling down, skipping",
                    signal.symbol,
                    chat_id
                );
            }
            Gate::Trade => {
                // Persist the cooldown stamp before any order attempt so a
                // failing order still blocks re-signaling inside the window
                if let Err(e) = self.store.record_signal(chat_id, &signal.symbol, now).await {
                    tracing::error!("Could not record cooldown for {}: {}", chat_id, e);
                }

                self.notifier
                    .send_alert(chat_id, &format_signal_alert(signal))
                    .await;

                if profile.blacklist.contains(&signal.symbol) {
                    tracing::info!(
                        "{} is blacklisted for user {}, no order",
                        signal.symbol,
                        chat_id
                    );
                    return;
                }

                if profile.volume_filter_enabled && !self.volume_check(profile, signal).await {
                    tracing::info!(
                        "Volume filter rejected {} for user {}",
                        signal.symbol,
                        chat_id
                    );
                    return;
                }

                if let Err(e) = self.open_position(chat_id, profile, signal).await {
                    tracing::error!(
                        "Trade error for user {} on {}: {}",
                        chat_id,
                        signal.symbol,
                        e
                    );
                    self.notifier
                        .send_alert(chat_id, &format_trade_error(&signal.symbol, &e))
                        .await;
                }
            }
        }
    }

    /// Volume confirmation; any fetch problem counts as "not confirmed"
    async fn volume_check(&self, profile: &UserProfile, signal: &SignalResult) -> bool {
        let window = self.config.volume_window;
        match self.market.fetch_candles(&signal.symbol, window).await {
            Ok(candles) => volume_confirmed(&candles, profile.volume_multiplier, window),
            Err(e) => {
                tracing::warn!("Volume window fetch for {} failed: {}", signal.symbol, e);
                false
            }
        }
    }

    async fn open_position(
        &self,
        chat_id: i64,
        profile: &UserProfile,
        signal: &SignalResult,
    ) -> Result<()> {
        let plan = build_trade_plan(profile, signal.current_price);
        let side = Side::Long;
        let is_operator = self.config.operator_chat_id == Some(chat_id);

        let venue = match &self.venue_base {
            Some(base) => BingxClient::with_base_url(
                profile.api_key.clone(),
                profile.api_secret.clone(),
                base.clone(),
                self.config.request_timeout(),
            ),
            None => {
                BingxClient::connect(
                    profile.api_key.clone(),
                    profile.api_secret.clone(),
                    profile.testnet,
                    self.config.request_timeout(),
                )
                .await
            }
        };

        // The operator test account runs in one-way position mode with
        // leverage managed outside the bot
        if !is_operator {
            venue
                .set_leverage(&signal.symbol, side, profile.leverage)
                .await?;
        }

        let receipt = venue
            .place_market_entry(
                &signal.symbol,
                side,
                plan.quantity,
                Some(plan.stop_price),
                Some(plan.take_profit_price),
                is_operator,
            )
            .await?;
        tracing::info!(
            "Order placed for user {} on {}: qty {} sl {} tp {} (order {})",
            chat_id,
            signal.symbol,
            plan.quantity,
            plan.stop_price,
            plan.take_profit_price,
            receipt.order_id
        );

        if let Some(trailing) = plan.trailing {
            let receipt = venue
                .set_trailing_stop(
                    &signal.symbol,
                    side,
                    plan.quantity,
                    trailing.activation_price,
                    trailing.price_rate,
                )
                .await?;
            tracing::info!(
                "Trailing set for user {} on {} (order {})",
                chat_id,
                signal.symbol,
                receipt.order_id
            );
        }

        Ok(())
    }
}
