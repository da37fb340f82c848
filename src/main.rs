use oibot::api::{MarketDataClient, TelegramClient};
use oibot::bot::SettingsBot;
use oibot::execution::Orchestrator;
use oibot::persistence::ProfileStore;
use oibot::scanner::Scanner;
use oibot::strategy::SignalConfig;
use oibot::{Config, Error};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let config = Config::from_env();
    if config.telegram_token.is_empty() {
        return Err(anyhow::anyhow!("TELEGRAM_TOKEN not found in environment"));
    }

    tracing::info!("🚀 OI scanner starting");
    tracing::info!("📊 Configuration:");
    tracing::info!("  Scan interval: {}s", config.scan_interval_secs);
    tracing::info!(
        "  OI thresholds: 4h {}% / 24h {}%, ratio {}",
        config.oi_short_threshold,
        config.oi_long_threshold,
        config.price_oi_ratio
    );
    tracing::info!("  OI floor: {} USDT", config.min_open_interest_usdt);
    tracing::info!("  Cooldown: {}h", config.cooldown_hours);

    let store = Arc::new(ProfileStore::load(&config.profiles_path)?);
    let telegram = TelegramClient::new(config.telegram_token.clone());
    let market = MarketDataClient::new(config.request_timeout());

    let scanner = Scanner::new(market.clone(), SignalConfig::from(&config));
    let orchestrator = Orchestrator::new(
        store.clone(),
        telegram.clone(),
        market.clone(),
        config.clone(),
    );

    // Loop 1: perpetual market scan
    let scan_task = {
        let config = config.clone();
        tokio::spawn(async move {
            scan_loop(scanner, orchestrator, market, config).await;
        })
    };

    // Loop 2: user commands and settings, independent of scan progress
    let bot_task = {
        let bot = SettingsBot::new(telegram, store);
        tokio::spawn(async move {
            bot.run().await;
        })
    };

    tracing::info!("✅ Scan and settings loops running. Press Ctrl+C to stop...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        result = scan_task => {
            tracing::error!("Scan loop exited: {:?}", result);
        }
        result = bot_task => {
            tracing::error!("Settings loop exited: {:?}", result);
        }
    }

    tracing::info!("👋 OI scanner stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oibot=info".into()),
        )
        .init();
}

/// Iterate every tradable symbol once per interval, sequentially, with a
/// fixed delay between symbols to stay inside venue rate limits.
async fn scan_loop(
    scanner: Scanner,
    orchestrator: Orchestrator,
    market: MarketDataClient,
    config: Config,
) {
    let symbols = loop {
        match market.fetch_tradable_symbols().await {
            Ok(symbols) => break symbols,
            Err(e) => {
                tracing::error!("Symbol listing failed, retrying in 30s: {}", e);
                sleep(Duration::from_secs(30)).await;
            }
        }
    };
    tracing::info!("Symbols loaded: {}", symbols.len());

    loop {
        let pass_started = Instant::now();
        tracing::info!("Scan pass started ({} symbols)", symbols.len());

        let mut fired = 0usize;
        for symbol in &symbols {
            match scanner.scan_symbol(symbol).await {
                Ok(Some(signal)) => {
                    fired += 1;
                    tracing::info!(
                        "Signal on {} ({}): OI 4h {:.1}% / 24h {:.1}%, price 4h {:.1}%",
                        signal.symbol,
                        signal.horizon.label(),
                        signal.oi_growth_short,
                        signal.oi_growth_long,
                        signal.price_growth_short
                    );
                    orchestrator.dispatch(&signal).await;
                }
                Ok(None) => {}
                Err(Error::DataUnavailable { symbol, got, need }) => {
                    tracing::debug!("{}: {}/{} samples, skipping", symbol, got, need);
                }
                Err(e) => {
                    tracing::warn!("{}: scan failed: {}", symbol, e);
                }
            }
            sleep(Duration::from_millis(config.symbol_delay_ms)).await;
        }

        let elapsed = pass_started.elapsed();
        tracing::info!("Scan pass done in {:.0?}, {} signals", elapsed, fired);

        let interval = Duration::from_secs(config.scan_interval_secs);
        let pause = interval
            .checked_sub(elapsed)
            .unwrap_or_default()
            .max(Duration::from_secs(60));
        sleep(pause).await;
    }
}
