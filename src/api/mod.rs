pub mod binance;
pub mod bingx;
pub mod telegram;

pub use binance::MarketDataClient;
pub use bingx::{BingxClient, SplitOrderOutcome};
pub use telegram::TelegramClient;
