// Core modules
pub mod api;
pub mod bot;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod scanner;
pub mod strategy;

// Re-export commonly used types
pub use config::Config;
pub use error::Error;
pub use models::*;

pub type Result<T> = std::result::Result<T, Error>;
