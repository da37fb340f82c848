use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Propagation policy:
/// - `DataUnavailable` during scanning skips the symbol for that pass only.
/// - `Transport`/`Gateway` during order execution are caught per user and
///   reported through the notifier; other users keep processing.
/// - `Validation` is reported to the submitting user; the prior value stays.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or timeout failure on any external call.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Remote venue answered with a non-success status code.
    #[error("gateway error {code}: {message}")]
    Gateway { code: i64, message: String },

    /// Fewer historical samples than a required horizon needs.
    #[error("insufficient history for {symbol}: got {got} samples, need {need}")]
    DataUnavailable {
        symbol: String,
        got: usize,
        need: usize,
    },

    /// Malformed user-supplied configuration value.
    #[error("invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
