//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`RetryClass`]: Classification for deciding the ledger follow-up

mod retry;

pub use retry::RetryClass;

use thiserror::Error;

/// Errors that can occur during market data operations.
///
/// Each variant is classified into a [`RetryClass`] via the [`retry_class`](Self::retry_class)
/// method, which determines how the provider guard should react to the error.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// Required configuration (usually an API key) is missing.
    /// Fails fast and is never retried automatically.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider reported that it has no data for the symbol.
    #[error("Symbol not found: {provider} - {symbol}")]
    SymbolNotFound {
        /// The provider that reported the symbol as absent
        provider: String,
        /// The requested symbol
        symbol: String,
    },

    /// The provider rate limited the request (HTTP 429 or a quota note in the body).
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
        /// Upstream message explaining the limit, when one was sent
        message: Option<String>,
    },

    /// The request to the provider timed out.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// A provider-specific error occurred (HTTP 5xx, malformed body, ...).
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// The provider is inside a disable window.
    #[error("Provider disabled: {provider} until {until}")]
    ProviderDisabled {
        /// The disabled provider
        provider: String,
        /// Unix seconds at which the window closes
        until: i64,
        /// Reason recorded when the provider was disabled
        reason: Option<String>,
    },

    /// The provider's daily quota has been consumed.
    #[error("Daily quota exhausted: {provider} ({used}/{allowed})")]
    QuotaExhausted {
        /// The provider whose quota is spent
        provider: String,
        /// Calls made today
        used: u32,
        /// Daily cap
        allowed: u32,
    },

    /// A negative-cache entry says the provider has no data for the symbol.
    #[error("No data cached: {provider} - {symbol}")]
    NoDataCached {
        /// The provider that previously reported no data
        provider: String,
        /// The requested symbol
        symbol: String,
    },

    /// Every candidate provider was skipped or failed.
    #[error("No providers available")]
    NoProvidersAvailable,

    /// No session token could be scraped from the profile page.
    #[error("Session token unavailable: {0}")]
    TokenUnavailable(String),

    /// The upstream rejected the session token and the retry could not recover.
    #[error("Session token rejected: {0}")]
    TokenRejected(String),

    /// A network error occurred while communicating with a provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A persisted document could not be written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A document could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::Never`]: Don't retry, the error is terminal
    /// - [`RetryClass::FailoverWithPenalty`]: Penalize the provider, try another
    /// - [`RetryClass::NextProvider`]: Try another provider
    /// - [`RetryClass::CircuitOpen`]: The call was refused locally, skip it
    ///
    /// # Examples
    ///
    /// ```
    /// use cedearwatch_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::RateLimited { provider: "eodhd".to_string(), message: None };
    /// assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    ///
    /// let error = MarketDataError::Configuration("missing EODHD key".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Configuration(_)
            | Self::SymbolNotFound { .. }
            | Self::TokenUnavailable(_)
            | Self::TokenRejected(_)
            | Self::NoProvidersAvailable
            | Self::Io(_)
            | Self::Serialization(_) => RetryClass::Never,

            Self::RateLimited { .. } | Self::Timeout { .. } => RetryClass::FailoverWithPenalty,

            Self::ProviderError { .. } | Self::Network(_) => RetryClass::NextProvider,

            Self::ProviderDisabled { .. }
            | Self::QuotaExhausted { .. }
            | Self::NoDataCached { .. } => RetryClass::CircuitOpen,
        }
    }

    /// True when the error text mentions the session token.
    ///
    /// RAVA reports an expired session as a plain error string, so the check
    /// is a case-insensitive substring match.
    pub fn mentions_token(&self) -> bool {
        self.to_string().to_lowercase().contains("token")
    }
}
