//! Shared reqwest plumbing for the upstream clients.

use std::time::Duration;

use reqwest::Client;

use crate::errors::MarketDataError;

/// Client with a whole-request timeout.
///
/// Falls back to a default client if the builder rejects the settings.
pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Map a reqwest failure, keeping timeouts distinct for penalty accounting.
pub(crate) fn transport_error(provider: &str, error: reqwest::Error) -> MarketDataError {
    if error.is_timeout() {
        MarketDataError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        MarketDataError::Network(error)
    }
}
