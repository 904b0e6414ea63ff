//! Caller-side gate in front of provider calls.
//!
//! The guard asks [`ProviderMetrics`] whether a call may be made, runs it,
//! records the outcome and applies the follow-up the error class calls for:
//! - rate limit signaled by the upstream: disable the provider for the cooldown
//! - symbol unknown to the provider: remember it in the no-data cache
//!
//! Tripping stays explicit: failures are counted but never open a window by
//! themselves.
//!
//! Admission and booking are separate ledger transactions. Calls that overlap
//! on one provider can all be admitted against the same last unit of quota,
//! so `used` may end up above `allowed`. Updates are never lost, and once the
//! overshoot is booked every later call is refused.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::skip_reason::{FetchDiagnostics, SkipReason};
use crate::config::ResilienceConfig;
use crate::errors::{MarketDataError, RetryClass};
use crate::metrics::ProviderMetrics;

pub struct ProviderGuard {
    metrics: Arc<ProviderMetrics>,
    rate_limit_cooldown: Duration,
}

impl ProviderGuard {
    pub fn new(metrics: Arc<ProviderMetrics>, rate_limit_cooldown: Duration) -> Self {
        Self {
            metrics,
            rate_limit_cooldown,
        }
    }

    pub fn from_config(metrics: Arc<ProviderMetrics>, config: &ResilienceConfig) -> Self {
        Self::new(metrics, config.rate_limit_cooldown)
    }

    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        &self.metrics
    }

    /// Whether `provider` may be called now for `symbol`.
    ///
    /// `symbol` is `None` for calls that are not about one symbol (lists).
    pub fn admit(
        &self,
        provider: &str,
        symbol: Option<&str>,
        exchange: Option<&str>,
    ) -> Result<(), SkipReason> {
        let info = self.metrics.disabled_info(provider);
        if info.disabled {
            return Err(SkipReason::Disabled {
                until: info.until.unwrap_or_default(),
                reason: info.reason,
            });
        }

        let counter = self.metrics.counter(provider);
        if counter.remaining_calls() == 0 {
            return Err(SkipReason::QuotaExhausted {
                used: counter.used,
                allowed: counter.allowed,
            });
        }

        if let Some(symbol) = symbol {
            if self.metrics.is_no_data(provider, symbol, exchange) {
                return Err(SkipReason::NoDataCached {
                    symbol: symbol.to_uppercase(),
                });
            }
        }

        Ok(())
    }

    /// Run `fetch` against `provider` if admitted, then book the outcome.
    ///
    /// The quota is checked before `fetch` starts and charged after it ends,
    /// so overlapping calls may overshoot the daily cap.
    pub async fn call<T, F, Fut>(
        &self,
        provider: &str,
        symbol: Option<&str>,
        exchange: Option<&str>,
        fetch: F,
    ) -> Result<T, MarketDataError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        if let Err(skip) = self.admit(provider, symbol, exchange) {
            debug!("Provider guard: skipping '{}': {:?}", provider, skip);
            return Err(skip.into_error(provider));
        }

        let outcome = fetch().await;
        self.settle(provider, symbol, exchange, outcome.as_ref().err());
        outcome
    }

    /// Try `providers` in order until one succeeds.
    ///
    /// Returns the first success, or the last error seen, plus a record of
    /// every provider that was skipped or failed.
    pub async fn first_available<T, F, Fut>(
        &self,
        providers: &[&str],
        symbol: Option<&str>,
        exchange: Option<&str>,
        mut fetch: F,
    ) -> (Result<T, MarketDataError>, FetchDiagnostics)
    where
        F: FnMut(&str) -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let mut diagnostics = FetchDiagnostics::new();
        let mut last_error = None;

        for &provider in providers {
            if let Err(skip) = self.admit(provider, symbol, exchange) {
                diagnostics.record_skip(provider, skip.clone());
                last_error = Some(skip.into_error(provider));
                continue;
            }

            let outcome = fetch(provider).await;
            self.settle(provider, symbol, exchange, outcome.as_ref().err());
            match outcome {
                Ok(value) => {
                    diagnostics.record_success(provider);
                    return (Ok(value), diagnostics);
                }
                Err(e) => {
                    diagnostics.record_error(provider, e.to_string());
                    last_error = Some(e);
                }
            }
        }

        info!("Provider guard: no provider succeeded: {}", diagnostics.summary());
        (
            Err(last_error.unwrap_or(MarketDataError::NoProvidersAvailable)),
            diagnostics,
        )
    }

    fn settle(
        &self,
        provider: &str,
        symbol: Option<&str>,
        exchange: Option<&str>,
        error: Option<&MarketDataError>,
    ) {
        // A missing key means no request left the process.
        if matches!(error, Some(MarketDataError::Configuration(_))) {
            return;
        }

        if let Err(e) = self.metrics.record(provider, error.is_none()) {
            warn!("Provider guard: could not record call to '{}': {}", provider, e);
        }

        let Some(error) = error else {
            return;
        };

        match (error.retry_class(), error) {
            (RetryClass::FailoverWithPenalty, MarketDataError::RateLimited { message, .. }) => {
                let reason = message.as_deref().unwrap_or("rate limited");
                if let Err(e) = self
                    .metrics
                    .disable(provider, self.rate_limit_cooldown, reason)
                {
                    warn!("Provider guard: could not disable '{}': {}", provider, e);
                }
            }
            (RetryClass::Never, MarketDataError::SymbolNotFound { .. }) => {
                if let Some(symbol) = symbol {
                    if let Err(e) = self.metrics.mark_no_data(provider, symbol, exchange, None) {
                        warn!(
                            "Provider guard: could not mark no-data for '{}' on '{}': {}",
                            symbol, provider, e
                        );
                    }
                }
            }
            _ => {}
        }
    }
}
