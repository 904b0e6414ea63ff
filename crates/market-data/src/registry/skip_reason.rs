//! Skip reason tracking for provider selection diagnostics.

use crate::errors::MarketDataError;

/// Why a provider was not called.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Inside a disable window.
    Disabled { until: i64, reason: Option<String> },

    /// Daily cap reached.
    QuotaExhausted { used: u32, allowed: u32 },

    /// The provider already said it has nothing for this symbol.
    NoDataCached { symbol: String },
}

impl SkipReason {
    pub fn into_error(self, provider: &str) -> MarketDataError {
        let provider = provider.to_string();
        match self {
            Self::Disabled { until, reason } => MarketDataError::ProviderDisabled {
                provider,
                until,
                reason,
            },
            Self::QuotaExhausted { used, allowed } => MarketDataError::QuotaExhausted {
                provider,
                used,
                allowed,
            },
            Self::NoDataCached { symbol } => MarketDataError::NoDataCached { provider, symbol },
        }
    }
}

/// Record of a single provider attempt during a fallback fetch.
#[derive(Clone, Debug)]
pub struct ProviderAttempt {
    pub provider: String,
    pub skipped: Option<SkipReason>,
    pub error: Option<String>,
    pub success: bool,
}

/// What happened to each provider during a fallback fetch.
#[derive(Clone, Debug, Default)]
pub struct FetchDiagnostics {
    pub attempts: Vec<ProviderAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn record_skip(&mut self, provider: &str, reason: SkipReason) {
        self.attempts.push(ProviderAttempt {
            provider: provider.to_string(),
            skipped: Some(reason),
            error: None,
            success: false,
        });
    }

    pub fn record_error(&mut self, provider: &str, error: String) {
        self.attempts.push(ProviderAttempt {
            provider: provider.to_string(),
            skipped: None,
            error: Some(error),
            success: false,
        });
    }

    pub fn record_success(&mut self, provider: &str) {
        self.attempts.push(ProviderAttempt {
            provider: provider.to_string(),
            skipped: None,
            error: None,
            success: true,
        });
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                if a.success {
                    format!("{}: SUCCESS", a.provider)
                } else if let Some(skip) = &a.skipped {
                    format!("{}: SKIPPED ({:?})", a.provider, skip)
                } else if let Some(err) = &a.error {
                    format!("{}: ERROR ({})", a.provider, err)
                } else {
                    format!("{}: UNKNOWN", a.provider)
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    pub fn skip_reasons(&self) -> Vec<(&str, &SkipReason)> {
        self.attempts
            .iter()
            .filter_map(|a| a.skipped.as_ref().map(|s| (a.provider.as_str(), s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_summary() {
        let mut diag = FetchDiagnostics::new();
        diag.record_skip(
            "eodhd",
            SkipReason::QuotaExhausted {
                used: 20,
                allowed: 20,
            },
        );
        diag.record_error("alphavantage", "Timeout: alphavantage".to_string());
        diag.record_success("twelvedata");

        let summary = diag.summary();
        assert!(summary.contains("eodhd: SKIPPED"));
        assert!(summary.contains("alphavantage: ERROR"));
        assert!(summary.ends_with("twelvedata: SUCCESS"));
        assert!(diag.has_success());
        assert_eq!(diag.skip_reasons().len(), 1);
    }

    #[test]
    fn test_skip_reason_into_error() {
        let err = SkipReason::NoDataCached {
            symbol: "GGAL".to_string(),
        }
        .into_error("eodhd");
        assert_eq!(err.to_string(), "No data cached: eodhd - GGAL");
    }
}
