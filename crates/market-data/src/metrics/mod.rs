//! Provider usage accounting.
//!
//! - Daily call quotas per provider, reset at the ledger's day boundary
//! - Disable windows (manual circuit breaker) that expire on read
//! - Negative-result cache for symbols a provider has no data for

mod ledger;
mod provider_metrics;

pub use ledger::{NoDataEntry, ProviderCounter, ProviderLedger, UsageSnapshot};
pub use provider_metrics::{DisabledInfo, ProviderMetrics};
