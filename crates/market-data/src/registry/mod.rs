//! Provider admission and fallback.
//!
//! This module puts [`ProviderMetrics`](crate::metrics::ProviderMetrics) in
//! front of provider calls:
//! - Admission checks (disable window, daily quota, cached no-data)
//! - Outcome booking and error-class follow-up
//! - Ordered fallback across several providers with diagnostics

mod guard;
mod skip_reason;

pub use guard::ProviderGuard;
pub use skip_reason::{FetchDiagnostics, ProviderAttempt, SkipReason};
