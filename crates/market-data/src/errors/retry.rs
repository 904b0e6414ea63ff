/// Classification for follow-up policy after a provider call fails.
///
/// Used by [`ProviderGuard`](crate::registry::ProviderGuard) to decide what to
/// write back into the provider ledger.
///
/// # Behavior Summary
///
/// | Class | Counts as failed call? | Ledger follow-up |
/// |-------|------------------------|------------------|
/// | `Never` | Yes, except `Configuration` | Mark no-data when the symbol is unknown |
/// | `FailoverWithPenalty` | Yes | Disable provider on explicit rate limit |
/// | `NextProvider` | Yes | None |
/// | `CircuitOpen` | No (call never made) | None |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - unknown symbol, bad configuration, or terminal failure.
    /// The request is fundamentally invalid and retrying won't help.
    Never,

    /// Failover to another provider and penalize this one.
    ///
    /// Used for rate limiting (429, "frequency" notes) and timeouts. A rate
    /// limit trips the provider's disable window for the configured cooldown.
    FailoverWithPenalty,

    /// Try another provider without any penalty beyond the failed count.
    ///
    /// Used for transient upstream errors: 5xx, malformed JSON, network.
    NextProvider,

    /// The call was refused locally (disabled, quota spent, cached no-data).
    /// Skip this provider; nothing was consumed.
    CircuitOpen,
}
