//! The persisted per-day provider ledger.

use std::collections::BTreeMap;

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::{normalize_provider, DailyCaps, CANONICAL_PROVIDERS};

/// Usage and circuit state for one provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCounter {
    /// Daily cap.
    pub allowed: u32,
    pub used: u32,
    pub success: u32,
    pub failed: u32,
    /// `max(0, allowed - used)`, refreshed on every reconcile.
    pub remaining: u32,
    /// Unix seconds of the last counter reset.
    pub last_reset: i64,
    pub disabled_until: Option<i64>,
    pub disabled_reason: Option<String>,
}

impl ProviderCounter {
    pub fn new(allowed: u32, now: i64) -> Self {
        Self {
            allowed,
            remaining: allowed,
            last_reset: now,
            ..Self::default()
        }
    }

    pub fn remaining_calls(&self) -> u32 {
        self.allowed.saturating_sub(self.used)
    }

    pub fn is_disabled(&self, now: i64) -> bool {
        self.disabled_until.is_some_and(|until| now < until)
    }

    pub(crate) fn record(&mut self, success: bool) {
        if success {
            self.success = self.success.saturating_add(1);
        } else {
            self.failed = self.failed.saturating_add(1);
        }
        self.used = self.success.saturating_add(self.failed);
        self.remaining = self.remaining_calls();
    }

    /// Clear a disable window that has already closed.
    fn normalize_disable(&mut self, now: i64) {
        if self.disabled_until.is_some_and(|until| until <= now) {
            self.disabled_until = None;
            self.disabled_reason = None;
        }
    }

    fn reset_usage(&mut self, now: i64) {
        self.used = 0;
        self.success = 0;
        self.failed = 0;
        self.last_reset = now;
    }
}

/// Negative-cache record: the provider had nothing for this symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoDataEntry {
    pub provider: String,
    pub symbol: String,
    pub exchange: Option<String>,
    /// Unix seconds.
    pub expires_at: i64,
}

impl NoDataEntry {
    pub fn new(provider: &str, symbol: &str, exchange: Option<&str>, expires_at: i64) -> Self {
        Self {
            provider: normalize_provider(provider),
            symbol: normalize_symbol(symbol),
            exchange: normalize_exchange(exchange),
            expires_at,
        }
    }

    /// `provider|SYMBOL|EXCHANGE`, with an empty last segment when the
    /// exchange is unknown.
    pub fn key(provider: &str, symbol: &str, exchange: Option<&str>) -> String {
        format!(
            "{}|{}|{}",
            normalize_provider(provider),
            normalize_symbol(symbol),
            normalize_exchange(exchange).unwrap_or_default()
        )
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

fn normalize_exchange(exchange: Option<&str>) -> Option<String> {
    exchange
        .map(|e| e.trim().to_uppercase())
        .filter(|e| !e.is_empty())
}

/// Informational copy of the provider counters, written on request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSnapshot {
    pub date: String,
    pub providers: BTreeMap<String, ProviderCounter>,
}

/// One calendar day of provider accounting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderLedger {
    /// `YYYY-MM-DD` in the ledger time zone.
    pub date: String,
    pub providers: BTreeMap<String, ProviderCounter>,
    pub no_data: BTreeMap<String, NoDataEntry>,
    pub snapshot: Option<UsageSnapshot>,
}

impl ProviderLedger {
    pub fn new(date: &str) -> Self {
        Self {
            date: date.to_string(),
            ..Self::default()
        }
    }

    pub fn provider(&self, provider: &str) -> Option<&ProviderCounter> {
        self.providers.get(&normalize_provider(provider))
    }

    /// Counter for `provider`, created with its configured cap if absent.
    pub(crate) fn counter_mut(
        &mut self,
        provider: &str,
        caps: &DailyCaps,
        now: i64,
    ) -> &mut ProviderCounter {
        let name = normalize_provider(provider);
        let allowed = caps.allowed_for(&name);
        self.providers
            .entry(name)
            .or_insert_with(|| ProviderCounter::new(allowed, now))
    }

    pub(crate) fn ensure_canonical(&mut self, caps: &DailyCaps, now: i64) {
        for provider in CANONICAL_PROVIDERS {
            self.counter_mut(provider, caps, now);
        }
    }

    /// Bring the ledger up to date for `today`/`now`.
    ///
    /// Rolls the counters over when the stored date is not `today`, pins each
    /// cap to configuration, repairs `used`, closes elapsed disable windows,
    /// recomputes `remaining` and drops expired no-data entries. Idempotent.
    pub(crate) fn reconcile(&mut self, today: &str, now: i64, caps: &DailyCaps) {
        if self.date != today {
            if !self.date.is_empty() {
                info!(
                    "Provider ledger: day rollover {} -> {}, resetting counters",
                    self.date, today
                );
            }
            self.date = today.to_string();
            for counter in self.providers.values_mut() {
                counter.reset_usage(now);
            }
        }

        for (name, counter) in self.providers.iter_mut() {
            counter.allowed = caps.allowed_for(name);
            counter.used = counter.success.saturating_add(counter.failed);
            counter.normalize_disable(now);
            counter.remaining = counter.remaining_calls();
        }

        self.no_data.retain(|_, entry| !entry.is_expired(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_772_452_800;

    #[test]
    fn test_no_data_key_normalization() {
        assert_eq!(
            NoDataEntry::key("EODHD", " aapl ", Some("us")),
            "eodhd|AAPL|US"
        );
        assert_eq!(NoDataEntry::key("eodhd", "AAPL", None), "eodhd|AAPL|");
        assert_eq!(NoDataEntry::key("eodhd", "AAPL", Some("  ")), "eodhd|AAPL|");
    }

    #[test]
    fn test_record_keeps_used_in_sync() {
        let mut counter = ProviderCounter::new(20, NOW);
        counter.record(true);
        counter.record(false);
        counter.record(true);
        assert_eq!(counter.used, 3);
        assert_eq!(counter.used, counter.success + counter.failed);
        assert_eq!(counter.remaining, 17);
    }

    #[test]
    fn test_remaining_never_negative() {
        let mut counter = ProviderCounter::new(1, NOW);
        counter.record(true);
        counter.record(true);
        assert_eq!(counter.remaining_calls(), 0);
    }

    #[test]
    fn test_reconcile_rollover_keeps_active_windows() {
        let caps = DailyCaps::default();
        let mut ledger = ProviderLedger::new("2026-03-01");
        {
            let counter = ledger.counter_mut("eodhd", &caps, NOW - 86_400);
            counter.record(true);
            counter.record(false);
            counter.disabled_until = Some(NOW + 60);
            counter.disabled_reason = Some("429".to_string());
        }
        ledger.no_data.insert(
            NoDataEntry::key("eodhd", "GGAL", Some("BA")),
            NoDataEntry::new("eodhd", "GGAL", Some("BA"), NOW + 3_600),
        );

        ledger.reconcile("2026-03-02", NOW, &caps);
        let counter = ledger.provider("eodhd").unwrap();
        assert_eq!(ledger.date, "2026-03-02");
        assert_eq!((counter.used, counter.success, counter.failed), (0, 0, 0));
        assert_eq!(counter.remaining, 20);
        assert_eq!(counter.last_reset, NOW);
        assert_eq!(counter.disabled_until, Some(NOW + 60));
        assert_eq!(ledger.no_data.len(), 1);

        let before = ledger.clone();
        ledger.reconcile("2026-03-02", NOW, &caps);
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_reconcile_repairs_and_prunes() {
        let caps = DailyCaps::default();
        let mut ledger = ProviderLedger::new("2026-03-02");
        ledger.providers.insert(
            "twelvedata".to_string(),
            ProviderCounter {
                allowed: 5,
                used: 99,
                success: 3,
                failed: 1,
                disabled_until: Some(NOW),
                disabled_reason: Some("frequency".to_string()),
                ..ProviderCounter::default()
            },
        );
        ledger.no_data.insert(
            "twelvedata|XYZ|".to_string(),
            NoDataEntry::new("twelvedata", "XYZ", None, NOW),
        );

        ledger.reconcile("2026-03-02", NOW, &caps);
        let counter = ledger.provider("twelvedata").unwrap();
        assert_eq!(counter.allowed, 800);
        assert_eq!(counter.used, 4);
        assert_eq!(counter.remaining, 796);
        assert_eq!(counter.disabled_until, None);
        assert_eq!(counter.disabled_reason, None);
        assert!(ledger.no_data.is_empty());
    }

    #[test]
    fn test_partial_document_deserializes() {
        let ledger: ProviderLedger =
            serde_json::from_str(r#"{"date":"2026-03-02","providers":{"eodhd":{"used":2}}}"#)
                .unwrap();
        assert_eq!(ledger.provider("eodhd").unwrap().used, 2);
        assert!(ledger.no_data.is_empty());
        assert!(ledger.snapshot.is_none());
    }
}
