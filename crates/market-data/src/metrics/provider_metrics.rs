//! File-backed daily provider metrics.
//!
//! Every operation loads the ledger, reconciles it against the clock, applies
//! its change and persists the result. Reads therefore also expire disable
//! windows and negative-cache entries; there is no background sweep.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono_tz::Tz;
use log::{debug, info, warn};

use super::ledger::{NoDataEntry, ProviderCounter, ProviderLedger, UsageSnapshot};
use crate::clock::{self, Clock, SystemClock};
use crate::config::{normalize_provider, DailyCaps, ResilienceConfig};
use crate::errors::MarketDataError;
use crate::storage;

const DEFAULT_NO_DATA_TTL: Duration = Duration::from_secs(86_400);

/// Disable state for a provider, after normalization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisabledInfo {
    pub disabled: bool,
    pub until: Option<i64>,
    pub reason: Option<String>,
}

/// Daily quota, circuit and negative-result accounting for providers.
pub struct ProviderMetrics {
    path: PathBuf,
    caps: DailyCaps,
    timezone: Tz,
    no_data_ttl: Duration,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl ProviderMetrics {
    /// Metrics at `path` with default caps, UTC days and the wall clock.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(
            path,
            DailyCaps::default(),
            Tz::UTC,
            DEFAULT_NO_DATA_TTL,
            Arc::new(SystemClock),
        )
    }

    pub fn with_options(
        path: impl Into<PathBuf>,
        caps: DailyCaps,
        timezone: Tz,
        no_data_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            path: path.into(),
            caps,
            timezone,
            no_data_ttl,
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &ResilienceConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_options(
            config.metrics_path(),
            config.daily_caps.clone(),
            config.ledger_timezone,
            config.no_data_ttl,
            clock,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| {
            warn!("Provider metrics mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn today(&self) -> String {
        self.clock
            .now()
            .with_timezone(&self.timezone)
            .format("%Y-%m-%d")
            .to_string()
    }

    /// Load, reconcile, apply `op`, persist. The persist outcome is returned
    /// separately so read paths can answer even when the disk is read-only.
    fn apply<R, F>(&self, op: F) -> (R, Result<(), MarketDataError>)
    where
        F: FnOnce(&mut ProviderLedger, i64) -> R,
    {
        let _guard = self.guard();
        let now = self.clock.unix_now();
        let today = self.today();

        let mut ledger = storage::load_json::<ProviderLedger>(&self.path)
            .into_option()
            .unwrap_or_else(|| {
                debug!("Provider metrics: no usable ledger, starting {}", today);
                ProviderLedger::new(&today)
            });
        ledger.reconcile(&today, now, &self.caps);

        let result = op(&mut ledger, now);
        let persisted = storage::persist_json(&self.path, &ledger);
        (result, persisted)
    }

    fn with_ledger<R, F>(&self, op: F) -> Result<R, MarketDataError>
    where
        F: FnOnce(&mut ProviderLedger, i64) -> R,
    {
        let (result, persisted) = self.apply(op);
        persisted?;
        Ok(result)
    }

    fn read_ledger<R, F>(&self, op: F) -> R
    where
        F: FnOnce(&mut ProviderLedger, i64) -> R,
    {
        let (result, persisted) = self.apply(op);
        if let Err(e) = persisted {
            warn!(
                "Provider metrics: could not persist {}: {}",
                self.path.display(),
                e
            );
        }
        result
    }

    /// Count one call to `provider`.
    pub fn record(
        &self,
        provider: &str,
        success: bool,
    ) -> Result<ProviderCounter, MarketDataError> {
        let caps = &self.caps;
        self.with_ledger(|ledger, now| {
            let counter = ledger.counter_mut(provider, caps, now);
            counter.record(success);
            debug!(
                "Provider metrics: {} {} ({}/{})",
                normalize_provider(provider),
                if success { "success" } else { "failure" },
                counter.used,
                counter.allowed
            );
            counter.clone()
        })
    }

    /// The reconciled ledger with canonical providers present.
    pub fn get_all(&self) -> ProviderLedger {
        let caps = &self.caps;
        self.read_ledger(|ledger, now| {
            ledger.ensure_canonical(caps, now);
            ledger.clone()
        })
    }

    /// Current counter for `provider`, creating it if needed.
    pub fn counter(&self, provider: &str) -> ProviderCounter {
        let caps = &self.caps;
        self.read_ledger(|ledger, now| ledger.counter_mut(provider, caps, now).clone())
    }

    /// Calls left today for `provider`.
    pub fn remaining(&self, provider: &str) -> u32 {
        self.counter(provider).remaining_calls()
    }

    /// Refuse calls to `provider` for `duration`.
    pub fn disable(
        &self,
        provider: &str,
        duration: Duration,
        reason: &str,
    ) -> Result<(), MarketDataError> {
        let caps = &self.caps;
        self.with_ledger(|ledger, now| {
            let counter = ledger.counter_mut(provider, caps, now);
            let until = clock::expiry(now, duration);
            counter.disabled_until = Some(until);
            counter.disabled_reason = Some(reason.to_string());
            info!(
                "Provider metrics: disabling '{}' until {} ({})",
                normalize_provider(provider),
                until,
                reason
            );
        })
    }

    /// Close any disable window on `provider`.
    pub fn enable(&self, provider: &str) -> Result<(), MarketDataError> {
        let caps = &self.caps;
        self.with_ledger(|ledger, now| {
            let counter = ledger.counter_mut(provider, caps, now);
            if counter.disabled_until.take().is_some() {
                info!(
                    "Provider metrics: manually re-enabling '{}'",
                    normalize_provider(provider)
                );
            }
            counter.disabled_reason = None;
        })
    }

    pub fn is_disabled(&self, provider: &str) -> bool {
        self.disabled_info(provider).disabled
    }

    pub fn disabled_info(&self, provider: &str) -> DisabledInfo {
        let caps = &self.caps;
        self.read_ledger(|ledger, now| {
            let counter = ledger.counter_mut(provider, caps, now);
            DisabledInfo {
                disabled: counter.is_disabled(now),
                until: counter.disabled_until,
                reason: counter.disabled_reason.clone(),
            }
        })
    }

    /// Remember that `provider` has nothing for `symbol` on `exchange`.
    ///
    /// A missing or zero `ttl` uses the configured no-data TTL.
    pub fn mark_no_data(
        &self,
        provider: &str,
        symbol: &str,
        exchange: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<(), MarketDataError> {
        let ttl = ttl.filter(|t| !t.is_zero()).unwrap_or(self.no_data_ttl);
        self.with_ledger(|ledger, now| {
            let expires_at = clock::expiry(now, ttl);
            let entry = NoDataEntry::new(provider, symbol, exchange, expires_at);
            debug!(
                "Provider metrics: no data from {} for {} until {}",
                entry.provider, entry.symbol, entry.expires_at
            );
            ledger
                .no_data
                .insert(NoDataEntry::key(provider, symbol, exchange), entry);
        })
    }

    pub fn is_no_data(&self, provider: &str, symbol: &str, exchange: Option<&str>) -> bool {
        let key = NoDataEntry::key(provider, symbol, exchange);
        self.read_ledger(|ledger, now| {
            ledger
                .no_data
                .get(&key)
                .is_some_and(|entry| !entry.is_expired(now))
        })
    }

    /// Store an informational copy of `providers` alongside the ledger.
    pub fn store_snapshot(
        &self,
        providers: BTreeMap<String, ProviderCounter>,
    ) -> Result<(), MarketDataError> {
        self.with_ledger(|ledger, _now| {
            ledger.snapshot = Some(UsageSnapshot {
                date: ledger.date.clone(),
                providers,
            });
        })
    }
}
