//! Stale-while-revalidate driver for the CEDEAR snapshot.
//!
//! A failed re-scrape never takes the board offline: the last good payload
//! keeps being served while further scrapes are suppressed until the backoff
//! window closes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;

use super::cedears_cache::{CedearsRecord, RavaCedearsCache};
use crate::clock::{self, Clock};
use crate::config::ResilienceConfig;
use crate::errors::MarketDataError;

/// Opaque producer of a fresh snapshot (the HTML scrape).
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<Value, MarketDataError>;
}

/// What the cache state says to do next.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshDecision {
    /// Nothing cached yet.
    Empty,
    /// Within the TTL.
    Fresh,
    /// Past the TTL but a previous refresh failed recently.
    BackingOff,
    /// Past the TTL and free to refresh.
    Stale,
}

impl RefreshDecision {
    pub fn evaluate(record: Option<&CedearsRecord>, now: i64) -> Self {
        match record {
            None => Self::Empty,
            Some(r) if r.is_fresh(now) => Self::Fresh,
            Some(r) if r.in_backoff(now) => Self::BackingOff,
            Some(_) => Self::Stale,
        }
    }
}

/// Where a served snapshot came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotSource {
    /// Fresh cached payload.
    Cache,
    /// Just scraped.
    Network,
    /// Past its TTL, served because a refresh was suppressed or failed.
    Stale,
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    pub record: CedearsRecord,
    pub source: SnapshotSource,
}

pub struct CedearsSnapshotService {
    cache: Arc<RavaCedearsCache>,
    fetcher: Arc<dyn SnapshotFetcher>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    backoff: Duration,
}

impl CedearsSnapshotService {
    pub fn new(
        cache: Arc<RavaCedearsCache>,
        fetcher: Arc<dyn SnapshotFetcher>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            cache,
            fetcher,
            clock,
            ttl,
            backoff,
        }
    }

    pub fn from_config(
        cache: Arc<RavaCedearsCache>,
        fetcher: Arc<dyn SnapshotFetcher>,
        clock: Arc<dyn Clock>,
        config: &ResilienceConfig,
    ) -> Self {
        Self::new(cache, fetcher, clock, config.cedears_ttl, config.cedears_backoff)
    }

    /// Serve the snapshot, refreshing it when stale and not backing off.
    ///
    /// Errors only when the scrape fails and nothing was ever cached.
    pub async fn get(&self) -> Result<Snapshot, MarketDataError> {
        let now = self.clock.unix_now();
        let cached = self.cache.read();

        let cached = match (RefreshDecision::evaluate(cached.as_ref(), now), cached) {
            (RefreshDecision::Fresh, Some(record)) => {
                return Ok(Snapshot {
                    record,
                    source: SnapshotSource::Cache,
                })
            }
            (RefreshDecision::BackingOff, Some(record)) => {
                debug!("CEDEAR snapshot: stale but backing off, serving cached board");
                return Ok(Snapshot {
                    record,
                    source: SnapshotSource::Stale,
                });
            }
            (_, cached) => cached,
        };

        match self.fetcher.fetch_snapshot().await {
            Ok(data) => {
                let fetched_at = self.clock.unix_now();
                let ttl = clock::secs(self.ttl);
                match self.cache.write(data.clone(), fetched_at, ttl, None) {
                    Ok(()) => info!("CEDEAR snapshot refreshed"),
                    Err(e) => warn!("CEDEAR snapshot: refreshed but could not persist: {}", e),
                }
                Ok(Snapshot {
                    record: CedearsRecord {
                        data,
                        fetched_at,
                        ttl,
                        backoff_until: None,
                    },
                    source: SnapshotSource::Network,
                })
            }
            Err(e) => {
                let Some(mut record) = cached else {
                    warn!("CEDEAR snapshot: scrape failed with no cached board: {}", e);
                    return Err(e);
                };
                let until = clock::expiry(self.clock.unix_now(), self.backoff);
                warn!(
                    "CEDEAR snapshot: scrape failed ({}), serving stale board until {}",
                    e, until
                );
                if let Err(write_err) = self.cache.touch_backoff(until) {
                    warn!("CEDEAR snapshot: could not persist backoff: {}", write_err);
                }
                record.backoff_until = Some(until);
                Ok(Snapshot {
                    record,
                    source: SnapshotSource::Stale,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct ScriptedFetcher {
        responses: Mutex<Vec<Result<Value, MarketDataError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(mut responses: Vec<Result<Value, MarketDataError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotFetcher for ScriptedFetcher {
        async fn fetch_snapshot(&self) -> Result<Value, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(MarketDataError::ProviderError {
                    provider: "rava".to_string(),
                    message: "script exhausted".to_string(),
                }))
        }
    }

    fn scrape_failure() -> MarketDataError {
        MarketDataError::ProviderError {
            provider: "rava".to_string(),
            message: "HTTP error: 503 Service Unavailable".to_string(),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        cache: Arc<RavaCedearsCache>,
        fetcher: Arc<ScriptedFetcher>,
        service: CedearsSnapshotService,
    }

    fn harness(responses: Vec<Result<Value, MarketDataError>>) -> Harness {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap(),
        ));
        let cache = Arc::new(RavaCedearsCache::new(dir.path().join("cedears.json")));
        let fetcher = Arc::new(ScriptedFetcher::new(responses));
        let service = CedearsSnapshotService::new(
            cache.clone(),
            fetcher.clone(),
            clock.clone(),
            Duration::from_secs(900),
            Duration::from_secs(600),
        );
        Harness {
            _dir: dir,
            clock,
            cache,
            fetcher,
            service,
        }
    }

    #[tokio::test]
    async fn test_first_call_scrapes_then_serves_cache() {
        let board = json!([{"especie": "AAPL"}]);
        let h = harness(vec![Ok(board.clone())]);

        let first = h.service.get().await.unwrap();
        assert_eq!(first.source, SnapshotSource::Network);
        assert_eq!(first.record.data, board);

        h.clock.advance(chrono::Duration::seconds(300));
        let second = h.service.get().await.unwrap();
        assert_eq!(second.source, SnapshotSource::Cache);
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_and_backs_off() {
        let board = json!([{"especie": "MELI"}]);
        let h = harness(vec![Ok(board.clone()), Err(scrape_failure())]);
        h.service.get().await.unwrap();

        h.clock.advance(chrono::Duration::seconds(1_000));
        let stale = h.service.get().await.unwrap();
        assert_eq!(stale.source, SnapshotSource::Stale);
        assert_eq!(stale.record.data, board);
        let until = h.clock.unix_now() + 600;
        assert_eq!(stale.record.backoff_until, Some(until));
        assert_eq!(h.cache.read().unwrap().backoff_until, Some(until));

        // Inside the backoff window no scrape is attempted.
        h.clock.advance(chrono::Duration::seconds(599));
        let again = h.service.get().await.unwrap();
        assert_eq!(again.source, SnapshotSource::Stale);
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_after_backoff_clears_it() {
        let h = harness(vec![
            Ok(json!(["v1"])),
            Err(scrape_failure()),
            Ok(json!(["v2"])),
        ]);
        h.service.get().await.unwrap();
        h.clock.advance(chrono::Duration::seconds(1_000));
        h.service.get().await.unwrap();

        h.clock.advance(chrono::Duration::seconds(600));
        let refreshed = h.service.get().await.unwrap();
        assert_eq!(refreshed.source, SnapshotSource::Network);
        assert_eq!(refreshed.record.data, json!(["v2"]));
        assert_eq!(h.cache.read().unwrap().backoff_until, None);
        assert_eq!(h.fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_failure_with_empty_cache_propagates() {
        let h = harness(vec![Err(scrape_failure())]);
        let err = h.service.get().await.unwrap_err();
        assert!(matches!(err, MarketDataError::ProviderError { .. }));
        assert!(h.cache.read().is_none());
    }

    #[test]
    fn test_refresh_decision() {
        let record = CedearsRecord {
            data: json!([]),
            fetched_at: 1_000,
            ttl: 100,
            backoff_until: Some(1_200),
        };
        assert_eq!(RefreshDecision::evaluate(None, 0), RefreshDecision::Empty);
        assert_eq!(RefreshDecision::evaluate(Some(&record), 1_099), RefreshDecision::Fresh);
        assert_eq!(RefreshDecision::evaluate(Some(&record), 1_100), RefreshDecision::BackingOff);
        assert_eq!(RefreshDecision::evaluate(Some(&record), 1_200), RefreshDecision::Stale);
    }
}
