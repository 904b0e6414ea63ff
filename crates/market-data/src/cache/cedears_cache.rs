//! Single-file snapshot cache for the scraped RAVA CEDEAR board.
//!
//! Unlike [`QuoteCache`](super::QuoteCache) this cache never evicts: `read`
//! hands back the last written payload however old it is, together with the
//! metadata the caller needs to judge it.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::MarketDataError;
use crate::storage;

/// The persisted snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CedearsRecord {
    pub data: Value,
    /// Unix seconds of the successful scrape that produced `data`.
    pub fetched_at: i64,
    /// Freshness window in seconds.
    pub ttl: i64,
    /// Unix seconds before which no re-scrape should be attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_until: Option<i64>,
}

impl CedearsRecord {
    pub fn expires_at(&self) -> i64 {
        self.fetched_at.saturating_add(self.ttl)
    }

    pub fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at()
    }

    pub fn in_backoff(&self, now: i64) -> bool {
        self.backoff_until.is_some_and(|until| now < until)
    }
}

pub struct RavaCedearsCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RavaCedearsCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| {
            warn!("CEDEAR cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// The stored record verbatim, stale or not.
    pub fn read(&self) -> Option<CedearsRecord> {
        let _guard = self.guard();
        storage::load_json(&self.path).into_option()
    }

    pub fn write(
        &self,
        data: Value,
        fetched_at: i64,
        ttl: i64,
        backoff_until: Option<i64>,
    ) -> Result<(), MarketDataError> {
        let record = CedearsRecord {
            data,
            fetched_at,
            ttl,
            backoff_until,
        };
        let _guard = self.guard();
        storage::persist_json(&self.path, &record)
    }

    /// Set a new `backoff_until` on the existing record.
    ///
    /// Does nothing when no snapshot has been written yet.
    pub fn touch_backoff(&self, backoff_until: i64) -> Result<(), MarketDataError> {
        let _guard = self.guard();
        let Some(mut record) = storage::load_json::<CedearsRecord>(&self.path).into_option() else {
            debug!("CEDEAR cache: no snapshot yet, backoff not recorded");
            return Ok(());
        };
        record.backoff_until = Some(backoff_until);
        storage::persist_json(&self.path, &record)
    }
}
