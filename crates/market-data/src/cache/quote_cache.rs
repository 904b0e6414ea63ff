//! Generic TTL cache for JSON payloads.
//!
//! One file per key under the cache directory, named by the SHA-256 of the
//! caller's key. Expiry is hard: an expired entry is a miss and its file is
//! removed on the read that discovers it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::clock::{self, Clock, SystemClock};
use crate::errors::MarketDataError;
use crate::storage::{self, Loaded};

const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    #[serde(rename = "_expires_at")]
    expires_at: i64,
    data: Value,
}

/// Disk-backed key -> JSON cache with a hard TTL.
pub struct QuoteCache {
    dir: PathBuf,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl QuoteCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(dir, DEFAULT_TTL, Arc::new(SystemClock))
    }

    pub fn with_clock(
        dir: impl Into<PathBuf>,
        default_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let default_ttl = if default_ttl.is_zero() {
            DEFAULT_TTL
        } else {
            default_ttl
        };
        Self {
            dir: dir.into(),
            default_ttl,
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| {
            warn!("Quote cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Cached payload for `key`, or `None` on miss, corruption or expiry.
    pub fn get(&self, key: &str) -> Option<Value> {
        let _guard = self.guard();
        let path = self.path_for(key);

        match storage::load_json::<CacheEntry>(&path) {
            Loaded::Present(entry) => {
                if self.clock.unix_now() > entry.expires_at {
                    debug!("Quote cache: '{}' expired, evicting", key);
                    storage::remove_file(&path);
                    None
                } else {
                    Some(entry.data)
                }
            }
            Loaded::Missing => None,
            Loaded::Corrupt => {
                storage::remove_file(&path);
                None
            }
        }
    }

    /// Store `data` under `key`. A missing or zero `ttl` uses the default.
    pub fn set(
        &self,
        key: &str,
        data: Value,
        ttl: Option<Duration>,
    ) -> Result<(), MarketDataError> {
        let ttl = ttl.filter(|t| !t.is_zero()).unwrap_or(self.default_ttl);
        let entry = CacheEntry {
            expires_at: clock::expiry(self.clock.unix_now(), ttl),
            data,
        };

        let _guard = self.guard();
        storage::persist_json(&self.path_for(key), &entry)
    }

    /// Typed read; a payload that no longer matches `T` counts as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("Quote cache: '{}' has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    pub fn set_as<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
    ) -> Result<(), MarketDataError> {
        self.set(key, serde_json::to_value(data)?, ttl)
    }

    pub fn remove(&self, key: &str) {
        let _guard = self.guard();
        storage::remove_file(&self.path_for(key));
    }
}
