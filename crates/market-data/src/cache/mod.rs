//! Disk caches for provider payloads.
//!
//! - [`QuoteCache`]: generic key -> JSON cache with a hard TTL
//! - [`RavaCedearsCache`]: single snapshot that is served even when stale
//! - [`CedearsSnapshotService`]: stale-while-revalidate over the snapshot

mod cedears_cache;
mod quote_cache;
mod snapshot;

pub use cedears_cache::{CedearsRecord, RavaCedearsCache};
pub use quote_cache::QuoteCache;
pub use snapshot::{
    CedearsSnapshotService, RefreshDecision, Snapshot, SnapshotFetcher, SnapshotSource,
};
