//! CedearWatch Market Data Crate
//!
//! Resilience layer for free-tier market data providers: daily quotas,
//! manual circuit breaking, negative caching and stale-serving disk caches.
//!
//! # Overview
//!
//! The crate supports:
//! - Per-provider daily call accounting with a day rollover in a chosen time zone
//! - Disable windows and a "no data" cache that expire lazily on read
//! - A hard-TTL JSON cache and a stale-while-revalidate CEDEAR snapshot
//! - A two-provider symbol catalog that degrades instead of failing
//! - RAVA historical prices with one session-token retry
//!
//! # Architecture
//!
//! ```text
//!   caller
//!     |
//!     v
//! +------------------+     +------------------+
//! |  ProviderGuard   | --> | ProviderMetrics  |  (provider_metrics.json)
//! +------------------+     +------------------+
//!     |
//!     v
//! +------------------+     +------------------+
//! |  SymbolSource /  | --> |   QuoteCache     |  (quote_cache/<sha256>.json)
//! |  RavaTransport   |     +------------------+
//! +------------------+     +------------------+
//!                          | RavaCedearsCache |  (cedears.json)
//!                          +------------------+
//! ```
//!
//! Every persisted document lives under [`ResilienceConfig::data_dir`] and is
//! read fail-open: a missing or corrupt file behaves like an empty one.
//!
//! # Core Types
//!
//! - [`ProviderMetrics`] - Daily ledger of usage, disable windows and no-data entries
//! - [`ProviderGuard`] - Admission, outcome booking and ordered fallback
//! - [`QuoteCache`] - Key -> JSON cache with a hard TTL
//! - [`RavaCedearsCache`] / [`CedearsSnapshotService`] - Stale-serving snapshot
//! - [`QuoteSymbolsAggregator`] - EODHD + TwelveData symbol catalog
//! - [`RavaHistoricosClient`] - Token-scraping historical price client

pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
mod http;
pub mod metrics;
pub mod rava;
pub mod registry;
mod storage;
pub mod symbols;

pub use cache::{
    CedearsRecord, CedearsSnapshotService, QuoteCache, RavaCedearsCache, RefreshDecision,
    Snapshot, SnapshotFetcher, SnapshotSource,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DailyCaps, RavaEndpoints, ResilienceConfig};
pub use errors::{MarketDataError, RetryClass};
pub use metrics::{
    DisabledInfo, NoDataEntry, ProviderCounter, ProviderLedger, ProviderMetrics, UsageSnapshot,
};
pub use rava::{HistoricosRequest, HttpRavaTransport, RavaHistoricosClient, RavaTransport};
pub use registry::{FetchDiagnostics, ProviderAttempt, ProviderGuard, SkipReason};
pub use symbols::{
    CatalogStatus, EodhdSymbolSource, QuoteSymbol, QuoteSymbolsAggregator, RawSymbol,
    SymbolCatalog, SymbolSource, TwelveDataSymbolSource,
};
