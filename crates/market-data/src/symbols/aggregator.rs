//! Two-provider symbol catalog with graceful degradation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::sources::{RawSymbol, SymbolSource};
use crate::cache::QuoteCache;
use crate::config::ResilienceConfig;
use crate::errors::MarketDataError;
use crate::registry::ProviderGuard;

/// A merged listing, tagged with the providers that carry it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSymbol {
    pub symbol: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub mic: Option<String>,
    pub in_eodhd: bool,
    pub in_twelvedata: bool,
}

impl QuoteSymbol {
    fn seed(raw: RawSymbol, symbol: String) -> Self {
        Self {
            symbol,
            name: raw.name,
            currency: raw.currency,
            kind: raw.kind,
            mic: raw.mic,
            in_eodhd: true,
            in_twelvedata: false,
        }
    }

    fn from_twelvedata(raw: RawSymbol, symbol: String) -> Self {
        Self {
            in_eodhd: false,
            in_twelvedata: true,
            ..Self::seed(raw, symbol)
        }
    }

    /// Fill fields still empty from `raw`. Existing values win.
    fn backfill(&mut self, raw: RawSymbol) {
        self.in_twelvedata = true;
        self.name = self.name.take().or(raw.name);
        self.currency = self.currency.take().or(raw.currency);
        self.kind = self.kind.take().or(raw.kind);
        self.mic = self.mic.take().or(raw.mic);
    }
}

/// How complete a catalog is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CatalogStatus {
    /// Both providers answered.
    Complete,
    /// Some providers failed; the list holds what the rest returned.
    Degraded { failed: Vec<String> },
    /// Every provider failed; the list is empty.
    Unavailable,
}

/// Deduplicated symbols for one exchange, sorted by symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolCatalog {
    pub exchange: String,
    pub symbols: Vec<QuoteSymbol>,
    pub status: CatalogStatus,
}

impl SymbolCatalog {
    /// The symbols, or an error when no provider could be reached.
    pub fn into_result(self) -> Result<Vec<QuoteSymbol>, MarketDataError> {
        match self.status {
            CatalogStatus::Unavailable => Err(MarketDataError::NoProvidersAvailable),
            _ => Ok(self.symbols),
        }
    }
}

/// Merges the EODHD and TwelveData listings for an exchange.
///
/// Upstream failures never surface as errors: a failing provider counts as
/// an empty list and is reported through [`CatalogStatus`].
pub struct QuoteSymbolsAggregator {
    eodhd: Arc<dyn SymbolSource>,
    twelvedata: Arc<dyn SymbolSource>,
    cache: Arc<QuoteCache>,
    guard: Option<Arc<ProviderGuard>>,
    ttl: Duration,
    degraded_ttl: Duration,
}

impl QuoteSymbolsAggregator {
    pub fn new(
        eodhd: Arc<dyn SymbolSource>,
        twelvedata: Arc<dyn SymbolSource>,
        cache: Arc<QuoteCache>,
        ttl: Duration,
        degraded_ttl: Duration,
    ) -> Self {
        Self {
            eodhd,
            twelvedata,
            cache,
            guard: None,
            ttl,
            degraded_ttl,
        }
    }

    pub fn from_config(
        eodhd: Arc<dyn SymbolSource>,
        twelvedata: Arc<dyn SymbolSource>,
        cache: Arc<QuoteCache>,
        config: &ResilienceConfig,
    ) -> Self {
        Self::new(
            eodhd,
            twelvedata,
            cache,
            config.symbols_ttl,
            config.symbols_degraded_ttl,
        )
    }

    /// Route upstream calls through `guard` so they count against quotas.
    pub fn with_guard(mut self, guard: Arc<ProviderGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    fn cache_key(exchange: &str) -> String {
        format!("quote_symbols:{}", exchange)
    }

    /// Catalog for `exchange`, served from cache when available.
    pub async fn fetch(&self, exchange: &str) -> SymbolCatalog {
        let exchange = exchange.trim().to_uppercase();
        let key = Self::cache_key(&exchange);

        if let Some(catalog) = self.cache.get_as::<SymbolCatalog>(&key) {
            debug!("Symbol catalog for {} served from cache", exchange);
            return catalog;
        }

        let mut failed = Vec::new();
        let from_eodhd = self.fetch_from(&self.eodhd, &exchange, &mut failed).await;
        let from_twelvedata = self
            .fetch_from(&self.twelvedata, &exchange, &mut failed)
            .await;

        let status = match failed.len() {
            0 => CatalogStatus::Complete,
            2 => CatalogStatus::Unavailable,
            _ => CatalogStatus::Degraded { failed },
        };
        let catalog = SymbolCatalog {
            symbols: merge(from_eodhd, from_twelvedata),
            exchange,
            status,
        };

        let ttl = match catalog.status {
            CatalogStatus::Complete => Some(self.ttl),
            CatalogStatus::Degraded { .. } => Some(self.degraded_ttl),
            CatalogStatus::Unavailable => None,
        };
        match ttl {
            Some(ttl) => {
                if let Err(e) = self.cache.set_as(&key, &catalog, Some(ttl)) {
                    warn!("Could not cache symbol catalog for {}: {}", catalog.exchange, e);
                }
            }
            None => info!(
                "Symbol catalog for {} unavailable from every provider, not caching",
                catalog.exchange
            ),
        }

        catalog
    }

    /// Drop the cached catalog so the next fetch goes upstream.
    pub fn invalidate(&self, exchange: &str) {
        self.cache
            .remove(&Self::cache_key(&exchange.trim().to_uppercase()));
    }

    async fn fetch_from(
        &self,
        source: &Arc<dyn SymbolSource>,
        exchange: &str,
        failed: &mut Vec<String>,
    ) -> Vec<RawSymbol> {
        let provider = source.id();
        let result = match &self.guard {
            Some(guard) => {
                guard
                    .call(provider, None, None, move || source.fetch_symbols(exchange))
                    .await
            }
            None => source.fetch_symbols(exchange).await,
        };

        match result {
            Ok(symbols) => {
                debug!("{} listed {} symbols on {}", provider, symbols.len(), exchange);
                symbols
            }
            Err(e) => {
                warn!("{} symbol list for {} failed: {}", provider, exchange, e);
                failed.push(provider.to_string());
                Vec::new()
            }
        }
    }
}

fn merge(from_eodhd: Vec<RawSymbol>, from_twelvedata: Vec<RawSymbol>) -> Vec<QuoteSymbol> {
    let mut merged: BTreeMap<String, QuoteSymbol> = BTreeMap::new();

    for raw in from_eodhd {
        let symbol = raw.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            continue;
        }
        merged
            .entry(symbol.clone())
            .or_insert_with(|| QuoteSymbol::seed(raw, symbol));
    }

    for raw in from_twelvedata {
        let symbol = raw.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            continue;
        }
        match merged.get_mut(&symbol) {
            Some(existing) => existing.backfill(raw),
            None => {
                merged.insert(symbol.clone(), QuoteSymbol::from_twelvedata(raw, symbol));
            }
        }
    }

    merged.into_values().collect()
}
