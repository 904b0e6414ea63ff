//! Exchange symbol catalogs merged from EODHD and TwelveData.

mod aggregator;
mod sources;

pub use aggregator::{CatalogStatus, QuoteSymbol, QuoteSymbolsAggregator, SymbolCatalog};
pub use sources::{EodhdSymbolSource, RawSymbol, SymbolSource, TwelveDataSymbolSource};
