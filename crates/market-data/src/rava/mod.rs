//! RAVA Bursátil historical prices.

mod client;
mod token;
mod transport;

pub use client::RavaHistoricosClient;
pub use token::extract_token;
pub use transport::{response_error, HistoricosRequest, HttpRavaTransport, RavaTransport};
