//! Upstream symbol-list sources.
//!
//! # API Endpoints
//!
//! - EODHD: `https://eodhd.com/api/exchange-symbol-list/{EXCHANGE}?api_token={key}&fmt=json`
//! - TwelveData: `https://api.twelvedata.com/stocks?exchange={EXCHANGE}&apikey={key}`
//!
//! EODHD answers with a bare JSON array. TwelveData wraps the list in
//! `{"data": [...], "status": "ok"}` and reports failures in-band as
//! `{"code": 429, "message": "...", "status": "error"}`, often with HTTP 200.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::{ResilienceConfig, EODHD, TWELVEDATA};
use crate::errors::MarketDataError;
use crate::http::{build_client, transport_error};

const EODHD_BASE_URL: &str = "https://eodhd.com/api";
const TWELVEDATA_BASE_URL: &str = "https://api.twelvedata.com";

/// One listing as reported by an upstream, before merging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSymbol {
    pub symbol: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub kind: Option<String>,
    pub mic: Option<String>,
}

/// A provider that can list the symbols traded on an exchange.
#[async_trait]
pub trait SymbolSource: Send + Sync {
    /// Provider name, as used by the metrics ledger.
    fn id(&self) -> &'static str;

    async fn fetch_symbols(&self, exchange: &str) -> Result<Vec<RawSymbol>, MarketDataError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EodhdSymbol {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, rename = "Type")]
    kind: Option<String>,
}

impl EodhdSymbol {
    fn into_raw(self) -> Option<RawSymbol> {
        Some(RawSymbol {
            symbol: non_empty(self.code)?,
            name: non_empty(self.name),
            currency: non_empty(self.currency),
            kind: non_empty(self.kind),
            // EODHD reports its own venue code, not a MIC
            mic: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TwelveDataSymbol {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    mic_code: Option<String>,
}

impl TwelveDataSymbol {
    fn into_raw(self) -> Option<RawSymbol> {
        Some(RawSymbol {
            symbol: non_empty(self.symbol)?,
            name: non_empty(self.name),
            currency: non_empty(self.currency),
            kind: non_empty(self.kind),
            mic: non_empty(self.mic_code),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TwelveDataStocksResponse {
    #[serde(default)]
    data: Vec<TwelveDataSymbol>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn missing_key(provider: &str, var: &str) -> MarketDataError {
    MarketDataError::Configuration(format!("{} API key not set ({})", provider, var))
}

/// GET `url` and return the body, mapping transport failures and HTTP
/// statuses onto [`MarketDataError`].
async fn get_text(client: &Client, provider: &str, url: &str) -> Result<String, MarketDataError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(MarketDataError::RateLimited {
            provider: provider.to_string(),
            message: response.text().await.ok().and_then(|t| non_empty(Some(t))),
        });
    }

    if !status.is_success() {
        return Err(MarketDataError::ProviderError {
            provider: provider.to_string(),
            message: format!("HTTP error: {}", status),
        });
    }

    response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))
}

fn parse_eodhd(body: &str) -> Result<Vec<RawSymbol>, MarketDataError> {
    let rows: Vec<EodhdSymbol> =
        serde_json::from_str(body).map_err(|e| MarketDataError::ProviderError {
            provider: EODHD.to_string(),
            message: format!("Failed to parse symbol list: {}", e),
        })?;
    Ok(rows.into_iter().filter_map(EodhdSymbol::into_raw).collect())
}

fn parse_twelvedata(body: &str) -> Result<Vec<RawSymbol>, MarketDataError> {
    let response: TwelveDataStocksResponse =
        serde_json::from_str(body).map_err(|e| MarketDataError::ProviderError {
            provider: TWELVEDATA.to_string(),
            message: format!("Failed to parse symbol list: {}", e),
        })?;

    if response.status.as_deref() == Some("error") {
        let message = response
            .message
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(if response.code == Some(429) {
            MarketDataError::RateLimited {
                provider: TWELVEDATA.to_string(),
                message: Some(message),
            }
        } else {
            MarketDataError::ProviderError {
                provider: TWELVEDATA.to_string(),
                message,
            }
        });
    }

    Ok(response
        .data
        .into_iter()
        .filter_map(TwelveDataSymbol::into_raw)
        .collect())
}

/// EODHD `exchange-symbol-list` endpoint.
pub struct EodhdSymbolSource {
    client: Client,
    api_key: Option<String>,
}

impl EodhdSymbolSource {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            api_key,
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.eodhd_api_key.clone(), config.http_timeout)
    }
}

#[async_trait]
impl SymbolSource for EodhdSymbolSource {
    fn id(&self) -> &'static str {
        EODHD
    }

    async fn fetch_symbols(&self, exchange: &str) -> Result<Vec<RawSymbol>, MarketDataError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| missing_key(EODHD, "CW_EODHD_API_KEY"))?;
        let url = format!(
            "{}/exchange-symbol-list/{}?api_token={}&fmt=json",
            EODHD_BASE_URL,
            urlencoding::encode(exchange),
            urlencoding::encode(api_key)
        );

        let body = get_text(&self.client, EODHD, &url).await?;
        parse_eodhd(&body)
    }
}

/// TwelveData `stocks` reference endpoint.
pub struct TwelveDataSymbolSource {
    client: Client,
    api_key: Option<String>,
}

impl TwelveDataSymbolSource {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            api_key,
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.twelvedata_api_key.clone(), config.http_timeout)
    }
}

#[async_trait]
impl SymbolSource for TwelveDataSymbolSource {
    fn id(&self) -> &'static str {
        TWELVEDATA
    }

    async fn fetch_symbols(&self, exchange: &str) -> Result<Vec<RawSymbol>, MarketDataError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| missing_key(TWELVEDATA, "CW_TWELVEDATA_API_KEY"))?;
        let url = format!(
            "{}/stocks?exchange={}&apikey={}",
            TWELVEDATA_BASE_URL,
            urlencoding::encode(exchange),
            urlencoding::encode(api_key)
        );

        let body = get_text(&self.client, TWELVEDATA, &url).await?;
        parse_twelvedata(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_eodhd_list() {
        let body = r#"[
            {"Code":"AAPL","Name":"Apple Inc","Country":"USA","Exchange":"NASDAQ","Currency":"USD","Type":"Common Stock","Isin":"US0378331005"},
            {"Code":"","Name":"Blank row"},
            {"Code":"KO","Name":null,"Currency":"USD","Type":"Common Stock"}
        ]"#;

        let symbols = parse_eodhd(body).unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].symbol, "AAPL");
        assert_eq!(symbols[0].name.as_deref(), Some("Apple Inc"));
        assert_eq!(symbols[0].kind.as_deref(), Some("Common Stock"));
        assert_eq!(symbols[0].mic, None);
        assert_eq!(symbols[1].name, None);
    }

    #[test]
    fn test_parse_eodhd_garbage_is_provider_error() {
        let err = parse_eodhd("<html>Payment required</html>").unwrap_err();
        assert!(matches!(err, MarketDataError::ProviderError { .. }));
    }

    #[test]
    fn test_parse_twelvedata_list() {
        let body = r#"{"data":[
            {"symbol":"GGAL","name":"Grupo Financiero Galicia","currency":"ARS","exchange":"BCBA","mic_code":"XBUE","country":"Argentina","type":"Common Stock"}
        ],"status":"ok"}"#;

        let symbols = parse_twelvedata(body).unwrap();
        assert_eq!(
            symbols,
            vec![RawSymbol {
                symbol: "GGAL".to_string(),
                name: Some("Grupo Financiero Galicia".to_string()),
                currency: Some("ARS".to_string()),
                kind: Some("Common Stock".to_string()),
                mic: Some("XBUE".to_string()),
            }]
        );
    }

    #[test]
    fn test_parse_twelvedata_in_band_errors() {
        let limited = parse_twelvedata(
            r#"{"code":429,"message":"You have run out of API credits for the current minute.","status":"error"}"#,
        )
        .unwrap_err();
        assert!(matches!(
            limited,
            MarketDataError::RateLimited { message: Some(_), .. }
        ));

        let other = parse_twelvedata(
            r#"{"code":400,"message":"**exchange** not found","status":"error"}"#,
        )
        .unwrap_err();
        assert!(matches!(other, MarketDataError::ProviderError { .. }));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_configuration_error() {
        let source = TwelveDataSymbolSource::new(None, Duration::from_secs(1));
        let err = source.fetch_symbols("NYSE").await.unwrap_err();
        assert!(matches!(err, MarketDataError::Configuration(_)));

        let source = EodhdSymbolSource::new(None, Duration::from_secs(1));
        let err = source.fetch_symbols("US").await.unwrap_err();
        assert!(matches!(err, MarketDataError::Configuration(_)));
    }
}
