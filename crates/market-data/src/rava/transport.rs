//! HTTP transport for RAVA.
//!
//! # API Endpoints
//!
//! - Profile page (token source): `https://www.rava.com/perfil/{symbol}`
//! - Historical prices: `POST https://clasico.rava.com/lib/restapi/v3/publico/cotizaciones/historicos`
//!   with form fields `access_token`, `especie`, `fecha_inicio`, `fecha_fin`

use async_trait::async_trait;
use log::debug;
use reqwest::{header, Client, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::config::{ResilienceConfig, RavaEndpoints, RAVA};
use crate::errors::MarketDataError;
use crate::http::{build_client, transport_error};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Form body of a historicos request. Dates are `YYYY-MM-DD`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoricosRequest {
    pub access_token: String,
    pub especie: String,
    pub fecha_inicio: String,
    pub fecha_fin: String,
}

/// The two RAVA calls the historicos client depends on.
///
/// `post_historicos` returns `Err` for transport failures and non-2xx
/// statuses (with the body as the message); in-band error bodies come
/// back as `Ok` and are detected by the caller.
#[async_trait]
pub trait RavaTransport: Send + Sync {
    async fn fetch_profile_html(&self, especie: &str) -> Result<String, MarketDataError>;

    async fn post_historicos(&self, request: &HistoricosRequest) -> Result<Value, MarketDataError>;
}

/// Error message carried by an otherwise successful historicos response.
///
/// Recognizes `{"error": "..."}`, `{"error": {"message": "..."}}` and
/// `{"status": "error", "message": "..."}`.
pub fn response_error(body: &Value) -> Option<String> {
    let message = || {
        body.get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    match body.get("error") {
        Some(Value::String(text)) if !text.trim().is_empty() => return Some(text.clone()),
        Some(Value::Object(details)) => {
            return Some(
                details
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(details.clone()).to_string()),
            )
        }
        Some(Value::Bool(true)) => return Some(message().unwrap_or_else(|| "error".to_string())),
        _ => {}
    }

    if body.get("status").and_then(Value::as_str) == Some("error") {
        return Some(message().unwrap_or_else(|| "error".to_string()));
    }

    None
}

/// reqwest-backed [`RavaTransport`].
pub struct HttpRavaTransport {
    client: Client,
    endpoints: RavaEndpoints,
}

impl HttpRavaTransport {
    pub fn new(endpoints: RavaEndpoints, timeout: std::time::Duration) -> Self {
        Self {
            client: build_client(timeout),
            endpoints,
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.rava.clone(), config.http_timeout)
    }

    fn profile_url(&self, especie: &str) -> String {
        self.endpoints
            .profile_url
            .replace("{symbol}", &urlencoding::encode(especie))
    }
}

#[async_trait]
impl RavaTransport for HttpRavaTransport {
    async fn fetch_profile_html(&self, especie: &str) -> Result<String, MarketDataError> {
        let url = self.profile_url(especie);
        debug!("RAVA: fetching profile page {}", url);

        let response = self
            .client
            .get(&url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| transport_error(RAVA, e))?;

        if !response.status().is_success() {
            return Err(MarketDataError::ProviderError {
                provider: RAVA.to_string(),
                message: format!("HTTP error: {}", response.status()),
            });
        }

        response.text().await.map_err(|e| transport_error(RAVA, e))
    }

    async fn post_historicos(&self, request: &HistoricosRequest) -> Result<Value, MarketDataError> {
        let response = self
            .client
            .post(&self.endpoints.historicos_url)
            .header(header::USER_AGENT, USER_AGENT)
            .form(request)
            .send()
            .await
            .map_err(|e| transport_error(RAVA, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| transport_error(RAVA, e))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited {
                provider: RAVA.to_string(),
                message: Some(body).filter(|b| !b.trim().is_empty()),
            });
        }

        if !status.is_success() {
            let message = if body.trim().is_empty() {
                format!("HTTP error: {}", status)
            } else {
                body.trim().to_string()
            };
            return Err(MarketDataError::ProviderError {
                provider: RAVA.to_string(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| MarketDataError::ProviderError {
            provider: RAVA.to_string(),
            message: format!("Failed to parse historicos response: {}", e),
        })
    }
}
