//! Historical prices from RAVA with session-token recovery.
//!
//! Every call scrapes a fresh token from the especie's profile page before
//! requesting data. If RAVA rejects the token, the page is scraped once more
//! and the request repeated only when a different token comes back.

use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, info};
use serde_json::Value;

use super::token::extract_token;
use super::transport::{response_error, HistoricosRequest, HttpRavaTransport, RavaTransport};
use crate::config::{ResilienceConfig, RAVA};
use crate::errors::MarketDataError;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct RavaHistoricosClient {
    transport: Arc<dyn RavaTransport>,
}

impl RavaHistoricosClient {
    pub fn new(transport: Arc<dyn RavaTransport>) -> Self {
        Self { transport }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(Arc::new(HttpRavaTransport::from_config(config)))
    }

    /// Daily history for `especie` between `desde` and `hasta`, inclusive.
    pub async fn historicos(
        &self,
        especie: &str,
        desde: NaiveDate,
        hasta: NaiveDate,
    ) -> Result<Value, MarketDataError> {
        let especie = especie.trim();
        let token = self.fetch_token(especie).await?;

        let error = match self.request(&token, especie, desde, hasta).await {
            Ok(data) => return Ok(data),
            Err(e) if rejects_token(&e) => e,
            Err(e) => return Err(e),
        };

        info!("RAVA rejected session token for {}: {}", especie, error);
        let fresh = self.fetch_token(especie).await?;
        if fresh == token {
            return Err(MarketDataError::TokenRejected(format!(
                "{}: profile page still serves the rejected token",
                especie
            )));
        }

        match self.request(&fresh, especie, desde, hasta).await {
            Err(e) if rejects_token(&e) => Err(MarketDataError::TokenRejected(format!(
                "{}: refreshed token also rejected ({})",
                especie, e
            ))),
            other => other,
        }
    }

    async fn fetch_token(&self, especie: &str) -> Result<String, MarketDataError> {
        let html = self.transport.fetch_profile_html(especie).await?;
        let token = extract_token(&html).ok_or_else(|| {
            MarketDataError::TokenUnavailable(format!(
                "no access_token on profile page for {}",
                especie
            ))
        })?;
        debug!("RAVA: scraped session token for {}", especie);
        Ok(token)
    }

    async fn request(
        &self,
        token: &str,
        especie: &str,
        desde: NaiveDate,
        hasta: NaiveDate,
    ) -> Result<Value, MarketDataError> {
        let request = HistoricosRequest {
            access_token: token.to_string(),
            especie: especie.to_string(),
            fecha_inicio: desde.format(DATE_FORMAT).to_string(),
            fecha_fin: hasta.format(DATE_FORMAT).to_string(),
        };

        let body = self.transport.post_historicos(&request).await?;
        match response_error(&body) {
            Some(message) => Err(MarketDataError::ProviderError {
                provider: RAVA.to_string(),
                message,
            }),
            None => Ok(body),
        }
    }
}

/// Only errors RAVA itself reported count; transport failures never do.
fn rejects_token(error: &MarketDataError) -> bool {
    matches!(error, MarketDataError::ProviderError { .. }) && error.mentions_token()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedTransport {
        pages: Mutex<VecDeque<String>>,
        responses: Mutex<VecDeque<Result<Value, MarketDataError>>>,
        page_fetches: Mutex<u32>,
        posted: Mutex<Vec<HistoricosRequest>>,
    }

    impl ScriptedTransport {
        fn new(tokens: &[&str], responses: Vec<Result<Value, MarketDataError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(
                    tokens
                        .iter()
                        .map(|t| format!(r#"<perfil-p :access_token="'{}'"></perfil-p>"#, t))
                        .collect(),
                ),
                responses: Mutex::new(responses.into()),
                page_fetches: Mutex::new(0),
                posted: Mutex::new(Vec::new()),
            })
        }

        fn page_fetches(&self) -> u32 {
            *self.page_fetches.lock().unwrap()
        }

        fn posted_tokens(&self) -> Vec<String> {
            self.posted
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.access_token.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl RavaTransport for ScriptedTransport {
        async fn fetch_profile_html(&self, _especie: &str) -> Result<String, MarketDataError> {
            *self.page_fetches.lock().unwrap() += 1;
            Ok(self
                .pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "<html></html>".to_string()))
        }

        async fn post_historicos(
            &self,
            request: &HistoricosRequest,
        ) -> Result<Value, MarketDataError> {
            self.posted.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected historicos request")
        }
    }

    fn dates() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 30).unwrap(),
        )
    }

    fn history() -> Value {
        json!({"body": [{"fecha": "2026-01-02", "cierre": 7450.0}]})
    }

    #[tokio::test]
    async fn test_first_token_succeeds() {
        let transport = ScriptedTransport::new(&["tok-a"], vec![Ok(history())]);
        let client = RavaHistoricosClient::new(transport.clone());
        let (desde, hasta) = dates();

        let data = client.historicos("GGAL", desde, hasta).await.unwrap();
        assert_eq!(data, history());
        assert_eq!(transport.page_fetches(), 1);

        let posted = transport.posted.lock().unwrap();
        assert_eq!(posted[0].especie, "GGAL");
        assert_eq!(posted[0].fecha_inicio, "2026-01-02");
        assert_eq!(posted[0].fecha_fin, "2026-01-30");
    }

    #[tokio::test]
    async fn test_token_error_retries_with_new_token() {
        let transport = ScriptedTransport::new(
            &["tok-a", "tok-b"],
            vec![Ok(json!({"error": "Invalid token"})), Ok(history())],
        );
        let client = RavaHistoricosClient::new(transport.clone());
        let (desde, hasta) = dates();

        let data = client.historicos("AAPL", desde, hasta).await.unwrap();
        assert_eq!(data, history());
        assert_eq!(transport.page_fetches(), 2);
        assert_eq!(transport.posted_tokens(), vec!["tok-a", "tok-b"]);
    }

    #[tokio::test]
    async fn test_same_token_fails_without_second_request() {
        let transport = ScriptedTransport::new(
            &["tok-a", "tok-a"],
            vec![Ok(json!({"status": "error", "message": "access TOKEN expired"}))],
        );
        let client = RavaHistoricosClient::new(transport.clone());
        let (desde, hasta) = dates();

        let err = client.historicos("AAPL", desde, hasta).await.unwrap_err();
        assert!(matches!(err, MarketDataError::TokenRejected(_)));
        assert_eq!(transport.page_fetches(), 2);
        assert_eq!(transport.posted_tokens().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_happens_at_most_once() {
        let transport = ScriptedTransport::new(
            &["tok-a", "tok-b", "tok-c"],
            vec![
                Ok(json!({"error": "token invalido"})),
                Ok(json!({"error": {"message": "token invalido"}})),
            ],
        );
        let client = RavaHistoricosClient::new(transport.clone());
        let (desde, hasta) = dates();

        let err = client.historicos("MELI", desde, hasta).await.unwrap_err();
        assert!(matches!(err, MarketDataError::TokenRejected(_)));
        assert_eq!(transport.page_fetches(), 2);
        assert_eq!(transport.posted_tokens().len(), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let transport = ScriptedTransport::new(
            &["tok-a", "tok-b"],
            vec![Err(MarketDataError::ProviderError {
                provider: RAVA.to_string(),
                message: "especie inexistente".to_string(),
            })],
        );
        let client = RavaHistoricosClient::new(transport.clone());
        let (desde, hasta) = dates();

        let err = client.historicos("ZZZZ", desde, hasta).await.unwrap_err();
        assert!(matches!(err, MarketDataError::ProviderError { .. }));
        assert_eq!(transport.page_fetches(), 1);
        assert_eq!(transport.posted_tokens().len(), 1);
    }

    #[tokio::test]
    async fn test_non_2xx_body_mentioning_token_is_retried() {
        let transport = ScriptedTransport::new(
            &["tok-a", "tok-b"],
            vec![
                Err(MarketDataError::ProviderError {
                    provider: RAVA.to_string(),
                    message: "Unauthorized: bad access_token".to_string(),
                }),
                Ok(history()),
            ],
        );
        let client = RavaHistoricosClient::new(transport.clone());
        let (desde, hasta) = dates();

        assert!(client.historicos("GGAL", desde, hasta).await.is_ok());
        assert_eq!(transport.posted_tokens(), vec!["tok-a", "tok-b"]);
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_any_request() {
        let transport = ScriptedTransport::new(&[], vec![]);
        let client = RavaHistoricosClient::new(transport.clone());
        let (desde, hasta) = dates();

        let err = client.historicos("GGAL", desde, hasta).await.unwrap_err();
        assert!(matches!(err, MarketDataError::TokenUnavailable(_)));
        assert!(transport.posted_tokens().is_empty());
    }
}
