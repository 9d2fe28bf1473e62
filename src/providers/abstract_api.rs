use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::core::rates::{DATE_FORMAT, RateProvider, RateTable};

/// Client for the abstractapi.com exchange rates endpoints.
pub struct AbstractApiProvider {
    base_url: String,
    api_key: String,
    base_currency: String,
    targets: Vec<String>,
    client: reqwest::Client,
}

impl AbstractApiProvider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        base_currency: &str,
        targets: &[String],
    ) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent("finbot/0.1").build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            base_currency: base_currency.to_string(),
            targets: targets.to_vec(),
            client,
        })
    }

    async fn request(&self, endpoint: &str, date: Option<NaiveDate>) -> Result<RateTable> {
        let mut url = format!(
            "{}/v1/{}?base={}&target={}",
            self.base_url,
            endpoint,
            self.base_currency,
            self.targets.join(",")
        );
        if let Some(date) = date {
            url.push_str(&format!("&date={}", date.format(DATE_FORMAT)));
        }
        debug!("Requesting {} rates from {}", endpoint, url);
        url.push_str(&format!("&api_key={}", self.api_key));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                // The URL carries the API key.
                anyhow!(
                    "Request error: {} for rates endpoint: {}",
                    e.without_url(),
                    endpoint
                )
            })?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for rates endpoint: {}",
                response.status(),
                endpoint
            ));
        }

        let text = response.text().await.map_err(|e| {
            anyhow!(
                "Failed to read response for {}: {}",
                endpoint,
                e.without_url()
            )
        })?;
        let data: RatesResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", endpoint, e))?;

        if data.base != self.base_currency {
            return Err(anyhow!(
                "Unexpected base currency {} in {} response",
                data.base,
                endpoint
            ));
        }

        Ok(data.exchange_rates.into_iter().collect())
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    base: String,
    exchange_rates: HashMap<String, Decimal>,
}

#[async_trait]
impl RateProvider for AbstractApiProvider {
    #[instrument(name = "LiveRatesFetch", skip(self))]
    async fn live(&self) -> Result<RateTable> {
        self.request("live", None).await
    }

    #[instrument(name = "HistoricalRatesFetch", skip(self))]
    async fn historical(&self, date: NaiveDate) -> Result<RateTable> {
        self.request("historical", Some(date)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AbstractApiProvider {
        AbstractApiProvider::new(
            &server.uri(),
            "secret",
            "RUB",
            &["USD".to_string(), "EUR".to_string()],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_successful_live_fetch() {
        let mock_server = MockServer::start().await;
        let mock_response = r#"{
            "base": "RUB",
            "last_updated": 1666051200,
            "exchange_rates": { "USD": 0.016, "EUR": 0.0165 }
        }"#;

        Mock::given(method("GET"))
            .and(path("/v1/live"))
            .and(query_param("api_key", "secret"))
            .and(query_param("base", "RUB"))
            .and(query_param("target", "USD,EUR"))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .expect(1)
            .mount(&mock_server)
            .await;

        let rates = provider(&mock_server).live().await.unwrap();
        assert_eq!(rates.len(), 2);
        assert_eq!(rates.get("USD"), Some(Decimal::new(16, 3)));
        assert_eq!(rates.get("EUR"), Some(Decimal::new(165, 4)));
    }

    #[tokio::test]
    async fn test_historical_fetch_sends_date() {
        let mock_server = MockServer::start().await;
        let mock_response = r#"{
            "base": "RUB",
            "date": "2022-10-18",
            "exchange_rates": { "USD": 0.0162 }
        }"#;

        Mock::given(method("GET"))
            .and(path("/v1/historical"))
            .and(query_param("date", "2022-10-18"))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .expect(1)
            .mount(&mock_server)
            .await;

        let date = NaiveDate::from_ymd_opt(2022, 10, 18).unwrap();
        let rates = provider(&mock_server).historical(date).await.unwrap();
        assert_eq!(rates.get("USD"), Some(Decimal::new(162, 4)));
        assert!(rates.get("EUR").is_none());
    }

    #[tokio::test]
    async fn test_api_error_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/live"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server).live().await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "HTTP error: 429 Too Many Requests for rates endpoint: live"
        );
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/live"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"base": "RUB"}"#))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server).live().await;
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse JSON response for live")
        );
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_api_key() {
        let provider = AbstractApiProvider::new(
            "http://127.0.0.1:1",
            "SECRETKEY",
            "RUB",
            &["USD".to_string()],
        )
        .unwrap();

        let message = provider.live().await.unwrap_err().to_string();

        assert!(message.starts_with("Request error:"), "{message}");
        assert!(!message.contains("SECRETKEY"), "{message}");
    }

    #[tokio::test]
    async fn test_wrong_base_currency_is_rejected() {
        let mock_server = MockServer::start().await;
        let mock_response = r#"{"base": "USD", "exchange_rates": { "EUR": 0.9 }}"#;

        Mock::given(method("GET"))
            .and(path("/v1/live"))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server).live().await;
        assert!(result.is_err());
    }
}
