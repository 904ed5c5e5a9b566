use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::currency::{ExchangeRateProvider, normalize_code};

/// Client for exchangerate-api style endpoints: `GET {base_url}/{BASE}`.
pub struct ExchangeRateApiProvider {
    base_url: String,
    client: reqwest::Client,
}

impl ExchangeRateApiProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("xpr/1.0")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeRateResponse {
    #[serde(default)]
    base: Option<String>,
    rates: HashMap<String, f64>,
}

#[async_trait]
impl ExchangeRateProvider for ExchangeRateApiProvider {
    #[instrument(name = "ExchangeRateFetch", skip(self), fields(base = %base))]
    async fn fetch_rates(&self, base: &str) -> Result<HashMap<String, f64>> {
        let base = normalize_code(base);
        let url = format!("{}/{}", self.base_url, base);
        debug!("Requesting exchange rates from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for base currency: {}", e, base))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for base currency: {}",
                response.status(),
                base
            ));
        }

        let text = response.text().await?;

        let data: ExchangeRateResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", base, e))?;

        if let Some(reported) = &data.base
            && normalize_code(reported) != base
        {
            return Err(anyhow!(
                "Rates for {} returned with base currency {}",
                base,
                reported
            ));
        }

        if data.rates.is_empty() {
            return Err(anyhow!("No rates found for base currency: {}", base));
        }

        Ok(data
            .rates
            .into_iter()
            .map(|(code, rate)| (normalize_code(&code), rate))
            .collect())
    }
}
