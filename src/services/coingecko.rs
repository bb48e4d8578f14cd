use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::services::price_service::{IcpPriceSource, PriceError};

/// CoinGecko identifier of the ICP token
pub const ICP_COIN_ID: &str = "internet-computer";

/// Per-request timeout; no automatic retry
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct CoinGeckoService {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    coin_id: String,
}

/// `/simple/price` response: `{"internet-computer": {"usd": 4.2}}`
type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

#[derive(Debug, Deserialize)]
struct CoinHistoryResponse {
    market_data: Option<MarketData>,
}

#[derive(Debug, Deserialize)]
struct MarketData {
    current_price: HashMap<String, f64>,
}

impl CoinGeckoService {
    pub fn new(api_key: Option<String>, base_url: String) -> Result<Self, PriceError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            coin_id: ICP_COIN_ID.to_string(),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url).header("accept", "application/json");
        match &self.api_key {
            Some(key) => request.header("x-cg-pro-api-key", key),
            None => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PriceError> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PriceError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(response.json().await?)
    }

    /// Current USD price of the configured coin
    pub async fn get_current_price_usd(&self) -> Result<f64, PriceError> {
        tracing::debug!("Fetching current {} rate from CoinGecko", self.coin_id);

        let url = format!("{}/simple/price", self.base_url);
        let request = self
            .get(&url)
            .query(&[("ids", self.coin_id.as_str()), ("vs_currencies", "usd")]);

        let data: SimplePriceResponse = self.send(request).await?;

        let price = data
            .get(&self.coin_id)
            .and_then(|prices| prices.get("usd"))
            .copied()
            .ok_or_else(|| {
                PriceError::InvalidResponse(format!("no usd price for {}", self.coin_id))
            })?;

        tracing::info!("Current {} rate: ${:.4}", self.coin_id, price);
        Ok(price)
    }

    /// USD price of the configured coin on a past day
    pub async fn get_historical_price_usd(&self, day: NaiveDate) -> Result<f64, PriceError> {
        // CoinGecko expects DD-MM-YYYY
        let date_str = day.format("%d-%m-%Y").to_string();
        tracing::debug!(
            "Fetching historical {} rate for {} from CoinGecko",
            self.coin_id,
            date_str
        );

        let url = format!("{}/coins/{}/history", self.base_url, self.coin_id);
        let request = self
            .get(&url)
            .query(&[("date", date_str.as_str()), ("localization", "false")]);

        let data: CoinHistoryResponse = self.send(request).await?;

        let price = data
            .market_data
            .and_then(|m| m.current_price.get("usd").copied())
            .ok_or_else(|| {
                PriceError::InvalidResponse(format!(
                    "no market data for {} on {}",
                    self.coin_id, date_str
                ))
            })?;

        tracing::info!("Historical {} rate for {}: ${:.4}", self.coin_id, date_str, price);
        Ok(price)
    }
}

#[async_trait]
impl IcpPriceSource for CoinGeckoService {
    async fn current_usd(&self) -> Result<f64, PriceError> {
        self.get_current_price_usd().await
    }

    async fn historical_usd(&self, day: NaiveDate) -> Result<f64, PriceError> {
        self.get_historical_price_usd(day).await
    }

    fn name(&self) -> &'static str {
        "coingecko"
    }
}
