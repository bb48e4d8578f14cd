//! XDR/ICP conversion rates
//!
//! The cross rate is built from two independently sourced USD legs:
//! XDR→USD from an [`XdrRateSource`] and ICP→USD from an [`IcpPriceSource`].
//! Results are cached per calendar day for the lifetime of the service.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use moka::future::Cache;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::conversion_rate::ConversionRates;

/// Approximate XDR value in USD. XDR is an IMF basket currency that moves
/// slowly; used until a live feed is wired in.
pub const APPROXIMATE_XDR_USD_RATE: f64 = 1.40;

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("price API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid price response: {0}")]
    InvalidResponse(String),

    #[error("unusable {leg} rate {value}")]
    InvalidRate { leg: &'static str, value: f64 },
}

/// Source of the XDR→USD leg
#[async_trait]
pub trait XdrRateSource: Send + Sync {
    async fn xdr_to_usd(&self, day: NaiveDate) -> Result<f64, PriceError>;
}

/// Source of the ICP→USD leg
#[async_trait]
pub trait IcpPriceSource: Send + Sync {
    async fn current_usd(&self) -> Result<f64, PriceError>;

    async fn historical_usd(&self, day: NaiveDate) -> Result<f64, PriceError>;

    /// Tag stored alongside persisted rates
    fn name(&self) -> &'static str;
}

/// Constant XDR→USD rate, regardless of the day asked for
#[derive(Debug, Clone, Copy)]
pub struct FixedXdrRate {
    rate: f64,
}

impl FixedXdrRate {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }
}

impl Default for FixedXdrRate {
    fn default() -> Self {
        Self::new(APPROXIMATE_XDR_USD_RATE)
    }
}

#[async_trait]
impl XdrRateSource for FixedXdrRate {
    async fn xdr_to_usd(&self, _day: NaiveDate) -> Result<f64, PriceError> {
        debug!("Using approximate XDR rate of {:.2} USD", self.rate);
        Ok(self.rate)
    }
}

/// Provides "today"
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// UTC wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

#[derive(Clone)]
pub struct PriceService {
    xdr_source: Arc<dyn XdrRateSource>,
    icp_source: Arc<dyn IcpPriceSource>,
    clock: Arc<dyn Clock>,
    cache: Cache<NaiveDate, ConversionRates>,
}

impl PriceService {
    pub fn new(
        xdr_source: Arc<dyn XdrRateSource>,
        icp_source: Arc<dyn IcpPriceSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(366) // a year of days is plenty for one process
            .build();

        Self {
            xdr_source,
            icp_source,
            clock,
            cache,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// XDR to ICP conversion rate for `target_date` (today when `None`)
    pub async fn get_xdr_to_icp_rate(
        &self,
        target_date: Option<NaiveDate>,
    ) -> Result<ConversionRates, PriceError> {
        let day = target_date.unwrap_or_else(|| self.clock.today());

        if let Some(cached) = self.cache.get(&day).await {
            debug!("Using cached rate for {}", day);
            return Ok(cached);
        }

        let xdr_to_usd = self.xdr_source.xdr_to_usd(day).await?;
        let icp_to_usd = self.icp_to_usd(day).await?;

        for (leg, value) in [("XDR/USD", xdr_to_usd), ("ICP/USD", icp_to_usd)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PriceError::InvalidRate { leg, value });
            }
        }

        let rates = ConversionRates {
            xdr_to_usd,
            icp_to_usd,
            xdr_to_icp: xdr_to_usd / icp_to_usd,
            source: self.icp_source.name().to_string(),
        };

        self.cache.insert(day, rates.clone()).await;
        info!(
            "Fetched conversion rate for {}: {:.4} XDR/ICP",
            day, rates.xdr_to_icp
        );

        Ok(rates)
    }

    async fn icp_to_usd(&self, day: NaiveDate) -> Result<f64, PriceError> {
        if day == self.clock.today() {
            return self.icp_source.current_usd().await;
        }

        match self.icp_source.historical_usd(day).await {
            Ok(price) => Ok(price),
            Err(e) => {
                // Approximation: today's price stands in for the missing historical one
                warn!(
                    "Failed to fetch historical ICP rate for {}: {}. Falling back to current rate",
                    day, e
                );
                self.icp_source.current_usd().await
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
        info!("Price cache cleared");
    }
}
