//! REST venue client.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::{Venue, VenueError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    total: Decimal,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: Decimal,
}

/// Venue client talking to the exchange REST API.
pub struct RestVenue {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestVenue {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Create a client from environment variables.
    ///
    /// Required:
    /// - VENUE_API_URL
    /// - VENUE_API_KEY
    ///
    /// Missing credentials are a startup-fatal condition: the engine must not
    /// start without a reachable venue configuration.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("VENUE_API_URL").context("VENUE_API_URL not set")?;
        let api_key = std::env::var("VENUE_API_KEY").context("VENUE_API_KEY not set")?;

        Self::new(base_url, api_key)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, VenueError> {
        debug!(url = %url, "Venue request");

        let response = self
            .client
            .get(url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VenueError::Venue(format!("{} - {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| VenueError::Venue(format!("unparseable response: {}", e)))
    }
}

#[async_trait]
impl Venue for RestVenue {
    async fn fetch_balance(&self) -> Result<Decimal, VenueError> {
        let url = format!("{}/v1/account/balance", self.base_url);
        let body: BalanceResponse = self.get_json(&url).await?;
        Ok(body.total)
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, VenueError> {
        let url = format!("{}/v1/ticker?symbol={}", self.base_url, symbol);
        let body: TickerResponse = self.get_json(&url).await?;
        Ok(body.price)
    }
}
