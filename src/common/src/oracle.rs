//! Price oracle client for the playable token set.
//!
//! One bulk request per fetch; when the bulk endpoint fails, the client
//! fans out to per-token requests, and a token that still fails yields a
//! zero-value quote. Callers treat a zero quote as "skip this position for
//! this cycle"; the oracle itself never raises.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::PriceQuote;

#[derive(Debug, Error)]
enum OracleError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response shape: {0}")]
    Parse(String),
}

/// Contract every price source satisfies: never fails, returns an empty
/// vector on total failure or empty input.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_prices(&self, mints: &[String]) -> Vec<PriceQuote>;
}

/// Raw per-token payload from the price API.
#[derive(Debug, Deserialize)]
struct RawPrice {
    value: f64,
    #[serde(rename = "updateUnixTime")]
    update_unix_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MultiPriceResponse {
    data: HashMap<String, Option<RawPrice>>,
}

#[derive(Debug, Deserialize)]
struct SinglePriceResponse {
    data: Option<RawPrice>,
}

/// Birdeye-style price API client.
pub struct BirdeyeClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl BirdeyeClient {
    pub fn new(config: &Config) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: config.oracle_api_url.clone(),
            api_key: config.oracle_api_key.clone(),
        }
    }

    fn quote_from_raw(mint: &str, raw: RawPrice) -> PriceQuote {
        let value = Decimal::try_from(raw.value).unwrap_or(Decimal::ZERO);
        let update_ts = raw
            .update_unix_time
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);
        PriceQuote {
            token_mint: mint.to_string(),
            value,
            update_ts,
        }
    }

    fn zero_quote(mint: &str) -> PriceQuote {
        PriceQuote {
            token_mint: mint.to_string(),
            value: Decimal::ZERO,
            update_ts: Utc::now(),
        }
    }

    async fn fetch_bulk(&self, mints: &[String]) -> Result<Vec<PriceQuote>, OracleError> {
        let url = format!("{}/defi/multi_price", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .query(&[("list_address", mints.join(","))])
            .send()
            .await?
            .error_for_status()?;

        let body: MultiPriceResponse = response.json().await?;
        if body.data.is_empty() {
            return Err(OracleError::Parse("empty price map".to_string()));
        }

        let mut data = body.data;
        Ok(mints
            .iter()
            .map(|mint| match data.remove(mint.as_str()).flatten() {
                Some(raw) => Self::quote_from_raw(mint, raw),
                None => Self::zero_quote(mint),
            })
            .collect())
    }

    async fn fetch_single(&self, mint: &str) -> Result<PriceQuote, OracleError> {
        let url = format!("{}/defi/price", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .query(&[("address", mint)])
            .send()
            .await?
            .error_for_status()?;

        let body: SinglePriceResponse = response.json().await?;
        match body.data {
            Some(raw) => Ok(Self::quote_from_raw(mint, raw)),
            None => Err(OracleError::Parse(format!("no price for {mint}"))),
        }
    }
}

#[async_trait]
impl PriceOracle for BirdeyeClient {
    async fn get_prices(&self, mints: &[String]) -> Vec<PriceQuote> {
        if mints.is_empty() {
            return Vec::new();
        }

        match self.fetch_bulk(mints).await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!("Bulk price fetch failed, falling back per token: {}", e);
                let mut quotes = Vec::with_capacity(mints.len());
                for mint in mints {
                    match self.fetch_single(mint).await {
                        Ok(quote) => quotes.push(quote),
                        Err(e) => {
                            debug!("Price fetch failed for {}: {}", mint, e);
                            quotes.push(Self::zero_quote(mint));
                        }
                    }
                }
                quotes
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BirdeyeClient {
        BirdeyeClient {
            http: Client::new(),
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: String::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_input_skips_the_network() {
        // the base URL is unreachable; an empty input must not touch it
        let quotes = client().get_prices(&[]).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn test_total_failure_yields_zero_quotes() {
        let mints = vec!["mint-a".to_string(), "mint-b".to_string()];
        let quotes = client().get_prices(&mints).await;
        assert_eq!(quotes.len(), 2);
        assert!(quotes.iter().all(|q| q.value.is_zero()));
    }

    #[test]
    fn test_raw_price_conversion() {
        let quote = BirdeyeClient::quote_from_raw(
            "mint-a",
            RawPrice {
                value: 1.25,
                update_unix_time: Some(1_700_000_000),
            },
        );
        assert_eq!(quote.token_mint, "mint-a");
        assert_eq!(quote.value, Decimal::try_from(1.25).unwrap());
        assert_eq!(quote.update_ts.timestamp(), 1_700_000_000);
    }
}
