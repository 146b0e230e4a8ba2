//! Polymarket REST client (Gamma metadata API + CLOB price API).
//!
//! Every response is deserialized into a typed record at this boundary; the
//! trading core never touches raw JSON.

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::PERIOD_DURATION_SECS;

/// How many earlier period slugs to try when the current one is missing.
const DISCOVERY_BACKTRACK_PERIODS: i64 = 3;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {status} - {body}")]
    Http { status: StatusCode, body: String },
    #[error("no market found for slug: {0}")]
    MarketNotFound(String),
    #[error("no active market found for asset: {0}")]
    NoActiveMarket(String),
    #[error("unsupported asset: {0} (supported: btc, eth, sol, xrp)")]
    UnsupportedAsset(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Market identity resolved from the Gamma API.
#[derive(Debug, Clone, Deserialize)]
pub struct Market {
    #[serde(rename = "conditionId", alias = "condition_id")]
    pub condition_id: String,
    pub slug: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
}

/// Event wrapper returned by the Gamma slug endpoint.
#[derive(Debug, Deserialize)]
struct GammaEvent {
    #[serde(default)]
    markets: Vec<Market>,
}

/// One resolved outcome token from the CLOB market details.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketToken {
    pub token_id: String,
    pub outcome: String,
    #[serde(default)]
    pub winner: bool,
}

/// Market details from the CLOB API.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketDetails {
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub tokens: Vec<MarketToken>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

/// Which side of the book to quote. BUY reads the best bid, SELL the best ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSide {
    Buy,
    Sell,
}

impl PriceSide {
    fn as_str(self) -> &'static str {
        match self {
            PriceSide::Buy => "BUY",
            PriceSide::Sell => "SELL",
        }
    }
}

/// Polymarket REST client
pub struct PolymarketClient {
    client: Client,
    clob_url: String,
    gamma_url: String,
}

impl PolymarketClient {
    pub fn new(timeout_ms: u64) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self {
            client,
            clob_url: std::env::var("POLYMARKET_CLOB_URL")
                .unwrap_or_else(|_| "https://clob.polymarket.com".to_string()),
            gamma_url: std::env::var("POLYMARKET_GAMMA_URL")
                .unwrap_or_else(|_| "https://gamma-api.polymarket.com".to_string()),
        })
    }

    async fn get_checked(&self, url: &str) -> Result<reqwest::Response, ApiError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http { status, body });
        }
        Ok(response)
    }

    /// Resolve a market by its Gamma event slug.
    pub async fn get_market_by_slug(&self, slug: &str) -> Result<Market, ApiError> {
        let url = format!("{}/events/slug/{}", self.gamma_url, slug);
        let event: GammaEvent = match self.get_checked(&url).await {
            Ok(response) => response.json().await?,
            Err(ApiError::Http { status, .. }) if status == StatusCode::NOT_FOUND => {
                return Err(ApiError::MarketNotFound(slug.to_string()));
            }
            Err(e) => return Err(e),
        };

        event
            .markets
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::MarketNotFound(slug.to_string()))
    }

    /// Fetch market details (resolution state, outcome tokens, winner flags).
    pub async fn get_market_details(&self, condition_id: &str) -> Result<MarketDetails, ApiError> {
        let url = format!("{}/markets/{}", self.clob_url, condition_id);
        let details: MarketDetails = self.get_checked(&url).await?.json().await?;
        Ok(details)
    }

    /// Fetch the best price for one side of a token's book.
    pub async fn get_best_price(
        &self,
        token_id: &str,
        side: PriceSide,
    ) -> Result<f64, ApiError> {
        let url = format!(
            "{}/price?side={}&token_id={}",
            self.clob_url,
            side.as_str(),
            token_id
        );
        let response: PriceResponse = self.get_checked(&url).await?.json().await?;
        response
            .price
            .parse::<f64>()
            .map_err(|_| ApiError::InvalidResponse(format!("unparseable price: {}", response.price)))
    }

    /// Find the active up/down market for an asset in the current settlement
    /// period, backtracking up to 3 periods if the fresh slug is not listed
    /// yet.
    pub async fn discover_market_for_asset(&self, asset: &str) -> Result<Market, ApiError> {
        let prefix = slug_prefix_for_asset(asset)?;
        let rounded = (Utc::now().timestamp() / PERIOD_DURATION_SECS) * PERIOD_DURATION_SECS;

        for offset in 0..=DISCOVERY_BACKTRACK_PERIODS {
            let slug = format!(
                "{}-updown-15m-{}",
                prefix,
                rounded - offset * PERIOD_DURATION_SECS
            );
            debug!("Trying market slug: {slug}");
            match self.get_market_by_slug(&slug).await {
                Ok(market) if market.active && !market.closed => return Ok(market),
                Ok(_) => continue,
                Err(ApiError::MarketNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(ApiError::NoActiveMarket(asset.to_string()))
    }
}

fn slug_prefix_for_asset(asset: &str) -> Result<&'static str, ApiError> {
    match asset.to_lowercase().as_str() {
        "btc" => Ok("btc"),
        "eth" => Ok("eth"),
        "sol" => Ok("sol"),
        "xrp" => Ok("xrp"),
        other => Err(ApiError::UnsupportedAsset(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_prefix_for_supported_assets() {
        assert_eq!(slug_prefix_for_asset("BTC").unwrap(), "btc");
        assert_eq!(slug_prefix_for_asset("eth").unwrap(), "eth");
        assert!(matches!(
            slug_prefix_for_asset("doge"),
            Err(ApiError::UnsupportedAsset(_))
        ));
    }

    #[test]
    fn test_market_details_parses_winner_flags() {
        let json = r#"{
            "condition_id": "0xabc",
            "closed": true,
            "tokens": [
                {"token_id": "111", "outcome": "Up", "winner": true, "price": "1"},
                {"token_id": "222", "outcome": "Down", "winner": false, "price": "0"}
            ]
        }"#;
        let details: MarketDetails = serde_json::from_str(json).unwrap();
        assert!(details.closed);
        assert_eq!(details.tokens.len(), 2);
        assert!(details.tokens[0].winner);
        assert!(!details.tokens[1].winner);
    }

    #[test]
    fn test_gamma_market_accepts_both_casings() {
        let camel: Market =
            serde_json::from_str(r#"{"conditionId": "0x1", "slug": "btc-updown-15m-0", "active": true, "closed": false}"#)
                .unwrap();
        let snake: Market =
            serde_json::from_str(r#"{"condition_id": "0x1", "slug": "btc-updown-15m-0", "active": true, "closed": false}"#)
                .unwrap();
        assert_eq!(camel.condition_id, snake.condition_id);
    }
}
