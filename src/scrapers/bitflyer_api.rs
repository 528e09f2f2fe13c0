//! bitFlyer Lightning public HTTP API
//!
//! Only the board snapshot is needed: `GET /v1/getboard?product_code=...`.
//! No retries here; a failed fetch is reported to the dispatcher and the next
//! subscription acknowledgment triggers a fresh attempt.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::board::Board;

pub const BITFLYER_API_BASE: &str = "https://api.bitflyer.com/v1";

/// Source of full board snapshots
#[async_trait::async_trait]
pub trait BoardFetcher: Send + Sync {
    async fn fetch_board(&self) -> Result<Board>;
}

pub struct BitflyerApi {
    client: Client,
    base_url: String,
    product_code: String,
}

impl BitflyerApi {
    pub fn new(base_url: &str, product_code: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("realtime-lob/0.1")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            product_code: product_code.to_string(),
        })
    }

    pub fn board_url(&self) -> String {
        format!("{}/getboard", self.base_url)
    }

    pub fn product_code(&self) -> &str {
        &self.product_code
    }
}

#[async_trait::async_trait]
impl BoardFetcher for BitflyerApi {
    async fn fetch_board(&self) -> Result<Board> {
        let url = self.board_url();
        let started = Instant::now();

        debug!(url = %url, product_code = %self.product_code, "Fetching board snapshot");

        let response = self
            .client
            .get(&url)
            .query(&[("product_code", self.product_code.as_str())])
            .send()
            .await
            .with_context(|| format!("getboard request failed for {}", self.product_code))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "getboard failed with status {}: {}",
                status,
                body.trim()
            ));
        }

        let board: Board = response
            .json()
            .await
            .context("Failed to parse getboard response")?;

        info!(
            product_code = %self.product_code,
            bids = board.bids.len(),
            asks = board.asks.len(),
            mid_price = %board.mid_price,
            latency_ms = started.elapsed().as_millis() as u64,
            "Fetched board snapshot"
        );

        Ok(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_url_strips_trailing_slash() {
        let api = BitflyerApi::new("https://api.bitflyer.com/v1/", "BTC_JPY", Duration::from_secs(5))
            .unwrap();
        assert_eq!(api.board_url(), "https://api.bitflyer.com/v1/getboard");
        assert_eq!(api.product_code(), "BTC_JPY");
    }

    #[tokio::test]
    async fn test_fetch_board_live() {
        // Opt-in: hits the public endpoint
        if std::env::var("BITFLYER_LIVE_TESTS").is_err() {
            return;
        }

        let api = BitflyerApi::new(BITFLYER_API_BASE, "BTC_JPY", Duration::from_secs(10)).unwrap();
        let board = api.fetch_board().await.unwrap();
        assert!(!board.bids.is_empty());
        assert!(!board.asks.is_empty());
    }
}
