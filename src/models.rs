//! Process configuration

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::scrapers::bitflyer_api::BITFLYER_API_BASE;
use crate::scrapers::lightstream_ws::LightstreamConfig;

pub const DEFAULT_PRODUCT_CODE: &str = "BTC_JPY";
pub const DEFAULT_BOOK_DEPTH: usize = 25;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// bitFlyer product code, e.g. `BTC_JPY` or `FX_BTC_JPY`
    pub product_code: String,
    pub api_base_url: String,
    pub lightstream: LightstreamConfig,
    /// Levels per side shown by the renderer
    pub book_depth: usize,
    pub http_timeout: Duration,
    /// When set, logs go to `<dir>/realtime_lob.log` instead of stderr
    pub log_output_directory: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let product_code = std::env::var("BITFLYER_PRODUCT_CODE")
            .unwrap_or_else(|_| DEFAULT_PRODUCT_CODE.to_string());

        let api_base_url = std::env::var("BITFLYER_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| BITFLYER_API_BASE.to_string());

        let book_depth = match std::env::var("BOOK_DEPTH") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("BOOK_DEPTH must be a positive integer, got {:?}", v))?,
            Err(_) => DEFAULT_BOOK_DEPTH,
        };

        let http_timeout_ms: u64 = std::env::var("HTTP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&ms| ms > 0)
            .unwrap_or(10_000);

        let log_output_directory = std::env::var("LOG_OUTPUT_DIRECTORY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let config = Self {
            product_code: product_code.trim().to_string(),
            api_base_url: api_base_url.trim().to_string(),
            lightstream: LightstreamConfig::from_env(),
            book_depth,
            http_timeout: Duration::from_millis(http_timeout_ms),
            log_output_directory,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn with_product_code(mut self, product_code: String) -> Self {
        self.product_code = product_code.trim().to_string();
        self
    }

    pub fn with_book_depth(mut self, book_depth: usize) -> Self {
        self.book_depth = book_depth;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.product_code.is_empty() {
            bail!("product code must not be empty");
        }
        if self.book_depth == 0 {
            bail!("book depth must be at least 1");
        }
        Ok(())
    }
}
