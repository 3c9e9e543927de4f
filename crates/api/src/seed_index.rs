//! External user-index client: a thin `reqwest` client over the
//! subgraph-backed "wallets with outstanding borrows" endpoint that seeds
//! the candidate manager.
//!
//! A `reqwest::Client` plus a base URL, one GET per query, `serde` rows
//! deserialized straight off the wire. No profitability filtering or
//! bad-debt analytics here — the engine only needs addresses to start
//! watching, not USD-denominated position sizing.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://api.example-subgraph.invalid";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// One row of the user-index response: an address with outstanding debt and,
/// when the index tracks it, a last-known health factor. `health_factor` is
/// informational only — the engine always re-reads HF itself before trusting
/// a number for liquidation decisions -- best-effort, may be stale.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedWallet {
    pub address: Address,
    #[serde(default)]
    pub health_factor: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WalletsResponse {
    #[serde(default)]
    wallets: Vec<SeedWallet>,
}

/// Client for an external index of borrowers, used to seed the candidate
/// manager at startup and on the seeder's periodic cadence.
pub struct SeedIndexClient {
    client: reqwest::Client,
    base_url: String,
}

impl SeedIndexClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Best-effort fetch of up to `limit` addresses with outstanding
    /// borrows. No ordering guarantee; callers should treat the
    /// result as an unordered bag of candidates to seed.
    #[instrument(skip(self), fields(limit))]
    pub async fn list_users_with_borrows(&self, limit: usize) -> Result<Vec<SeedWallet>> {
        let url = format!("{}/wallets/with-borrows", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .context("seed index request failed")?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "seed index returned non-success status");
            return Ok(Vec::new());
        }

        let parsed: WalletsResponse = response
            .json()
            .await
            .context("seed index response decode failed")?;

        debug!(count = parsed.wallets.len(), "fetched seed wallets");
        Ok(parsed.wallets)
    }
}

impl Default for SeedIndexClient {
    fn default() -> Self {
        Self::new()
    }
}
