//! Price Service
//!
//! Keeps an in-memory snapshot of native-asset USD prices per chain,
//! refreshed by a background task. Fill pipelines read the snapshot without
//! coordinating with the refresher. A sample older than the staleness window
//! is still served with a warning; a chain with no sample at all is a hard
//! error for the requesting fill.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A cached price observation.
#[derive(Debug, Clone, Copy)]
pub struct PriceSample {
    pub price_usd: f64,
    pub fetched_at: Instant,
}

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("no price data available for chain {0}")]
    Unavailable(u64),
}

/// Source of native-asset USD prices.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn price_usd(&self, asset_id: &str) -> Result<f64>;
}

/// HTTP price feed against a coingecko-compatible endpoint.
pub struct HttpPriceFeed {
    client: Client,
    base_url: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn price_usd(&self, asset_id: &str) -> Result<f64> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url.trim_end_matches('/'),
            asset_id
        );
        let body: HashMap<String, HashMap<String, f64>> =
            self.client.get(&url).send().await?.json().await?;
        body.get(asset_id)
            .and_then(|quotes| quotes.get("usd"))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("price feed returned no usd quote for {}", asset_id))
    }
}

/// Process-wide price cache with a background refresher.
pub struct PriceService {
    feed: Arc<dyn PriceFeed>,
    /// Price feed asset id per chain id.
    assets: HashMap<u64, String>,
    prices: RwLock<HashMap<u64, PriceSample>>,
    refresh_interval: Duration,
    stale_after: Duration,
}

impl PriceService {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        assets: HashMap<u64, String>,
        refresh_interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            feed,
            assets,
            prices: RwLock::new(HashMap::new()),
            refresh_interval,
            stale_after,
        }
    }

    /// Spawns the refresh loop. The first pass runs immediately so fills do
    /// not start against an empty cache.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                service.refresh_all().await;
                tokio::time::sleep(service.refresh_interval).await;
            }
        })
    }

    /// Refreshes every configured chain once. A failed fetch keeps the
    /// previous sample.
    pub async fn refresh_all(&self) {
        for (chain_id, asset_id) in &self.assets {
            match self.feed.price_usd(asset_id).await {
                Ok(price_usd) => {
                    let mut prices = self.prices.write().await;
                    prices.insert(
                        *chain_id,
                        PriceSample {
                            price_usd,
                            fetched_at: Instant::now(),
                        },
                    );
                    debug!(chain_id, price_usd, "updated native asset price");
                }
                Err(e) => {
                    error!(chain_id, asset = %asset_id, error = %e, "failed to update price");
                }
            }
        }
    }

    /// Current price for a chain's native asset.
    ///
    /// Serves stale samples with a warning; errors only when no sample has
    /// ever been recorded for the chain.
    pub async fn price(&self, chain_id: u64) -> Result<f64, PriceError> {
        let prices = self.prices.read().await;
        let sample = prices
            .get(&chain_id)
            .ok_or(PriceError::Unavailable(chain_id))?;

        if sample.fetched_at.elapsed() > self.stale_after {
            warn!(
                chain_id,
                age_secs = sample.fetched_at.elapsed().as_secs(),
                "price data is stale"
            );
        }

        Ok(sample.price_usd)
    }

    /// Injects a sample directly. Test support.
    pub async fn set_price(&self, chain_id: u64, price_usd: f64) {
        let mut prices = self.prices.write().await;
        prices.insert(
            chain_id,
            PriceSample {
                price_usd,
                fetched_at: Instant::now(),
            },
        );
    }
}
