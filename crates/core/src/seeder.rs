//! Seeder (C7): periodically ingests candidate addresses from an external
//! user index, falling back to an on-chain log walk when that index is
//! unavailable. Never emits; only ever feeds the candidate manager.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use rand::Rng;
use sentinel_api::SeedIndexClient;
use tracing::{debug, info, warn};

use crate::candidates::CandidateSet;
use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;

/// A bounded-window log walk used as a fallback seed source when the
/// external index is unreachable. Implementations live in `sentinel-chain`
/// (the transport crate owns log queries); the seeder only needs this much
/// of an interface to stay decoupled from the concrete RPC client.
#[async_trait::async_trait]
pub trait LogWalkSeedSource: Send + Sync {
    async fn recent_active_users(&self, window_blocks: u64) -> anyhow::Result<Vec<Address>>;
}

/// Periodic ingestion of candidate addresses (C7). Owns no mutable state of
/// its own beyond the jitter RNG; writes land exclusively in the shared
/// [`CandidateSet`].
pub struct Seeder {
    user_index: Arc<SeedIndexClient>,
    log_walk: Option<Arc<dyn LogWalkSeedSource>>,
    candidates: Arc<CandidateSet>,
    metrics: Arc<EngineMetrics>,
    seed_limit: usize,
    log_walk_window_blocks: u64,
}

impl Seeder {
    pub fn new(
        user_index: Arc<SeedIndexClient>,
        log_walk: Option<Arc<dyn LogWalkSeedSource>>,
        candidates: Arc<CandidateSet>,
        metrics: Arc<EngineMetrics>,
        seed_limit: usize,
        log_walk_window_blocks: u64,
    ) -> Self {
        Self {
            user_index,
            log_walk,
            candidates,
            metrics,
            seed_limit,
            log_walk_window_blocks,
        }
    }

    /// Run one seed cycle at `block`: try the external index first, and
    /// only fall back to the log walk if it is unavailable or returns
    /// nothing. An unreachable index must never abort the cycle -- it is
    /// logged and skipped, not propagated.
    pub async fn seed_once(&self, block: u64) -> usize {
        match self.user_index.list_users_with_borrows(self.seed_limit).await {
            Ok(wallets) if !wallets.is_empty() => {
                let addresses: Vec<Address> = wallets.iter().map(|w| w.address).collect();
                let added = self.candidates.seed_bulk(addresses, block);
                self.metrics.record_candidates_seeded(added as u64);
                info!(added, source = "user_index", "seed cycle complete");
                return added;
            }
            Ok(_) => {
                debug!("user index returned no wallets, falling back to log walk");
            }
            Err(e) => {
                warn!(error = %e, "user index unavailable, falling back to log walk");
            }
        }

        let Some(log_walk) = &self.log_walk else {
            warn!("no log-walk fallback configured, seed cycle yielded nothing");
            return 0;
        };

        match log_walk.recent_active_users(self.log_walk_window_blocks).await {
            Ok(addresses) => {
                let added = self.candidates.seed_bulk(addresses, block);
                self.metrics.record_candidates_seeded(added as u64);
                info!(added, source = "log_walk", "seed cycle complete");
                added
            }
            Err(e) => {
                warn!(error = %e, "log-walk seed source failed");
                0
            }
        }
    }

}

/// Apply ±20% jitter to a base interval. Used by the orchestrator's own
/// cancel-aware seed loop, which needs the jitter without the unconditional
/// `loop { ... sleep ... }` `run_periodic` used to wrap it in.
pub(crate) fn jittered_interval(base: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = rng.gen_range(0.8..=1.2);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}
