//! Binary entry point: wires chain transport, candidate manager, batch
//! reader, price trigger, edge emitter, and seeder into a running
//! orchestrator, then logs every emitted liquidatable event.
//!
//! Submitting a liquidation transaction against a detected position is out
//! of scope here -- this binary is a detection feed, not an executor. A
//! real deployment would attach its own consumer to
//! [`sentinel_core::Orchestrator::recv_emission`] in place of the logging
//! loop below.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sentinel_api::SeedIndexClient;
use sentinel_chain::{decode_pool_log, pool_filter, ChainTransport, HealthFactorReader};
use sentinel_core::{
    init_config, CandidateSet, EdgeEmitter, EngineConfig, EngineMetrics, LogWalkSeedSource,
    Orchestrator, PriceTrigger, Seeder,
};

const DEFAULT_MULTICALL3: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";
const DEFAULT_SEED_LOG_WALK_WINDOW_BLOCKS: u64 = 5_000;
const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 8;

const RECOGNISED_OPTIONS: &[&str] = &[
    "candidate_max",
    "execution_hf_threshold_bps",
    "hysteresis_bps",
    "always_include_hf_below",
    "chunk_size",
    "chunk_timeout_ms",
    "chunk_retry_attempts",
    "seed_interval_sec",
    "price_trigger_enabled",
    "price_trigger_drop_bps",
    "price_trigger_debounce_sec",
    "price_trigger_cumulative",
    "price_trigger_bps_by_asset",
    "price_trigger_debounce_by_asset",
    "oracle_feeds",
    "run_stall_abort_ms",
];

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();
    dotenvy::dotenv().ok();
    init_tracing();

    let engine_config = Arc::new(load_engine_config()?);
    engine_config.log_config();
    init_config((*engine_config).clone());

    let deployment = load_deployment()?;
    info!(
        pool = %deployment.pool,
        multicall = %deployment.multicall,
        "deployment configured"
    );

    let orchestrator = build_orchestrator(engine_config, deployment).await?;

    let consumer = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            loop {
                let event = orchestrator.recv_emission().await;
                info!(
                    user = %event.user,
                    hf = event.hf,
                    block = event.block,
                    trigger = ?event.trigger,
                    reason = ?event.reason,
                    "liquidatable position detected"
                );
            }
        })
    };

    let run_handle = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to install ctrl-c handler")?;
    info!("shutdown signal received");
    orchestrator.shutdown();

    if let Err(e) = run_handle.await {
        warn!(error = %e, "orchestrator task did not join cleanly");
    }
    consumer.abort();

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,sentinel_core=debug,sentinel_chain=debug")
        }))
        .init();
}

struct Deployment {
    pool: Address,
    multicall: Address,
    ws_url: String,
    http_url: String,
    seed_index_url: Option<String>,
}

fn load_deployment() -> Result<Deployment> {
    let ws_url = std::env::var("SENTINEL_WS_URL").context("missing env var SENTINEL_WS_URL")?;
    let http_url =
        std::env::var("SENTINEL_HTTP_URL").context("missing env var SENTINEL_HTTP_URL")?;
    let pool = parse_address_env("SENTINEL_POOL_ADDRESS")?;
    let multicall = match std::env::var("SENTINEL_MULTICALL_ADDRESS") {
        Ok(raw) => raw
            .parse()
            .context("invalid address for SENTINEL_MULTICALL_ADDRESS")?,
        Err(_) => DEFAULT_MULTICALL3.parse().expect("valid default address"),
    };
    let seed_index_url = std::env::var("SENTINEL_SEED_INDEX_URL").ok();

    Ok(Deployment {
        pool,
        multicall,
        ws_url,
        http_url,
        seed_index_url,
    })
}

fn parse_address_env(name: &str) -> Result<Address> {
    std::env::var(name)
        .with_context(|| format!("missing env var {name}"))?
        .parse()
        .with_context(|| format!("invalid address for {name}"))
}

/// Recognised options (§6.3) are read from environment variables of the
/// same name, uppercased, under the `SENTINEL_` prefix -- e.g.
/// `SENTINEL_CANDIDATE_MAX=500`. Anything unset keeps its built-in default.
fn load_engine_config() -> Result<EngineConfig> {
    let mut options = HashMap::new();
    for key in RECOGNISED_OPTIONS {
        let env_name = format!("SENTINEL_{}", key.to_uppercase());
        if let Ok(value) = std::env::var(&env_name) {
            options.insert(key.to_string(), value);
        }
    }
    Ok(EngineConfig::from_options(&options)?)
}

async fn build_orchestrator(
    config: Arc<EngineConfig>,
    deployment: Deployment,
) -> Result<Arc<Orchestrator>> {
    let transport = Arc::new(ChainTransport::new(deployment.ws_url.clone()));
    let candidates = Arc::new(CandidateSet::from_config(&config));
    let reader = Arc::new(HealthFactorReader::new(
        deployment.http_url.clone(),
        deployment.pool,
        deployment.multicall,
        config.chunk_size,
        config.chunk_timeout(),
        config.chunk_retry_attempts,
        DEFAULT_MAX_CONCURRENT_CHUNKS,
    ));
    let emitter = Arc::new(EdgeEmitter::new());
    let price_trigger = Arc::new(PriceTrigger::from_config(&config));
    let metrics = Arc::new(EngineMetrics::new());

    let seed_index = Arc::new(match &deployment.seed_index_url {
        Some(url) => SeedIndexClient::with_base_url(url.clone()),
        None => SeedIndexClient::new(),
    });
    let log_walk: Arc<dyn LogWalkSeedSource> = Arc::new(PoolLogWalkSeedSource {
        http_url: deployment.http_url.clone(),
        pool_address: deployment.pool,
    });
    let seeder = Arc::new(Seeder::new(
        seed_index,
        Some(log_walk),
        candidates.clone(),
        metrics.clone(),
        config.candidate_max,
        DEFAULT_SEED_LOG_WALK_WINDOW_BLOCKS,
    ));

    let oracle_feed_symbols: HashMap<Address, String> = config
        .oracle_feeds
        .iter()
        .map(|(symbol, address)| (*address, symbol.clone()))
        .collect();

    Ok(Arc::new(Orchestrator::new(
        config,
        candidates,
        reader,
        emitter,
        price_trigger,
        seeder,
        transport,
        metrics,
        deployment.pool,
        oracle_feed_symbols,
    )))
}

/// Fallback seed source (C7): walks Pool logs over a trailing block window
/// via the HTTP provider and extracts affected users, for use when the
/// external borrower index is unreachable.
struct PoolLogWalkSeedSource {
    http_url: String,
    pool_address: Address,
}

#[async_trait::async_trait]
impl LogWalkSeedSource for PoolLogWalkSeedSource {
    async fn recent_active_users(&self, window_blocks: u64) -> anyhow::Result<Vec<Address>> {
        let url = self.http_url.parse().context("invalid HTTP RPC url")?;
        let provider = ProviderBuilder::new().on_http(url);
        let latest = provider.get_block_number().await?;
        let from = latest.saturating_sub(window_blocks);

        let filter: Filter = pool_filter(self.pool_address)
            .from_block(from)
            .to_block(latest);
        let logs = provider.get_logs(&filter).await?;

        let mut seen = HashSet::new();
        for log in &logs {
            if let Some(event) = decode_pool_log(log) {
                seen.extend(event.affected_users());
            }
        }
        Ok(seen.into_iter().collect())
    }
}

fn print_banner() {
    println!(
        r#"
     ____  _____ _   _ _____ ___ _   _ _____ _
    / ___|| ____| \ | |_   _|_ _| \ | | ____| |
    \___ \|  _| |  \| | | |  | ||  \| |  _| | |
     ___) | |___| |\  | | |  | || |\  | |___| |___
    |____/|_____|_| \_| |_| |___|_| \_|_____|_____|
    liquidation detection engine
"#
    );
}
