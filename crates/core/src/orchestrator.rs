//! Orchestrator (C8): lifecycle and wiring of C1-C7.
//!
//! One struct holds an `Arc` to every collaborator; `run()` spawns one task
//! per event source and waits on a shutdown signal, exposing a handful of
//! read-only `pub fn` views for diagnostics instead of public fields. The
//! orchestrator owns no execution path: every task here only ever feeds the
//! candidate set, the price trigger, or the edge emitter, and the only
//! outbound side effect is pushing onto the bounded emission channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use anyhow::Result;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sentinel_chain::{
    decode_answer_updated, decode_pool_log, oracle_filter, pool_filter, ChainTransport,
    DecodeFailure, DecodedEvent, EngineError, HealthFactorReader,
};

use crate::candidates::{Candidate, CandidateSet};
use crate::config::EngineConfig;
use crate::edge_emitter::{EdgeEmitter, ScanTrigger};
use crate::emission::EmissionChannel;
use crate::math::wad_to_f64;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::price_trigger::PriceTrigger;
use crate::seeder::Seeder;

/// Capacity of the outbound emission ring buffer. Not config-surfaced (§6.3
/// enumerates exactly the options the engine recognises, and this is an
/// internal sizing knob, not a behavioural one).
const EMISSION_CHANNEL_CAPACITY: usize = 1024;

/// Upper bound on how long `run()` joins already-spawned tasks once
/// shutdown is requested, before giving up and returning anyway. Spec
/// leaves this unspecified beyond "a grace window"; five seconds matches
/// `chunk_timeout_ms`'s default so a single in-flight chunk retry has time
/// to finish. Tasks are joined, never aborted -- a task that outlives the
/// grace window keeps running detached rather than being cut off mid-scan.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How many trailing blocks of per-user emission history the edge emitter
/// keeps before `prune_block_history` drops it. Bounds `EdgeEmitter`'s
/// memory under long-running operation without affecting the one-per-block
/// cap for any block still in this window.
const EMIT_HISTORY_WINDOW_BLOCKS: u64 = 2_000;

pub struct Orchestrator {
    config: Arc<EngineConfig>,
    candidates: Arc<CandidateSet>,
    reader: Arc<HealthFactorReader>,
    emitter: Arc<EdgeEmitter>,
    price_trigger: Arc<PriceTrigger>,
    seeder: Arc<Seeder>,
    transport: Arc<ChainTransport>,
    metrics: Arc<EngineMetrics>,
    outbound: Arc<EmissionChannel>,
    pool_address: Address,
    /// Oracle feed contract address -> asset symbol, inverted once from
    /// `config.oracle_feeds` at construction time.
    oracle_feed_symbols: HashMap<Address, String>,
    current_block: Arc<AtomicU64>,
    /// Set when a scan stalls or a chunk fails; while set, block-driven
    /// rechecks narrow from canonical to selective until a scan completes
    /// cleanly, per §5's back-pressure rule.
    degraded: Arc<AtomicBool>,
    /// `true` once `shutdown()` has been called. Every spawned loop holds
    /// a clone of the receiver and checks it between iterations rather
    /// than being aborted mid-scan, so a batch read in flight when
    /// shutdown is requested still runs to completion (or its own
    /// `run_stall_abort_ms` timeout) before the loop exits.
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_requested: AtomicBool,
    /// Topics already warned about on the unrecognised-log path, so a
    /// noisy unknown event doesn't spam the log on every occurrence (§4.2,
    /// §7: "logged once per topic").
    seen_unrecognised_topics: Mutex<HashSet<B256>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        candidates: Arc<CandidateSet>,
        reader: Arc<HealthFactorReader>,
        emitter: Arc<EdgeEmitter>,
        price_trigger: Arc<PriceTrigger>,
        seeder: Arc<Seeder>,
        transport: Arc<ChainTransport>,
        metrics: Arc<EngineMetrics>,
        pool_address: Address,
        oracle_feed_symbols: HashMap<Address, String>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            candidates,
            reader,
            emitter,
            price_trigger,
            seeder,
            transport,
            metrics,
            outbound: Arc::new(EmissionChannel::new(EMISSION_CHANNEL_CAPACITY)),
            pool_address,
            oracle_feed_symbols,
            current_block: Arc::new(AtomicU64::new(0)),
            degraded: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            shutdown_requested: AtomicBool::new(false),
            seen_unrecognised_topics: Mutex::new(HashSet::new()),
        }
    }

    /// Await the next liquidatable event. Multiple callers may race this;
    /// each event is delivered to exactly one of them.
    pub async fn recv_emission(&self) -> crate::edge_emitter::LiquidatableEvent {
        self.outbound.recv().await
    }

    /// Read-only diagnostic views (§9's "diagnostic scripts poke at private
    /// fields" translation hint) -- the only way anything outside the
    /// orchestrator observes internal state.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot(
            self.candidates.len(),
            self.transport.reconnect_count(),
            self.outbound.dropped_count(),
        );
        snapshot.candidates_evicted = self.candidates.evicted_count();
        snapshot
    }

    pub fn candidate_snapshot(&self) -> Vec<Candidate> {
        self.candidates
            .addresses_all()
            .into_iter()
            .filter_map(|addr| self.candidates.get(&addr))
            .collect()
    }

    pub fn pending_emissions(&self) -> usize {
        self.outbound.pending()
    }

    pub fn current_block(&self) -> u64 {
        self.current_block.load(Ordering::Relaxed)
    }

    /// Count and, the first time this topic is seen, log a dropped log
    /// (§4.2/§7: "counted, dropped, logged once per topic"). Builds an
    /// `EngineError::Decode` purely to render it into the log line — it
    /// never leaves this component, matching the confinement policy.
    fn record_unrecognised_log(&self, topic0: B256, reason: &'static str) {
        self.metrics.record_log_unrecognised();
        if self.seen_unrecognised_topics.lock().insert(topic0) {
            let failure = DecodeFailure {
                topic0: format!("{topic0:#x}"),
                reason,
            };
            let err = EngineError::Decode {
                what: "pool/oracle log",
                topic0: failure.topic0.clone(),
            };
            warn!(
                topic0 = %failure.topic0,
                reason = failure.reason,
                error = %err,
                "dropping unrecognised log, not logging this topic again"
            );
        }
    }

    /// Starts C1 -> C2 -> C3 -> C4 -> C5/C6/C7 by spawning one task per
    /// event source, then blocks until `shutdown()` is called. Handlers
    /// never block the transport loop: each await inside a handler is
    /// either a bounded batch read with its own watchdog or a channel push,
    /// never an unbounded wait.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("orchestrator starting");

        self.seeder.seed_once(self.current_block()).await;

        let block_task = tokio::spawn(self.clone().block_loop(self.shutdown_rx.clone()));
        let pool_task = tokio::spawn(self.clone().pool_log_loop(self.shutdown_rx.clone()));
        let oracle_task = if self.oracle_feed_symbols.is_empty() {
            None
        } else {
            Some(tokio::spawn(
                self.clone().oracle_log_loop(self.shutdown_rx.clone()),
            ))
        };
        let seed_task = tokio::spawn(self.clone().seed_loop(self.shutdown_rx.clone()));

        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        info!("shutdown requested, draining in-flight scans");

        let drain = async {
            let oracle_join = async {
                if let Some(task) = oracle_task {
                    let _ = task.await;
                }
            };
            let _ = tokio::join!(block_task, pool_task, seed_task, oracle_join);
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("shutdown grace window elapsed before every task drained");
        }
        info!("orchestrator stopped");
        Ok(())
    }

    /// Signal every spawned loop to stop after its current iteration.
    /// Idempotent. In-flight scans are allowed to finish -- nothing here
    /// cancels a task mid-await.
    pub fn shutdown(&self) {
        if !self.shutdown_requested.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(true);
        }
    }

    async fn block_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut stream = match self.transport.subscribe_blocks().await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "failed to subscribe to block heads");
                return;
            }
        };

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => continue,
                maybe_block = stream.next() => {
                    let Some(block_number) = maybe_block else { break };
                    self.current_block.store(block_number, Ordering::Relaxed);
                    self.metrics.record_block();
                    self.canonical_recheck(block_number).await;
                    self.emitter
                        .prune_block_history(block_number, EMIT_HISTORY_WINDOW_BLOCKS);
                }
            }
        }
        warn!("block head subscription ended");
    }

    /// Ground-truth sweep: every candidate, on every block, unless back-
    /// pressure has degraded this to a selective scan (§5).
    async fn canonical_recheck(&self, block_number: u64) {
        let addresses = if self.degraded.load(Ordering::Relaxed) {
            debug!("degraded: running selective scan instead of canonical recheck");
            self.candidates
                .addresses_low_hf(self.config.always_include_hf_below)
        } else {
            self.candidates.addresses_all()
        };
        self.run_scan(addresses, block_number, ScanTrigger::Head)
            .await;
    }

    async fn pool_log_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let filter = pool_filter(self.pool_address);
        let mut stream = match self.transport.subscribe_logs(filter).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "failed to subscribe to pool logs");
                return;
            }
        };

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => continue,
                maybe_log = stream.next() => {
                    let Some(log) = maybe_log else { break };
                    match decode_pool_log(&log) {
                        Some(DecodedEvent::Unknown { topic0, .. }) => {
                            self.record_unrecognised_log(topic0, "unrecognised pool log topic0");
                        }
                        Some(event) => {
                            self.metrics.record_log_decoded();
                            self.on_pool_event(event).await;
                        }
                        None => {
                            let topic0 = log.topics().first().copied().unwrap_or_default();
                            self.record_unrecognised_log(topic0, "malformed pool log payload");
                        }
                    }
                }
            }
        }
        warn!("pool log subscription ended");
    }

    async fn on_pool_event(&self, event: DecodedEvent) {
        let block_number = event.block_number().max(self.current_block());
        let users = event.affected_users();

        for user in &users {
            self.candidates.touch(*user, block_number);
        }

        if !users.is_empty() {
            // Targeted scan: §4.2's rule that LiquidationCall is "logged and
            // still evaluated" falls out of this unconditionally, since the
            // liquidated user is always in `affected_users`.
            self.run_scan(users.into_vec(), block_number, ScanTrigger::Event)
                .await;
        }

        if matches!(event, DecodedEvent::ReserveDataUpdated { .. }) {
            let selective = self
                .candidates
                .addresses_low_hf(self.config.always_include_hf_below);
            self.run_scan(selective, block_number, ScanTrigger::Event)
                .await;
        }
    }

    async fn oracle_log_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let feeds: Vec<Address> = self.oracle_feed_symbols.keys().copied().collect();
        let filter = oracle_filter(feeds);
        let mut stream = match self.transport.subscribe_logs(filter).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "failed to subscribe to oracle logs");
                return;
            }
        };

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => continue,
                maybe_log = stream.next() => {
                    let Some(log) = maybe_log else { break };
                    let feed_address = log.address();
                    let topic0 = log.topics().first().copied().unwrap_or_default();
                    let Some(symbol) = self.oracle_feed_symbols.get(&feed_address).cloned() else {
                        self.record_unrecognised_log(topic0, "oracle log address not a configured feed");
                        continue;
                    };
                    match decode_answer_updated(&log, feed_address) {
                        Some(event) => {
                            self.metrics.record_log_decoded();
                            self.on_oracle_event(feed_address, symbol, event).await;
                        }
                        None => {
                            self.record_unrecognised_log(topic0, "malformed AnswerUpdated payload");
                        }
                    }
                }
            }
        }
        warn!("oracle log subscription ended");
    }

    async fn on_oracle_event(&self, feed: Address, symbol: String, event: DecodedEvent) {
        let DecodedEvent::AnswerUpdated {
            price,
            block_number,
            ..
        } = event
        else {
            return;
        };
        let block_number = block_number.max(self.current_block());

        let Some(fired) = self
            .price_trigger
            .observe(feed, &symbol, price, &self.config)
        else {
            return;
        };

        self.metrics.record_price_trigger();
        info!(
            symbol = %fired.symbol,
            move_bps = fired.move_bps,
            "price trigger fired, issuing selective scan"
        );

        let selective = self
            .candidates
            .addresses_low_hf(self.config.always_include_hf_below);
        self.run_scan(selective, block_number, ScanTrigger::Price)
            .await;
    }

    async fn seed_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            self.seeder.seed_once(self.current_block()).await;

            let delay = crate::seeder::jittered_interval(self.config.seed_interval());
            tokio::select! {
                _ = shutdown_rx.changed() => continue,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Read HF for `addresses`, feed every successful reading into the
    /// candidate set and edge emitter, and push any resulting emissions.
    /// Bounded by `run_stall_abort_ms`; a whole-run timeout degrades future
    /// canonical rechecks to selective scans rather than retrying here.
    async fn run_scan(&self, addresses: Vec<Address>, block_number: u64, trigger: ScanTrigger) {
        if addresses.is_empty() {
            return;
        }

        let outcome = tokio::time::timeout(
            self.config.run_stall_abort(),
            self.reader.read_batch(&addresses),
        )
        .await;

        let (readings, outcome) = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    requested = addresses.len(),
                    "scan aborted: exceeded run_stall_abort_ms"
                );
                self.degraded.store(true, Ordering::Relaxed);
                self.metrics.record_scan(false, 0);
                return;
            }
        };

        self.degraded
            .store(outcome.failed_chunks > 0 || outcome.timed_out, Ordering::Relaxed);
        self.metrics
            .record_scan(outcome.failed_chunks == 0, outcome.updated as u64);

        for reading in &readings {
            self.candidates.update_hf(
                &reading.user,
                wad_to_f64(reading.health_factor_wad),
                block_number,
            );

            if let Some(liq_event) = self.emitter.observe(
                reading.user,
                reading.health_factor_wad,
                block_number,
                trigger,
                &self.config,
            ) {
                self.metrics.record_emission();
                self.outbound.push(liq_event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_api::SeedIndexClient;

    fn feed_map() -> HashMap<Address, String> {
        let mut m = HashMap::new();
        m.insert(Address::repeat_byte(0xAA), "WETH".to_string());
        m
    }

    #[test]
    fn test_oracle_feed_symbols_lookup() {
        let m = feed_map();
        assert_eq!(m.get(&Address::repeat_byte(0xAA)).unwrap(), "WETH");
        assert!(m.get(&Address::repeat_byte(0xBB)).is_none());
    }

    fn test_orchestrator(config: EngineConfig) -> Orchestrator {
        let config = Arc::new(config);
        let candidates = Arc::new(CandidateSet::from_config(&config));
        let reader = Arc::new(HealthFactorReader::new(
            "http://127.0.0.1:1",
            Address::ZERO,
            Address::ZERO,
            config.chunk_size,
            config.chunk_timeout(),
            0,
            8,
        ));
        let metrics = Arc::new(EngineMetrics::new());
        let seeder = Arc::new(Seeder::new(
            Arc::new(SeedIndexClient::with_base_url("http://127.0.0.1:1")),
            None,
            candidates.clone(),
            metrics.clone(),
            10,
            5_000,
        ));
        let transport = Arc::new(ChainTransport::new("ws://127.0.0.1:1"));

        Orchestrator::new(
            config,
            candidates,
            reader,
            Arc::new(EdgeEmitter::new()),
            Arc::new(PriceTrigger::new(false)),
            seeder,
            transport,
            metrics,
            Address::ZERO,
            HashMap::new(),
        )
    }

    /// Back-pressure (§5): an unreachable reader fails the whole canonical
    /// scan and flips `degraded`, which narrows every subsequent recheck
    /// from "every candidate" to `addresses_low_hf` until a scan succeeds
    /// cleanly again.
    #[tokio::test]
    async fn test_degraded_back_pressure_narrows_to_selective_scan() {
        let config = EngineConfig {
            run_stall_abort_ms: 300,
            always_include_hf_below: 1.10,
            ..EngineConfig::default()
        };
        let orchestrator = test_orchestrator(config);

        let low_hf_addr = Address::repeat_byte(0x01);
        let healthy_addr = Address::repeat_byte(0x02);
        orchestrator.candidates.seed_bulk([low_hf_addr, healthy_addr], 1);
        orchestrator.candidates.update_hf(&low_hf_addr, 0.5, 1);
        orchestrator.candidates.update_hf(&healthy_addr, 2.0, 1);

        assert!(!orchestrator.degraded.load(Ordering::Relaxed));

        orchestrator.canonical_recheck(1).await;
        assert!(
            orchestrator.degraded.load(Ordering::Relaxed),
            "an unreachable HF reader must degrade the orchestrator"
        );

        let selective = orchestrator
            .candidates
            .addresses_low_hf(orchestrator.config.always_include_hf_below);
        assert!(selective.contains(&low_hf_addr));
        assert!(!selective.contains(&healthy_addr));
    }
}
