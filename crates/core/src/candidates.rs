//! Bounded candidate set (C3): the working list of addresses the batch
//! reader keeps polling for health-factor updates.
//!
//! A single flat `DashMap` with a capacity cap, rather than tiered by risk
//! band. Eviction always targets the
//! candidate furthest from trouble (highest `last_hf`, ties broken by
//! oldest `last_seen_block`), and any candidate whose last known HF is
//! below `always_include_hf_below` is protected from eviction regardless
//! of capacity pressure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use alloy::primitives::Address;
use dashmap::DashMap;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub address: Address,
    pub last_hf: Option<f64>,
    pub last_seen_block: u64,
    pub added_at: Instant,
}

impl Candidate {
    fn new(address: Address, block: u64) -> Self {
        Self {
            address,
            last_hf: None,
            last_seen_block: block,
            added_at: Instant::now(),
        }
    }
}

/// A decoded HF is only ever meaningful as a non-negative real number
/// (`f64::MAX`-clamped `+∞` for zero debt is fine; `NaN` or a negative
/// value means upstream decoding went wrong).
fn validate_hf(address: Address, hf: f64) -> Result<(), EngineError> {
    if hf.is_nan() || hf.is_sign_negative() {
        return Err(EngineError::Invariant {
            user: address,
            detail: format!("non-sensical health factor: {hf}"),
        });
    }
    Ok(())
}

/// Bounded, concurrent set of addresses under active HF surveillance.
pub struct CandidateSet {
    inner: DashMap<Address, Candidate>,
    capacity: usize,
    always_include_hf_below: f64,
    evicted: AtomicU64,
}

impl CandidateSet {
    pub fn new(capacity: usize, always_include_hf_below: f64) -> Self {
        Self {
            inner: DashMap::with_capacity(capacity),
            capacity,
            always_include_hf_below,
            evicted: AtomicU64::new(0),
        }
    }

    /// Total candidates dropped to capacity pressure since construction.
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.candidate_max, config.always_include_hf_below)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.inner.contains_key(address)
    }

    /// Insert or refresh a candidate's last-seen block, evicting if the set
    /// is at capacity and this is a new address. Returns `true` if the
    /// address is a candidate after the call (it may be rejected if the set
    /// is full of protected/closer candidates and this one is brand new
    /// with no HF history to judge urgency by — in that case it is still
    /// admitted, since a freshly observed user always deserves one read).
    pub fn touch(&self, address: Address, block: u64) -> bool {
        if let Some(mut entry) = self.inner.get_mut(&address) {
            if block > entry.last_seen_block {
                entry.last_seen_block = block;
            }
            return true;
        }

        if self.inner.len() >= self.capacity {
            self.evict_one();
        }

        self.inner
            .insert(address, Candidate::new(address, block));
        true
    }

    /// Bulk-seed many addresses at once (used by the seeder on startup and
    /// periodic refresh). Skips addresses already tracked.
    pub fn seed_bulk(&self, addresses: impl IntoIterator<Item = Address>, block: u64) -> usize {
        let mut added = 0;
        for address in addresses {
            if !self.inner.contains_key(&address) {
                self.touch(address, block);
                added += 1;
            }
        }
        added
    }

    /// Refresh a candidate's last known HF. An HF that is `NaN`, negative,
    /// or otherwise nonsensical (per §7 "Invariant violation") is rejected:
    /// logged and the prior state left untouched rather than poisoning
    /// every downstream comparison against it.
    pub fn update_hf(&self, address: &Address, hf: f64, block: u64) {
        if let Err(e) = validate_hf(*address, hf) {
            warn!(error = %e, "rejecting HF update");
            return;
        }

        if let Some(mut entry) = self.inner.get_mut(address) {
            entry.last_hf = Some(hf);
            if block > entry.last_seen_block {
                entry.last_seen_block = block;
            }
        }
    }

    pub fn get(&self, address: &Address) -> Option<Candidate> {
        self.inner.get(address).map(|e| e.clone())
    }

    pub fn addresses_all(&self) -> Vec<Address> {
        self.inner.iter().map(|e| *e.key()).collect()
    }

    /// Addresses whose last known HF is at or below `ceiling`, or which
    /// have never been read (treated as urgent: priority to establish a
    /// baseline). Used by the reader to decide what to re-poll first.
    pub fn addresses_low_hf(&self, ceiling: f64) -> Vec<Address> {
        self.inner
            .iter()
            .filter(|e| e.value().last_hf.map(|hf| hf <= ceiling).unwrap_or(true))
            .map(|e| *e.key())
            .collect()
    }

    pub fn lowest_hf(&self) -> Option<(Address, f64)> {
        self.inner
            .iter()
            .filter_map(|e| e.value().last_hf.map(|hf| (*e.key(), hf)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn remove(&self, address: &Address) {
        self.inner.remove(address);
    }

    /// Drop the candidate with the highest `last_hf` (safest from
    /// liquidation), tie-broken by the oldest `last_seen_block`. Never
    /// evicts a candidate protected by `always_include_hf_below`, a
    /// candidate with no HF reading yet, or the single remaining entry.
    fn evict_one(&self) {
        let victim = self
            .inner
            .iter()
            .filter_map(|e| {
                let hf = e.value().last_hf?;
                if hf < self.always_include_hf_below {
                    return None;
                }
                Some((*e.key(), hf, e.value().last_seen_block))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.2.cmp(&a.2)))
            .map(|(addr, _, _)| addr);

        if let Some(addr) = victim {
            self.inner.remove(&addr);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }
}
