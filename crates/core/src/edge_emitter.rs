//! Edge emitter (C6): the only component allowed to produce a
//! [`LiquidatableEvent`]. Turns a raw HF reading into an edge-triggered
//! state transition for one user, applying hysteresis so a health factor
//! oscillating right at the threshold doesn't flood the downstream executor,
//! and a one-per-user-per-block cap so a single bad scan can't double-fire.
//!
//! The state machine has no separate "recovery hysteresis" band on the way
//! back to `Safe` -- only the `Liq -> Liq` path is gated by hysteresis, via
//! the `Worsened` reason.

use std::time::Instant;

use alloy::primitives::{Address, U256};
use dashmap::DashMap;

use crate::config::EngineConfig;
use crate::math::{bps_to_wad, is_liquidatable_wad, wad_to_f64};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Safe,
    Liq,
}

#[derive(Debug, Clone)]
struct UserState {
    status: Status,
    last_hf_wad: U256,
    last_block: u64,
}

/// What caused this HF reading to be taken: a pool event naming the user
/// directly, a canonical per-block recheck, or a price-trigger selective
/// scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTrigger {
    Event,
    Head,
    Price,
}

/// Why this particular reading warranted an emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitReason {
    /// First time this user is observed to have crossed the threshold.
    SafeToLiq,
    /// Already liquidatable, and has worsened by at least the hysteresis
    /// margin since the last emission.
    Worsened,
}

/// A single detected liquidation opportunity, ready for the downstream
/// emission channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidatableEvent {
    pub user: Address,
    pub hf: f64,
    pub block: u64,
    pub trigger: ScanTrigger,
    pub reason: EmitReason,
    pub at: Instant,
}

/// Per-user state machine plus the per-user-per-block emission cap. Kept as
/// a distinct map from `UserState` deliberately -- it is logically different
/// data (an emission ledger, not a health state) and keeping it separate
/// simplifies both reasoning and testing.
pub struct EdgeEmitter {
    users: DashMap<Address, UserState>,
    last_emit_block: DashMap<Address, u64>,
}

impl EdgeEmitter {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            last_emit_block: DashMap::new(),
        }
    }

    /// Feed a fresh HF reading for `user` at `block`. Returns `Some` only
    /// when the reading causes an emission: a `Safe -> Liq` edge, or a
    /// `Liq -> Liq` reading that has worsened by at least the configured
    /// hysteresis margin since the last emission.
    pub fn observe(
        &self,
        user: Address,
        hf_wad: U256,
        block: u64,
        trigger: ScanTrigger,
        config: &EngineConfig,
    ) -> Option<LiquidatableEvent> {
        // One-per-user-per-block cap: a second reading for the same user at
        // the same block never emits, regardless of value.
        if self.last_emit_block.get(&user).map(|b| *b) == Some(block) {
            return None;
        }

        let threshold = bps_to_wad(config.execution_hf_threshold_bps);
        let is_liq = is_liquidatable_wad(hf_wad, threshold);

        // The reason depends on whether a prior state exists at all, and if
        // so, what it was.
        let reason = match self.users.get(&user).map(|e| (e.status, e.last_hf_wad)) {
            None => {
                // Step 4: no prior state.
                if is_liq {
                    Some(EmitReason::SafeToLiq)
                } else {
                    None
                }
            }
            Some((Status::Safe, _)) => {
                // Step 5, Safe -> *: emit only on a crossing into Liq.
                if is_liq {
                    Some(EmitReason::SafeToLiq)
                } else {
                    None
                }
            }
            Some((Status::Liq, prev_hf)) => {
                // Step 5, Liq -> *: recovering to Safe never emits; staying
                // Liq emits only once hysteresis clears.
                if !is_liq {
                    None
                } else if prev_hf.is_zero() {
                    None
                } else {
                    let relative_drop = pct_drop_bps(prev_hf, hf_wad);
                    if relative_drop >= config.hysteresis_bps as i64 {
                        Some(EmitReason::Worsened)
                    } else {
                        None
                    }
                }
            }
        };

        let new_status = if is_liq { Status::Liq } else { Status::Safe };
        self.users.insert(
            user,
            UserState {
                status: new_status,
                last_hf_wad: hf_wad,
                last_block: block,
            },
        );

        let reason = reason?;
        self.last_emit_block.insert(user, block);

        Some(LiquidatableEvent {
            user,
            hf: wad_to_f64(hf_wad),
            block,
            trigger,
            reason,
            at: Instant::now(),
        })
    }

    pub fn is_liquidatable(&self, user: &Address) -> Option<bool> {
        self.users.get(user).map(|e| e.status == Status::Liq)
    }

    /// Drop bookkeeping for blocks older than `keep_last_n`, called
    /// periodically by the orchestrator to keep the per-block cap map
    /// bounded under long-running operation.
    pub fn prune_block_history(&self, current_block: u64, keep_last_n: u64) {
        let floor = current_block.saturating_sub(keep_last_n);
        self.last_emit_block.retain(|_, block| *block >= floor);
    }
}

impl Default for EdgeEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Relative drop in basis points: `(prev - curr) / prev * 10000`, clamped to
/// 0 for a non-drop. Kept local rather than reusing `math::pct_diff_bps`
/// (U256-based, signed-direction) because hysteresis only ever cares about
/// the magnitude of a *decrease*.
fn pct_drop_bps(prev: U256, curr: U256) -> i64 {
    if curr >= prev {
        return 0;
    }
    let diff = prev - curr;
    let bps = (diff * U256::from(10_000u64)) / prev;
    if bps > U256::from(i64::MAX as u64) {
        i64::MAX
    } else {
        bps.to::<i64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Address::from(bytes)
    }

    fn cfg(threshold_bps: u32, hysteresis_bps: u32) -> EngineConfig {
        EngineConfig {
            execution_hf_threshold_bps: threshold_bps,
            hysteresis_bps,
            ..EngineConfig::default()
        }
    }

    fn hf(bps: u32) -> U256 {
        bps_to_wad(bps)
    }

    /// Threshold 0.98 (9800 bps), hysteresis 20 bps.
    #[test]
    fn test_scenario_s1_sequence() {
        let emitter = EdgeEmitter::new();
        let c = cfg(9800, 20);
        let u = addr(1);

        assert!(emitter.observe(u, hf(11000), 100, ScanTrigger::Head, &c).is_none());

        let e102_precursor = emitter.observe(u, hf(9900), 101, ScanTrigger::Head, &c);
        assert!(e102_precursor.is_none());

        let e102 = emitter.observe(u, hf(9700), 102, ScanTrigger::Head, &c).unwrap();
        assert_eq!(e102.reason, EmitReason::SafeToLiq);
        assert_eq!(e102.block, 102);

        let e103 = emitter.observe(u, hf(9600), 103, ScanTrigger::Head, &c).unwrap();
        assert_eq!(e103.reason, EmitReason::Worsened);

        // (0.96 - 0.959) / 0.96 ~= 10bps, below the 20bps hysteresis margin.
        let e104 = emitter.observe(u, U256::from(959_000_000_000_000_000u128), 104, ScanTrigger::Head, &c);
        assert!(e104.is_none());
    }

    /// Two updates in the same block; only the first emits.
    #[test]
    fn test_scenario_s2_per_block_cap() {
        let emitter = EdgeEmitter::new();
        let c = cfg(9800, 20);
        let u = addr(1);

        let first = emitter.observe(u, hf(9700), 200, ScanTrigger::Head, &c);
        assert!(first.is_some());
        let second = emitter.observe(u, hf(9500), 200, ScanTrigger::Head, &c);
        assert!(second.is_none());
    }

    /// P1: emission count for SafeToLiq equals the number of Safe->Liq transitions.
    #[test]
    fn test_p1_edge_trigger_count() {
        let emitter = EdgeEmitter::new();
        let c = cfg(9800, 20);
        let u = addr(1);

        let mut safe_to_liq_emissions = 0;
        let readings = [
            (hf(15000), 1), // safe
            (hf(9700), 2),  // -> liq: emit
            (hf(11000), 3), // -> safe: no emit
            (hf(9600), 4),  // -> liq: emit
        ];
        for (h, b) in readings {
            if let Some(ev) = emitter.observe(u, h, b, ScanTrigger::Head, &c) {
                if ev.reason == EmitReason::SafeToLiq {
                    safe_to_liq_emissions += 1;
                }
            }
        }
        assert_eq!(safe_to_liq_emissions, 2);
    }

    /// P2: at most one emission per user per block.
    #[test]
    fn test_p2_per_block_cap_distinct_users_both_allowed() {
        let emitter = EdgeEmitter::new();
        let c = cfg(9800, 20);
        let a = emitter.observe(addr(1), hf(9700), 500, ScanTrigger::Head, &c);
        let b = emitter.observe(addr(2), hf(9700), 500, ScanTrigger::Head, &c);
        assert!(a.is_some());
        assert!(b.is_some());
    }

    /// P4: an HF update at or above threshold never emits.
    #[test]
    fn test_p4_no_spurious_emit_above_threshold() {
        let emitter = EdgeEmitter::new();
        let c = cfg(9800, 20);
        let u = addr(1);
        assert!(emitter.observe(u, hf(9800), 1, ScanTrigger::Head, &c).is_none());
        assert!(emitter.observe(u, hf(20000), 2, ScanTrigger::Head, &c).is_none());
    }

    #[test]
    fn test_first_observation_already_liquidatable_emits() {
        let emitter = EdgeEmitter::new();
        let c = cfg(9800, 20);
        let event = emitter.observe(addr(1), hf(9000), 1, ScanTrigger::Head, &c).unwrap();
        assert_eq!(event.reason, EmitReason::SafeToLiq);
    }

    #[test]
    fn test_prune_block_history() {
        let emitter = EdgeEmitter::new();
        let c = cfg(9800, 20);
        emitter.observe(addr(1), hf(9700), 100, ScanTrigger::Head, &c);
        emitter.observe(addr(1), hf(9600), 200, ScanTrigger::Head, &c);
        emitter.prune_block_history(200, 50);
        assert!(!emitter.last_emit_block.contains_key(&addr(1)));
    }
}
