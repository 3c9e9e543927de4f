//! Typed failure taxonomy for the detection engine.
//!
//! Component-local code propagates `EngineError` with `?`. Only the typed
//! summaries below (`ScanOutcome`, `DecodeFailure`) cross a channel boundary
//! into another component — raw `EngineError` values never leave the
//! component that produced them, matching the confinement policy each
//! component follows.

use alloy::primitives::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error on {component}: {source}")]
    Transport {
        component: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to decode {what} at topic0={topic0}")]
    Decode { what: &'static str, topic0: String },

    #[error("aggregation read failed for chunk starting at index {chunk_start}: {source}")]
    Read {
        chunk_start: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid configuration option `{option}`: {reason}")]
    Config { option: &'static str, reason: String },

    #[error("invariant violated for {user}: {detail}")]
    Invariant { user: Address, detail: String },
}

/// Outcome of a single HF batch scan, as handed from the reader to its caller.
/// Carries enough detail for logging without exposing a raw `EngineError`.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub requested: usize,
    pub updated: usize,
    pub failed_chunks: usize,
    pub timed_out: bool,
}

impl ScanOutcome {
    pub fn empty() -> Self {
        Self {
            requested: 0,
            updated: 0,
            failed_chunks: 0,
            timed_out: false,
        }
    }
}

/// Summary of a single unparseable or unrecognised log, for once-per-topic logging.
#[derive(Debug, Clone)]
pub struct DecodeFailure {
    pub topic0: String,
    pub reason: &'static str,
}
