//! Typed failure taxonomy for the detection engine.
//!
//! Defined once in `sentinel-chain` (the lowest crate in the dependency
//! graph) and re-exported here so every crate shares one `EngineError`
//! instead of each defining its own. Component-local code propagates
//! `EngineError` with `?`; only the typed summaries (`ScanOutcome`,
//! `DecodeFailure`) cross a channel boundary into another component — raw
//! `EngineError` values never leave the component that produced them.

pub use sentinel_chain::error::{DecodeFailure, EngineError, ScanOutcome};
