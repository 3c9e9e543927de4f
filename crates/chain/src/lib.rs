//! Aave V3 chain interaction layer.
//!
//! This crate provides:
//! - WebSocket transport for block heads and Pool/oracle logs, with
//!   built-in reconnect
//! - Manual log decoding for Pool events and Chainlink-style price feeds
//! - Multicall-aggregated health-factor batch reads

pub mod error;
pub mod events;
pub mod reader;
pub mod transport;

pub use error::{DecodeFailure, EngineError, ScanOutcome};
pub use events::{decode_answer_updated, decode_pool_log, signatures, AffectedUsers, DecodedEvent};
pub use reader::{HealthFactorReader, HealthFactorReading};
pub use transport::{oracle_filter, pool_filter, ChainTransport};
