//! HTTP clients for external services the detection engine consumes.
//!
//! Currently a single client: the seeder's user index. Execution, swap
//! routing, and profit estimation are out of scope for this engine and have
//! no client here.

mod seed_index;

pub use seed_index::{SeedIndexClient, SeedWallet};
