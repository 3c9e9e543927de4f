//! Health-factor batch reader (C4): aggregates `getUserAccountData` calls
//! across many users into `Multicall3.aggregate3` batches.
//!
//! Individual typed contract calls are fanned out over
//! `stream::buffer_unordered` with bounded concurrency, but chunked into
//! on-chain aggregated calls rather than one RPC round trip per user, since
//! polling a few hundred candidates every block is the hot path this whole
//! system exists to make cheap.

use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::error::{EngineError, ScanOutcome};

sol! {
    #[sol(rpc)]
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
    }

    interface IPool {
        function getUserAccountData(address user) external view returns (
            uint256 totalCollateralBase,
            uint256 totalDebtBase,
            uint256 availableBorrowsBase,
            uint256 currentLiquidationThreshold,
            uint256 ltv,
            uint256 healthFactor
        );
    }
}

/// A single user's health factor, in WAD (18-decimal) fixed point, as
/// returned directly by the Pool's `getUserAccountData`.
#[derive(Debug, Clone, Copy)]
pub struct HealthFactorReading {
    pub user: Address,
    pub health_factor_wad: U256,
}

pub struct HealthFactorReader {
    http_url: String,
    pool_address: Address,
    multicall_address: Address,
    chunk_size: usize,
    chunk_timeout: Duration,
    chunk_retry_attempts: u32,
    max_concurrent_chunks: usize,
}

impl HealthFactorReader {
    pub fn new(
        http_url: impl Into<String>,
        pool_address: Address,
        multicall_address: Address,
        chunk_size: usize,
        chunk_timeout: Duration,
        chunk_retry_attempts: u32,
        max_concurrent_chunks: usize,
    ) -> Self {
        Self {
            http_url: http_url.into(),
            pool_address,
            multicall_address,
            chunk_size,
            chunk_timeout,
            chunk_retry_attempts,
            max_concurrent_chunks,
        }
    }

    /// Read health factors for every address in `users`, chunked into
    /// `aggregate3` calls of at most `chunk_size` users each. Individual
    /// chunk failures (timeout, RPC error, exhausted retries) are reported
    /// in the returned [`ScanOutcome`] rather than aborting the whole scan
    /// — a partial read is still useful.
    pub async fn read_batch(
        &self,
        users: &[Address],
    ) -> (Vec<HealthFactorReading>, ScanOutcome) {
        if users.is_empty() {
            return (Vec::new(), ScanOutcome::empty());
        }

        let url = match self.http_url.parse() {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "failed to parse HTTP URL for HF reader");
                let mut outcome = ScanOutcome::empty();
                outcome.requested = users.len();
                outcome.failed_chunks = 1;
                return (Vec::new(), outcome);
            }
        };
        let provider = ProviderBuilder::new().on_http(url);

        let chunks: Vec<&[Address]> = users.chunks(self.chunk_size).collect();
        let total_chunks = chunks.len();

        let results: Vec<Result<Vec<HealthFactorReading>, EngineError>> = stream::iter(
            chunks.into_iter().scan(0usize, |start, chunk| {
                let chunk_start = *start;
                *start += chunk.len();
                Some((chunk_start, chunk))
            }),
        )
        .map(|(chunk_start, chunk)| self.read_chunk_with_retry(&provider, chunk_start, chunk))
        .buffer_unordered(self.max_concurrent_chunks)
        .collect()
        .await;

        let (readings, outcome) = summarize_chunk_results(users.len(), results);

        debug!(
            requested = outcome.requested,
            updated = outcome.updated,
            failed_chunks = outcome.failed_chunks,
            total_chunks,
            "hf batch scan complete"
        );

        (readings, outcome)
    }

    async fn read_chunk_with_retry(
        &self,
        provider: &impl Provider,
        chunk_start: usize,
        chunk: &[Address],
    ) -> Result<Vec<HealthFactorReading>, EngineError> {
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(
                self.chunk_timeout,
                self.read_chunk(provider, chunk),
            )
            .await;

            match outcome {
                Ok(Ok(readings)) => return Ok(readings),
                Ok(Err(e)) if attempt < self.chunk_retry_attempts => {
                    attempt += 1;
                    warn!(chunk_start, attempt, error = %e, "hf chunk read failed, retrying");
                    continue;
                }
                Ok(Err(e)) => {
                    return Err(EngineError::Read {
                        chunk_start,
                        source: e,
                    })
                }
                Err(_) if attempt < self.chunk_retry_attempts => {
                    attempt += 1;
                    warn!(chunk_start, attempt, "hf chunk read timed out, retrying");
                    continue;
                }
                Err(_) => {
                    return Err(EngineError::Read {
                        chunk_start,
                        source: anyhow!("chunk read timed out after {} attempts", attempt + 1),
                    })
                }
            }
        }
    }

    async fn read_chunk(
        &self,
        provider: &impl Provider,
        chunk: &[Address],
    ) -> Result<Vec<HealthFactorReading>> {
        let calls: Vec<IMulticall3::Call3> = chunk
            .iter()
            .map(|user| IMulticall3::Call3 {
                target: self.pool_address,
                allowFailure: true,
                callData: IPool::getUserAccountDataCall { user: *user }.abi_encode().into(),
            })
            .collect();

        let multicall = IMulticall3::new(self.multicall_address, provider);
        let IMulticall3::aggregate3Return { returnData } =
            multicall.aggregate3(calls).call().await?;

        if returnData.len() != chunk.len() {
            return Err(anyhow!(
                "aggregate3 returned {} results for {} calls",
                returnData.len(),
                chunk.len()
            ));
        }

        let mut readings = Vec::with_capacity(chunk.len());
        for (user, result) in chunk.iter().zip(returnData.iter()) {
            if !result.success {
                continue;
            }
            match IPool::getUserAccountDataCall::abi_decode_returns(&result.returnData, true) {
                Ok(decoded) => readings.push(HealthFactorReading {
                    user: *user,
                    health_factor_wad: decoded.healthFactor,
                }),
                Err(e) => {
                    warn!(user = %user, error = %e, "failed to decode getUserAccountData return");
                }
            }
        }

        Ok(readings)
    }
}

/// Combine one `read_chunk_with_retry` result per chunk into the readings
/// actually recovered and a [`ScanOutcome`] summary. Pulled out of
/// `read_batch` as a pure function so a failing chunk among several can be
/// exercised without a live provider.
fn summarize_chunk_results(
    requested: usize,
    results: Vec<Result<Vec<HealthFactorReading>, EngineError>>,
) -> (Vec<HealthFactorReading>, ScanOutcome) {
    let mut readings = Vec::with_capacity(requested);
    let mut failed_chunks = 0;
    let mut timed_out = false;

    for result in results {
        match result {
            Ok(mut chunk_readings) => readings.append(&mut chunk_readings),
            Err(EngineError::Read { .. }) => {
                failed_chunks += 1;
                timed_out = true;
            }
            Err(_) => failed_chunks += 1,
        }
    }

    let outcome = ScanOutcome {
        requested,
        updated: readings.len(),
        failed_chunks,
        timed_out,
    };

    (readings, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_chunking_respects_chunk_size() {
        let users: Vec<Address> = (0..250u8).map(Address::repeat_byte).collect();
        let chunks: Vec<&[Address]> = users.chunks(120).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 120);
        assert_eq!(chunks[2].len(), 10);
    }

    fn chunk_reading(n: u8) -> HealthFactorReading {
        HealthFactorReading {
            user: Address::repeat_byte(n),
            health_factor_wad: U256::from(1),
        }
    }

    /// S6: 250 users chunked into 120/120/10, and the middle chunk fails.
    /// The other two chunks' readings must still come back, with counts
    /// reflecting exactly the one lost chunk.
    #[test]
    fn test_failing_middle_chunk_leaves_other_chunks_intact() {
        let first: Vec<HealthFactorReading> = (0..120u8).map(chunk_reading).collect();
        let third: Vec<HealthFactorReading> = (0..10u8).map(chunk_reading).collect();

        let results: Vec<Result<Vec<HealthFactorReading>, EngineError>> = vec![
            Ok(first.clone()),
            Err(EngineError::Read {
                chunk_start: 120,
                source: anyhow!("chunk read timed out after 3 attempts"),
            }),
            Ok(third.clone()),
        ];

        let (readings, outcome) = summarize_chunk_results(250, results);

        assert_eq!(outcome.requested, 250);
        assert_eq!(outcome.updated, 130);
        assert_eq!(outcome.failed_chunks, 1);
        assert!(outcome.timed_out);
        assert_eq!(readings.len(), 130);

        let users: std::collections::HashSet<Address> =
            readings.iter().map(|r| r.user).collect();
        for reading in &first {
            assert!(users.contains(&reading.user));
        }
        for reading in &third {
            assert!(users.contains(&reading.user));
        }
        // The middle chunk's 120 users never made it into `users` at all --
        // none of its entries are silently substituted with zeroed readings.
        assert_eq!(users.len(), 130);
    }

    #[tokio::test]
    #[ignore] // requires network
    async fn test_read_batch_empty_input() {
        let reader = HealthFactorReader::new(
            "http://localhost:8545",
            Address::ZERO,
            Address::ZERO,
            120,
            Duration::from_millis(2000),
            2,
            8,
        );
        let (readings, outcome) = reader.read_batch(&[]).await;
        assert!(readings.is_empty());
        assert_eq!(outcome.requested, 0);
    }
}
