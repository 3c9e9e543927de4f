//! Chain transport (C1): WebSocket subscriptions to new block heads and
//! contract logs, reconnecting with backoff when the underlying stream
//! ends.
//!
//! The `futures::stream::unfold` construction keeps the provider alive
//! inside the stream's own state tuple, since the WebSocket connection
//! would otherwise drop the moment the function that created it returns.
//! This transport additionally retries the subscription in place when the
//! stream ends, rather than letting the whole stream terminate.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use anyhow::{anyhow, Context, Result};
use futures::stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::error::EngineError;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// `min(60s, 2^attempts * 1s)` with up to 20% jitter added, matching the
/// engine's reconnect policy.
fn backoff_for_attempt(attempt: u32) -> Duration {
    use rand::Rng;
    let exp = RECONNECT_BASE.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let base = exp.min(RECONNECT_MAX);
    let jitter_frac = rand::thread_rng().gen_range(0.0..0.2);
    base + Duration::from_secs_f64(base.as_secs_f64() * jitter_frac)
}

/// Subscribes to new block heads and Pool/oracle logs over a WebSocket
/// connection to a single RPC endpoint.
pub struct ChainTransport {
    ws_url: String,
    reconnects: Arc<AtomicU64>,
}

impl ChainTransport {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            reconnects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total successful reconnects across every subscription this
    /// transport has opened, for [`crate::error::ScanOutcome`]-adjacent
    /// observability -- folded into `MetricsSnapshot::reconnect_count` by
    /// the orchestrator.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Stream of new block numbers that survives individual dropped
    /// connections by reconnecting internally with exponential backoff.
    pub async fn subscribe_blocks(&self) -> Result<Pin<Box<dyn Stream<Item = u64> + Send>>> {
        let ws_url = self.ws_url.clone();
        let reconnects = self.reconnects.clone();
        info!(ws_url = %ws_url, "subscribing to new block heads");

        let provider = connect(&ws_url).await.map_err(|e| EngineError::Transport {
            component: "block_subscribe",
            source: e,
        })?;
        let sub = provider
            .subscribe_blocks()
            .await
            .context("subscribe_blocks")
            .map_err(|e| EngineError::Transport {
                component: "block_subscribe",
                source: e,
            })?;
        let inner = sub.into_stream();

        let stream = futures::stream::unfold(
            (provider, Box::pin(inner), 0u32),
            move |(mut provider, mut inner, mut attempt)| {
                let ws_url = ws_url.clone();
                let reconnects = reconnects.clone();
                async move {
                    loop {
                        if let Some(header) = inner.next().await {
                            return Some((header.number, (provider, inner, 0)));
                        }

                        if attempt >= MAX_RECONNECT_ATTEMPTS {
                            let err = EngineError::Transport {
                                component: "block_subscribe",
                                source: anyhow!(
                                    "exhausted {} reconnect attempts",
                                    attempt
                                ),
                            };
                            warn!(ws_url = %ws_url, attempts = attempt, error = %err, "block subscription giving up");
                            return None;
                        }
                        let backoff = backoff_for_attempt(attempt);
                        attempt += 1;

                        warn!(ws_url = %ws_url, backoff_ms = backoff.as_millis(), attempt, "block subscription ended, reconnecting");
                        tokio::time::sleep(backoff).await;

                        match connect(&ws_url).await {
                            Ok(new_provider) => match new_provider.subscribe_blocks().await {
                                Ok(new_sub) => {
                                    provider = new_provider;
                                    inner = Box::pin(new_sub.into_stream());
                                    attempt = 0;
                                    reconnects.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(e) => {
                                    let err = EngineError::Transport {
                                        component: "block_subscribe",
                                        source: e.into(),
                                    };
                                    warn!(ws_url = %ws_url, error = %err, "block resubscribe failed");
                                }
                            },
                            Err(e) => {
                                let err = EngineError::Transport {
                                    component: "block_subscribe",
                                    source: e,
                                };
                                warn!(ws_url = %ws_url, error = %err, "block reconnect failed");
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    /// Stream of logs matching `filter`, reconnecting the same way
    /// [`subscribe_blocks`] does. The filter is reused unchanged across
    /// reconnects.
    pub async fn subscribe_logs(
        &self,
        filter: Filter,
    ) -> Result<Pin<Box<dyn Stream<Item = Log> + Send>>> {
        let ws_url = self.ws_url.clone();
        let reconnects = self.reconnects.clone();
        info!(ws_url = %ws_url, "subscribing to logs");

        let provider = connect(&ws_url).await.map_err(|e| EngineError::Transport {
            component: "log_subscribe",
            source: e,
        })?;
        let sub = provider
            .subscribe_logs(&filter)
            .await
            .context("subscribe_logs")
            .map_err(|e| EngineError::Transport {
                component: "log_subscribe",
                source: e,
            })?;
        let inner = sub.into_stream();

        let stream = futures::stream::unfold(
            (provider, Box::pin(inner), filter, 0u32),
            move |(mut provider, mut inner, filter, mut attempt)| {
                let ws_url = ws_url.clone();
                let reconnects = reconnects.clone();
                async move {
                    loop {
                        if let Some(log) = inner.next().await {
                            return Some((log, (provider, inner, filter, 0)));
                        }

                        if attempt >= MAX_RECONNECT_ATTEMPTS {
                            let err = EngineError::Transport {
                                component: "log_subscribe",
                                source: anyhow!(
                                    "exhausted {} reconnect attempts",
                                    attempt
                                ),
                            };
                            warn!(ws_url = %ws_url, attempts = attempt, error = %err, "log subscription giving up");
                            return None;
                        }
                        let backoff = backoff_for_attempt(attempt);
                        attempt += 1;

                        warn!(ws_url = %ws_url, backoff_ms = backoff.as_millis(), attempt, "log subscription ended, reconnecting");
                        tokio::time::sleep(backoff).await;

                        match connect(&ws_url).await {
                            Ok(new_provider) => match new_provider.subscribe_logs(&filter).await {
                                Ok(new_sub) => {
                                    provider = new_provider;
                                    inner = Box::pin(new_sub.into_stream());
                                    attempt = 0;
                                    reconnects.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(e) => {
                                    let err = EngineError::Transport {
                                        component: "log_subscribe",
                                        source: e.into(),
                                    };
                                    warn!(ws_url = %ws_url, error = %err, "log resubscribe failed");
                                }
                            },
                            Err(e) => {
                                let err = EngineError::Transport {
                                    component: "log_subscribe",
                                    source: e,
                                };
                                warn!(ws_url = %ws_url, error = %err, "log reconnect failed");
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

async fn connect(ws_url: &str) -> Result<impl Provider + Clone> {
    let ws = WsConnect::new(ws_url);
    ProviderBuilder::new().on_ws(ws).await.context("ws connect")
}

/// Pool log filter covering Supply/Withdraw/Borrow/Repay/LiquidationCall/
/// ReserveDataUpdated on a single Pool address.
pub fn pool_filter(pool_address: Address) -> Filter {
    Filter::new()
        .address(pool_address)
        .event_signature(crate::events::signatures::pool_signatures())
}

/// AnswerUpdated filter across every oracle feed address the engine is
/// configured to watch.
pub fn oracle_filter(feed_addresses: Vec<Address>) -> Filter {
    Filter::new()
        .address(feed_addresses)
        .event_signature(crate::events::signatures::ANSWER_UPDATED)
}
