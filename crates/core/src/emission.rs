//! Outbound emission channel (§6.4): the only way a [`LiquidatableEvent`]
//! leaves the engine. Consumers must never be able to apply back-pressure to
//! the hot path, so the channel is a small bounded ring buffer with
//! drop-oldest overflow rather than a standard `mpsc` (whose `send` would
//! either block the producer or reject the newest event on a full queue --
//! exactly backwards from what a liquidation feed wants).
//!
//! Built from `parking_lot::Mutex` + `tokio::sync::Notify` rather than a
//! dedicated ring-buffer crate for what amounts to a ~20-line queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::edge_emitter::LiquidatableEvent;

pub struct EmissionChannel {
    queue: Mutex<VecDeque<LiquidatableEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl EmissionChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an event, evicting the oldest queued event if already at
    /// capacity. Never blocks the caller.
    pub fn push(&self, event: LiquidatableEvent) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Wait for and return the next event. Cancel-safe: a dropped future
    /// loses no event, since nothing is removed from the queue until the
    /// `pop_front` below actually succeeds.
    pub async fn recv(&self) -> LiquidatableEvent {
        loop {
            if let Some(event) = self.queue.lock().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking poll, for tests and diagnostics that don't want to await.
    pub fn try_recv(&self) -> Option<LiquidatableEvent> {
        self.queue.lock().pop_front()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use std::time::Instant;

    fn event(user: Address, block: u64) -> LiquidatableEvent {
        LiquidatableEvent {
            user,
            hf: 0.9,
            block,
            trigger: crate::edge_emitter::ScanTrigger::Head,
            reason: crate::edge_emitter::EmitReason::SafeToLiq,
            at: Instant::now(),
        }
    }

    #[test]
    fn test_push_and_try_recv_fifo_order() {
        let chan = EmissionChannel::new(4);
        chan.push(event(Address::ZERO, 1));
        chan.push(event(Address::ZERO, 2));
        assert_eq!(chan.try_recv().unwrap().block, 1);
        assert_eq!(chan.try_recv().unwrap().block, 2);
        assert!(chan.try_recv().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest_and_counts() {
        let chan = EmissionChannel::new(2);
        chan.push(event(Address::ZERO, 1));
        chan.push(event(Address::ZERO, 2));
        chan.push(event(Address::ZERO, 3));
        assert_eq!(chan.dropped_count(), 1);
        assert_eq!(chan.pending(), 2);
        assert_eq!(chan.try_recv().unwrap().block, 2);
        assert_eq!(chan.try_recv().unwrap().block, 3);
    }

    #[tokio::test]
    async fn test_recv_waits_for_push() {
        let chan = std::sync::Arc::new(EmissionChannel::new(4));
        let reader = chan.clone();
        let handle = tokio::spawn(async move { reader.recv().await });
        tokio::task::yield_now().await;
        chan.push(event(Address::ZERO, 42));
        let event = handle.await.unwrap();
        assert_eq!(event.block, 42);
    }
}
