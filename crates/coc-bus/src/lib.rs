//! # Event Bus
//!
//! One-directional publishing from the chain engine to its subscribers.
//! The engine holds the bus and calls it; subscribers hold receivers and
//! never hold the engine, so there are no reference cycles.
//!
//! Ordering guarantee: events for a given block are published in order
//! (new-block before that block's logs), and events across blocks follow
//! apply order. Slow subscribers lag and drop, they never block the engine.

use tokio::sync::broadcast;
use tracing::debug;

use shared_types::{ChainBlock, Hash32, IndexedLog};

/// Events to buffer per subscriber before lagging drops the oldest.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Everything the chain engine announces.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A transaction was admitted to the mempool.
    PendingTx { hash: Hash32 },
    /// A block was applied. Emitted before the block's log events.
    NewBlock(Box<ChainBlock>),
    /// One log from an applied block, emitted in log-index order.
    Log(Box<IndexedLog>),
    /// A block gained depth-based finality.
    Finalized { height: u64, hash: Hash32 },
}

/// The broadcast bus. Cloning is cheap; all clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers; returns how many received it.
    pub fn publish(&self, event: ChainEvent) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(_) => {
                // No subscribers; the engine does not care.
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        debug!("new event bus subscriber");
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(ChainEvent::PendingTx {
            hash: Hash32([1u8; 32]),
        });
        bus.publish(ChainEvent::Finalized {
            height: 1,
            hash: Hash32([2u8; 32]),
        });
        assert!(matches!(rx.recv().await.unwrap(), ChainEvent::PendingTx { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ChainEvent::Finalized { height: 1, .. }
        ));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        assert_eq!(
            bus.publish(ChainEvent::PendingTx {
                hash: Hash32::ZERO
            }),
            0
        );
    }
}
