//! Event bus
//!
//! Bounded, lossy publish/subscribe on string topics. A slow subscriber
//! loses events rather than stalling the chain: publishing never blocks
//! and a full channel drops the event for that subscriber only.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::RwLock;

use crate::consensus::Block;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::validation::Transaction;

/// Topic published on every applied block
pub const TOPIC_BLOCK_ADDED: &str = "block_added";
/// Topic published on every accepted pending transaction
pub const TOPIC_TRANSACTION_ADDED: &str = "transaction_added";

/// Engine event payloads
#[derive(Debug, Clone)]
pub enum ChainEvent {
    BlockAdded { block: Block, height: u64 },
    TransactionAdded(Transaction),
}

/// Topic-keyed subscriber registry
#[derive(Debug, Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, Vec<SyncSender<ChainEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber on a topic and hand back its bounded
    /// channel. Safe to call while events are being published.
    pub fn subscribe(&self, topic: &str) -> Receiver<ChainEvent> {
        let (sender, receiver) = sync_channel(EVENT_CHANNEL_CAPACITY);
        match self.topics.write() {
            Ok(mut topics) => {
                topics.entry(topic.to_string()).or_default().push(sender);
            }
            Err(_) => {
                log::error!("failed to acquire write lock on event bus");
            }
        }
        receiver
    }

    /// Deliver an event to every subscriber of a topic without
    /// blocking. Full channels drop the event; disconnected receivers
    /// are pruned.
    pub fn publish(&self, topic: &str, event: ChainEvent) {
        let mut topics = match self.topics.write() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("failed to acquire write lock on event bus");
                return;
            }
        };

        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|subscriber| match subscriber.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::warn!("event dropped for a slow subscriber on {}", topic);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
        }
    }

    /// Number of live subscribers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        match self.topics.read() {
            Ok(topics) => topics.get(topic).map(|s| s.len()).unwrap_or(0),
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Address;

    fn sample_event(nanos: u64) -> ChainEvent {
        ChainEvent::TransactionAdded(Transaction::coinbase(
            Address::from_bytes([1u8; 20]),
            5_000_000,
            nanos,
        ))
    }

    #[test]
    fn test_subscribe_and_receive() {
        let bus = EventBus::new();
        let receiver = bus.subscribe(TOPIC_TRANSACTION_ADDED);

        bus.publish(TOPIC_TRANSACTION_ADDED, sample_event(1));

        match receiver.try_recv().unwrap() {
            ChainEvent::TransactionAdded(tx) => assert_eq!(tx.timestamp_nanos, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let blocks = bus.subscribe(TOPIC_BLOCK_ADDED);

        bus.publish(TOPIC_TRANSACTION_ADDED, sample_event(1));
        assert!(blocks.try_recv().is_err());
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let bus = EventBus::new();
        let receiver = bus.subscribe(TOPIC_TRANSACTION_ADDED);

        for i in 0..(EVENT_CHANNEL_CAPACITY as u64 + 10) {
            bus.publish(TOPIC_TRANSACTION_ADDED, sample_event(i));
        }

        // exactly the channel capacity arrives, the rest were dropped
        let mut received = 0;
        while receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, EVENT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_disconnected_subscribers_are_pruned() {
        let bus = EventBus::new();
        let receiver = bus.subscribe(TOPIC_TRANSACTION_ADDED);
        assert_eq!(bus.subscriber_count(TOPIC_TRANSACTION_ADDED), 1);

        drop(receiver);
        bus.publish(TOPIC_TRANSACTION_ADDED, sample_event(1));
        assert_eq!(bus.subscriber_count(TOPIC_TRANSACTION_ADDED), 0);
    }
}
