//! Non-blocking publish transport contract.
//!
//! The network-facing transport is out of scope for this crate; [`ChannelPublisher`] is
//! an in-process stand-in backed by one bounded `mpsc::SyncSender` per subscribed
//! topic, with exactly the zero-timeout, overflow-is-an-error semantics the
//! orchestrator's backpressure policy requires.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

use crate::error::{Result, TaufluxError};

pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// In-process publisher: one bounded channel per topic registered at construction.
/// `publish` to an unregistered topic is silently accepted and dropped, mirroring a
/// real pub/sub transport with no subscribers on that topic.
pub struct ChannelPublisher {
    senders: HashMap<&'static str, Mutex<SyncSender<(String, Vec<u8>)>>>,
}

impl ChannelPublisher {
    /// Builds a publisher with one bounded channel of the given capacity per topic in
    /// `topics`, returning the receiving end of each alongside the publisher. Fails if
    /// `topics` is empty — a publisher with no sink to acquire is the analogue of the
    /// source's bind-on-construction failure and must not half-construct.
    pub fn new(
        topics: &[&'static str],
        capacity: usize,
    ) -> Result<(Self, HashMap<&'static str, Receiver<(String, Vec<u8>)>>)> {
        if topics.is_empty() {
            return Err(TaufluxError::exhausted(
                "ChannelPublisher::new: no topics registered, nothing to publish to",
            ));
        }
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for &topic in topics {
            let (tx, rx) = std::sync::mpsc::sync_channel(capacity);
            senders.insert(topic, Mutex::new(tx));
            receivers.insert(topic, rx);
        }
        Ok((Self { senders }, receivers))
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let Some(sender) = self.senders.get(topic) else {
            return Ok(());
        };
        let sender = sender.lock().unwrap();
        match sender.try_send((topic.to_string(), payload.to_vec())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TaufluxError::exhausted(format!(
                "ChannelPublisher::publish: topic '{topic}' is at capacity"
            ))),
            Err(TrySendError::Disconnected(_)) => Err(TaufluxError::exhausted(format!(
                "ChannelPublisher::publish: topic '{topic}' has no subscriber left"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_receive_preserves_order() {
        let (publisher, mut rx) = ChannelPublisher::new(&["g2"], 4).unwrap();
        publisher.publish("g2", b"a").unwrap();
        publisher.publish("g2", b"b").unwrap();
        let channel = rx.remove("g2").unwrap();
        assert_eq!(channel.recv().unwrap().1, b"a");
        assert_eq!(channel.recv().unwrap().1, b"b");
    }

    #[test]
    fn overflow_is_an_error_never_a_silent_drop() {
        let (publisher, _rx) = ChannelPublisher::new(&["g2"], 1).unwrap();
        publisher.publish("g2", b"a").unwrap();
        let err = publisher.publish("g2", b"b").unwrap_err();
        assert!(matches!(err, TaufluxError::ResourceExhaustion(_)));
    }

    #[test]
    fn construction_without_topics_fails() {
        assert!(ChannelPublisher::new(&[], 4).is_err());
    }

    #[test]
    fn publish_to_unregistered_topic_is_a_no_op() {
        let (publisher, _rx) = ChannelPublisher::new(&["g2"], 4).unwrap();
        assert!(publisher.publish("counts", b"x").is_ok());
    }
}
