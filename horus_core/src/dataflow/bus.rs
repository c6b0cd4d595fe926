//! The inter-node dataflow bus: a tagged payload type plus a registry of
//! named "latest value wins" slots (§9 bus payload polymorphism, and the
//! `frames`/`actions` single-slot semantics called out in the design notes).

use crate::joints::JointVector;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Every inter-node message is either an image frame or a named numeric
/// vector. No deeper type hierarchy is needed.
#[derive(Debug, Clone)]
pub enum Payload {
    Image {
        width: u32,
        height: u32,
        bytes: Vec<u8>,
    },
    Vector {
        name: String,
        values: JointVector,
    },
}

impl Payload {
    pub fn image(width: u32, height: u32, bytes: Vec<u8>) -> Self {
        Payload::Image { width, height, bytes }
    }

    pub fn vector(name: impl Into<String>, values: JointVector) -> Self {
        Payload::Vector {
            name: name.into(),
            values,
        }
    }
}

/// A shared registry of named "latest wins" topic slots. New writes
/// overwrite old; readers always see the most recent value, never a queue.
/// This backs both the dataflow bus between nodes and the IPC bridge's
/// reply slots (§4.C).
#[derive(Clone, Default)]
pub struct Bus {
    slots: Arc<Mutex<HashMap<String, Payload>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the latest value published on `topic`.
    pub fn publish(&self, topic: &str, payload: Payload) {
        self.slots.lock().insert(topic.to_string(), payload);
    }

    /// Read the latest value published on `topic`, if any. Does not block
    /// and does not consume the value — repeated reads see the same value
    /// until the next publish.
    pub fn latest(&self, topic: &str) -> Option<Payload> {
        self.slots.lock().get(topic).cloned()
    }

    /// Remove the slot, e.g. so a stale leader/follower reading from a
    /// previous session cannot leak into a new one.
    pub fn clear(&self, topic: &str) {
        self.slots.lock().remove(topic);
    }

    pub fn topics(&self) -> Vec<String> {
        self.slots.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joints::JointUnit;

    #[test]
    fn latest_value_overwrites_not_queues() {
        let bus = Bus::new();
        bus.publish("joint/leader", Payload::vector("leader", JointVector::new(JointUnit::Radians, vec![1.0])));
        bus.publish("joint/leader", Payload::vector("leader", JointVector::new(JointUnit::Radians, vec![2.0])));

        match bus.latest("joint/leader").unwrap() {
            Payload::Vector { values, .. } => assert_eq!(values.values, vec![2.0]),
            _ => panic!("expected vector payload"),
        }
    }

    #[test]
    fn missing_topic_reads_as_none() {
        let bus = Bus::new();
        assert!(bus.latest("image/top").is_none());
    }
}
