//! Renders a typed [`Packet`](crate::schema::Packet) to wire bytes.
//!
//! Byte-level serialization is the out-of-scope collaborator; this crate only builds
//! `Packet` values and hands them to a `Serializer` before publishing. `JsonSerializer`
//! is the implementation shipped for tests and the demo binary.

use crate::error::{Result, TaufluxError};
use crate::schema::Packet;

pub trait Serializer: Send + Sync {
    fn serialize(&self, packet: &Packet) -> Result<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, packet: &Packet) -> Result<Vec<u8>> {
        serde_json::to_vec(packet)
            .map_err(|e| TaufluxError::contract(format!("JsonSerializer: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EventType, Payload, PacketHeader};

    #[test]
    fn serializes_to_valid_json() {
        let packet = Packet::new(
            PacketHeader { experiment_id: 1, sequence_number: 0, timestamp_ns: 0 },
            Payload::Event { event_type: EventType::Start },
        );
        let bytes = JsonSerializer.serialize(&packet).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["kind"], "Event");
    }
}
