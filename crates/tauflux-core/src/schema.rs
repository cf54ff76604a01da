//! Typed wire message schema: one `Packet` per published envelope.
//!
//! `Packet` itself never touches bytes — turning one into wire bytes is the
//! [`crate::serializer::Serializer`] collaborator's job. Keeping the schema as plain
//! serde-derived types means any wire format (JSON, bincode, …) can render it without
//! this crate caring which.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub experiment_id: i32,
    pub sequence_number: i64,
    pub timestamp_ns: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramMeta {
    pub bin_size_ps: u64,
    pub first_bin_idx: u64,
    pub last_bin_idx: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtofMeta {
    pub resolution_ps: u64,
    pub range_min_ps: u64,
    pub range_max_ps: u64,
    pub integration_period_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriMeta {
    pub integration_period_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriChannelResult {
    pub utime_from_ps: u32,
    pub utime_until_ps: u32,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct G2Meta {
    pub dt_ps: Vec<u64>,
    pub k: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct G2ChannelResult {
    pub channel_1: u32,
    pub channel_2: u32,
    pub g2: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct G2iChannelResult {
    pub channel_1: u32,
    pub channel_2: u32,
    pub g2: Vec<f64>,
    pub utime_from_ps: u32,
    pub utime_until_ps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventType {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Payload {
    Timestamps {
        channels: BTreeMap<u32, (Vec<u64>, Vec<u32>)>,
    },
    Histograms {
        meta: HistogramMeta,
        channels: BTreeMap<u32, Vec<u32>>,
    },
    Markers {
        channels: BTreeMap<u32, Vec<u64>>,
    },
    Dtof {
        meta: DtofMeta,
        channels: BTreeMap<u32, Vec<u32>>,
    },
    Cri {
        meta: CriMeta,
        channels: BTreeMap<u32, CriChannelResult>,
    },
    Counts {
        meta: CriMeta,
        channels: BTreeMap<u32, u64>,
    },
    G2 {
        meta: G2Meta,
        channels: BTreeMap<u32, G2ChannelResult>,
    },
    G2i {
        meta: G2Meta,
        channels: BTreeMap<u32, G2iChannelResult>,
    },
    PpsStats {
        offset_ns: i64,
        jitter_ns: i64,
    },
    Event {
        event_type: EventType,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Payload,
}

impl Packet {
    pub fn new(header: PacketHeader, payload: Payload) -> Self {
        Self { header, payload }
    }

    pub fn topic(&self) -> &'static str {
        match &self.payload {
            Payload::Timestamps { .. } => "time_tags_array",
            Payload::Histograms { .. } => "histograms",
            Payload::Markers { .. } => "markers",
            Payload::Dtof { .. } => "dtof",
            Payload::Cri { .. } => "cri",
            Payload::Counts { .. } => "counts",
            Payload::G2 { .. } => "g2",
            Payload::G2i { .. } => "g2i",
            Payload::PpsStats { .. } => "pps_stats",
            Payload::Event { .. } => "event",
        }
    }
}

/// Monotone sequence counters, one per topic family that emits independently of the
/// per-window snapshot sequence number.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounters {
    pub window_seq: i64,
    pub count_seq: i64,
    pub dtof_seq: i64,
    pub cri_seq: i64,
    pub marker_seq: i64,
    pub pps_seq: i64,
    pub event_seq: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_matches_payload_kind() {
        let header = PacketHeader {
            experiment_id: 1,
            sequence_number: 0,
            timestamp_ns: 0,
        };
        let packet = Packet::new(header, Payload::Event { event_type: EventType::Start });
        assert_eq!(packet.topic(), "event");
    }

    #[test]
    fn round_trips_through_json() {
        let header = PacketHeader {
            experiment_id: 7,
            sequence_number: 3,
            timestamp_ns: 12_345,
        };
        let payload = Payload::PpsStats { offset_ns: 10, jitter_ns: -2 };
        let packet = Packet::new(header, payload);
        let json = serde_json::to_string(&packet).unwrap();
        let back: Packet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, packet);
    }
}
