//! # tauflux-core
//!
//! Processing pipeline for real-time photon-counting / diffuse correlation spectroscopy
//! acquisition: histograms, distribution-of-time-of-flight, count-rate counters,
//! multi-tau g2 correlation, PPS time discipline, and the orchestrator that drives a
//! pluggable device through a window-by-window run loop.
//!
//! ## Layout
//!
//! - [`time`], [`histogram`] — picosecond-resolution time types and the dense bin-count
//!   primitive everything else is built from.
//! - [`dtof`], [`counter`], [`correlator`] — the per-channel accumulators: distribution
//!   of time-of-flight, count-rate-in-ROI / total-count / histogram counters, and the
//!   multi-tau exponential-rebinning g2 estimator.
//! - [`time_shifter`] — PPS pulse discipline.
//! - [`keyed_container`], [`storage_pool`], [`worker`], [`health`] — ambient
//!   infrastructure: fixed-key-set per-channel storage, a lock-free object pool, a
//!   single-thread task queue, and fatal-event bookkeeping.
//! - [`config`], [`schema`] — static/dynamic configuration and the wire message schema.
//! - [`device`], [`publisher`], [`serializer`], [`archive`] — the pluggable collaborator
//!   traits the orchestrator drives, plus in-process/in-memory implementations used by
//!   the demo binary and the test suite.
//! - [`orchestrator`] — the run loop that ties everything above together.
//!
//! Parsing a config file from disk, the network transport, and the on-disk archive
//! format are all out of scope for this crate: it deals in typed in-memory structs and
//! leaves bytes-on-the-wire and bytes-on-disk to pluggable collaborators.

pub mod archive;
pub mod config;
pub mod correlator;
pub mod counter;
pub mod device;
pub mod dtof;
pub mod error;
pub mod health;
pub mod histogram;
pub mod keyed_container;
pub mod orchestrator;
pub mod publisher;
pub mod schema;
pub mod serializer;
pub mod storage_pool;
pub mod time;
pub mod time_shifter;
pub mod worker;

pub use config::{Config, CriWindow, DynamicConfig, ExperimentType};
pub use device::{Device, DeviceKind, MockDevice, RawData};
pub use error::{Result, TaufluxError};
pub use health::HealthMonitor;
pub use orchestrator::{DeviceProcessor, Orchestrator, OrchestratorRuntime, OrchestratorState};
pub use publisher::{ChannelPublisher, Publisher};
pub use schema::{Packet, PacketHeader, Payload};
pub use serializer::{JsonSerializer, Serializer};
pub use time::{ChannelTimestamps, MacroTime, MicroTime, Span};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
