//! The pluggable raw-data source the orchestrator drives every window.
//!
//! Real vendor adapters (PicoQuant boards, PF32 arrays, archive replayers) are out of
//! scope for this crate; [`MockDevice`] is a deterministic in-memory stand-in driven by
//! a pre-supplied schedule, used by orchestrator tests and the demo binary.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::config::Config;
use crate::error::{Result, TaufluxError};
use crate::keyed_container::KeyedContainer;
use crate::time::{ChannelTimestamps, MacroTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    TimeTagger,
    Histogrammer,
}

/// One window's raw payload. Populated per-channel by [`Device::update_raw_data`];
/// owned by the orchestrator as a ping-pong pair and swapped by move between windows.
#[derive(Debug, Clone)]
pub struct RawData {
    pub timestamps: KeyedContainer<u32, ChannelTimestamps>,
    pub marker_timestamps: Vec<MacroTime>,
}

impl RawData {
    pub fn for_channels(channels: impl IntoIterator<Item = u32>) -> Self {
        Self {
            timestamps: KeyedContainer::from_keys_with(channels, (), |_| ChannelTimestamps::default()),
            marker_timestamps: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        for (_, ts) in self.timestamps.iter_mut() {
            ts.clear();
        }
        self.marker_timestamps.clear();
    }
}

/// Channel-less placeholder; [`StoragePool`](crate::storage_pool::StoragePool) needs a
/// `Default` to pre-allocate slots with, but every pooled `RawData` is immediately
/// reseated to the real channel set by whoever pre-warms the pool.
impl Default for RawData {
    fn default() -> Self {
        Self::for_channels(std::iter::empty())
    }
}

pub trait Device: Send + Sync {
    fn start(&self, config: &Config) -> Result<()>;
    fn update_raw_data(&self, begin_bin_idx: u64, end_bin_idx: u64, dest: &mut RawData) -> Result<()>;
    fn device_kind(&self) -> DeviceKind;
    fn generates_microtimes(&self) -> bool;
    fn microtime_resolution_ps(&self) -> u64;
    fn stop(&self) -> Result<()>;
}

/// One scheduled window of deterministic per-channel test data.
#[derive(Debug, Clone, Default)]
pub struct ScheduledWindow {
    pub channels: BTreeMap<u32, ChannelTimestamps>,
    pub markers: Vec<MacroTime>,
}

#[derive(Debug, Default)]
struct MockState {
    started: bool,
    next_window: usize,
}

/// Deterministic in-memory [`Device`] driven by a pre-supplied schedule of per-channel
/// timestamps. Not a vendor adapter: exists for testing the orchestrator and as the
/// backing device for the demo binary.
pub struct MockDevice {
    schedule: Vec<ScheduledWindow>,
    microtime_resolution_ps: u64,
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new(schedule: Vec<ScheduledWindow>, microtime_resolution_ps: u64) -> Self {
        Self {
            schedule,
            microtime_resolution_ps,
            state: Mutex::new(MockState::default()),
        }
    }
}

impl Device for MockDevice {
    fn start(&self, _config: &Config) -> Result<()> {
        self.state.lock().unwrap().started = true;
        Ok(())
    }

    fn update_raw_data(&self, begin_bin_idx: u64, end_bin_idx: u64, dest: &mut RawData) -> Result<()> {
        dest.clear();
        if begin_bin_idx == end_bin_idx {
            // Zero-length rendezvous: acquisition has begun, nothing to fill yet.
            return Ok(());
        }

        let mut state = self.state.lock().unwrap();
        if !state.started {
            return Err(TaufluxError::contract(
                "MockDevice::update_raw_data called before start",
            ));
        }
        let idx = state.next_window;
        let window = self.schedule.get(idx).ok_or_else(|| {
            TaufluxError::invariant("MockDevice: schedule exhausted before orchestrator stopped")
        })?;
        state.next_window += 1;
        drop(state);

        for (&channel, timestamps) in window.channels.iter() {
            if let Some(slot) = dest.timestamps.get_mut(&channel) {
                *slot = timestamps.clone();
            }
        }
        dest.marker_timestamps = window.markers.clone();
        Ok(())
    }

    fn device_kind(&self) -> DeviceKind {
        DeviceKind::TimeTagger
    }

    fn generates_microtimes(&self) -> bool {
        true
    }

    fn microtime_resolution_ps(&self) -> u64 {
        self.microtime_resolution_ps
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}
