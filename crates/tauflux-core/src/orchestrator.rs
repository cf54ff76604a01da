//! Drives the device readout loop, per-channel accumulators, and publish/archive fan-out.
//!
//! `DeviceProcessor` is the primary orchestrator (host computes the correlator from raw
//! histograms); [`pf32`] holds the PF32-G2 variant, which shares the [`Publisher`],
//! [`TimeShifter`], and event-sequence bookkeeping through [`OrchestratorRuntime`]
//! rather than through inheritance.
//!
//! Simplification recorded in `DESIGN.md`: the run loop below still dispatches one
//! window's device fill and channel processing synchronously before requesting the
//! next, rather than overlapping a window's processing with the next window's device
//! fill on separate threads — there is one run-loop thread, not the two the ping-pong
//! buffering design implies. What *does* run concurrently with the run loop, on their
//! own long-lived [`Worker`] threads: packet serialization/publish
//! ([`OrchestratorRuntime::publish`]) and the raw-timestamp archive write
//! ([`crate::archive::ArchiveWorker`]), which overlaps the per-window channel
//! processing rather than preceding it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::{error, warn};

use crate::archive::{ArchiveChunkKind, ArchiveWorker, Archiver};
use crate::config::{Config, CriWindow, DynamicConfig, ExperimentType};
use crate::correlator::{Correlator, CorrelatorResult};
use crate::counter::{RoiCounter, TimestampCounter};
use crate::device::{Device, RawData};
use crate::dtof::Dtof;
use crate::error::{Result, TaufluxError};
use crate::health::HealthMonitor;
use crate::histogram::Histogram;
use crate::keyed_container::KeyedContainer;
use crate::publisher::Publisher;
use crate::schema::{
    CriChannelResult, CriMeta, DtofMeta, EventType, G2ChannelResult, G2Meta, Packet, PacketHeader,
    Payload, SequenceCounters,
};
use crate::serializer::Serializer;
use crate::storage_pool::StoragePool;
use crate::time::MacroTime;
use crate::time_shifter::TimeShifter;
use crate::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Starting,
    Running,
    Stopping,
}

pub trait Orchestrator {
    fn state(&self) -> OrchestratorState;
    fn start(&mut self, experiment_id: i32) -> Result<()>;
    fn run_window(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Fields and behavior shared by every orchestrator variant: the publish transport,
/// serializer, time discipline, sequence counters, and health monitor. Shared by
/// composition, not inheritance, so [`DeviceProcessor`] and [`pf32::Pf32G2Processor`]
/// embed one without duplicating its bookkeeping.
pub struct OrchestratorRuntime {
    pub publisher: Arc<dyn Publisher>,
    pub serializer: Arc<dyn Serializer>,
    pub health: HealthMonitor,
    pub time_shifter: TimeShifter,
    pub seq: SequenceCounters,
    pub state: OrchestratorState,
    pub experiment_id: i32,
    publish_worker: Worker,
}

impl OrchestratorRuntime {
    pub fn new(publisher: Arc<dyn Publisher>, serializer: Arc<dyn Serializer>, health: HealthMonitor) -> Self {
        Self {
            publisher,
            serializer,
            health,
            time_shifter: TimeShifter::default(),
            seq: SequenceCounters::default(),
            state: OrchestratorState::Idle,
            experiment_id: 0,
            publish_worker: Worker::spawn(64),
        }
    }

    /// Queues `payload` for serialization and publish off the caller's thread,
    /// preserving FIFO order (one worker thread, one queue) across everything
    /// submitted this way. Returns as soon as the job is queued, not once it has run;
    /// a failure surfaces via [`HealthMonitor::record_fatal`] rather than this call's
    /// return value. Callers that need the write to have actually landed (tests
    /// reading a packet straight back, shutdown) should call [`Self::flush_publish`]
    /// afterwards.
    pub fn publish(&self, header: PacketHeader, payload: Payload) -> Result<()> {
        let packet = Packet::new(header, payload);
        let serializer = Arc::clone(&self.serializer);
        let publisher = Arc::clone(&self.publisher);
        let health = self.health.clone();
        self.publish_worker.submit(move || {
            let result = serializer
                .serialize(&packet)
                .and_then(|bytes| publisher.publish(packet.topic(), &bytes));
            if let Err(e) = &result {
                health.record_fatal(e);
            }
        })?;
        Ok(())
    }

    /// Blocks until every publish queued so far has completed. A no-op barrier job
    /// submitted behind them in the same FIFO queue, not a wait on any one of them.
    pub fn flush_publish(&self) -> Result<()> {
        let handle = self.publish_worker.submit(|| ())?;
        handle.wait();
        Ok(())
    }

    pub fn emit_event(&mut self, event_type: EventType, timestamp_ns: i64) -> Result<()> {
        self.seq.event_seq += 1;
        let header = PacketHeader {
            experiment_id: self.experiment_id,
            sequence_number: self.seq.event_seq - 1,
            timestamp_ns,
        };
        self.publish(header, Payload::Event { event_type })
    }

    /// Ingests marker-channel edges into the time discipline, publishing `pps_stats`
    /// for every accepted edge. A single missed edge is logged and absorbed; more than
    /// one is fatal and propagated.
    pub fn handle_pps(&mut self, markers: &[MacroTime]) -> Result<()> {
        for &marker in markers {
            match self.time_shifter.adjust(marker) {
                Ok(stats) => {
                    self.seq.pps_seq += 1;
                    let shifted = self.time_shifter.shift(marker);
                    let header = PacketHeader {
                        experiment_id: self.experiment_id,
                        sequence_number: self.seq.pps_seq - 1,
                        timestamp_ns: (shifted.as_ps() / 1000) as i64,
                    };
                    self.publish(
                        header,
                        Payload::PpsStats {
                            offset_ns: (stats.offset_ps / 1000) as i64,
                            jitter_ns: (stats.jitter_ps / 1000) as i64,
                        },
                    )?;
                }
                Err(e @ TaufluxError::Transient(_)) => {
                    warn!("PPS edge rejected (within holdoff): {e}");
                }
                Err(e) => {
                    error!("PPS discipline failed fatally: {e}");
                    self.health.record_fatal(&e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// Per-channel accumulator state allocated once from `cfg.enabled_channels`.
struct ChannelState {
    correlator: Option<Correlator>,
    dtof: Dtof,
    roi_counter: RoiCounter,
    timestamp_counter: TimestampCounter,
    raw_histogram: Histogram,
}

#[derive(Debug, Default)]
struct ChannelResult {
    dtof_counts: Option<Vec<u32>>,
    cri: Option<CriChannelResult>,
    count: Option<u64>,
    g2: Option<CorrelatorResult>,
}

/// The primary orchestrator: drives a [`Device`] that returns raw timestamps/histograms
/// and computes DTOF, CRi, count-rate, and correlator results on the host.
pub struct DeviceProcessor {
    pub runtime: OrchestratorRuntime,
    device: Arc<dyn Device>,
    archiver: Option<ArchiveWorker>,
    cfg: Config,
    dynamic_cfg: DynamicConfig,
    channels: KeyedContainer<u32, ChannelState>,
    /// Ping-pong `RawData` slots reused window over window. Held behind an `Arc` (not
    /// a bare field) so a [`PoolHandle`](crate::storage_pool::PoolHandle) allocated
    /// from it never has to borrow from `&self`, which would collide with the
    /// `&mut self` the rest of window processing needs.
    raw_pool: Arc<StoragePool<RawData>>,
    next_begin_bin_idx: u64,
    window_bins: u64,
    archive_root: std::path::PathBuf,
}

impl DeviceProcessor {
    pub fn new(
        device: Arc<dyn Device>,
        runtime: OrchestratorRuntime,
        cfg: Config,
        dynamic_cfg: DynamicConfig,
        archiver: Option<Box<dyn Archiver>>,
    ) -> Result<Self> {
        cfg.validate()?;
        let bin_width_ps = cfg.bin_size_ns * 1000;
        let channels = {
            let cfg = &cfg;
            KeyedContainer::from_keys_with(cfg.enabled_channels.clone(), (), |()| {
                let correlator = match cfg.exp_type {
                    ExperimentType::Dcs => Some(
                        Correlator::new(bin_width_ps, cfg.points_per_level, cfg.n_levels, cfg.rebin_factor)
                            .expect("Config::validate guarantees valid correlator parameters"),
                    ),
                    ExperimentType::Tdf => None,
                };
                ChannelState {
                    correlator,
                    dtof: Dtof::new(
                        cfg.dtof_data_resolution_ps,
                        cfg.dtof_data_resolution_ps,
                        cfg.dtof_range_min_ps,
                        cfg.dtof_range_max_ps,
                    )
                    .expect("Config::validate guarantees a well-formed DTOF range"),
                    roi_counter: RoiCounter::new(),
                    timestamp_counter: TimestampCounter::new(),
                    raw_histogram: Histogram::new(bin_width_ps),
                }
            })
        };
        let window_bins = cfg.points_per_level as u64 * (cfg.rebin_factor as u64).pow(cfg.n_levels as u32 - 1);

        let raw_pool = Arc::new(StoragePool::<RawData>::new(2));
        {
            // Pre-seat every slot with the run's real channel set. `PoolHandle::drop`
            // leaves the slot's value as-is rather than resetting it, so this is the
            // only place a pooled `RawData` is ever built from scratch.
            let mut warmed = Vec::with_capacity(raw_pool.capacity());
            while let Some(mut handle) = raw_pool.allocate() {
                *handle = RawData::for_channels(cfg.enabled_channels.iter().copied());
                warmed.push(handle);
            }
        }

        Ok(Self {
            runtime,
            device,
            archiver: archiver.map(ArchiveWorker::new),
            cfg,
            dynamic_cfg,
            channels,
            raw_pool,
            next_begin_bin_idx: 0,
            window_bins,
            archive_root: std::path::PathBuf::new(),
        })
    }

    pub fn set_dynamic_config(&mut self, dynamic_cfg: DynamicConfig) {
        self.dynamic_cfg = dynamic_cfg;
    }

    /// Directory under which `experiment-<id>` session directories are created.
    /// Defaults to the process's current directory.
    pub fn with_archive_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.archive_root = root.into();
        self
    }

    fn process_channels(&mut self, raw: &RawData) -> Vec<(u32, Result<ChannelResult>)> {
        let cfg = &self.cfg;
        let dynamic_cfg = &self.dynamic_cfg;
        let results = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for (&channel_id, state) in self.channels.iter_mut() {
                let Some(timestamps) = raw.timestamps.get(&channel_id) else {
                    continue;
                };
                let cri = dynamic_cfg
                    .cri_windows
                    .get(&channel_id)
                    .copied()
                    .unwrap_or(CriWindow { offset_ps: 0, width_ps: u32::MAX });
                let results = &results;
                scope.spawn(move || {
                    let r = process_one_channel(cfg, dynamic_cfg, timestamps, cri, state);
                    results.lock().unwrap().push((channel_id, r));
                });
            }
        });

        results.into_inner().unwrap()
    }

    /// Runs `§4.6`'s startup sequence: container init already happened in [`Self::new`];
    /// this performs the device rendezvous, the optional PPS-priming wait, and the
    /// `START` event.
    fn start_device(&mut self) -> Result<()> {
        self.device.start(&self.cfg)?;
        let pool = Arc::clone(&self.raw_pool);
        let mut rendezvous = pool.allocate().ok_or_else(|| {
            TaufluxError::exhausted("DeviceProcessor::start: raw-data storage pool exhausted")
        })?;
        self.device.update_raw_data(0, 0, &mut rendezvous)?;
        drop(rendezvous);

        if self.cfg.use_pps {
            const MAX_PRIMING_WINDOWS: u32 = 20;
            let mut attempts = 0;
            while !self.runtime.time_shifter.is_primed() {
                if attempts >= MAX_PRIMING_WINDOWS {
                    return Err(TaufluxError::transient(
                        "DeviceProcessor::start: no PPS pulse observed within the priming deadline",
                    ));
                }
                let end = self.next_begin_bin_idx + self.window_bins;
                let pool = Arc::clone(&self.raw_pool);
                let mut dest = pool.allocate().ok_or_else(|| {
                    TaufluxError::exhausted("DeviceProcessor::start: raw-data storage pool exhausted")
                })?;
                self.device.update_raw_data(self.next_begin_bin_idx, end, &mut dest)?;
                self.next_begin_bin_idx = end;
                self.runtime.handle_pps(&dest.marker_timestamps)?;
                attempts += 1;
            }
        }

        let start_ts = self.runtime.time_shifter.shift(MacroTime(self.next_begin_bin_idx * self.cfg.bin_size_ns * 1000));
        self.runtime.emit_event(EventType::Start, (start_ts.as_ps() / 1000) as i64)?;
        Ok(())
    }
}

impl Orchestrator for DeviceProcessor {
    fn state(&self) -> OrchestratorState {
        self.runtime.state
    }

    fn start(&mut self, experiment_id: i32) -> Result<()> {
        self.runtime.state = OrchestratorState::Starting;
        self.runtime.experiment_id = experiment_id;
        if let Some(archiver) = self.archiver.as_ref() {
            archiver.open(&self.archive_root.join(format!("experiment-{experiment_id}")))?;
        }
        self.start_device()?;
        self.runtime.state = OrchestratorState::Running;
        Ok(())
    }

    fn run_window(&mut self) -> Result<()> {
        let begin = self.next_begin_bin_idx;
        let end = begin + self.window_bins;
        let pool = Arc::clone(&self.raw_pool);
        let mut raw = pool.allocate().ok_or_else(|| {
            TaufluxError::exhausted("DeviceProcessor::run_window: raw-data storage pool exhausted")
        })?;
        raw.clear();
        self.device.update_raw_data(begin, end, &mut raw)?;
        self.next_begin_bin_idx = end;

        self.process_window(end, &raw)
    }

    fn stop(&mut self) -> Result<()> {
        self.runtime.state = OrchestratorState::Stopping;
        let stop_ts = self.runtime.time_shifter.shift(MacroTime(self.next_begin_bin_idx * self.cfg.bin_size_ns * 1000));
        self.runtime.emit_event(EventType::Stop, (stop_ts.as_ps() / 1000) as i64)?;
        self.device.stop()?;
        if let Some(archiver) = self.archiver.as_ref() {
            archiver.close()?;
        }
        // Barrier: block until every queued publish has actually landed, so a caller
        // reading the publish transport back right after `stop()` never races the
        // worker thread that now serializes and publishes off this one.
        self.runtime.flush_publish()?;
        self.runtime.state = OrchestratorState::Idle;
        Ok(())
    }
}

impl DeviceProcessor {
    fn process_window(&mut self, end: u64, raw: &RawData) -> Result<()> {
        self.runtime.handle_pps(&raw.marker_timestamps)?;

        // Kick the raw-timestamp archive write off onto its own worker thread, then
        // run channel processing concurrently with it; `flush` below is the join.
        if self.cfg.log_raw_data || self.cfg.publish_raw_data {
            if let Some(archiver) = self.archiver.as_ref() {
                for (&channel, ts) in raw.timestamps.iter() {
                    let mut bytes = Vec::with_capacity(4 + ts.len() * 8);
                    bytes.extend_from_slice(&channel.to_le_bytes());
                    bytes.extend(ts.macro_times().iter().flat_map(|t| t.as_ps().to_le_bytes()));
                    archiver.append(ArchiveChunkKind::RawTimestamps, bytes)?;
                }
            }
        }

        let raw_results = self.process_channels(raw);

        if let Some(archiver) = self.archiver.as_ref() {
            archiver.flush()?;
        }

        let mut ok_results = BTreeMap::new();
        let mut first_err = None;
        let mut err_count = 0;
        for (channel, r) in raw_results {
            match r {
                Ok(v) => {
                    ok_results.insert(channel, v);
                }
                Err(e) => {
                    err_count += 1;
                    error!("channel {channel} processing failed: {e}");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        if err_count > 1 {
            warn!("{} channels failed this window; surfacing the first", err_count);
        }
        if let Some(e) = first_err {
            self.runtime.health.record_fatal(&e);
            return Err(e);
        }

        self.runtime.seq.window_seq += 1;
        let window_seq = self.runtime.seq.window_seq - 1;
        let timestamp_ns = (end * self.cfg.bin_size_ns) as i64;

        self.publish_dtof(&ok_results, window_seq, timestamp_ns)?;
        self.publish_cri(&ok_results, window_seq, timestamp_ns)?;
        self.publish_counts(&ok_results, window_seq, timestamp_ns)?;
        if matches!(self.cfg.exp_type, ExperimentType::Dcs) {
            self.publish_g2(&ok_results, window_seq, timestamp_ns)?;
        }
        Ok(())
    }

    fn header(&self, sequence_number: i64, timestamp_ns: i64) -> PacketHeader {
        PacketHeader {
            experiment_id: self.runtime.experiment_id,
            sequence_number,
            timestamp_ns,
        }
    }

    fn publish_dtof(&mut self, results: &BTreeMap<u32, ChannelResult>, _window_seq: i64, ts: i64) -> Result<()> {
        let channels: BTreeMap<u32, Vec<u32>> = results
            .iter()
            .filter_map(|(&ch, r)| r.dtof_counts.clone().map(|c| (ch, c)))
            .collect();
        if channels.is_empty() {
            return Ok(());
        }
        self.runtime.seq.dtof_seq += 1;
        let seq = self.runtime.seq.dtof_seq - 1;
        let meta = DtofMeta {
            resolution_ps: self.cfg.dtof_data_resolution_ps,
            range_min_ps: self.cfg.dtof_range_min_ps,
            range_max_ps: self.cfg.dtof_range_max_ps,
            integration_period_ns: self.dynamic_cfg.dtof_integ_period_ns,
        };
        self.runtime
            .publish(self.header(seq, ts), Payload::Dtof { meta, channels })
    }

    fn publish_cri(&mut self, results: &BTreeMap<u32, ChannelResult>, _window_seq: i64, ts: i64) -> Result<()> {
        let channels: BTreeMap<u32, CriChannelResult> = results
            .iter()
            .filter_map(|(&ch, r)| r.cri.map(|c| (ch, c)))
            .collect();
        if channels.is_empty() {
            return Ok(());
        }
        self.runtime.seq.cri_seq += 1;
        let seq = self.runtime.seq.cri_seq - 1;
        let meta = CriMeta { integration_period_ns: self.dynamic_cfg.cri_integ_period_ns };
        self.runtime
            .publish(self.header(seq, ts), Payload::Cri { meta, channels })
    }

    fn publish_counts(&mut self, results: &BTreeMap<u32, ChannelResult>, _window_seq: i64, ts: i64) -> Result<()> {
        let channels: BTreeMap<u32, u64> = results
            .iter()
            .filter_map(|(&ch, r)| r.count.map(|c| (ch, c)))
            .collect();
        if channels.is_empty() {
            return Ok(());
        }
        self.runtime.seq.count_seq += 1;
        let seq = self.runtime.seq.count_seq - 1;
        let meta = CriMeta { integration_period_ns: self.dynamic_cfg.count_integ_period_ns };
        self.runtime
            .publish(self.header(seq, ts), Payload::Counts { meta, channels })
    }

    fn publish_g2(&mut self, results: &BTreeMap<u32, ChannelResult>, window_seq: i64, ts: i64) -> Result<()> {
        let mut channels = BTreeMap::new();
        let mut k = Vec::new();
        for (&ch, r) in results {
            let Some(g2) = &r.g2 else { continue };
            if k.is_empty() {
                k = g2.tau_k_ps.clone();
            }
            channels.insert(ch, G2ChannelResult { channel_1: ch, channel_2: ch, g2: g2.g2.clone() });
        }
        if channels.is_empty() {
            return Ok(());
        }
        let meta = G2Meta { dt_ps: Vec::new(), k };
        self.runtime
            .publish(self.header(window_seq, ts), Payload::G2 { meta, channels })
    }
}

fn process_one_channel(
    cfg: &Config,
    dynamic_cfg: &DynamicConfig,
    timestamps: &crate::time::ChannelTimestamps,
    cri: CriWindow,
    state: &mut ChannelState,
) -> Result<ChannelResult> {
    let mut result = ChannelResult::default();

    state.dtof.generate(timestamps, dynamic_cfg.dtof_integ_period_ns * 1000)?;
    if state.dtof.is_complete() {
        result.dtof_counts = Some(state.dtof.counts().to_vec());
    }

    state.roi_counter.count_roi(
        timestamps,
        dynamic_cfg.cri_integ_period_ns * 1000,
        cri.offset_ps,
        cri.offset_ps.saturating_add(cri.width_ps),
    )?;
    if state.roi_counter.is_complete() {
        result.cri = Some(CriChannelResult {
            utime_from_ps: cri.offset_ps,
            utime_until_ps: cri.offset_ps.saturating_add(cri.width_ps),
            count: state.roi_counter.count(),
        });
    }

    state
        .timestamp_counter
        .count_timestamps(timestamps, dynamic_cfg.count_integ_period_ns * 1000)?;
    if state.timestamp_counter.is_complete() {
        result.count = Some(state.timestamp_counter.count());
    }

    if let Some(correlator) = state.correlator.as_mut() {
        let bin_width_ps = cfg.bin_size_ns * 1000;
        let span = timestamps.span();
        let begin_bin_idx = span.from.as_ps() / bin_width_ps;
        let end_bin_idx = span.until.as_ps() / bin_width_ps;
        state
            .raw_histogram
            .bin_macrotimes(timestamps.macro_times(), begin_bin_idx, end_bin_idx)?;
        correlator.update(&state.raw_histogram)?;
        result.g2 = Some(correlator.result().clone());
    }

    Ok(result)
}

pub mod pf32 {
    //! PF32-G2 orchestrator variant: the device itself returns finished g2 results, so
    //! this variant skips the host-side correlator entirely (§4.6 step 3) and feeds a
    //! count-rate counter from the device's intensity map instead.

    use super::*;

    #[derive(Debug, Clone)]
    pub struct Pf32Window {
        pub g2_by_channel: BTreeMap<u32, G2ChannelResult>,
        pub intensity_by_channel: BTreeMap<u32, u64>,
        pub markers: Vec<MacroTime>,
        pub tau_k_ps: Vec<u64>,
    }

    /// A device that computes g2 on-board and hands back finished results rather than
    /// raw timetags.
    pub trait Pf32Device: Send + Sync {
        fn start(&self, config: &Config) -> Result<()>;
        fn poll_window(&self, begin_bin_idx: u64, end_bin_idx: u64) -> Result<Pf32Window>;
        fn stop(&self) -> Result<()>;
    }

    pub struct Pf32G2Processor {
        pub runtime: OrchestratorRuntime,
        device: Arc<dyn Pf32Device>,
        cfg: Config,
        count_integ_period_ns: u64,
        next_begin_bin_idx: u64,
        window_bins: u64,
    }

    impl Pf32G2Processor {
        pub fn new(
            device: Arc<dyn Pf32Device>,
            runtime: OrchestratorRuntime,
            cfg: Config,
            count_integ_period_ns: u64,
        ) -> Result<Self> {
            cfg.validate()?;
            let window_bins =
                cfg.points_per_level as u64 * (cfg.rebin_factor as u64).pow(cfg.n_levels as u32 - 1);
            Ok(Self {
                runtime,
                device,
                cfg,
                count_integ_period_ns,
                next_begin_bin_idx: 0,
                window_bins,
            })
        }
    }

    impl Orchestrator for Pf32G2Processor {
        fn state(&self) -> OrchestratorState {
            self.runtime.state
        }

        fn start(&mut self, experiment_id: i32) -> Result<()> {
            self.runtime.state = OrchestratorState::Starting;
            self.runtime.experiment_id = experiment_id;
            self.device.start(&self.cfg)?;
            let start_ts = self.runtime.time_shifter.shift(MacroTime::ZERO);
            self.runtime
                .emit_event(EventType::Start, (start_ts.as_ps() / 1000) as i64)?;
            self.runtime.state = OrchestratorState::Running;
            Ok(())
        }

        fn run_window(&mut self) -> Result<()> {
            let begin = self.next_begin_bin_idx;
            let end = begin + self.window_bins;
            let window = self.device.poll_window(begin, end)?;
            self.next_begin_bin_idx = end;

            self.runtime.handle_pps(&window.markers)?;

            self.runtime.seq.window_seq += 1;
            let window_seq = self.runtime.seq.window_seq - 1;
            let ts = (end * self.cfg.bin_size_ns) as i64;

            if !window.g2_by_channel.is_empty() {
                let meta = G2Meta { dt_ps: Vec::new(), k: window.tau_k_ps.clone() };
                self.runtime.publish(
                    PacketHeader { experiment_id: self.runtime.experiment_id, sequence_number: window_seq, timestamp_ns: ts },
                    Payload::G2 { meta, channels: window.g2_by_channel.clone() },
                )?;
            }
            if !window.intensity_by_channel.is_empty() {
                self.runtime.seq.count_seq += 1;
                let meta = CriMeta { integration_period_ns: self.count_integ_period_ns };
                self.runtime.publish(
                    PacketHeader {
                        experiment_id: self.runtime.experiment_id,
                        sequence_number: self.runtime.seq.count_seq - 1,
                        timestamp_ns: ts,
                    },
                    Payload::Counts { meta, channels: window.intensity_by_channel.clone() },
                )?;
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.runtime.state = OrchestratorState::Stopping;
            let ts = self.runtime.time_shifter.shift(MacroTime(self.next_begin_bin_idx * self.cfg.bin_size_ns * 1000));
            self.runtime.emit_event(EventType::Stop, (ts.as_ps() / 1000) as i64)?;
            self.device.stop()?;
            self.runtime.flush_publish()?;
            self.runtime.state = OrchestratorState::Idle;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MockDevice, ScheduledWindow};
    use crate::publisher::ChannelPublisher;
    use crate::schema::Payload;
    use crate::serializer::JsonSerializer;
    use crate::time::{ChannelTimestamps, MicroTime, Span};

    fn test_config() -> Config {
        Config {
            enabled_channels: vec![0, 1],
            exp_type: ExperimentType::Dcs,
            bin_size_ns: 1,
            points_per_level: 4,
            n_levels: 2,
            rebin_factor: 2,
            calc_g2i: false,
            dtof_range_min_ps: 0,
            dtof_range_max_ps: 8000,
            dtof_data_resolution_ps: 1000,
            use_pps: false,
            publish_raw_data: false,
            log_raw_data: false,
        }
    }

    fn test_dynamic_config() -> DynamicConfig {
        DynamicConfig {
            count_integ_period_ns: 4,
            dtof_integ_period_ns: 4,
            cri_integ_period_ns: 4,
            cri_windows: Default::default(),
        }
    }

    fn channel(base: u64) -> ChannelTimestamps {
        let n = 8;
        let macro_times: Vec<MacroTime> = (0..n).map(|i| MacroTime(base + i)).collect();
        let micro_times = vec![MicroTime(1000); n as usize];
        ChannelTimestamps::new(macro_times, micro_times, Span::new(MacroTime(base), MacroTime(base + n)))
    }

    fn window_at(base: u64) -> ScheduledWindow {
        let mut w = ScheduledWindow::default();
        w.channels.insert(0, channel(base));
        w.channels.insert(1, channel(base));
        w
    }

    #[test]
    fn end_to_end_ordering_across_windows() {
        const N: usize = 3;
        let schedule: Vec<ScheduledWindow> = (0..N as u64).map(|i| window_at(i * 8)).collect();
        let device: Arc<dyn Device> = Arc::new(MockDevice::new(schedule, 1000));
        let (publisher, mut rx) = ChannelPublisher::new(&["g2", "event"], 64).unwrap();
        let runtime = OrchestratorRuntime::new(Arc::new(publisher), Arc::new(JsonSerializer), HealthMonitor::new());

        let mut processor = DeviceProcessor::new(device, runtime, test_config(), test_dynamic_config(), None).unwrap();
        processor.start(1).unwrap();
        for _ in 0..N {
            processor.run_window().unwrap();
        }
        processor.stop().unwrap();

        let g2_channel = rx.remove("g2").unwrap();
        let mut seqs = Vec::new();
        while let Ok((_, bytes)) = g2_channel.try_recv() {
            let packet: Packet = serde_json::from_slice(&bytes).unwrap();
            seqs.push(packet.header.sequence_number);
        }
        assert_eq!(seqs, (0..N as i64).collect::<Vec<_>>());

        let event_channel = rx.remove("event").unwrap();
        let mut events = Vec::new();
        while let Ok((_, bytes)) = event_channel.try_recv() {
            let packet: Packet = serde_json::from_slice(&bytes).unwrap();
            if let Payload::Event { event_type } = packet.payload {
                events.push((packet.header.sequence_number, event_type));
            }
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (0, EventType::Start));
        assert_eq!(events[1], (1, EventType::Stop));
    }

    #[test]
    fn exhausted_raw_data_pool_is_a_resource_exhaustion_error() {
        let schedule = vec![window_at(0)];
        let device: Arc<dyn Device> = Arc::new(MockDevice::new(schedule, 1000));
        let (publisher, _rx) = ChannelPublisher::new(&["g2", "event"], 64).unwrap();
        let runtime = OrchestratorRuntime::new(Arc::new(publisher), Arc::new(JsonSerializer), HealthMonitor::new());
        let mut processor =
            DeviceProcessor::new(device, runtime, test_config(), test_dynamic_config(), None).unwrap();
        processor.start(1).unwrap();

        let pool = Arc::clone(&processor.raw_pool);
        let _a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        let err = processor.run_window().unwrap_err();
        assert!(matches!(err, TaufluxError::ResourceExhaustion(_)));
    }
}
