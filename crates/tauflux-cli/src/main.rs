//! CLI for tauflux — drives the acquisition pipeline against a mock device.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};

use tauflux_core::config::{Config, CriWindow, DynamicConfig, ExperimentType};
use tauflux_core::device::{MockDevice, ScheduledWindow};
use tauflux_core::health::HealthMonitor;
use tauflux_core::orchestrator::{DeviceProcessor, Orchestrator, OrchestratorRuntime};
use tauflux_core::publisher::ChannelPublisher;
use tauflux_core::serializer::JsonSerializer;
use tauflux_core::time::{ChannelTimestamps, MacroTime, MicroTime, Span};

#[derive(Parser)]
#[command(name = "tauflux")]
#[command(about = "tauflux — photon-counting / DCS acquisition pipeline demo")]
#[command(version = tauflux_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a short acquisition against a deterministic mock device and print published
    /// topics as they arrive.
    Run {
        /// Number of windows to acquire
        #[arg(long, default_value = "10")]
        windows: usize,

        /// Channels to enable
        #[arg(long, default_value = "0,1", value_delimiter = ',')]
        channels: Vec<u32>,

        /// Experiment type
        #[arg(long, default_value = "dcs", value_parser = ["dcs", "tdf"])]
        exp_type: String,

        /// Bin size in nanoseconds
        #[arg(long, default_value = "10")]
        bin_size_ns: u64,

        /// Points per correlator level
        #[arg(long, default_value = "8")]
        points_per_level: usize,

        /// Number of correlator levels
        #[arg(long, default_value = "3")]
        n_levels: usize,

        /// Correlator rebin factor
        #[arg(long, default_value = "2")]
        rebin_factor: usize,

        /// Archive raw timestamps to ./experiment-<id>/ as the run proceeds
        #[arg(long)]
        archive: bool,
    },

    /// Print the library version
    Version,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            windows,
            channels,
            exp_type,
            bin_size_ns,
            points_per_level,
            n_levels,
            rebin_factor,
            archive,
        } => run(
            windows,
            channels,
            &exp_type,
            bin_size_ns,
            points_per_level,
            n_levels,
            rebin_factor,
            archive,
        ),
        Commands::Version => {
            println!("tauflux {}", tauflux_core::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("tauflux: {e}");
        std::process::exit(1);
    }
}

fn sample_channel(base: u64, n: u64) -> ChannelTimestamps {
    let macro_times: Vec<MacroTime> = (0..n).map(|i| MacroTime(base + i)).collect();
    let micro_times = vec![MicroTime(0); n as usize];
    ChannelTimestamps::new(macro_times, micro_times, Span::new(MacroTime(base), MacroTime(base + n)))
}

fn run(
    windows: usize,
    channels: Vec<u32>,
    exp_type: &str,
    bin_size_ns: u64,
    points_per_level: usize,
    n_levels: usize,
    rebin_factor: usize,
    archive: bool,
) -> tauflux_core::Result<()> {
    let exp_type = match exp_type {
        "tdf" => ExperimentType::Tdf,
        _ => ExperimentType::Dcs,
    };

    let cfg = Config {
        enabled_channels: channels.clone(),
        exp_type,
        bin_size_ns,
        points_per_level,
        n_levels,
        rebin_factor,
        calc_g2i: false,
        dtof_range_min_ps: 0,
        dtof_range_max_ps: 8000,
        dtof_data_resolution_ps: 1000,
        use_pps: false,
        publish_raw_data: archive,
        log_raw_data: archive,
    };

    let dynamic_cfg = DynamicConfig {
        count_integ_period_ns: bin_size_ns,
        dtof_integ_period_ns: bin_size_ns,
        cri_integ_period_ns: bin_size_ns,
        cri_windows: channels
            .iter()
            .map(|&ch| (ch, CriWindow { offset_ps: 0, width_ps: u32::MAX }))
            .collect(),
    };

    let window_bins = points_per_level as u64 * (rebin_factor as u64).pow(n_levels as u32 - 1);
    let schedule: Vec<ScheduledWindow> = (0..windows as u64)
        .map(|i| {
            let mut w = ScheduledWindow::default();
            for &ch in &channels {
                w.channels.insert(ch, sample_channel(i * window_bins, window_bins));
            }
            w
        })
        .collect();
    let device = Arc::new(MockDevice::new(schedule, 1000));

    let topics = ["dtof", "cri", "counts", "g2", "event", "pps_stats"];
    let (publisher, mut receivers) = ChannelPublisher::new(&topics, 256)?;

    let archiver: Option<Box<dyn tauflux_core::archive::Archiver>> = if archive {
        Some(Box::new(tauflux_core::archive::DirectoryArchiver::new()))
    } else {
        None
    };

    let runtime = OrchestratorRuntime::new(Arc::new(publisher), Arc::new(JsonSerializer), HealthMonitor::new());
    let mut processor = DeviceProcessor::new(device, runtime, cfg, dynamic_cfg, archiver)?;

    info!("starting acquisition for {windows} windows on channels {channels:?}");
    processor.start(1)?;
    for i in 0..windows {
        processor.run_window()?;
        info!("window {i} complete");
    }
    processor.stop()?;

    for topic in topics {
        let Some(rx) = receivers.remove(topic) else { continue };
        while let Ok((topic, bytes)) = rx.try_recv() {
            println!("{topic}: {}", String::from_utf8_lossy(&bytes));
        }
    }

    if !processor.runtime.health.is_healthy() {
        for event in processor.runtime.health.events() {
            error!("recorded fatal event: {}", event.message);
        }
    }

    Ok(())
}
