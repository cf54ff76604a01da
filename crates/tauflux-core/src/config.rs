//! Static and per-window configuration consumed by the orchestrator.
//!
//! `Config` is set once per experiment; `DynamicConfig` is re-read once per window
//! (integration periods and CRi offsets/widths may change mid-experiment). Parsing a
//! config file from disk is out of scope for this crate — these are plain in-memory
//! structs a host process fills in however it likes and hands to [`crate::orchestrator`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentType {
    /// Diffuse correlation spectroscopy: DTOF + CRi + correlator per channel.
    Dcs,
    /// Time-domain fluorescence: DTOF + CRi only, no correlator.
    Tdf,
}

/// Per-channel count-rate-inside-ROI window, in picoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriWindow {
    pub offset_ps: u32,
    pub width_ps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub enabled_channels: Vec<u32>,
    pub exp_type: ExperimentType,
    pub bin_size_ns: u64,
    pub points_per_level: usize,
    pub n_levels: usize,
    pub rebin_factor: usize,
    pub calc_g2i: bool,
    pub dtof_range_min_ps: u64,
    pub dtof_range_max_ps: u64,
    pub dtof_data_resolution_ps: u64,
    pub use_pps: bool,
    pub publish_raw_data: bool,
    pub log_raw_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicConfig {
    pub count_integ_period_ns: u64,
    pub dtof_integ_period_ns: u64,
    pub cri_integ_period_ns: u64,
    pub cri_windows: std::collections::BTreeMap<u32, CriWindow>,
}

impl Config {
    /// Validates the fields this core actually relies on. Config *parsing* from a file
    /// is out of scope; validating the typed struct once built is not.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::TaufluxError;
        if self.enabled_channels.is_empty() {
            return Err(TaufluxError::contract("Config: enabled_channels is empty"));
        }
        if !matches!(self.rebin_factor, 1 | 2 | 4 | 8) {
            return Err(TaufluxError::contract(
                "Config: rebin_factor must be a power of two in {1,2,4,8}",
            ));
        }
        if self.points_per_level == 0 || self.n_levels == 0 {
            return Err(TaufluxError::contract(
                "Config: points_per_level and n_levels must be > 0",
            ));
        }
        if self.dtof_range_max_ps < self.dtof_range_min_ps {
            return Err(TaufluxError::contract(
                "Config: dtof_range_max_ps must be >= dtof_range_min_ps",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            enabled_channels: vec![0, 1],
            exp_type: ExperimentType::Dcs,
            bin_size_ns: 100,
            points_per_level: 8,
            n_levels: 3,
            rebin_factor: 2,
            calc_g2i: false,
            dtof_range_min_ps: 0,
            dtof_range_max_ps: 12_000,
            dtof_data_resolution_ps: 4,
            use_pps: true,
            publish_raw_data: false,
            log_raw_data: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn rejects_bad_rebin_factor() {
        let mut cfg = sample_config();
        cfg.rebin_factor = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_channel_set() {
        let mut cfg = sample_config();
        cfg.enabled_channels.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = sample_config();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.enabled_channels, cfg.enabled_channels);
    }
}
