//! Disciplines the device time domain against a 1 Hz pulse-per-second marker.
//!
//! `TimeShifter` tracks a cumulative offset so that `shift(t) = t - offset` lands the
//! accepted PPS edges exactly on 1 s boundaries. A holdoff rejects spurious edges that
//! arrive too soon after the last accepted one; a single missed edge is recovered by
//! folding one nominal period out of the jitter, more than one is fatal.

use crate::error::{Result, TaufluxError};
use crate::time::MacroTime;

const NOMINAL_PERIOD_PS: i128 = 1_000_000_000_000; // 1 s in picoseconds
const DEFAULT_HOLDOFF_PS: u64 = 500_000_000_000; // 500 ms

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustStats {
    pub offset_ps: i128,
    pub jitter_ps: i128,
}

#[derive(Debug, Clone)]
pub struct TimeShifter {
    holdoff_ps: u64,
    primed: bool,
    // Sentinel one nominal period before zero, so the very first edge takes the same
    // "expected = last + period" path as every later one instead of a special case.
    last_ps: i128,
    offset_ps: i128,
}

impl Default for TimeShifter {
    fn default() -> Self {
        Self::new(DEFAULT_HOLDOFF_PS)
    }
}

impl TimeShifter {
    pub fn new(holdoff_ps: u64) -> Self {
        Self {
            holdoff_ps,
            primed: false,
            last_ps: -NOMINAL_PERIOD_PS,
            offset_ps: 0,
        }
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub fn offset_ps(&self) -> i128 {
        self.offset_ps
    }

    /// Maps a device timestamp into the disciplined domain using the current offset.
    pub fn shift(&self, t: MacroTime) -> MacroTime {
        let shifted = t.as_ps() as i128 - self.offset_ps;
        MacroTime(shifted.max(0) as u64)
    }

    /// Feeds one PPS edge. The first edge is never held off and can never be flagged as
    /// missing edges (there is nothing yet to have missed), but still folds its own
    /// jitter into the offset so the first accepted pulse lands on a 1 s boundary
    /// regardless of its absolute device time. Every later edge within `holdoff` of the
    /// last accepted one is rejected as spurious; anything further out is checked
    /// against the nominal 1 s cadence.
    pub fn adjust(&mut self, t: MacroTime) -> Result<AdjustStats> {
        let t_ps = t.as_ps() as i128;

        if self.primed && t_ps - self.last_ps < self.holdoff_ps as i128 {
            return Err(TaufluxError::transient(
                "TimeShifter: PPS edge arrived within holdoff, treated as spurious",
            ));
        }

        let expected = self.last_ps + NOMINAL_PERIOD_PS;
        let mut jitter = t_ps - expected;
        if self.primed {
            let missed = (jitter as f64 / NOMINAL_PERIOD_PS as f64).round() as i64;
            if missed > 1 {
                return Err(TaufluxError::invariant(
                    "TimeShifter: more than one PPS edge missing",
                ));
            }
            if missed == 1 {
                jitter -= NOMINAL_PERIOD_PS;
            }
        }

        self.offset_ps += jitter;
        self.last_ps = t_ps;
        self.primed = true;
        Ok(AdjustStats {
            offset_ps: self.offset_ps,
            jitter_ps: jitter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ps(seconds: u64, extra_ns: u64) -> MacroTime {
        MacroTime(seconds * 1_000_000_000_000 + extra_ns * 1000)
    }

    #[test]
    fn pps_discipline_scenario() {
        let mut shifter = TimeShifter::default();

        let s = shifter.adjust(ps(0, 0)).unwrap();
        assert_eq!(s, AdjustStats { offset_ps: 0, jitter_ps: 0 });

        assert!(shifter.adjust(ps(0, 0)).is_err());

        let s = shifter.adjust(ps(1, 1)).unwrap();
        assert_eq!(s.offset_ps, 1000);
        assert_eq!(s.jitter_ps, 1000);

        let s = shifter.adjust(ps(2, 1)).unwrap();
        assert_eq!(s.offset_ps, 1000);
        assert_eq!(s.jitter_ps, 0);

        let s = shifter.adjust(ps(4, 1)).unwrap();
        assert_eq!(s.offset_ps, 1000);
        assert_eq!(s.jitter_ps, 0);

        assert!(shifter.adjust(ps(7, 1)).is_err());
    }

    #[test]
    fn shifted_accepted_edges_land_on_one_second_boundaries() {
        let mut shifter = TimeShifter::default();
        for edge in [ps(0, 0), ps(1, 1), ps(2, 1), ps(3, 1)] {
            shifter.adjust(edge).unwrap();
            let shifted = shifter.shift(edge);
            assert_eq!(shifted.as_ps() % 1_000_000_000_000, 0);
        }
    }

    #[test]
    fn first_edge_with_nonzero_device_time_lands_on_one_second_boundary() {
        let mut shifter = TimeShifter::default();
        let edge = ps(3, 250);

        let s = shifter.adjust(edge).unwrap();
        assert_eq!(s.offset_ps, edge.as_ps() as i128);
        assert_eq!(s.jitter_ps, edge.as_ps() as i128);

        let shifted = shifter.shift(edge);
        assert_eq!(shifted.as_ps() % 1_000_000_000_000, 0);
    }

    #[test]
    fn two_missed_edges_is_fatal_one_is_recoverable() {
        let mut shifter = TimeShifter::default();
        shifter.adjust(ps(0, 0)).unwrap();
        assert!(shifter.adjust(ps(2, 0)).is_ok());
        assert!(shifter.adjust(ps(5, 0)).is_err());
    }
}
