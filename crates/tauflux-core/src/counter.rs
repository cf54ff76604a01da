//! Per-channel accumulating counters over a configurable integration period.
//!
//! All three variants share the same leftover-carryover period state machine as
//! [`crate::dtof::Dtof`]: an integration period ends when a chunk's span crosses the
//! period boundary, and the counter remains readable until the next update.

use crate::error::{PeriodDiagnostic, Result, TaufluxError};
use crate::histogram::Histogram;
use crate::time::{ChannelTimestamps, MacroTime};

/// Counts every timestamp in the channel, independent of microtime.
#[derive(Debug, Clone, Default)]
pub struct TimestampCounter {
    primed: bool,
    period_start: MacroTime,
    period_ps: u64,
    complete: bool,
    count: u64,
    leftover: u64,
}

impl TimestampCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn count_timestamps(
        &mut self,
        timestamps: &ChannelTimestamps,
        target_period_ps: u64,
    ) -> Result<()> {
        if !self.primed {
            self.period_start = timestamps.span().from;
            self.period_ps = target_period_ps;
            self.primed = true;
            self.complete = false;
        } else if self.complete {
            self.period_start = self.period_start + self.period_ps;
            self.period_ps = target_period_ps;
            self.count = self.leftover;
            self.leftover = 0;
            self.complete = false;
        }

        let period_end = self.period_start + self.period_ps;
        if timestamps.span().until <= period_end {
            self.count += timestamps.len() as u64;
            if timestamps.span().until == period_end {
                self.complete = true;
            }
        } else {
            let (left, right) = timestamps.split_at_macrotime(period_end);
            self.count += left.len() as u64;
            self.leftover += right.len() as u64;
            self.complete = true;
        }
        Ok(())
    }
}

/// Counts timestamps whose microtime falls in `[roi_min, roi_max]`. A newly supplied
/// ROI is adopted only when a fresh period starts with no pending leftovers; otherwise
/// it is deferred until the next period boundary where that holds.
#[derive(Debug, Clone, Default)]
pub struct RoiCounter {
    primed: bool,
    period_start: MacroTime,
    period_ps: u64,
    complete: bool,
    count: u64,
    leftover: u64,
    roi_min: u32,
    roi_max: u32,
    pending_roi: Option<(u32, u32)>,
}

impl RoiCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn roi(&self) -> (u32, u32) {
        (self.roi_min, self.roi_max)
    }

    fn count_in_roi(&self, timestamps: &ChannelTimestamps) -> u64 {
        Self::count_in_roi_bounds(timestamps, self.roi_min, self.roi_max)
    }

    fn count_in_roi_bounds(timestamps: &ChannelTimestamps, roi_min: u32, roi_max: u32) -> u64 {
        timestamps
            .micro_times()
            .iter()
            .filter(|mt| mt.as_ps() >= roi_min && mt.as_ps() <= roi_max)
            .count() as u64
    }

    pub fn count_roi(
        &mut self,
        timestamps: &ChannelTimestamps,
        target_period_ps: u64,
        roi_min: u32,
        roi_max: u32,
    ) -> Result<()> {
        if !self.primed {
            self.period_start = timestamps.span().from;
            self.period_ps = target_period_ps;
            self.roi_min = roi_min;
            self.roi_max = roi_max;
            self.primed = true;
            self.complete = false;
        } else if self.complete {
            self.period_start = self.period_start + self.period_ps;
            self.period_ps = target_period_ps;
            // If there was leftover from the last batch, the ROI for this period was
            // already fixed by the straddling call (stashed in `pending_roi`) and must
            // not be overridden even if the caller supplied a different one now.
            if self.leftover == 0 {
                self.roi_min = roi_min;
                self.roi_max = roi_max;
            } else if let Some((min, max)) = self.pending_roi.take() {
                self.roi_min = min;
                self.roi_max = max;
            }
            self.count = self.leftover;
            self.leftover = 0;
            self.complete = false;
        }

        let period_end = self.period_start + self.period_ps;
        if timestamps.span().until <= period_end {
            self.count += self.count_in_roi(timestamps);
            if timestamps.span().until == period_end {
                self.complete = true;
            }
        } else {
            // The ROI may change exactly as the period ends; the leftover half needs to
            // be counted against the new ROI so it's ready once the next period starts.
            self.pending_roi = Some((roi_min, roi_max));
            let (left, right) = timestamps.split_at_macrotime(period_end);
            self.count += self.count_in_roi(&left);
            self.leftover += Self::count_in_roi_bounds(&right, roi_min, roi_max);
            self.complete = true;
        }
        Ok(())
    }
}

/// Counts already-binned histogram totals. The requested integration period must be an
/// integer multiple of the histogram's bin width.
#[derive(Debug, Clone, Default)]
pub struct HistogramCounter {
    primed: bool,
    period_start_bin: u64,
    period_bins: u64,
    complete: bool,
    count: u64,
    leftover: u64,
}

impl HistogramCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn nearest_valid_periods(target_period_ps: u64, bin_width_ps: u64) -> PeriodDiagnostic {
        let below = (target_period_ps / bin_width_ps) * bin_width_ps;
        PeriodDiagnostic {
            requested_ns: target_period_ps,
            nearest_below_ns: below,
            nearest_above_ns: below + bin_width_ps,
        }
    }

    pub fn count_histogram(&mut self, histogram: &Histogram, target_period_ps: u64) -> Result<()> {
        let bin_width_ps = histogram.bin_width_ps();
        if bin_width_ps == 0 || target_period_ps % bin_width_ps != 0 {
            return Err(TaufluxError::InvalidPeriod(Self::nearest_valid_periods(
                target_period_ps,
                bin_width_ps,
            )));
        }
        let period_bins = target_period_ps / bin_width_ps;

        if !self.primed {
            self.period_start_bin = histogram.begin_bin_idx();
            self.period_bins = period_bins;
            self.primed = true;
            self.complete = false;
        } else if self.complete {
            self.period_start_bin += self.period_bins;
            self.period_bins = period_bins;
            self.count = self.leftover;
            self.leftover = 0;
            self.complete = false;
        }

        let period_end_bin = self.period_start_bin + self.period_bins;
        let hist_begin = histogram.begin_bin_idx();
        let hist_end = histogram.end_bin_idx();
        if hist_end <= period_end_bin {
            self.count += histogram.total();
            if hist_end == period_end_bin {
                self.complete = true;
            }
        } else {
            let split_idx = (period_end_bin - hist_begin) as usize;
            let (left, right) = histogram.counts().split_at(split_idx);
            self.count += left.iter().map(|&c| c as u64).sum::<u64>();
            self.leftover += right.iter().map(|&c| c as u64).sum::<u64>();
            self.complete = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{MicroTime, Span};

    fn channel(macro_times: &[u64], from: u64, until: u64) -> ChannelTimestamps {
        let macro_times: Vec<MacroTime> = macro_times.iter().map(|&v| MacroTime(v)).collect();
        let micro_times = vec![MicroTime(0); macro_times.len()];
        ChannelTimestamps::new(macro_times, micro_times, Span::new(MacroTime(from), MacroTime(until)))
    }

    fn channel_with_micro(macro_times: &[u64], micro_times: &[u32], from: u64, until: u64) -> ChannelTimestamps {
        let macro_times: Vec<MacroTime> = macro_times.iter().map(|&v| MacroTime(v)).collect();
        let micro_times: Vec<MicroTime> = micro_times.iter().map(|&v| MicroTime(v)).collect();
        ChannelTimestamps::new(macro_times, micro_times, Span::new(MacroTime(from), MacroTime(until)))
    }

    /// A batch that straddles the period boundary splits into an immediate count and a
    /// leftover that rolls into the next period once it, too, reaches a boundary.
    #[test]
    fn integration_period_crossing_carries_leftover() {
        let mut counter = TimestampCounter::new();
        let period = 100;

        // Period 1: [0, 100). 8 timestamps, all inside -> incomplete (span ends short of 100).
        let batch1 = channel(&[5, 15, 25, 35, 45, 55, 65, 75], 0, 80);
        counter.count_timestamps(&batch1, period).unwrap();
        assert!(!counter.is_complete());
        assert_eq!(counter.count(), 8);

        // Continuation: [80, 140) crosses the boundary at 100. 3 more timestamps land
        // before 100 (completing period 1), 2 land at/after 100 (leftover for period 2).
        let batch2 = channel(&[85, 90, 95, 105, 130], 80, 140);
        counter.count_timestamps(&batch2, period).unwrap();
        assert!(counter.is_complete());
        assert_eq!(counter.count(), 8 + 3);

        // Period 2: [140, 200). 4 new timestamps plus the 2 leftover from period 1.
        let batch3 = channel(&[150, 160, 170, 180], 140, 200);
        counter.count_timestamps(&batch3, period).unwrap();
        assert!(counter.is_complete());
        assert_eq!(counter.count(), 4 + 2);
    }

    #[test]
    fn histogram_counter_rejects_non_multiple_period() {
        let mut hist = Histogram::new(10);
        hist.bin_macrotimes(&[], 0, 4).unwrap();
        let mut counter = HistogramCounter::new();
        let err = counter.count_histogram(&hist, 25).unwrap_err();
        match err {
            TaufluxError::InvalidPeriod(diag) => {
                assert_eq!(diag.nearest_below_ns, 20);
                assert_eq!(diag.nearest_above_ns, 30);
            }
            other => panic!("expected InvalidPeriod, got {other:?}"),
        }
    }

    /// A straddling batch that also changes the ROI must count its leftover half against
    /// the *new* ROI, and the following period-start call must commit that stashed ROI
    /// rather than whatever value it happens to be called with — matching Testable
    /// Property 7: changing the ROI exactly at a period boundary gives the same result
    /// as running two independent counters, one per ROI, over their own sub-range.
    #[test]
    fn roi_counter_boundary_change_matches_two_independent_counters() {
        let batch1 = channel_with_micro(&[5, 15, 25, 35, 45, 55, 65, 75], &[0; 8], 0, 80);
        let batch2 = channel_with_micro(&[85, 90, 95, 105, 130], &[1, 2, 3, 5, 5], 80, 140);
        let batch3 = channel_with_micro(&[150, 160, 170, 180], &[5, 1, 5, 2], 140, 200);

        let roi_old = (0u32, u32::MAX);
        let roi_new = (5u32, 5u32);

        let mut combined = RoiCounter::new();
        combined.count_roi(&batch1, 100, roi_old.0, roi_old.1).unwrap();
        assert!(!combined.is_complete());
        // The straddling call supplies the new ROI; its leftover half must be counted
        // against it, not against the still-active `roi_old`.
        combined.count_roi(&batch2, 100, roi_new.0, roi_new.1).unwrap();
        assert!(combined.is_complete());
        let period1_count = combined.count();
        // A bogus ROI here must be ignored: the straddling call already committed the
        // leftover (and hence this period) to `roi_new`.
        combined.count_roi(&batch3, 100, 99, 99).unwrap();
        assert!(combined.is_complete());
        let period2_count = combined.count();

        let (batch2_left, batch2_right) = batch2.split_at_macrotime(MacroTime(100));

        let mut old_only = RoiCounter::new();
        old_only.count_roi(&batch1, 100, roi_old.0, roi_old.1).unwrap();
        old_only.count_roi(&batch2_left, 100, roi_old.0, roi_old.1).unwrap();
        assert!(old_only.is_complete());
        assert_eq!(old_only.count(), period1_count);

        let mut new_only = RoiCounter::new();
        new_only.count_roi(&batch2_right, 100, roi_new.0, roi_new.1).unwrap();
        new_only.count_roi(&batch3, 100, roi_new.0, roi_new.1).unwrap();
        assert!(new_only.is_complete());
        assert_eq!(new_only.count(), period2_count);
    }
}
