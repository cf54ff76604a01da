//! Fixed-span dense bin-count vector.
//!
//! A `Histogram` covers bin indices `[begin_bin_idx, end_bin_idx)` at a fixed `bin_width`.
//! Feeding it macrotimes is a single forward walk: callers must supply pre-sorted times.

use crate::error::{Result, TaufluxError};
use crate::time::MacroTime;

#[derive(Debug, Clone)]
pub struct Histogram {
    bin_width_ps: u64,
    begin_bin_idx: u64,
    end_bin_idx: u64,
    counts: Vec<u32>,
}

impl Histogram {
    /// An empty histogram over `[0, 0)` at the given bin width.
    pub fn new(bin_width_ps: u64) -> Self {
        Self {
            bin_width_ps,
            begin_bin_idx: 0,
            end_bin_idx: 0,
            counts: Vec::new(),
        }
    }

    pub fn bin_width_ps(&self) -> u64 {
        self.bin_width_ps
    }

    pub fn begin_bin_idx(&self) -> u64 {
        self.begin_bin_idx
    }

    pub fn end_bin_idx(&self) -> u64 {
        self.end_bin_idx
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// Sets the span to `[begin_bin_idx, end_bin_idx)`, zero-fills, then walks `times`
    /// in order bumping the bin the current edge has advanced to. `times` must be
    /// pre-sorted and non-decreasing; this is not re-validated here (the orchestrator's
    /// device contract guarantees it).
    pub fn bin_macrotimes(
        &mut self,
        times: &[MacroTime],
        begin_bin_idx: u64,
        end_bin_idx: u64,
    ) -> Result<()> {
        if end_bin_idx < begin_bin_idx {
            return Err(TaufluxError::contract(
                "bin_macrotimes: end_bin_idx < begin_bin_idx",
            ));
        }
        self.begin_bin_idx = begin_bin_idx;
        self.end_bin_idx = end_bin_idx;
        let n_bins = (end_bin_idx - begin_bin_idx) as usize;
        self.counts.clear();
        self.counts.resize(n_bins, 0);

        if times.is_empty() {
            return Ok(());
        }

        let first_edge = begin_bin_idx * self.bin_width_ps;
        if times[0].as_ps() < first_edge {
            return Err(TaufluxError::invariant(
                "bin_macrotimes: first time precedes first bin",
            ));
        }

        let mut bin = 0usize;
        let mut next_edge = (begin_bin_idx + 1) * self.bin_width_ps;
        for &t in times {
            while t.as_ps() >= next_edge {
                bin += 1;
                if bin >= n_bins {
                    return Err(TaufluxError::invariant(
                        "bin_macrotimes: time advances past the last bin",
                    ));
                }
                next_edge += self.bin_width_ps;
            }
            self.counts[bin] += 1;
        }
        Ok(())
    }

    /// Rebins `src` into `self` by an integer factor `k = self.bin_width / src.bin_width`.
    /// Requires `src.bin_width` to evenly divide `self.bin_width` and `src.len()` to be
    /// a multiple of `k`. Sums consecutive runs of `k` source counts; copies the scaled
    /// begin/end bin indices.
    pub fn rebin(&mut self, src: &Histogram) -> Result<()> {
        if src.bin_width_ps == 0 || self.bin_width_ps % src.bin_width_ps != 0 {
            return Err(TaufluxError::contract(
                "rebin: self.bin_width is not an integer multiple of src.bin_width",
            ));
        }
        let k = (self.bin_width_ps / src.bin_width_ps) as usize;
        if k == 0 || src.counts.len() % k != 0 {
            return Err(TaufluxError::contract(
                "rebin: src length is not a multiple of the rebin factor",
            ));
        }
        self.counts = src
            .counts
            .chunks_exact(k)
            .map(|chunk| chunk.iter().sum())
            .collect();
        self.begin_bin_idx = src.begin_bin_idx / k as u64;
        self.end_bin_idx = src.end_bin_idx / k as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mt(v: u64) -> MacroTime {
        MacroTime(v)
    }

    #[test]
    fn bin_macrotimes_counts_every_time_exactly_once() {
        let mut h = Histogram::new(10);
        let times: Vec<MacroTime> = vec![mt(0), mt(5), mt(9), mt(10), mt(25), mt(29)];
        h.bin_macrotimes(&times, 0, 3).unwrap();
        assert_eq!(h.counts(), &[3, 1, 2]);
        assert_eq!(h.total(), times.len() as u64);
    }

    #[test]
    fn bin_macrotimes_rejects_time_before_first_bin() {
        let mut h = Histogram::new(10);
        let times = vec![mt(5)];
        let err = h.bin_macrotimes(&times, 1, 3).unwrap_err();
        assert!(matches!(err, TaufluxError::InvariantViolation(_)));
    }

    #[test]
    fn bin_macrotimes_rejects_overshoot() {
        let mut h = Histogram::new(10);
        let times = vec![mt(0), mt(100)];
        let err = h.bin_macrotimes(&times, 0, 2).unwrap_err();
        assert!(matches!(err, TaufluxError::InvariantViolation(_)));
    }

    #[test]
    fn rebin_preserves_total_and_scales_indices() {
        let mut src = Histogram::new(10);
        let times: Vec<MacroTime> = (0..8).map(|i| mt(i * 10)).collect();
        src.bin_macrotimes(&times, 0, 8).unwrap();

        let mut dst = Histogram::new(20);
        dst.rebin(&src).unwrap();
        assert_eq!(dst.total(), src.total());
        assert_eq!(dst.begin_bin_idx(), 0);
        assert_eq!(dst.end_bin_idx(), 4);
        assert_eq!(dst.counts(), &[2, 2, 2, 2]);
    }

    #[test]
    fn rebin_rejects_non_integer_factor() {
        let src = Histogram::new(10);
        let mut dst = Histogram::new(15);
        let err = dst.rebin(&src).unwrap_err();
        assert!(matches!(err, TaufluxError::ContractViolation(_)));
    }
}
