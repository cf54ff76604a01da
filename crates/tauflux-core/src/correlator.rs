//! Multi-tau exponential-rebinning intensity autocorrelation.
//!
//! A `Correlator` allocates one flat result buffer for every level and binds each level
//! to a `(start_idx, len)` slice of it rather than an owned or borrowed sub-structure —
//! the child never outlives the root by construction, so indices into a single owned
//! `Vec` stand in for what the source expresses as iterators into a shared buffer.

use crate::error::{Result, TaufluxError};
use crate::histogram::Histogram;

struct Level {
    bin_width_ps: u64,
    first_offset: usize,
    start_idx: usize,
    len: usize,
    /// Working buffer this level rebins its input into before forwarding to its child.
    /// `None` for the last level (no child to feed).
    rebinned: Option<Histogram>,
}

/// `(tau_k, g2)` pairs for every level, flattened into one buffer in level order.
#[derive(Debug, Clone, Default)]
pub struct CorrelatorResult {
    pub tau_k_ps: Vec<u64>,
    pub g2: Vec<f64>,
}

pub struct Correlator {
    points_per_level: usize,
    levels: Vec<Level>,
    result: CorrelatorResult,
}

impl Correlator {
    /// `bin_width_ps` is the starting (finest) bin width; `points_per_level` is the
    /// number of lags computed at each level before rebinning and proceeding to the
    /// next; `n_levels` is the rebin count plus one; `rebin_factor` is the number of
    /// adjacent bins condensed into one at each rebinning step.
    pub fn new(
        bin_width_ps: u64,
        points_per_level: usize,
        n_levels: usize,
        rebin_factor: usize,
    ) -> Result<Self> {
        if points_per_level == 0 || n_levels == 0 {
            return Err(TaufluxError::contract(
                "Correlator: points_per_level and n_levels must be > 0",
            ));
        }
        if !matches!(rebin_factor, 1 | 2 | 4 | 8) {
            return Err(TaufluxError::contract(
                "Correlator: rebin_factor must be a power of two in {1,2,4,8}",
            ));
        }

        let p = points_per_level;
        let r = rebin_factor;
        let child_first_offset = p.div_ceil(r);
        let total_len = p + (n_levels - 1) * (p - child_first_offset);

        let mut levels = Vec::with_capacity(n_levels);
        let mut start_idx = 0usize;
        let mut bin_width = bin_width_ps;
        for level_idx in 0..n_levels {
            let first_offset = if level_idx == 0 { 0 } else { child_first_offset };
            let len = p - first_offset;
            let has_child = level_idx + 1 < n_levels;
            levels.push(Level {
                bin_width_ps: bin_width,
                first_offset,
                start_idx,
                len,
                rebinned: has_child.then(|| Histogram::new(bin_width * r as u64)),
            });
            start_idx += len;
            bin_width *= r as u64;
        }
        debug_assert_eq!(start_idx, total_len);

        Ok(Self {
            points_per_level: p,
            levels,
            result: CorrelatorResult {
                tau_k_ps: vec![0; total_len],
                g2: vec![0.0; total_len],
            },
        })
    }

    pub fn result(&self) -> &CorrelatorResult {
        &self.result
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// `(start_idx, len)` of the given level, for tests and callers that want to read
    /// one level's slice out of [`Correlator::result`].
    pub fn level_slice(&self, level: usize) -> (usize, usize) {
        (self.levels[level].start_idx, self.levels[level].len)
    }

    pub fn update(&mut self, histogram: &Histogram) -> Result<()> {
        if histogram.bin_width_ps() != self.levels[0].bin_width_ps {
            return Err(TaufluxError::contract(
                "Correlator::update: input has wrong bin size",
            ));
        }
        self.update_level(0, histogram)
    }

    fn update_level(&mut self, level_idx: usize, histogram: &Histogram) -> Result<()> {
        if let Some(next_bin_width) = self.levels[level_idx]
            .rebinned
            .as_ref()
            .map(|h| h.bin_width_ps())
        {
            let mut rebinned = Histogram::new(next_bin_width);
            rebinned.rebin(histogram)?;
            self.update_level(level_idx + 1, &rebinned)?;
            self.levels[level_idx].rebinned = Some(rebinned);
        }

        let counts = histogram.counts();
        let bin_count = counts.len();
        if bin_count < self.points_per_level {
            return Err(TaufluxError::invariant(
                "Correlator: too few bins to compute correlation at maximum offset",
            ));
        }

        let level = &self.levels[level_idx];
        let (first_offset, start_idx, bin_width) =
            (level.first_offset, level.start_idx, level.bin_width_ps);

        for k in first_offset..self.points_per_level {
            let mut prod_accum = 0i64;
            let mut left_accum = 0i64;
            let mut right_accum = 0i64;
            for i in 0..(bin_count - k) {
                let f_i = counts[i] as i64;
                let f_ik = counts[i + k] as i64;
                prod_accum += f_i * f_ik;
                left_accum += f_i;
                right_accum += f_ik;
            }

            let g2_x = if left_accum != 0 && right_accum != 0 {
                ((bin_count - k) as f64 * prod_accum as f64) / (left_accum as f64 * right_accum as f64)
            } else {
                1.0
            };

            let pos = start_idx + (k - first_offset);
            self.result.g2[pos] = g2_x;
            self.result.tau_k_ps[pos] = k as u64 * bin_width;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(bin_width_ps: u64, counts: &[u32]) -> Histogram {
        let mut h = Histogram::new(bin_width_ps);
        // bin_macrotimes needs raw times; build a histogram directly via repeated ticks.
        let times: Vec<crate::time::MacroTime> = counts
            .iter()
            .enumerate()
            .flat_map(|(bin, &c)| {
                std::iter::repeat_n(
                    crate::time::MacroTime(bin as u64 * bin_width_ps),
                    c as usize,
                )
            })
            .collect();
        h.bin_macrotimes(&times, 0, counts.len() as u64).unwrap();
        h
    }

    #[test]
    fn layout_matches_child_offset_scenario() {
        let c = Correlator::new(1000, 8, 3, 2).unwrap();
        assert_eq!(c.level_slice(0), (0, 8));
        assert_eq!(c.level_slice(1), (8, 4));
        assert_eq!(c.level_slice(2), (12, 4));
        assert_eq!(c.result().tau_k_ps.len(), 16);
    }

    #[test]
    fn uniform_input_gives_unit_g2_at_every_level() {
        let mut c = Correlator::new(10, 8, 3, 2).unwrap();
        let counts = vec![5u32; 64];
        let h = hist(10, &counts);
        c.update(&h).unwrap();
        for &g in &c.result().g2 {
            assert!((g - 1.0).abs() < 1e-9, "expected g2 == 1.0, got {g}");
        }
    }

    #[test]
    fn zero_marginal_gives_unit_g2_never_nan() {
        let mut c = Correlator::new(10, 4, 1, 2).unwrap();
        let counts = vec![0u32, 0, 0, 0, 1, 1, 1, 1];
        let h = hist(10, &counts);
        c.update(&h).unwrap();
        for &g in &c.result().g2 {
            assert!(g.is_finite());
        }
        assert_eq!(c.result().g2[0], 1.0);
    }

    #[test]
    fn rejects_wrong_bin_width() {
        let mut c = Correlator::new(10, 4, 1, 2).unwrap();
        let h = hist(20, &[1, 1, 1, 1]);
        assert!(c.update(&h).is_err());
    }
}
