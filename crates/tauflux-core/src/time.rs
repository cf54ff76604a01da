//! Strongly-typed time quantities used throughout the pipeline.
//!
//! `MacroTime` is an absolute on-device timestamp; `MicroTime` is the offset of a
//! photon inside a laser-sync period. Both are picosecond-resolution newtypes so a
//! raw `u64`/`u32` can never silently stand in for one or the other at a call boundary.

use std::ops::{Add, Sub};

/// Absolute device timestamp, picosecond resolution, 64-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacroTime(pub u64);

impl MacroTime {
    pub const ZERO: MacroTime = MacroTime(0);

    pub fn as_ps(self) -> u64 {
        self.0
    }
}

impl Add<u64> for MacroTime {
    type Output = MacroTime;
    fn add(self, rhs: u64) -> MacroTime {
        MacroTime(self.0 + rhs)
    }
}

impl Sub for MacroTime {
    type Output = i128;
    fn sub(self, rhs: MacroTime) -> i128 {
        self.0 as i128 - rhs.0 as i128
    }
}

/// Offset of a photon within one laser-sync period, picosecond resolution, 32-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MicroTime(pub u32);

impl MicroTime {
    pub const ZERO: MicroTime = MicroTime(0);

    pub fn as_ps(self) -> u32 {
        self.0
    }
}

/// Half-open `[from, until)` span of device time covered by a batch of timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub from: MacroTime,
    pub until: MacroTime,
}

impl Span {
    pub fn new(from: MacroTime, until: MacroTime) -> Self {
        Self { from, until }
    }

    pub fn is_empty(&self) -> bool {
        self.until <= self.from
    }
}

/// Per-channel parallel macro/micro time sequences plus the span they cover.
///
/// `macro_times` and `micro_times` always have equal length; `macro_times` is sorted,
/// strictly non-decreasing. Callers that violate sortedness will see an
/// [`crate::error::TaufluxError::InvariantViolation`] from whichever accumulator consumes the data.
#[derive(Debug, Clone, Default)]
pub struct ChannelTimestamps {
    macro_times: Vec<MacroTime>,
    micro_times: Vec<MicroTime>,
    span: Span,
}

impl ChannelTimestamps {
    pub fn new(macro_times: Vec<MacroTime>, micro_times: Vec<MicroTime>, span: Span) -> Self {
        debug_assert_eq!(macro_times.len(), micro_times.len());
        Self {
            macro_times,
            micro_times,
            span,
        }
    }

    pub fn empty(span: Span) -> Self {
        Self {
            macro_times: Vec::new(),
            micro_times: Vec::new(),
            span,
        }
    }

    pub fn macro_times(&self) -> &[MacroTime] {
        &self.macro_times
    }

    pub fn micro_times(&self) -> &[MicroTime] {
        &self.micro_times
    }

    pub fn len(&self) -> usize {
        self.macro_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macro_times.is_empty()
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    pub fn push(&mut self, macro_time: MacroTime, micro_time: MicroTime) {
        self.macro_times.push(macro_time);
        self.micro_times.push(micro_time);
    }

    pub fn clear(&mut self) {
        self.macro_times.clear();
        self.micro_times.clear();
    }

    /// Splits at the first index whose macrotime is `>= at`, returning `(left, right)`
    /// with the original span divided at `at`. Used by [`crate::dtof::Dtof`] and the
    /// timestamp-based counters to separate a batch at a period boundary.
    pub fn split_at_macrotime(&self, at: MacroTime) -> (ChannelTimestamps, ChannelTimestamps) {
        let idx = self.macro_times.partition_point(|&t| t < at);
        let left = ChannelTimestamps::new(
            self.macro_times[..idx].to_vec(),
            self.micro_times[..idx].to_vec(),
            Span::new(self.span.from, at),
        );
        let right = ChannelTimestamps::new(
            self.macro_times[idx..].to_vec(),
            self.micro_times[idx..].to_vec(),
            Span::new(at, self.span.until),
        );
        (left, right)
    }
}
