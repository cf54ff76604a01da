//! Typed error taxonomy mapping the four error categories of the design onto [`Result`].
//!
//! Contract violations are caller bugs; invariant violations mean the run is corrupt and
//! must stop; resource exhaustion means a downstream consumer is too slow; transient
//! failures are recoverable within a single window (currently: one missed PPS edge).

use thiserror::Error;

/// A diagnostic describing a `HistogramCounter` period that is not a multiple of the
/// histogram's bin width, naming the two nearest valid periods bracketing the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodDiagnostic {
    pub requested_ns: u64,
    pub nearest_below_ns: u64,
    pub nearest_above_ns: u64,
}

impl std::fmt::Display for PeriodDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requested period {} ns is not a multiple of the histogram bin width; \
             nearest valid periods are {} ns and {} ns",
            self.requested_ns, self.nearest_below_ns, self.nearest_above_ns
        )
    }
}

#[derive(Debug, Error)]
pub enum TaufluxError {
    /// Caller bug: negative bin indices, unknown channel, invalid config.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// State corruption or input mis-ordering: unsorted macrotimes, split overshoot,
    /// dropped device frame. Fatal to the run.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Publish HWM reached, storage pool full, archive write overflow. Fatal to the run.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Device read timeout, a single missed PPS edge. Recoverable within one window.
    #[error("transient failure: {0}")]
    Transient(String),

    /// `HistogramCounter` was asked for a period that isn't a multiple of the bin width.
    #[error("invalid integration period: {0}")]
    InvalidPeriod(PeriodDiagnostic),
}

impl TaufluxError {
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::ContractViolation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhaustion(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Whether this error escalates to fatal-to-the-run, per the design's error
    /// taxonomy. Only a single missed PPS edge (a [`TaufluxError::Transient`]) is not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TaufluxError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, TaufluxError>;
