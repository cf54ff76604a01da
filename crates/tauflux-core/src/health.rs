//! Per-process record of whether any fatal error has occurred this session.
//!
//! Injected into the orchestrator and every worker at construction rather than reached
//! for as global state, matching the "inject, don't globalize" posture used for the
//! reporting bus.

use std::sync::{Arc, Mutex};

use crate::error::TaufluxError;

const MAX_RECORDED_EVENTS: usize = 64;

#[derive(Debug, Clone)]
pub struct FatalEvent {
    pub sequence: u64,
    pub message: String,
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<FatalEvent>,
    next_sequence: u64,
}

#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    inner: Arc<Mutex<Inner>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a timestamped summary of a fatal error, bounded to the most recent
    /// [`MAX_RECORDED_EVENTS`] so the ring buffer never grows without limit.
    pub fn record_fatal(&self, err: &TaufluxError) {
        let mut inner = self.inner.lock().unwrap();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.events.push(FatalEvent {
            sequence,
            message: err.to_string(),
        });
        if inner.events.len() > MAX_RECORDED_EVENTS {
            let overflow = inner.events.len() - MAX_RECORDED_EVENTS;
            inner.events.drain(0..overflow);
        }
    }

    /// `false` iff at least one fatal event has been recorded since construction.
    pub fn is_healthy(&self) -> bool {
        self.inner.lock().unwrap().events.is_empty()
    }

    pub fn events(&self) -> Vec<FatalEvent> {
        self.inner.lock().unwrap().events.clone()
    }
}
