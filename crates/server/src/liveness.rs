// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Liveness flag shared between the health endpoint and the shutdown orchestrator
//!
//! The flag is a single atomic byte behind an `Arc`, so every clone observes the
//! same value and two servers in one process never share a flag.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

const STARTING: u8 = 0;
const READY: u8 = 1;
const DRAINING: u8 = 2;

/// Readiness of the process to receive traffic
///
/// Transitions only move forward: `Starting -> Ready -> Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// Listener not yet accepting connections
    Starting,
    /// Accepting and serving requests
    Ready,
    /// Shutdown has begun; stays here for the rest of the process lifetime
    Draining,
}

impl LivenessState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STARTING => Self::Starting,
            READY => Self::Ready,
            _ => Self::Draining,
        }
    }

    /// Lowercase name used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
        }
    }
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable handle to a lock-free liveness cell
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    state: Arc<AtomicU8>,
}

impl Liveness {
    /// Create a flag in the `Starting` state
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the process ready; ignored once draining has begun
    pub fn set_ready(&self) {
        let _ = self
            .state
            .compare_exchange(STARTING, READY, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Mark the process as draining, permanently
    pub fn set_draining(&self) {
        self.state.store(DRAINING, Ordering::Release);
    }

    /// Whether health checks should report the process as able to take traffic
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Current state
    pub fn state(&self) -> LivenessState {
        LivenessState::from_raw(self.state.load(Ordering::Acquire))
    }
}
