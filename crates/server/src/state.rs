// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server state management module
//!
//! Shared state handed to route handlers through axum's `State` extractor.

use crate::liveness::Liveness;

/// Shared application state
#[derive(Debug, Clone)]
pub struct ServerState {
    /// Liveness flag written by the shutdown orchestrator
    liveness: Liveness,
}

impl ServerState {
    /// Create new server state
    ///
    /// # Arguments
    ///
    /// * `liveness` - Flag shared with the shutdown orchestrator
    pub fn new(liveness: Liveness) -> Self {
        Self { liveness }
    }

    /// Liveness flag read by the health endpoint
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_state_shares_liveness() {
        let liveness = Liveness::new();
        let state = ServerState::new(liveness.clone());

        assert!(!state.liveness().is_ready());

        // Test that the flags are linked
        liveness.set_ready();
        assert!(state.liveness().is_ready());
    }
}
