// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Test fixtures for lifecycle testing
//!
//! This module provides a capturing access log sink and helpers that start a
//! real server on an OS-assigned port with extra test-only routes.

pub mod server;

pub use server::*;
