// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Utility modules
//!
//! Terminal output helpers for the liveflow CLI.

pub mod colors;
pub mod spinner;

pub use colors::*;
pub use spinner::*;
