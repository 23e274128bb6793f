// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Configuration module for nokode
//!
//! Handles loading settings from files and the environment.

pub mod settings;

pub use settings::*;
