// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Built-in tools

mod database;
mod memory;
mod web_response;

pub use database::{Database, DatabaseTool, QueryMode, QueryOutcome};
pub use memory::{MemoryMode, MemoryResult, MemoryStore, MemoryTool};
pub(crate) use web_response::parse_status;
pub use web_response::{WebResponse, WebResponseTool};
