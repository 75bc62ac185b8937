// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! External source readers
//!
//! An external source is data that enters the pipeline from outside, such
//! as a landing directory of JSON or CSV files. Sources are append-only: a reader
//! positioned at an offset yields exactly the records added after it.

mod file;
mod memory;

pub use file::{FileSource, SourceFormat};
pub(crate) use file::write_ndjson;
pub use memory::MemorySource;

use async_trait::async_trait;

use crate::errors::LiveflowResult;
use crate::pipeline::Row;

/// Lazy sequence of records read from a source
pub type RecordIter = Box<dyn Iterator<Item = LiveflowResult<Row>> + Send>;

/// Trait for external source readers
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Check that a source can be read
    async fn check_available(&self, source: &str) -> LiveflowResult<bool>;

    /// Open a source after `offset` records.
    ///
    /// Opening the same source at the same offset again yields the same
    /// records, so a failed run can be retried.
    async fn open(&self, source: &str, offset: u64) -> LiveflowResult<RecordIter>;
}
