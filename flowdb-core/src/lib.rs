//! FlowDB Core - Columnar Network Flow Database Engine
//!
//! A time-series database for aggregated network flow records, optimized for:
//! - Append-only block writes, one compressed block per capture interval
//! - Per-attribute columnar storage (scan only the columns a query needs)
//! - Parallel scans driven by a compiled filter expression
//!
//! # Architecture
//!
//! FlowDB persists one rotation interval's flow aggregates as a set of
//! per-column blocks and scans them back with a worker pool:
//!
//! - **Block store**: fixed-capacity `.gpf` files, LZ4-compressed block bodies
//!   behind a slot-array header
//! - **Writer**: splits a flow map into column buffers and appends one block
//!   per column, maintaining per-day metadata and a database summary
//! - **Conditional**: compiles filter expressions such as
//!   `sip = 10.0.0.1 & !(dport < 80)` into an evaluable predicate tree
//! - **Query engine**: distributes daily directories over a worker pool and
//!   folds matching rows into a key/counter map

pub mod conditional;
pub mod protocols;
pub mod query;
pub mod store;

mod error;
mod types;

pub use error::{FlowError, Result};
pub use types::*;

/// FlowDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Number of block slots per column file
    pub const BLOCKS_PER_FILE: usize = 512;

    /// Size of one header region in bytes (512 big-endian u64 values)
    pub const HEADER_REGION_SIZE: usize = 8 * BLOCKS_PER_FILE;

    /// Total header size: end-offsets, timestamps, uncompressed lengths
    pub const HEADER_SIZE: usize = 3 * HEADER_REGION_SIZE;

    /// One calendar day in seconds; daily directories round down to this
    pub const EPOCH_DAY: i64 = 86_400;

    /// Write-out interval of the capture probe in seconds
    pub const WRITE_INTERVAL: i64 = 300;

    /// Initial backoff when waiting for the summary lock
    pub const SUMMARY_LOCK_BACKOFF_MS: u64 = 50;

    /// File extension of block store files
    pub const BLOCK_FILE_SUFFIX: &str = ".gpf";
}
