//! Columnar block storage
//!
//! One daily directory per interface holds nine `.gpf` column files plus a
//! `meta.json` describing the blocks written into them. A database-wide
//! `summary.json` tracks per-interface totals under a lock file.

pub mod block_file;
pub mod metadata;
pub mod summary;
pub mod writer;

pub use block_file::BlockFile;
pub use metadata::{BlockStats, Metadata, METADATA_FILE_NAME};
pub use summary::{
    lock_summary, modify_summary, read_summary, unlock_summary, write_summary, DbSummary,
    InterfaceSummary, SummaryUpdate, SUMMARY_FILE_NAME, SUMMARY_LOCK_FILE_NAME,
};
pub use writer::{day_timestamp, DbWriter};
