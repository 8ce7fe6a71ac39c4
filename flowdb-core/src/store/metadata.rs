//! Per-day block metadata (`meta.json`)

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// File name of the per-day metadata file
pub const METADATA_FILE_NAME: &str = "meta.json";

/// Statistics for a single written block: capture counters supplied by the
/// probe plus the flow count and traffic volume derived from the flow map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStats {
    pub timestamp: i64,
    #[serde(rename = "pcap_packets_received")]
    pub packets_received: u64,
    #[serde(rename = "pcap_packets_dropped")]
    pub packets_dropped: u64,
    #[serde(rename = "pcap_packets_if_dropped")]
    pub packets_if_dropped: u64,
    pub packets_logged: u64,
    pub flowcount: u64,
    pub traffic: u64,
}

/// Metadata for the blocks of one daily directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub blocks: Vec<BlockStats>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a metadata file
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let f = File::open(path)?;
        let meta = serde_json::from_reader(f)
            .map_err(|e| crate::FlowError::Corruption(format!("invalid metadata file: {e}")))?;
        Ok(meta)
    }

    /// Read a metadata file, falling back to an empty one on any error
    pub fn try_read(path: impl AsRef<Path>) -> Self {
        Self::read(path).unwrap_or_default()
    }

    /// Write this metadata to a file, replacing any previous content
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let f = File::create(path)?;
        serde_json::to_writer(f, self)
            .map_err(|e| crate::FlowError::Internal(format!("metadata encoding failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_metadata_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(METADATA_FILE_NAME);

        let mut meta = Metadata::new();
        meta.blocks.push(BlockStats {
            timestamp: 1000,
            packets_received: 500,
            packets_dropped: 2,
            packets_if_dropped: 0,
            packets_logged: 498,
            flowcount: 17,
            traffic: 123_456,
        });
        meta.write(&path).unwrap();

        let read = Metadata::read(&path).unwrap();
        assert_eq!(read.blocks, meta.blocks);
    }

    #[test]
    fn test_try_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let meta = Metadata::try_read(dir.path().join(METADATA_FILE_NAME));
        assert!(meta.blocks.is_empty());
    }
}
