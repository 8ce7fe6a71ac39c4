//! Fixed-capacity block store file (`.gpf`)
//!
//! One file holds up to 512 compressed blocks of a single column. A
//! three-region header precedes the block bodies:
//!
//! - bytes `[0, 4096)`: 512 big-endian u64 block end-offsets
//! - bytes `[4096, 8192)`: 512 big-endian i64 block timestamps
//! - bytes `[8192, 12288)`: 512 big-endian u64 uncompressed block lengths
//!
//! An all-zero (offset, timestamp, length) triple marks a free slot. Bodies
//! are appended in slot order; every append rewrites the entire header so a
//! crash mid-write can only ever lose the most recent append.

use crate::config::{BLOCKS_PER_FILE, HEADER_SIZE};
use crate::{FlowError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single column's block store file
pub struct BlockFile {
    path: PathBuf,
    offsets: Vec<u64>,
    timestamps: Vec<i64>,
    lengths: Vec<u64>,

    // Lazily opened read handle and the position it sits at, so that
    // blocks consumed in ascending slot order skip redundant seeks.
    reader: Option<File>,
    reader_pos: u64,
}

impl BlockFile {
    /// Open a block file, creating it with a zeroed header if it does not
    /// exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut header = vec![0u8; HEADER_SIZE];

        if path.exists() {
            let mut f = File::open(&path)?;
            f.read_exact(&mut header).map_err(|e| {
                FlowError::Corruption(format!("short header in {}: {}", path.display(), e))
            })?;
        } else {
            let mut f = File::create(&path)?;
            f.write_all(&header)?;
            f.sync_all()?;
            debug!(path = %path.display(), "created block file");
        }

        let mut buf = &header[..];
        let mut offsets = Vec::with_capacity(BLOCKS_PER_FILE);
        let mut timestamps = Vec::with_capacity(BLOCKS_PER_FILE);
        let mut lengths = Vec::with_capacity(BLOCKS_PER_FILE);
        for _ in 0..BLOCKS_PER_FILE {
            offsets.push(buf.get_u64());
        }
        for _ in 0..BLOCKS_PER_FILE {
            timestamps.push(buf.get_i64());
        }
        for _ in 0..BLOCKS_PER_FILE {
            lengths.push(buf.get_u64());
        }

        Ok(Self {
            path,
            offsets,
            timestamps,
            lengths,
            reader: None,
            reader_pos: 0,
        })
    }

    /// Number of occupied slots
    pub fn blocks_used(&self) -> usize {
        (0..BLOCKS_PER_FILE)
            .find(|&i| self.slot_is_free(i))
            .unwrap_or(BLOCKS_PER_FILE)
    }

    /// Timestamps of all slots; free slots carry 0
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    fn slot_is_free(&self, slot: usize) -> bool {
        self.offsets[slot] == 0 && self.timestamps[slot] == 0 && self.lengths[slot] == 0
    }

    fn body_start(&self, slot: usize) -> u64 {
        if slot == 0 {
            HEADER_SIZE as u64
        } else {
            self.offsets[slot - 1]
        }
    }

    /// Append a block for the given timestamp.
    ///
    /// Fails with `BlockExists` if the timestamp already occupies a slot and
    /// with `StoreFull` if all slots are taken. The payload is compressed
    /// into a buffer sized to the codec's worst-case expansion.
    pub fn append_block(&mut self, timestamp: i64, data: &[u8]) -> Result<()> {
        let mut target = None;
        for slot in 0..BLOCKS_PER_FILE {
            if self.timestamps[slot] == timestamp {
                return Err(FlowError::BlockExists(timestamp));
            }
            if self.slot_is_free(slot) {
                target = Some(slot);
                break;
            }
        }
        let slot = target.ok_or(FlowError::StoreFull)?;
        let start = self.body_start(slot);

        // LZ4 bounds non-compressible expansion by 0.4% plus a constant.
        let bound = lz4_flex::block::get_maximum_output_size(data.len());
        let mut compressed = vec![0u8; bound];
        let comp_len = lz4_flex::block::compress_into(data, &mut compressed)
            .map_err(|e| FlowError::Compression(e.to_string()))?;

        let mut f = OpenOptions::new().append(true).open(&self.path)?;
        f.write_all(&compressed[..comp_len])?;
        drop(f);

        self.offsets[slot] = start + comp_len as u64;
        self.timestamps[slot] = timestamp;
        self.lengths[slot] = data.len() as u64;

        self.rewrite_header()?;
        Ok(())
    }

    // The whole header is rewritten on every append; slots written by
    // earlier appends are re-encoded from memory, never read back.
    fn rewrite_header(&self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        for &offset in &self.offsets {
            buf.put_u64(offset);
        }
        for &ts in &self.timestamps {
            buf.put_i64(ts);
        }
        for &len in &self.lengths {
            buf.put_u64(len);
        }

        let mut f = OpenOptions::new().write(true).open(&self.path)?;
        f.seek(SeekFrom::Start(0))?;
        f.write_all(&buf)?;
        f.sync_all()?;
        Ok(())
    }

    /// Read and decompress the block in the given slot
    pub fn read_block(&mut self, slot: usize) -> Result<Vec<u8>> {
        if slot >= BLOCKS_PER_FILE || self.slot_is_free(slot) {
            return Err(FlowError::Internal(format!("block slot {slot} is empty")));
        }

        let start = self.body_start(slot);
        let comp_len = self.offsets[slot] - start;

        if self.reader.is_none() {
            self.reader = Some(File::open(&self.path)?);
            self.reader_pos = 0;
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(FlowError::Internal("block file reader unavailable".into()));
        };

        if self.reader_pos != start {
            reader.seek(SeekFrom::Start(start))?;
        }
        let mut compressed = vec![0u8; comp_len as usize];
        reader.read_exact(&mut compressed).map_err(|e| {
            FlowError::Corruption(format!(
                "short block body in {} (slot {slot}): {e}",
                self.path.display()
            ))
        })?;
        self.reader_pos = start + comp_len;

        let mut data = vec![0u8; self.lengths[slot] as usize];
        let n = lz4_flex::block::decompress_into(&compressed, &mut data)
            .map_err(|e| FlowError::Compression(e.to_string()))?;
        if n != data.len() {
            return Err(FlowError::Corruption(format!(
                "block in {} (slot {slot}) decompressed to {n} bytes, header records {}",
                self.path.display(),
                data.len()
            )));
        }

        Ok(data)
    }

    /// Read the block recorded for the given timestamp
    pub fn read_block_by_timestamp(&mut self, timestamp: i64) -> Result<Vec<u8>> {
        let slot = (0..BLOCKS_PER_FILE)
            .find(|&i| self.timestamps[i] == timestamp && !self.slot_is_free(i))
            .ok_or(FlowError::BlockNotFound(timestamp))?;
        self.read_block(slot)
    }
}
