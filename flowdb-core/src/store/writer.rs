//! Database writer
//!
//! Serializes one rotation interval's flow map into nine per-column blocks
//! and appends them to the daily directory of an interface, updating the
//! per-day metadata along the way. Each column block frames its rows between
//! two copies of the interval timestamp so readers can verify that all
//! columns of a block belong together.

use crate::config::{BLOCK_FILE_SUFFIX, EPOCH_DAY};
use crate::store::block_file::BlockFile;
use crate::store::metadata::{BlockStats, Metadata, METADATA_FILE_NAME};
use crate::store::summary::SummaryUpdate;
use crate::types::{AggFlowMap, ColumnIndex, ALL_COLUMNS, COLUMN_COUNT};
use crate::Result;
use bytes::BufMut;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Timestamp rounded down to the start of its calendar day
pub fn day_timestamp(timestamp: i64) -> i64 {
    (timestamp / EPOCH_DAY) * EPOCH_DAY
}

/// Writer for one interface of a database
pub struct DbWriter {
    db_path: PathBuf,
    iface: String,

    day_timestamp: i64,
    metadata: Option<Metadata>,
}

impl DbWriter {
    pub fn new(db_path: impl Into<PathBuf>, iface: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            iface: iface.into(),
            day_timestamp: 0,
            metadata: None,
        }
    }

    fn daily_dir(&self, timestamp: i64) -> PathBuf {
        self.db_path
            .join(&self.iface)
            .join(day_timestamp(timestamp).to_string())
    }

    fn write_block(&self, timestamp: i64, column: ColumnIndex, data: &[u8]) -> Result<()> {
        let path = self
            .daily_dir(timestamp)
            .join(format!("{}{}", column.name(), BLOCK_FILE_SUFFIX));
        let mut file = BlockFile::open(path)?;
        file.append_block(timestamp, data)
    }

    fn write_metadata(&mut self, timestamp: i64, stats: BlockStats) -> Result<()> {
        // The cached metadata only covers one day; a rollover forces a
        // re-read from the new daily directory.
        if self.day_timestamp != day_timestamp(timestamp) {
            self.metadata = None;
            self.day_timestamp = day_timestamp(timestamp);
        }

        let path = self.daily_dir(timestamp).join(METADATA_FILE_NAME);
        let meta = self
            .metadata
            .get_or_insert_with(|| Metadata::try_read(&path));
        meta.blocks.push(stats);
        meta.write(&path)
    }

    /// Write one flow map as a set of column blocks for the given timestamp.
    ///
    /// Returns the summary delta for this write. The caller is responsible
    /// for folding it into the database summary.
    pub fn write(
        &mut self,
        flow_map: &AggFlowMap,
        mut stats: BlockStats,
        timestamp: i64,
    ) -> Result<SummaryUpdate> {
        std::fs::create_dir_all(self.daily_dir(timestamp))?;

        let (columns, update) = column_data(&self.iface, timestamp, flow_map);

        for column in ALL_COLUMNS {
            self.write_block(timestamp, column, &columns[column as usize])?;
        }

        stats.timestamp = timestamp;
        stats.flowcount = update.flow_count;
        stats.traffic = update.traffic;
        self.write_metadata(timestamp, stats)?;

        debug!(
            iface = %self.iface,
            timestamp,
            flows = update.flow_count,
            "wrote column blocks"
        );
        Ok(update)
    }
}

/// Serialize a flow map into one buffer per column.
///
/// All nine buffers are filled in a single pass over the map, so the row
/// order is identical across columns. Each buffer starts and ends with the
/// big-endian interval timestamp.
fn column_data(
    iface: &str,
    timestamp: i64,
    flow_map: &AggFlowMap,
) -> ([Vec<u8>; COLUMN_COUNT], SummaryUpdate) {
    let mut columns: [Vec<u8>; COLUMN_COUNT] = ALL_COLUMNS
        .map(|c| Vec::with_capacity(8 + c.entry_size() * flow_map.len() + 8));

    let mut update = SummaryUpdate {
        interface: iface.to_string(),
        timestamp,
        ..Default::default()
    };

    for col in &mut columns {
        col.put_i64(timestamp);
    }

    for (key, val) in flow_map {
        update.flow_count += 1;
        update.traffic += val.bytes_rcvd + val.bytes_sent;

        columns[ColumnIndex::Sip as usize].put_slice(&key.sip);
        columns[ColumnIndex::Dip as usize].put_slice(&key.dip);
        columns[ColumnIndex::Proto as usize].put_u8(key.proto);
        columns[ColumnIndex::Dport as usize].put_slice(&key.dport);
        columns[ColumnIndex::L7Proto as usize].put_slice(&key.l7proto);

        columns[ColumnIndex::BytesRcvd as usize].put_u64(val.bytes_rcvd);
        columns[ColumnIndex::BytesSent as usize].put_u64(val.bytes_sent);
        columns[ColumnIndex::PktsRcvd as usize].put_u64(val.pkts_rcvd);
        columns[ColumnIndex::PktsSent as usize].put_u64(val.pkts_sent);
    }

    for col in &mut columns {
        col.put_i64(timestamp);
    }

    (columns, update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ip_string_to_bytes, Key, Val};
    use crate::FlowError;
    use tempfile::TempDir;

    fn sample_map() -> AggFlowMap {
        let mut map = AggFlowMap::new();
        for (i, port) in [80u16, 443, 8080].iter().enumerate() {
            let mut key = Key::default();
            key.sip = ip_string_to_bytes(&format!("10.0.0.{}", i + 1)).unwrap();
            key.dip = ip_string_to_bytes("192.168.1.1").unwrap();
            key.dport = port.to_be_bytes();
            key.proto = 6;
            map.insert(
                key,
                Val {
                    bytes_rcvd: 100 * (i as u64 + 1),
                    bytes_sent: 10,
                    pkts_rcvd: 2,
                    pkts_sent: 1,
                },
            );
        }
        map
    }

    #[test]
    fn test_write_produces_framed_columns() {
        let dir = TempDir::new().unwrap();
        let mut writer = DbWriter::new(dir.path(), "eth0");
        let map = sample_map();
        let ts = 1_456_006_200i64;

        let update = writer.write(&map, BlockStats::default(), ts).unwrap();
        assert_eq!(update.flow_count, 3);
        assert_eq!(update.traffic, 100 + 200 + 300 + 3 * 10);

        let daily = dir.path().join("eth0").join(day_timestamp(ts).to_string());
        for column in ALL_COLUMNS {
            let path = daily.join(format!("{}{}", column.name(), BLOCK_FILE_SUFFIX));
            let mut f = BlockFile::open(path).unwrap();
            let data = f.read_block_by_timestamp(ts).unwrap();

            assert_eq!(data.len(), 8 + column.entry_size() * map.len() + 8);
            assert_eq!(i64::from_be_bytes(data[..8].try_into().unwrap()), ts);
            let tail = &data[data.len() - 8..];
            assert_eq!(i64::from_be_bytes(tail.try_into().unwrap()), ts);
        }
    }

    #[test]
    fn test_row_order_consistent_across_columns() {
        let map = sample_map();
        let (columns, _) = column_data("eth0", 1000, &map);

        let dports = &columns[ColumnIndex::Dport as usize];
        let bytes_rcvd = &columns[ColumnIndex::BytesRcvd as usize];
        for row in 0..map.len() {
            let dport =
                u16::from_be_bytes(dports[8 + row * 2..8 + row * 2 + 2].try_into().unwrap());
            let rcvd = u64::from_be_bytes(
                bytes_rcvd[8 + row * 8..8 + row * 8 + 8].try_into().unwrap(),
            );
            let expected = map
                .iter()
                .find(|(k, _)| u16::from_be_bytes(k.dport) == dport)
                .map(|(_, v)| v.bytes_rcvd)
                .unwrap();
            assert_eq!(rcvd, expected);
        }
    }

    #[test]
    fn test_duplicate_interval_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer = DbWriter::new(dir.path(), "eth0");
        let map = sample_map();

        writer.write(&map, BlockStats::default(), 1000).unwrap();
        assert!(matches!(
            writer.write(&map, BlockStats::default(), 1000),
            Err(FlowError::BlockExists(1000))
        ));
    }

    #[test]
    fn test_metadata_accumulates_per_day() {
        let dir = TempDir::new().unwrap();
        let mut writer = DbWriter::new(dir.path(), "eth0");
        let map = sample_map();
        let day = 1_456_006_200i64;

        writer.write(&map, BlockStats::default(), day).unwrap();
        writer.write(&map, BlockStats::default(), day + 300).unwrap();
        // Next day goes to a fresh metadata file.
        writer
            .write(&map, BlockStats::default(), day + EPOCH_DAY)
            .unwrap();

        let meta = Metadata::read(
            dir.path()
                .join("eth0")
                .join(day_timestamp(day).to_string())
                .join(METADATA_FILE_NAME),
        )
        .unwrap();
        assert_eq!(meta.blocks.len(), 2);
        assert_eq!(meta.blocks[0].timestamp, day);
        assert_eq!(meta.blocks[0].flowcount, 3);
        assert_eq!(meta.blocks[1].timestamp, day + 300);

        let next = Metadata::read(
            dir.path()
                .join("eth0")
                .join(day_timestamp(day + EPOCH_DAY).to_string())
                .join(METADATA_FILE_NAME),
        )
        .unwrap();
        assert_eq!(next.blocks.len(), 1);
    }
}
