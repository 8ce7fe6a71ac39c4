//! Parallel scan over daily directories
//!
//! The work manager enumerates the daily directories of one interface that
//! intersect a query's time range, builds one workload per directory, and
//! distributes the workloads over a fixed pool of worker threads through a
//! bounded channel. Each worker owns its own block file handles, folds
//! matching rows into a local map and ships that map back for the final
//! reduce. A failing workload is logged and counted; it never aborts the
//! other workloads.

use crate::config::{BLOCK_FILE_SUFFIX, EPOCH_DAY, WRITE_INTERVAL};
use crate::query::Query;
use crate::store::BlockFile;
use crate::types::{ColumnIndex, ExtraKey, Key, Val, COLUMN_COUNT};
use crate::{FlowError, Result};
use crossbeam_channel::{bounded, unbounded};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Depth of the workload distribution queue
const WORKLOAD_QUEUE_DEPTH: usize = 128;

/// Default worker count: one per available CPU
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// One unit of scan work: a daily directory plus the block timestamps to
/// process within it.
#[derive(Debug, Clone)]
struct Workload {
    day: i64,
    load: Vec<i64>,
}

/// Result of a parallel scan
#[derive(Debug, Default)]
pub struct QueryResult {
    /// Aggregated counters keyed by the requested output attributes
    pub map: HashMap<ExtraKey, Val>,
    /// Number of workloads that failed and are absent from the map
    pub failed_workloads: usize,
}

/// Scan driver for one interface of a database
pub struct WorkManager {
    db_iface_dir: PathBuf,
    iface: String,
    workloads: Vec<Workload>,
    num_workers: usize,
}

impl WorkManager {
    pub fn new(db_path: impl AsRef<Path>, iface: impl Into<String>, num_workers: usize) -> Self {
        let iface = iface.into();
        Self {
            db_iface_dir: db_path.as_ref().join(&iface),
            iface,
            workloads: Vec::new(),
            num_workers: num_workers.max(1),
        }
    }

    pub fn num_workloads(&self) -> usize {
        self.workloads.len()
    }

    /// Time interval actually covered by the created workloads
    pub fn covered_interval(&self) -> Option<(i64, i64)> {
        let first = self.workloads.first()?.load.first()?;
        let last = self.workloads.last()?.load.last()?;
        Some((first - WRITE_INTERVAL, *last))
    }

    /// Enumerate the daily directories intersecting `[tfirst, tlast]` and
    /// collect the block timestamps each workload has to process. Returns
    /// whether any workload with a non-empty load was created.
    ///
    /// Block timestamps are taken from one reference column; a directory may
    /// fall into the interval while all of its blocks are outside it, in
    /// which case it is dropped.
    pub fn create_workloads(&mut self, tfirst: i64, tlast: i64) -> Result<bool> {
        let mut day_timestamps = Vec::new();
        for entry in std::fs::read_dir(&self.db_iface_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(day) = entry.file_name().to_str().and_then(|n| n.parse::<i64>().ok())
            else {
                continue;
            };
            if tfirst < day + EPOCH_DAY && day < tlast + WRITE_INTERVAL {
                day_timestamps.push(day);
            }
        }
        day_timestamps.sort_unstable();

        for day in day_timestamps {
            let reference = self
                .db_iface_dir
                .join(day.to_string())
                .join(format!("{}{}", ColumnIndex::BytesRcvd.name(), BLOCK_FILE_SUFFIX));
            let file = BlockFile::open(&reference)?;

            let load: Vec<i64> = file
                .timestamps()
                .iter()
                .copied()
                .filter(|&ts| ts != 0 && tfirst < ts && ts < tlast + WRITE_INTERVAL)
                .collect();

            if !load.is_empty() {
                self.workloads.push(Workload { day, load });
            }
        }

        debug!(
            iface = %self.iface,
            workloads = self.workloads.len(),
            "created scan workloads"
        );
        Ok(!self.workloads.is_empty())
    }

    /// Run the scan over all created workloads and reduce the partial maps.
    ///
    /// Workers pull workloads from a bounded queue until it drains; the
    /// reduce runs on the calling thread while workers are still producing.
    /// All workers are joined before this returns.
    pub fn execute(&self, query: &Query) -> QueryResult {
        let (task_tx, task_rx) = bounded::<&Workload>(WORKLOAD_QUEUE_DEPTH);
        let (map_tx, map_rx) = unbounded::<Result<HashMap<ExtraKey, Val>>>();

        std::thread::scope(|s| {
            for _ in 0..self.num_workers {
                let task_rx = task_rx.clone();
                let map_tx = map_tx.clone();
                s.spawn(move || {
                    for workload in task_rx {
                        let _ = map_tx.send(self.scan_workload(workload, query));
                    }
                });
            }
            drop(task_rx);
            drop(map_tx);

            for workload in &self.workloads {
                if task_tx.send(workload).is_err() {
                    break;
                }
            }
            drop(task_tx);

            let mut result = QueryResult::default();
            for partial in map_rx {
                match partial {
                    Ok(map) => {
                        for (key, val) in map {
                            result.map.entry(key).or_default().add(&val);
                        }
                    }
                    Err(e) => {
                        warn!(iface = %self.iface, error = %e, "scan workload failed");
                        result.failed_workloads += 1;
                    }
                }
            }
            result
        })
    }

    /// Scan one daily directory: read the query's column set block by
    /// block, evaluate the conditional per row and aggregate matches.
    fn scan_workload(
        &self,
        workload: &Workload,
        query: &Query,
    ) -> Result<HashMap<ExtraKey, Val>> {
        let dir = self.db_iface_dir.join(workload.day.to_string());

        // Each workload owns its own file handles; nothing is shared
        // across concurrent workloads.
        let mut files: Vec<(ColumnIndex, BlockFile)> = Vec::with_capacity(query.column_indices.len());
        for &col in &query.column_indices {
            let path = dir.join(format!("{}{}", col.name(), BLOCK_FILE_SUFFIX));
            files.push((col, BlockFile::open(path)?));
        }

        let mut result: HashMap<ExtraKey, Val> = HashMap::new();
        let mut key = ExtraKey::default();
        let mut comparison = ExtraKey::default();
        if query.has_attr_iface {
            key.iface = self.iface.clone();
        }

        for &tstamp in &workload.load {
            let mut blocks: [Vec<u8>; COLUMN_COUNT] = Default::default();
            for (col, file) in &mut files {
                blocks[*col as usize] = file.read_block_by_timestamp(tstamp).map_err(|e| {
                    FlowError::Corruption(format!(
                        "[{}] failed to read {}{}: {e}",
                        dir.display(),
                        col.name(),
                        BLOCK_FILE_SUFFIX
                    ))
                })?;
            }

            // Every column's framing timestamp must match the slot
            // timestamp; a mismatch means the columns of this block do not
            // belong together.
            for &col in &query.column_indices {
                let block = &blocks[col as usize];
                if block.len() < 16 {
                    return Err(FlowError::Corruption(format!(
                        "[{} @ {tstamp}] truncated block in {}{}",
                        dir.display(),
                        col.name(),
                        BLOCK_FILE_SUFFIX
                    )));
                }
                let framed = i64::from_be_bytes(block[..8].try_into().map_err(|_| {
                    FlowError::Internal("framing timestamp read failed".into())
                })?);
                if framed != tstamp {
                    return Err(FlowError::Corruption(format!(
                        "[{} @ {tstamp}] block timestamp mismatch in {}{}: found {framed}",
                        dir.display(),
                        col.name(),
                        BLOCK_FILE_SUFFIX
                    )));
                }
            }

            // Row count derives from the reference aggregate column; all
            // other columns must agree on it exactly.
            let num_entries = (blocks[ColumnIndex::BytesRcvd as usize].len() - 16) / 8;
            for &col in &query.column_indices {
                let payload = blocks[col as usize].len() - 16;
                let size = col.entry_size();
                if payload % size != 0 || payload / size != num_entries {
                    return Err(FlowError::Corruption(format!(
                        "[{} @ {tstamp}] entry count mismatch in {}{}: expected {num_entries}, found {}",
                        dir.display(),
                        col.name(),
                        BLOCK_FILE_SUFFIX,
                        payload / size
                    )));
                }
            }

            if query.has_attr_time {
                key.time = tstamp;
            }

            for row in 0..num_entries {
                for &col in &query.attribute_indices {
                    copy_row_to_key(col, row, &blocks[col as usize], &mut key.key);
                }

                let matches = match &query.conditional {
                    None => true,
                    Some(node) => {
                        for &col in &query.conditional_indices {
                            copy_row_to_key(col, row, &blocks[col as usize], &mut comparison.key);
                        }
                        node.evaluate(&comparison)
                    }
                };
                if !matches {
                    continue;
                }

                let delta = Val {
                    bytes_rcvd: read_counter(&blocks[ColumnIndex::BytesRcvd as usize], row),
                    bytes_sent: read_counter(&blocks[ColumnIndex::BytesSent as usize], row),
                    pkts_rcvd: read_counter(&blocks[ColumnIndex::PktsRcvd as usize], row),
                    pkts_sent: read_counter(&blocks[ColumnIndex::PktsSent as usize], row),
                };
                result.entry(key.clone()).or_default().add(&delta);
            }
        }

        Ok(result)
    }
}

/// Copy one row's field of an attribute column into the key
fn copy_row_to_key(col: ColumnIndex, row: usize, block: &[u8], key: &mut Key) {
    let size = col.entry_size();
    let start = 8 + row * size;
    let field = &block[start..start + size];
    match col {
        ColumnIndex::Sip => key.sip.copy_from_slice(field),
        ColumnIndex::Dip => key.dip.copy_from_slice(field),
        ColumnIndex::Proto => key.proto = field[0],
        ColumnIndex::Dport => key.dport.copy_from_slice(field),
        ColumnIndex::L7Proto => key.l7proto.copy_from_slice(field),
        _ => debug_assert!(false, "not an attribute column: {col}"),
    }
}

fn read_counter(block: &[u8], row: usize) -> u64 {
    let start = 8 + row * 8;
    u64::from_be_bytes(block[start..start + 8].try_into().unwrap_or([0; 8]))
}
