//! Core types for FlowDB

use crate::protocols;
use crate::{FlowError, Result};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

/// Fixed-width composite key identifying one aggregated flow.
///
/// IPv4 addresses occupy the first four bytes of the 16-byte address fields,
/// with the remainder zeroed. Equality and hashing are over the exact byte
/// layout, which must match the on-disk column representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Key {
    /// Source address
    pub sip: [u8; 16],
    /// Destination address
    pub dip: [u8; 16],
    /// Destination port, big-endian
    pub dport: [u8; 2],
    /// IP protocol number
    pub proto: u8,
    /// Layer-7 protocol id, big-endian
    pub l7proto: [u8; 2],
}

/// A key with extra output columns (interval timestamp and interface name).
///
/// Constructed transiently per matched row during a scan; its fields are
/// persisted as separate columns, never as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExtraKey {
    pub time: i64,
    pub iface: String,
    pub key: Key,
}

/// Flow counters. Forms a commutative monoid under field-wise addition with
/// identity all-zero, which makes partial aggregates from concurrent scan
/// workers safe to merge in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Val {
    pub bytes_rcvd: u64,
    pub bytes_sent: u64,
    pub pkts_rcvd: u64,
    pub pkts_sent: u64,
}

impl Val {
    /// Field-wise addition
    pub fn add(&mut self, other: &Val) {
        self.bytes_rcvd += other.bytes_rcvd;
        self.bytes_sent += other.bytes_sent;
        self.pkts_rcvd += other.pkts_rcvd;
        self.pkts_sent += other.pkts_sent;
    }

    /// Total traffic volume (both directions) in bytes
    pub fn traffic(&self) -> u64 {
        self.bytes_rcvd + self.bytes_sent
    }
}

/// Aggregated flow map produced by the capture subsystem once per rotation
/// interval. At most one `Val` per `Key`.
pub type AggFlowMap = HashMap<Key, Val>;

/// Number of attribute columns (sip, dip, proto, dport, l7proto)
pub const ATTRIBUTE_COLUMN_COUNT: usize = 5;

/// Total number of columns, attributes first, then the four aggregates
pub const COLUMN_COUNT: usize = 9;

/// Index of a column in the on-disk layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum ColumnIndex {
    Sip = 0,
    Dip = 1,
    Proto = 2,
    Dport = 3,
    L7Proto = 4,
    BytesRcvd = 5,
    BytesSent = 6,
    PktsRcvd = 7,
    PktsSent = 8,
}

/// All columns in canonical order
pub const ALL_COLUMNS: [ColumnIndex; COLUMN_COUNT] = [
    ColumnIndex::Sip,
    ColumnIndex::Dip,
    ColumnIndex::Proto,
    ColumnIndex::Dport,
    ColumnIndex::L7Proto,
    ColumnIndex::BytesRcvd,
    ColumnIndex::BytesSent,
    ColumnIndex::PktsRcvd,
    ColumnIndex::PktsSent,
];

/// The four aggregate columns, always part of every query's read set
pub const AGGREGATE_COLUMNS: [ColumnIndex; 4] = [
    ColumnIndex::BytesRcvd,
    ColumnIndex::BytesSent,
    ColumnIndex::PktsRcvd,
    ColumnIndex::PktsSent,
];

impl ColumnIndex {
    /// File stem of this column's block store file
    pub fn name(self) -> &'static str {
        match self {
            ColumnIndex::Sip => "sip",
            ColumnIndex::Dip => "dip",
            ColumnIndex::Proto => "proto",
            ColumnIndex::Dport => "dport",
            ColumnIndex::L7Proto => "l7proto",
            ColumnIndex::BytesRcvd => "bytes_rcvd",
            ColumnIndex::BytesSent => "bytes_sent",
            ColumnIndex::PktsRcvd => "pkts_rcvd",
            ColumnIndex::PktsSent => "pkts_sent",
        }
    }

    /// Fixed width of one row entry in this column, in bytes
    pub fn entry_size(self) -> usize {
        match self {
            ColumnIndex::Sip | ColumnIndex::Dip => 16,
            ColumnIndex::Proto => 1,
            ColumnIndex::Dport | ColumnIndex::L7Proto => 2,
            ColumnIndex::BytesRcvd
            | ColumnIndex::BytesSent
            | ColumnIndex::PktsRcvd
            | ColumnIndex::PktsSent => 8,
        }
    }
}

impl fmt::Display for ColumnIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Parse a textual IP address into the database's 16-byte representation.
/// IPv4 addresses land in the first four bytes, the remainder is zeroed.
pub fn ip_string_to_bytes(ip: &str) -> Result<[u8; 16]> {
    let addr: IpAddr = ip
        .parse()
        .map_err(|_| FlowError::Conditional(format!("could not parse IP address: {ip}")))?;

    let mut bytes = [0u8; 16];
    match addr {
        IpAddr::V4(v4) => bytes[..4].copy_from_slice(&v4.octets()),
        IpAddr::V6(v6) => bytes.copy_from_slice(&v6.octets()),
    }
    Ok(bytes)
}

/// Render a 16-byte address back into its textual form. An address whose
/// last twelve bytes are zero is assumed to be IPv4.
pub fn ip_to_string(bytes: &[u8; 16]) -> String {
    if bytes[4..].iter().all(|&b| b == 0) {
        format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])
    } else {
        std::net::Ipv6Addr::from(*bytes).to_string()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            ip_to_string(&self.sip),
            ip_to_string(&self.dip),
            u16::from_be_bytes(self.dport),
            protocols::ip_proto_name(self.proto),
        )
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.pkts_rcvd, self.pkts_sent, self.bytes_rcvd, self.bytes_sent
        )
    }
}
