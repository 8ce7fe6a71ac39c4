//! Query descriptor and scan engine
//!
//! A `Query` bundles the requested output attributes with an optional
//! compiled conditional and precomputes which on-disk columns a scan has to
//! read. The work manager then distributes daily directories over a worker
//! pool and folds matching rows into an aggregate map.

pub mod work_manager;

pub use work_manager::{QueryResult, WorkManager};

use crate::conditional::Node;
use crate::types::{
    ip_to_string, ColumnIndex, ExtraKey, ATTRIBUTE_COLUMN_COUNT,
};
use crate::{protocols, FlowError, Result};

/// An output attribute of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Sip,
    Dip,
    Proto,
    Dport,
    L7Proto,
}

impl Attribute {
    pub fn name(self) -> &'static str {
        match self {
            Attribute::Sip => "sip",
            Attribute::Dip => "dip",
            Attribute::Proto => "proto",
            Attribute::Dport => "dport",
            Attribute::L7Proto => "l7proto",
        }
    }

    /// Column this attribute is stored in
    pub fn column_index(self) -> ColumnIndex {
        match self {
            Attribute::Sip => ColumnIndex::Sip,
            Attribute::Dip => ColumnIndex::Dip,
            Attribute::Proto => ColumnIndex::Proto,
            Attribute::Dport => ColumnIndex::Dport,
            Attribute::L7Proto => ColumnIndex::L7Proto,
        }
    }

    /// Render this attribute's value from a result key
    pub fn extract_string(self, key: &ExtraKey) -> String {
        match self {
            Attribute::Sip => ip_to_string(&key.key.sip),
            Attribute::Dip => ip_to_string(&key.key.dip),
            Attribute::Proto => protocols::ip_proto_name(key.key.proto),
            Attribute::Dport => u16::from_be_bytes(key.key.dport).to_string(),
            Attribute::L7Proto => protocols::l7_proto_name(u16::from_be_bytes(key.key.l7proto)),
        }
    }

    /// Look up an attribute by name. This is the single place invalid query
    /// attributes are rejected, before any I/O happens.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            // src and dst are aliases
            "sip" | "src" => Ok(Attribute::Sip),
            "dip" | "dst" => Ok(Attribute::Dip),
            "proto" => Ok(Attribute::Proto),
            "dport" => Ok(Attribute::Dport),
            "l7proto" => Ok(Attribute::L7Proto),
            _ => Err(FlowError::Query(format!("Unknown attribute name: '{name}'"))),
        }
    }
}

/// Column index a conditional attribute reads from. `snet`/`dnet` match
/// against the address columns.
fn conditional_attribute_column(name: &str) -> Result<ColumnIndex> {
    match name {
        "sip" | "snet" => Ok(ColumnIndex::Sip),
        "dip" | "dnet" => Ok(ColumnIndex::Dip),
        "proto" => Ok(ColumnIndex::Proto),
        "dport" => Ok(ColumnIndex::Dport),
        "l7proto" => Ok(ColumnIndex::L7Proto),
        _ => Err(FlowError::Internal(format!(
            "unexpected conditional attribute {name}"
        ))),
    }
}

/// Parse a query type into a list of output attributes.
///
/// A query type is either a preset such as `talk_conv` or a comma-separated
/// list of attribute names such as `sip,dip,dport`. The returned list holds
/// no duplicates. The special names `time` and `iface` are never part of the
/// list; their presence is reported via the two flags. The `raw` preset
/// implies both.
pub fn parse_query_type(query_type: &str) -> Result<(Vec<Attribute>, bool, bool)> {
    use Attribute::*;

    let preset = match query_type {
        "talk_conv" => Some(vec![Sip, Dip]),
        "talk_src" => Some(vec![Sip]),
        "talk_dst" => Some(vec![Dip]),
        "apps_port" => Some(vec![Dport, Proto]),
        "agg_talk_port" => Some(vec![Sip, Dip, Dport, Proto]),
        "raw" => return Ok((vec![Sip, Dip, Dport, Proto], true, true)),
        _ => None,
    };
    if let Some(attributes) = preset {
        return Ok((attributes, false, false));
    }

    let mut attributes = Vec::new();
    let mut has_time = false;
    let mut has_iface = false;
    for name in query_type.split(',') {
        match name {
            "time" => has_time = true,
            "iface" => has_iface = true,
            _ => {
                let attribute = Attribute::from_name(name)?;
                if !attributes.contains(&attribute) {
                    attributes.push(attribute);
                }
            }
        }
    }
    Ok((attributes, has_time, has_iface))
}

/// A fully specified query: output attributes, optional compiled
/// conditional, and the precomputed column read sets.
pub struct Query {
    pub attributes: Vec<Attribute>,
    pub conditional: Option<Node>,

    pub has_attr_time: bool,
    pub has_attr_iface: bool,

    /// Columns of the requested output attributes
    pub(crate) attribute_indices: Vec<ColumnIndex>,
    /// Columns the conditional reads its comparison values from
    pub(crate) conditional_indices: Vec<ColumnIndex>,
    /// Union of the above plus the four aggregate columns, attribute
    /// columns first in canonical order, aggregates last. The scan engine
    /// relies on this fixed order.
    pub(crate) column_indices: Vec<ColumnIndex>,
}

impl Query {
    pub fn new(
        attributes: Vec<Attribute>,
        conditional: Option<Node>,
        has_attr_time: bool,
        has_attr_iface: bool,
    ) -> Result<Self> {
        let mut is_needed = [false; ATTRIBUTE_COLUMN_COUNT];

        let mut attribute_indices = Vec::with_capacity(attributes.len());
        for attribute in &attributes {
            let idx = attribute.column_index();
            attribute_indices.push(idx);
            is_needed[idx as usize] = true;
        }

        let mut conditional_indices = Vec::new();
        if let Some(node) = &conditional {
            for name in node.attributes() {
                let idx = conditional_attribute_column(&name)?;
                if !conditional_indices.contains(&idx) {
                    conditional_indices.push(idx);
                }
                is_needed[idx as usize] = true;
            }
            conditional_indices.sort();
        }

        let mut column_indices = Vec::new();
        for column in crate::types::ALL_COLUMNS.iter().take(ATTRIBUTE_COLUMN_COUNT) {
            if is_needed[*column as usize] {
                column_indices.push(*column);
            }
        }
        column_indices.extend(crate::types::AGGREGATE_COLUMNS);

        Ok(Self {
            attributes,
            conditional,
            has_attr_time,
            has_attr_iface,
            attribute_indices,
            conditional_indices,
            column_indices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditional;
    use std::time::Duration;

    #[test]
    fn test_parse_presets() {
        let (attrs, time, iface) = parse_query_type("talk_conv").unwrap();
        assert_eq!(attrs, vec![Attribute::Sip, Attribute::Dip]);
        assert!(!time && !iface);

        let (attrs, time, iface) = parse_query_type("raw").unwrap();
        assert_eq!(attrs.len(), 4);
        assert!(time && iface);
    }

    #[test]
    fn test_parse_attribute_list() {
        let (attrs, time, iface) = parse_query_type("dport,time,src,dport").unwrap();
        assert_eq!(attrs, vec![Attribute::Dport, Attribute::Sip]);
        assert!(time);
        assert!(!iface);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(parse_query_type("sip,bogus").is_err());
    }

    #[test]
    fn test_column_selection() {
        // Attributes {dport, proto} plus a dnet conditional always read the
        // dip, proto and dport columns and all four aggregates, without
        // duplicates, regardless of input order.
        let node = conditional::compile("dnet = 10.0.0.0/8", Duration::from_secs(1))
            .unwrap()
            .unwrap();
        let query = Query::new(
            vec![Attribute::Proto, Attribute::Dport],
            Some(node),
            false,
            false,
        )
        .unwrap();

        assert_eq!(
            query.column_indices,
            vec![
                ColumnIndex::Dip,
                ColumnIndex::Proto,
                ColumnIndex::Dport,
                ColumnIndex::BytesRcvd,
                ColumnIndex::BytesSent,
                ColumnIndex::PktsRcvd,
                ColumnIndex::PktsSent,
            ]
        );
        assert_eq!(query.conditional_indices, vec![ColumnIndex::Dip]);
    }

    #[test]
    fn test_overlapping_attribute_and_conditional_columns() {
        let node = conditional::compile("dport = 80", Duration::from_secs(1))
            .unwrap()
            .unwrap();
        let query = Query::new(vec![Attribute::Dport], Some(node), false, false).unwrap();

        // dport appears once despite being both an output attribute and a
        // conditional column.
        let dport_count = query
            .column_indices
            .iter()
            .filter(|&&c| c == ColumnIndex::Dport)
            .count();
        assert_eq!(dport_count, 1);
    }
}
