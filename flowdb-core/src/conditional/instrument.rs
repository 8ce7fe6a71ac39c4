//! Condition instrumentation
//!
//! Instrumentation turns the textual operand of each condition into the
//! binary form stored in the database, validating it in the process. All
//! malformed operands and disallowed attribute/comparator combinations are
//! rejected here, before any block is read. Evaluation is a plain dispatch
//! on attribute and comparator over the precomputed operand bytes.

use crate::conditional::{Comparator, Condition, Node};
use crate::protocols;
use crate::types::{ip_string_to_bytes, ExtraKey};
use crate::{FlowError, Result};
use std::cmp::Ordering;

/// Binary operand of an instrumented condition. For `snet`/`dnet`
/// conditions `netmask` carries the prefix length; the operand bytes are
/// already masked to the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledOperand {
    pub bytes: Vec<u8>,
    pub netmask: usize,
}

/// Instrument every condition in the tree with its binary operand
pub fn instrument(node: Node) -> Result<Node> {
    node.transform(&mut |mut condition: Condition| {
        validate_comparator(&condition)?;
        let (bytes, netmask) = condition_bytes_and_netmask(&condition)?;
        condition.compiled = Some(CompiledOperand { bytes, netmask });
        Ok(Node::Condition(condition))
    })
}

fn validate_comparator(condition: &Condition) -> Result<()> {
    let ordering_allowed = matches!(
        condition.attribute.as_str(),
        "dport" | "proto" | "l7proto"
    );
    if !ordering_allowed
        && condition.comparator != Comparator::Equal
        && condition.comparator != Comparator::NotEqual
    {
        return Err(FlowError::Conditional(format!(
            "Comparator \"{}\" not allowed for attribute \"{}\"",
            condition.comparator, condition.attribute
        )));
    }
    Ok(())
}

/// Serialize a condition's operand into the database's binary format.
///
/// Returns the operand bytes plus, for CIDR attributes, the prefix length.
fn condition_bytes_and_netmask(condition: &Condition) -> Result<(Vec<u8>, usize)> {
    let value = condition.value.as_str();

    match condition.attribute.as_str() {
        "sip" | "dip" => {
            let bytes = ip_string_to_bytes(value)?;
            Ok((bytes.to_vec(), 0))
        }
        "snet" | "dnet" => {
            let (addr, prefix) = value.split_once('/').ok_or_else(|| {
                FlowError::Conditional(format!(
                    "Could not get netmask from {value}. Use CIDR notation. Example: 192.168.1.17/25"
                ))
            })?;
            let netmask: usize = prefix.parse().map_err(|_| {
                FlowError::Conditional(format!(
                    "Failed to parse netmask {prefix}. Use CIDR notation. Example: 192.168.1.17/25"
                ))
            })?;

            let max = if addr.contains(':') { 128 } else { 32 };
            if netmask > max {
                return Err(FlowError::Conditional(format!(
                    "Incorrect netmask. Maximum possible value is {max} for this address family"
                )));
            }

            let mut bytes = ip_string_to_bytes(addr)?;
            // Zero everything beyond the prefix so the masked operand can be
            // compared byte-wise against masked row addresses.
            for b in bytes.iter_mut().skip((netmask + 7) / 8) {
                *b = 0;
            }
            if netmask % 8 != 0 {
                bytes[netmask / 8] &= 0xFFu8 << (8 - netmask % 8);
            }
            Ok((bytes.to_vec(), netmask))
        }
        "dport" => {
            let port: u16 = value.parse().map_err(|e| {
                FlowError::Conditional(format!("Could not parse dport value: {e}"))
            })?;
            Ok((port.to_be_bytes().to_vec(), 0))
        }
        "proto" => {
            let num = match value.parse::<u8>() {
                Ok(n) => n,
                Err(_) => protocols::ip_proto_id(value).ok_or_else(|| {
                    FlowError::Conditional(format!("Could not parse protocol value: {value}"))
                })?,
            };
            Ok((vec![num], 0))
        }
        "l7proto" => {
            let num = match value.parse::<u16>() {
                Ok(n) => n,
                Err(_) => protocols::l7_proto_id(value).ok_or_else(|| {
                    FlowError::Conditional(format!(
                        "Could not parse layer 7 protocol value: {value}"
                    ))
                })?,
            };
            Ok((num.to_be_bytes().to_vec(), 0))
        }
        other => Err(FlowError::Conditional(format!("Unknown attribute: {other}"))),
    }
}

fn ordering_matches(ord: Ordering, comparator: Comparator) -> bool {
    match comparator {
        Comparator::Equal => ord == Ordering::Equal,
        Comparator::NotEqual => ord != Ordering::Equal,
        Comparator::Less => ord == Ordering::Less,
        Comparator::Greater => ord == Ordering::Greater,
        Comparator::LessOrEqual => ord != Ordering::Greater,
        Comparator::GreaterOrEqual => ord != Ordering::Less,
    }
}

fn net_matches(ip: &[u8; 16], operand: &[u8], netmask: usize) -> bool {
    let index = netmask / 8;
    let rem = netmask % 8;
    if ip[..index] != operand[..index] {
        return false;
    }
    if rem == 0 {
        return true;
    }
    let mask = 0xFFu8 << (8 - rem);
    (ip[index] & mask) == operand[index]
}

/// Evaluate a single instrumented condition against one row key
pub(crate) fn evaluate(condition: &Condition, key: &ExtraKey) -> bool {
    debug_assert!(condition.compiled.is_some(), "condition not instrumented");
    let Some(operand) = &condition.compiled else {
        return false;
    };
    let cmp = condition.comparator;

    match condition.attribute.as_str() {
        "sip" => ordering_matches(key.key.sip[..].cmp(&operand.bytes[..16]), cmp),
        "dip" => ordering_matches(key.key.dip[..].cmp(&operand.bytes[..16]), cmp),
        "snet" => {
            let matched = net_matches(&key.key.sip, &operand.bytes, operand.netmask);
            matched == (cmp == Comparator::Equal)
        }
        "dnet" => {
            let matched = net_matches(&key.key.dip, &operand.bytes, operand.netmask);
            matched == (cmp == Comparator::Equal)
        }
        "dport" => ordering_matches(key.key.dport[..].cmp(&operand.bytes[..2]), cmp),
        "l7proto" => ordering_matches(key.key.l7proto[..].cmp(&operand.bytes[..2]), cmp),
        "proto" => ordering_matches(key.key.proto.cmp(&operand.bytes[0]), cmp),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditional::compile;
    use crate::types::Key;
    use std::time::Duration;

    fn compiled(input: &str) -> Result<Node> {
        compile(input, Duration::from_secs(5)).map(|n| n.unwrap())
    }

    fn key(sip: &str, dip: &str, dport: u16, proto: u8, l7proto: u16) -> ExtraKey {
        ExtraKey {
            time: 0,
            iface: "eth0".into(),
            key: Key {
                sip: ip_string_to_bytes(sip).unwrap(),
                dip: ip_string_to_bytes(dip).unwrap(),
                dport: dport.to_be_bytes(),
                proto,
                l7proto: l7proto.to_be_bytes(),
            },
        }
    }

    #[test]
    fn test_ip_equality() {
        let node = compiled("sip = 10.0.0.1").unwrap();
        assert!(node.evaluate(&key("10.0.0.1", "10.0.0.2", 80, 6, 0)));
        assert!(!node.evaluate(&key("10.0.0.2", "10.0.0.1", 80, 6, 0)));
    }

    #[test]
    fn test_ip_rejects_ordering() {
        assert!(compiled("sip < 10.0.0.1").is_err());
        assert!(compiled("dip >= 10.0.0.1").is_err());
    }

    #[test]
    fn test_port_ordering() {
        let node = compiled("dport < 1024").unwrap();
        assert!(node.evaluate(&key("1.1.1.1", "2.2.2.2", 80, 6, 0)));
        assert!(!node.evaluate(&key("1.1.1.1", "2.2.2.2", 8080, 6, 0)));

        let node = compiled("dport >= 1024").unwrap();
        assert!(node.evaluate(&key("1.1.1.1", "2.2.2.2", 1024, 6, 0)));
        assert!(!node.evaluate(&key("1.1.1.1", "2.2.2.2", 1023, 6, 0)));
    }

    #[test]
    fn test_proto_symbolic_equals_numeric() {
        let symbolic = compiled("proto = srp").unwrap();
        let numeric = compiled("proto = 119").unwrap();

        let mut sym_operand = None;
        symbolic.visit(&mut |c| sym_operand = c.compiled.clone());
        let mut num_operand = None;
        numeric.visit(&mut |c| num_operand = c.compiled.clone());
        assert_eq!(sym_operand.as_ref().unwrap().bytes, vec![119]);
        assert_eq!(sym_operand, num_operand);
    }

    #[test]
    fn test_l7proto_symbolic() {
        let node = compiled("l7proto = dns").unwrap();
        assert!(node.evaluate(&key("1.1.1.1", "2.2.2.2", 53, 17, 5)));
        assert!(!node.evaluate(&key("1.1.1.1", "2.2.2.2", 53, 17, 7)));
    }

    #[test]
    fn test_cidr_aligned_prefix() {
        let node = compiled("snet = 10.0.0.0/8").unwrap();
        assert!(node.evaluate(&key("10.99.1.2", "2.2.2.2", 80, 6, 0)));
        assert!(!node.evaluate(&key("11.0.0.1", "2.2.2.2", 80, 6, 0)));
    }

    #[test]
    fn test_cidr_unaligned_prefix() {
        let node = compiled("dnet = 192.168.128.0/18").unwrap();
        assert!(node.evaluate(&key("1.1.1.1", "192.168.129.7", 80, 6, 0)));
        assert!(node.evaluate(&key("1.1.1.1", "192.168.191.255", 80, 6, 0)));
        assert!(!node.evaluate(&key("1.1.1.1", "192.168.192.0", 80, 6, 0)));
        assert!(!node.evaluate(&key("1.1.1.1", "192.168.0.1", 80, 6, 0)));
    }

    #[test]
    fn test_cidr_not_equal() {
        let node = compiled("snet != 10.0.0.0/8").unwrap();
        assert!(!node.evaluate(&key("10.1.2.3", "2.2.2.2", 80, 6, 0)));
        assert!(node.evaluate(&key("172.16.0.1", "2.2.2.2", 80, 6, 0)));
    }

    #[test]
    fn test_cidr_requires_prefix() {
        assert!(compiled("snet = 10.0.0.0").is_err());
        assert!(compiled("snet = 10.0.0.0/33").is_err());
        assert!(compiled("snet = fe80::/129").is_err());
    }

    #[test]
    fn test_invalid_operands() {
        assert!(compiled("sip = 300.300.300.300.300").is_err());
        assert!(compiled("dport = notaport").is_err());
        assert!(compiled("proto = notaproto").is_err());
        assert!(compiled("dport = 65536").is_err());
    }

    #[test]
    fn test_full_pipeline_host_condition() {
        // host expands, normalizes and instruments in one go.
        let node = compiled("host != 192.168.178.1").unwrap();
        assert!(!node.evaluate(&key("192.168.178.1", "2.2.2.2", 80, 6, 0)));
        assert!(!node.evaluate(&key("2.2.2.2", "192.168.178.1", 80, 6, 0)));
        assert!(node.evaluate(&key("2.2.2.2", "3.3.3.3", 80, 6, 0)));
    }

    #[test]
    fn test_nnf_equivalence_after_compile() {
        // The compiled form of a negated expression and its NNF agree on
        // every probe.
        let negated = compiled("!(dport < 80 | proto = 17)").unwrap();
        let direct = compiled("dport >= 80 & proto != 17").unwrap();

        for (port, proto) in [(79u16, 17u8), (79, 6), (80, 17), (80, 6), (443, 6)] {
            let k = key("1.1.1.1", "2.2.2.2", port, proto, 0);
            assert_eq!(negated.evaluate(&k), direct.evaluate(&k));
        }
    }
}
