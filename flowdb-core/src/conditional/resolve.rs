//! Hostname resolution in conditionals
//!
//! `sip` and `dip` conditions may carry a hostname instead of an address.
//! All distinct hostnames in a conditional are resolved concurrently under
//! one shared deadline; each resolving hostname is rewritten into a
//! disjunction over its addresses. Resolution is all-or-nothing: a single
//! failed or timed-out lookup fails the whole compilation.

use crate::conditional::{parse, Condition, Node};
use crate::{FlowError, Result};
use crossbeam_channel::{bounded, RecvTimeoutError};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;

fn hostname_regex() -> Result<Regex> {
    Regex::new(r"[a-zA-Z0-9\-]+(?:\.[a-zA-Z0-9\-]+)*\.?")
        .map_err(|e| FlowError::Internal(format!("bad hostname pattern: {e}")))
}

fn lookup_host(hostname: &str) -> std::io::Result<Vec<String>> {
    let addrs = (hostname, 0u16).to_socket_addrs()?;
    Ok(addrs.map(|a| a.ip().to_string()).collect())
}

/// Replace every hostname operand in the tree with the addresses it
/// resolves to.
pub fn resolve(node: Node, timeout: Duration) -> Result<Node> {
    let pattern = hostname_regex()?;

    // First pass: collect the distinct hostnames. Only sip and dip
    // conditions may carry one.
    let mut hostnames = HashSet::new();
    let mut collect_err = None;
    node.visit(&mut |condition: &Condition| {
        if condition.attribute != "sip" && condition.attribute != "dip" {
            return;
        }
        if condition.value.parse::<IpAddr>().is_ok() {
            return;
        }
        if !pattern.is_match(&condition.value) {
            collect_err.get_or_insert_with(|| {
                FlowError::Conditional(format!(
                    "Invalid value in condition: '{}' is neither an ip nor a hostname",
                    condition.value
                ))
            });
            return;
        }
        hostnames.insert(condition.value.clone());
    });
    if let Some(err) = collect_err {
        return Err(err);
    }
    if hostnames.is_empty() {
        return Ok(node);
    }

    // One lookup thread per hostname, all racing the same deadline. Threads
    // outliving the deadline are left to finish on their own; the channel
    // buffer keeps their sends from blocking.
    let deadline = Instant::now() + timeout;
    let (tx, rx) = bounded(hostnames.len());
    for hostname in &hostnames {
        let tx = tx.clone();
        let hostname = hostname.clone();
        std::thread::spawn(move || {
            let result = lookup_host(&hostname);
            let _ = tx.send((hostname, result));
        });
    }
    drop(tx);

    let mut lookups: HashMap<String, Vec<String>> = HashMap::new();
    for _ in 0..hostnames.len() {
        match rx.recv_deadline(deadline) {
            Ok((hostname, Ok(addrs))) => {
                debug!(hostname = %hostname, addrs = addrs.len(), "resolved hostname");
                lookups.insert(hostname, addrs);
            }
            Ok((hostname, Err(e))) => {
                return Err(FlowError::Resolve(format!(
                    "Could not resolve hostname {hostname}: {e}"
                )));
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                return Err(FlowError::Resolve(
                    "Timeout while resolving hostnames in conditional".into(),
                ));
            }
        }
    }

    // Second pass: rewrite each hostname condition into a disjunction over
    // its addresses, preserving the comparator.
    node.transform(&mut |condition: Condition| {
        if condition.attribute != "sip" && condition.attribute != "dip" {
            return Ok(Node::Condition(condition));
        }
        let Some(addrs) = lookups.get(&condition.value) else {
            return Ok(Node::Condition(condition));
        };
        if addrs.is_empty() {
            return Err(FlowError::Resolve(format!(
                "Hostname {} did not resolve to any address",
                condition.value
            )));
        }
        let conditions = addrs
            .iter()
            .map(|addr| {
                Node::Condition(Condition::new(
                    condition.attribute.clone(),
                    condition.comparator,
                    addr.clone(),
                ))
            })
            .collect();
        Ok(parse::list_to_tree(false, conditions))
    })
}
