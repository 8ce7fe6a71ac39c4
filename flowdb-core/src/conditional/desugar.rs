//! Desugaring of convenience attributes
//!
//! `src` and `dst` are plain aliases for `sip` and `dip`. `host` and `net`
//! expand into a disjunction over both directions: `host = v` becomes
//! `(sip = v | dip = v)` and `host != v` becomes `!(sip = v | dip = v)`,
//! with `net` expanding to `snet`/`dnet` analogously.

use crate::conditional::{Comparator, Condition, Node};
use crate::{FlowError, Result};

/// Replace all sugar attributes in the tree
pub fn desugar(node: Node) -> Result<Node> {
    node.transform(&mut desugar_condition)
}

fn desugar_condition(mut condition: Condition) -> Result<Node> {
    fn both_directions(
        name: &str,
        src: &str,
        dst: &str,
        comparator: Comparator,
        value: &str,
    ) -> Result<Node> {
        if comparator != Comparator::Equal && comparator != Comparator::NotEqual {
            return Err(FlowError::Conditional(format!(
                "Invalid comparison operator in {name} condition: {comparator}"
            )));
        }

        let expanded = Node::or(
            Node::Condition(Condition::new(src, Comparator::Equal, value)),
            Node::Condition(Condition::new(dst, Comparator::Equal, value)),
        );

        Ok(if comparator == Comparator::NotEqual {
            Node::not(expanded)
        } else {
            expanded
        })
    }

    match condition.attribute.as_str() {
        "src" => {
            condition.attribute = "sip".into();
            Ok(Node::Condition(condition))
        }
        "dst" => {
            condition.attribute = "dip".into();
            Ok(Node::Condition(condition))
        }
        "host" => both_directions("host", "sip", "dip", condition.comparator, &condition.value),
        "net" => both_directions("net", "snet", "dnet", condition.comparator, &condition.value),
        _ => Ok(Node::Condition(condition)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditional::{parse, tokenize};

    fn desugared(input: &str) -> Result<Node> {
        let node = parse::parse(&tokenize::tokenize(input)).unwrap().unwrap();
        desugar(node)
    }

    #[test]
    fn test_src_dst_aliases() {
        assert_eq!(
            desugared("src = 1.2.3.4 & dst = 4.3.2.1").unwrap().to_string(),
            "(sip = 1.2.3.4 & dip = 4.3.2.1)"
        );
    }

    #[test]
    fn test_host_expands_to_both_directions() {
        assert_eq!(
            desugared("host = 192.168.178.1").unwrap().to_string(),
            "(sip = 192.168.178.1 | dip = 192.168.178.1)"
        );
    }

    #[test]
    fn test_host_not_equal_wraps_in_negation() {
        assert_eq!(
            desugared("host != 192.168.178.1").unwrap().to_string(),
            "!((sip = 192.168.178.1 | dip = 192.168.178.1))"
        );
    }

    #[test]
    fn test_net_expands_to_snet_dnet() {
        assert_eq!(
            desugared("net = 10.0.0.0/8").unwrap().to_string(),
            "(snet = 10.0.0.0/8 | dnet = 10.0.0.0/8)"
        );
    }

    #[test]
    fn test_host_rejects_ordering_comparators() {
        assert!(desugared("host < 10.0.0.1").is_err());
        assert!(desugared("net >= 10.0.0.0/8").is_err());
    }

    #[test]
    fn test_plain_attributes_untouched() {
        assert_eq!(
            desugared("sip = 1.2.3.4 & dport <= 80").unwrap().to_string(),
            "(sip = 1.2.3.4 & dport <= 80)"
        );
    }
}
