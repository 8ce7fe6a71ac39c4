//! Conditional filter expressions
//!
//! A conditional is an expression such as `sip = 127.0.0.1 | !(dport < 80)`
//! built from logical operators and primitive conditions. Compilation runs
//! through a fixed pipeline: sanitize, tokenize, parse, desugar, resolve
//! hostnames, convert to negation normal form, instrument with binary
//! operands. The compiled tree is then evaluated per row during a scan.

pub mod desugar;
pub mod instrument;
pub mod parse;
pub mod resolve;
pub mod tokenize;

pub use instrument::CompiledOperand;

use crate::types::ExtraKey;
use crate::Result;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Compile a conditional string into an evaluable predicate tree.
///
/// Returns `Ok(None)` for input that contains no condition at all (empty or
/// whitespace-only strings). All validation errors surface here, before any
/// database file is touched.
pub fn compile(conditional: &str, dns_timeout: Duration) -> Result<Option<Node>> {
    let sanitized = tokenize::sanitize_user_input(conditional)?;
    let tokens = tokenize::tokenize(&sanitized);

    let Some(node) = parse::parse(&tokens)? else {
        return Ok(None);
    };

    let node = desugar::desugar(node)?;
    let node = resolve::resolve(node, dns_timeout)?;
    let node = node.negation_normal_form();
    let node = instrument::instrument(node)?;

    Ok(Some(node))
}

/// Comparison operator of a primitive condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
}

impl Comparator {
    /// The comparator this one turns into under logical negation
    pub fn negate(self) -> Self {
        match self {
            Comparator::Equal => Comparator::NotEqual,
            Comparator::NotEqual => Comparator::Equal,
            Comparator::Less => Comparator::GreaterOrEqual,
            Comparator::Greater => Comparator::LessOrEqual,
            Comparator::LessOrEqual => Comparator::Greater,
            Comparator::GreaterOrEqual => Comparator::Less,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::Equal => "=",
            Comparator::NotEqual => "!=",
            Comparator::Less => "<",
            Comparator::Greater => ">",
            Comparator::LessOrEqual => "<=",
            Comparator::GreaterOrEqual => ">=",
        };
        write!(f, "{s}")
    }
}

/// A primitive condition, e.g. `dport <= 1024`.
///
/// The operand stays textual until instrumentation fills in its binary form.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub attribute: String,
    pub comparator: Comparator,
    pub value: String,
    pub compiled: Option<CompiledOperand>,
}

impl Condition {
    pub fn new(
        attribute: impl Into<String>,
        comparator: Comparator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            comparator,
            value: value.into(),
            compiled: None,
        }
    }
}

/// An AST node of the conditional grammar
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Condition(Condition),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

impl Node {
    pub fn not(node: Node) -> Node {
        Node::Not(Box::new(node))
    }

    pub fn and(left: Node, right: Node) -> Node {
        Node::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Node, right: Node) -> Node {
        Node::Or(Box::new(left), Box::new(right))
    }

    /// Traverse the tree in DFS order, replacing each leaf condition with
    /// the output of `f`.
    pub fn transform<F>(self, f: &mut F) -> Result<Node>
    where
        F: FnMut(Condition) -> Result<Node>,
    {
        match self {
            Node::Condition(c) => f(c),
            Node::Not(inner) => Ok(Node::not(inner.transform(f)?)),
            Node::And(l, r) => Ok(Node::and(l.transform(f)?, r.transform(f)?)),
            Node::Or(l, r) => Ok(Node::or(l.transform(f)?, r.transform(f)?)),
        }
    }

    /// Visit each leaf condition without rebuilding the tree
    pub fn visit<F>(&self, f: &mut F)
    where
        F: FnMut(&Condition),
    {
        match self {
            Node::Condition(c) => f(c),
            Node::Not(inner) => inner.visit(f),
            Node::And(l, r) | Node::Or(l, r) => {
                l.visit(f);
                r.visit(f);
            }
        }
    }

    /// Evaluate the conditional against one row key. The tree must have been
    /// instrumented first.
    pub fn evaluate(&self, key: &ExtraKey) -> bool {
        match self {
            Node::Condition(c) => instrument::evaluate(c, key),
            Node::Not(inner) => !inner.evaluate(key),
            Node::And(l, r) => l.evaluate(key) && r.evaluate(key),
            Node::Or(l, r) => l.evaluate(key) || r.evaluate(key),
        }
    }

    /// Set of attribute names used anywhere in the conditional
    pub fn attributes(&self) -> HashSet<String> {
        let mut result = HashSet::new();
        self.visit(&mut |c| {
            result.insert(c.attribute.clone());
        });
        result
    }

    /// Convert the tree into negation normal form.
    ///
    /// The result is logically equivalent and contains no `Not` nodes:
    /// negations are pushed down to the leaves by De Morgan's laws and
    /// absorbed into the comparators. For example,
    /// `!((sip = 127.0.0.1 & dip = 127.0.0.1) | dport = 80)` becomes
    /// `(sip != 127.0.0.1 | dip != 127.0.0.1) & dport != 80`.
    pub fn negation_normal_form(self) -> Node {
        fn helper(node: Node, negate: bool) -> Node {
            match node {
                Node::Condition(mut c) => {
                    if negate {
                        c.comparator = c.comparator.negate();
                    }
                    Node::Condition(c)
                }
                Node::Not(inner) => helper(*inner, !negate),
                Node::And(l, r) => {
                    if negate {
                        Node::or(helper(*l, true), helper(*r, true))
                    } else {
                        Node::and(helper(*l, false), helper(*r, false))
                    }
                }
                Node::Or(l, r) => {
                    if negate {
                        Node::and(helper(*l, true), helper(*r, true))
                    } else {
                        Node::or(helper(*l, false), helper(*r, false))
                    }
                }
            }
        }
        helper(self, false)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Condition(c) => write!(f, "{} {} {}", c.attribute, c.comparator, c.value),
            Node::Not(inner) => write!(f, "!({inner})"),
            Node::And(l, r) => write!(f, "({l} & {r})"),
            Node::Or(l, r) => write!(f, "({l} | {r})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(input: &str) -> Node {
        let sanitized = tokenize::sanitize_user_input(input).unwrap();
        let tokens = tokenize::tokenize(&sanitized);
        parse::parse(&tokens).unwrap().unwrap()
    }

    #[test]
    fn test_display_right_leaning() {
        let node = parse_str("sip = 1.2.3.4 & dport = 80 & proto = tcp");
        assert_eq!(
            node.to_string(),
            "(sip = 1.2.3.4 & (dport = 80 & proto = tcp))"
        );
    }

    #[test]
    fn test_nnf_removes_negations() {
        let node = parse_str("!((sip = 127.0.0.1 & dip = 127.0.0.1) | dport = 80)");
        let nnf = node.negation_normal_form();
        assert_eq!(
            nnf.to_string(),
            "((sip != 127.0.0.1 | dip != 127.0.0.1) & dport != 80)"
        );
    }

    #[test]
    fn test_nnf_double_negation() {
        let node = parse_str("!(!sip != 127.0.0.1 | dport < 80)");
        let nnf = node.negation_normal_form();
        assert_eq!(nnf.to_string(), "(sip != 127.0.0.1 & dport >= 80)");
    }

    #[test]
    fn test_nnf_idempotent() {
        let node = parse_str("!(sip = 10.0.0.1 | !(dport >= 1024 & proto != 6))");
        let once = node.negation_normal_form();
        let twice = once.clone().negation_normal_form();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_attributes() {
        let node = parse_str("sip = 1.2.3.4 & (dport = 80 | l7proto = 5)");
        let attrs = node.attributes();
        assert_eq!(attrs.len(), 3);
        assert!(attrs.contains("sip"));
        assert!(attrs.contains("dport"));
        assert!(attrs.contains("l7proto"));
    }

    #[test]
    fn test_empty_input_compiles_to_none() {
        assert!(compile("", Duration::from_secs(1)).unwrap().is_none());
        assert!(compile("   ", Duration::from_secs(1)).unwrap().is_none());
    }
}
