//! Recursive descent parser for tokenized conditionals
//!
//! The grammar is left-factored so it contains no left recursion:
//!
//! ```text
//! conditional -> disjunction
//! disjunction -> conjunction ('|' conjunction)*
//! conjunction -> negation ('&' negation)*
//! negation    -> '!' primitive | primitive
//! primitive   -> '(' disjunction ')' | condition
//! condition   -> attribute comparator value
//! comparator  -> '=' | '!=' | '<' | '>' | '<=' | '>='
//! ```
//!
//! The grammar is LL(1), so a single token of lookahead decides every
//! production and parsing runs in linear time. Operand validity is not
//! checked here; `sip = 300.300.300.300` parses fine and only fails during
//! instrumentation.

use crate::conditional::{Comparator, Condition, Node};
use crate::{FlowError, Result};

/// Attribute names accepted in a condition, including the sugar forms
/// expanded by the desugarer.
static ATTRIBUTES: &[&str] = &[
    "dip", "sip", "dnet", "snet", "dport", "proto", "l7proto", // plain
    "dst", "src", "host", "net", // sugar
];

/// Parse a token stream into an AST. An empty stream yields `Ok(None)`.
pub fn parse(tokens: &[String]) -> Result<Option<Node>> {
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut p = Parser::new(tokens);
    let node = p.disjunction()?;
    if !p.eof() {
        return Err(p.error("Input unexpectedly continues"));
    }
    Ok(Some(node))
}

struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [String]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Build an error message pointing at the current token:
    ///
    /// ```text
    /// ( sip = 192.168.1.1
    ///                     ^
    /// Expected ), but didn't get it.
    /// ```
    fn error(&self, description: &str) -> FlowError {
        let mut msg = String::new();
        for token in &self.tokens[..self.pos] {
            msg.push_str(token);
            msg.push(' ');
        }
        let offset = msg.len();
        for token in &self.tokens[self.pos..] {
            msg.push_str(token);
            msg.push(' ');
        }
        msg.push('\n');
        for _ in 0..offset {
            msg.push(' ');
        }
        msg.push_str("^\n");
        msg.push_str(description);
        FlowError::Conditional(msg)
    }

    fn advance(&mut self) -> Result<&'a str> {
        if self.eof() {
            return Err(self.error("Unexpected end of input"));
        }
        let token = &self.tokens[self.pos];
        self.pos += 1;
        Ok(token)
    }

    fn accept(&mut self, token: &str) -> bool {
        if !self.eof() && self.tokens[self.pos] == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.accept(token) {
            Ok(())
        } else {
            Err(self.error(&format!("Expected {token}, but didn't get it.")))
        }
    }

    fn disjunction(&mut self) -> Result<Node> {
        let mut nodes = vec![self.conjunction()?];
        while self.accept("|") {
            nodes.push(self.conjunction()?);
        }
        Ok(list_to_tree(false, nodes))
    }

    fn conjunction(&mut self) -> Result<Node> {
        let mut nodes = vec![self.negation()?];
        while self.accept("&") {
            nodes.push(self.negation()?);
        }
        Ok(list_to_tree(true, nodes))
    }

    fn negation(&mut self) -> Result<Node> {
        if self.accept("!") {
            Ok(Node::not(self.primitive()?))
        } else {
            self.primitive()
        }
    }

    fn primitive(&mut self) -> Result<Node> {
        if self.accept("(") {
            let node = self.disjunction()?;
            self.expect(")")?;
            Ok(node)
        } else {
            self.condition()
        }
    }

    fn condition(&mut self) -> Result<Node> {
        let attribute = self.attribute()?;
        let comparator = self.comparator()?;
        let value = self.advance()?;
        Ok(Node::Condition(Condition::new(attribute, comparator, value)))
    }

    fn attribute(&mut self) -> Result<&'static str> {
        for &attribute in ATTRIBUTES {
            if self.accept(attribute) {
                return Ok(attribute);
            }
        }
        Err(self.error("Expected attribute"))
    }

    fn comparator(&mut self) -> Result<Comparator> {
        let comparators = [
            ("=", Comparator::Equal),
            ("!=", Comparator::NotEqual),
            ("<=", Comparator::LessOrEqual),
            (">=", Comparator::GreaterOrEqual),
            ("<", Comparator::Less),
            (">", Comparator::Greater),
        ];
        for (token, comparator) in comparators {
            if self.accept(token) {
                return Ok(comparator);
            }
        }
        Err(self.error("Expected comparison operator"))
    }
}

/// Convert a list of nodes into a right-leaning tree of `And` nodes (if
/// `and` is true) or `Or` nodes.
pub fn list_to_tree(and: bool, mut nodes: Vec<Node>) -> Node {
    assert!(!nodes.is_empty(), "nodes must not be empty");

    let mut result = nodes.pop().unwrap();
    while let Some(node) = nodes.pop() {
        result = if and {
            Node::and(node, result)
        } else {
            Node::or(node, result)
        };
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditional::tokenize::tokenize;

    fn parse_str(input: &str) -> Result<Option<Node>> {
        parse(&tokenize(input))
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_str("").unwrap().is_none());
        assert!(parse_str("  \t ").unwrap().is_none());
    }

    #[test]
    fn test_single_condition() {
        let node = parse_str("sip = 127.0.0.1").unwrap().unwrap();
        assert_eq!(node.to_string(), "sip = 127.0.0.1");
    }

    #[test]
    fn test_precedence() {
        // '&' binds tighter than '|'.
        let node = parse_str("sip = 1.1.1.1 | dport = 80 & proto = 6")
            .unwrap()
            .unwrap();
        assert_eq!(
            node.to_string(),
            "(sip = 1.1.1.1 | (dport = 80 & proto = 6))"
        );
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let node = parse_str("(sip = 1.1.1.1 | dport = 80) & proto = 6")
            .unwrap()
            .unwrap();
        assert_eq!(
            node.to_string(),
            "((sip = 1.1.1.1 | dport = 80) & proto = 6)"
        );
    }

    #[test]
    fn test_negation() {
        let node = parse_str("!(dport < 80)").unwrap().unwrap();
        assert_eq!(node.to_string(), "!(dport < 80)");
    }

    #[test]
    fn test_chain_is_right_leaning() {
        let node = parse_str("dport = 1 | dport = 2 | dport = 3")
            .unwrap()
            .unwrap();
        assert_eq!(
            node.to_string(),
            "(dport = 1 | (dport = 2 | dport = 3))"
        );
    }

    #[test]
    fn test_unbalanced_parenthesis() {
        let err = parse_str("( sip = 192.168.1.1").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains('^'));
        assert!(msg.contains("Expected )"));
    }

    #[test]
    fn test_unknown_attribute() {
        let err = parse_str("bogus = 80").unwrap_err();
        assert!(err.to_string().contains("Expected attribute"));
    }

    #[test]
    fn test_trailing_garbage() {
        let err = parse_str("dport = 80 dport = 443").unwrap_err();
        assert!(err.to_string().contains("unexpectedly continues"));
    }

    #[test]
    fn test_missing_value() {
        let err = parse_str("dport =").unwrap_err();
        assert!(err.to_string().contains("Unexpected end of input"));
    }

    #[test]
    fn test_loose_value_parses() {
        // Operand validation happens during instrumentation only.
        assert!(parse_str("sip = 300.300.300.300.300").unwrap().is_some());
    }
}
