//! Input sanitization and tokenization
//!
//! The conditional `sip = 127.0.0.1 | !(dport < 80)` tokenizes into
//! `{"sip", "=", "127.0.0.1", "|", "!", "(", "dport", "<", "80", ")"}`.
//! Tokenization is loose: every valid conditional tokenizes correctly, but
//! some invalid ones do too. Catching those is the parser's job.

use crate::{FlowError, Result};
use regex::Regex;

/// Verbose and exotic operator spellings accepted in user input, mapped to
/// the canonical grammar. Applied after lower-casing, so symbolic protocol
/// names must be kept lower case in the lookup tables.
///
/// The `not` rewrites keep the captured leading whitespace so that the
/// surrounding `and`/`or` spellings still see their delimiters.
static GRAMMAR_CONVERSIONS: &[(&str, &[&str])] = &[
    ("${1}!", &[r"(^|\s+)not\s+"]),
    // Users should be able to write "not{dport = 80}"
    ("${1}!(", &[r"(^|\s+)not[\(\[\{]"]),
    ("&", &[r"&&", r"\s+and\s+", r"\*"]),
    ("|", &[r"\|\|", r"\s+or\s+", r"\+"]),
    ("(", &[r"\{", r"\["]),
    (")", &[r"\}", r"\]"]),
    ("=", &[r"\s+eq\s+", r"\s+\-eq\s+", r"\s+equals\s+", "===", "=="]),
    ("!=", &[r"\s+neq\s+", r"\s+-neq\s+", r"\s+ne\s+", r"\s+\-ne\s+"]),
    ("<=", &[r"\s+le\s+", r"\s+\-le\s+", r"\s+leq\s+", r"\s+-leq\s+"]),
    (">=", &[r"\s+ge\s+", r"\s+\-ge\s+", r"\s+geq\s+", r"\s+-geq\s+"]),
    (
        ">",
        &[r"\s+g\s+", r"\s+\-g\s+", r"\s+gt\s+", r"\s+\-gt\s+", r"\s+greater\s+"],
    ),
    (
        "<",
        &[r"\s+l\s+", r"\s+\-l\s+", r"\s+lt\s+", r"\s+\-lt\s+", r"\s+less\s+"],
    ),
];

/// Rewrite a user-supplied conditional into the canonical grammar.
///
/// Verbose forms such as `dport=443 or dport=8080` and exotic forms such as
/// `{dport=443 || dport=8080}` become `(dport=443|dport=8080)`. The output
/// may still contain syntax errors; those are caught by the parser.
pub fn sanitize_user_input(conditional: &str) -> Result<String> {
    let mut sanitized = conditional.to_lowercase();

    for (replacement, spellings) in GRAMMAR_CONVERSIONS {
        for spelling in *spellings {
            let re = Regex::new(spelling)
                .map_err(|e| FlowError::Internal(format!("bad sanitizer pattern: {e}")))?;
            sanitized = re.replace_all(&sanitized, *replacement).into_owned();
        }
    }

    Ok(sanitized)
}

fn starts_delimiter(c: u8) -> bool {
    matches!(
        c,
        b'!' | b'=' | b'<' | b'>' | b'|' | b'&' | b'(' | b')' | b' ' | b'\n' | b'\r' | b'\t'
    )
}

/// Split a sanitized conditional into tokens.
///
/// Word tokens are attribute names, protocol names, numbers, IP addresses
/// and CIDR records. Delimiter tokens are the logical and comparison
/// operators plus parentheses; of these only `!=`, `<=` and `>=` are two
/// characters long, so one character of lookahead suffices. Whitespace
/// separates tokens and is not emitted. Only ASCII input is supported.
pub fn tokenize(expression: &str) -> Vec<String> {
    let bytes = expression.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if !starts_delimiter(c) {
            let start = i;
            while i < bytes.len() && !starts_delimiter(bytes[i]) {
                i += 1;
            }
            tokens.push(expression[start..i].to_string());
            continue;
        }

        match c {
            b' ' | b'\n' | b'\r' | b'\t' => i += 1,
            b'=' | b'|' | b'&' | b'(' | b')' => {
                tokens.push((c as char).to_string());
                i += 1;
            }
            // '!', '<' and '>' may combine with a following '='
            _ => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(format!("{}=", c as char));
                    i += 2;
                } else {
                    tokens.push((c as char).to_string());
                    i += 1;
                }
            }
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<String> {
        tokenize(input)
    }

    #[test]
    fn test_basic_tokenization() {
        assert_eq!(
            tokens("sip = 127.0.0.1 | !(dport < 80)"),
            vec!["sip", "=", "127.0.0.1", "|", "!", "(", "dport", "<", "80", ")"]
        );
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            tokens("dport!=80&dport<=1024&dport>=22"),
            vec!["dport", "!=", "80", "&", "dport", "<=", "1024", "&", "dport", ">=", "22"]
        );
    }

    #[test]
    fn test_no_whitespace_needed() {
        assert_eq!(
            tokens("sip=10.0.0.1|dip=10.0.0.2"),
            vec!["sip", "=", "10.0.0.1", "|", "dip", "=", "10.0.0.2"]
        );
    }

    #[test]
    fn test_cidr_and_ipv6_words() {
        assert_eq!(
            tokens("snet = 192.168.0.0/16 & sip = fe80::aebc"),
            vec!["snet", "=", "192.168.0.0/16", "&", "sip", "=", "fe80::aebc"]
        );
    }

    #[test]
    fn test_sanitize_verbose_forms() {
        assert_eq!(
            sanitize_user_input("dport eq 443 or dport eq 8080").unwrap(),
            "dport=443|dport=8080"
        );
        assert_eq!(
            sanitize_user_input("{dport=443 || dport=8080}").unwrap(),
            "(dport=443|dport=8080)"
        );
        assert_eq!(
            sanitize_user_input("not{dport = 80}").unwrap(),
            "!(dport = 80)"
        );
        assert_eq!(
            sanitize_user_input("dport=80 and not proto=tcp").unwrap(),
            "dport=80&!proto=tcp"
        );
    }

    #[test]
    fn test_sanitize_lowercases() {
        assert_eq!(
            sanitize_user_input("PROTO = TCP").unwrap(),
            "proto = tcp"
        );
    }
}
