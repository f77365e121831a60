//! Semicolon/equals attribute-list grammar.
//!
//! The same grammar decodes cookie headers and multipart content
//! disposition values: `name=value` pairs separated by semicolons, names
//! and values trimmed, values stripped of surrounding quote characters.

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(is_quote)
}

/// Parse an attribute list into (name, value) pairs, preserving order.
///
/// A pair without an `=` yields an empty value; empty segments are
/// skipped.
pub fn parse_attr_list(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for segment in input.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (name, value) = match segment.split_once('=') {
            Some((name, value)) => (name.trim(), strip_quotes(value.trim())),
            None => (segment, ""),
        };
        if name.is_empty() {
            continue;
        }
        pairs.push((name.to_string(), value.to_string()));
    }
    pairs
}

/// Look up an attribute by name in a parsed list.
pub fn attr<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}
