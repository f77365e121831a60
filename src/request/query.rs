//! Query-string and urlencoded-body field parsing.

use serde_json::{Map, Value};

/// Percent-decode a query component. `+` decodes to a space; invalid
/// escapes are passed through literally.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                // needs two hex digits after the '%'
                if i + 2 < bytes.len()
                    && let (Some(hi), Some(lo)) = (
                        (bytes[i + 1] as char).to_digit(16),
                        (bytes[i + 2] as char).to_digit(16),
                    )
                {
                    out.push((hi * 16 + lo) as u8);
                    i += 3;
                    continue;
                }
                out.push(b'%');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse an ampersand-delimited, percent-decoded `key=value` sequence
/// into a field map. A key without `=` maps to an empty string.
pub fn parse_query_pairs(input: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        };
        if key.is_empty() {
            continue;
        }
        map.insert(key, Value::String(value));
    }
    map
}
