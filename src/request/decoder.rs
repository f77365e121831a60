//! Request decoder.
//!
//! Builds a [`DecodedRequest`] from a request cycle's metadata and body
//! stream. Branches on the request method and content type; any parse
//! failure aborts the whole cycle before engine invocation.

use std::io::Read;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use super::attrs::parse_attr_list;
use super::content_type::{BodyKind, ContentType, classify};
use super::multipart::{CHUNK_SIZE, MultipartDecoder};
use super::query::parse_query_pairs;
use super::{DecodeError, DecodedRequest};

/// One accepted request cycle as the transport hands it over: metadata
/// lookup over the fixed key set plus a body byte stream.
///
/// How the values arrive over the wire is the transport's concern, not
/// ours.
pub trait RequestSource {
    /// Look up one request metadata value by key.
    fn param(&self, key: &str) -> Option<String>;

    /// The body byte stream of this cycle.
    fn body(&mut self) -> &mut dyn Read;
}

/// Typing of a request metadata value.
enum MetaKind {
    Str,
    ULong,
}

/// The fixed request metadata key set: the RFC 3875 variables plus the
/// conventional extras front ends set. A missing string key is simply
/// absent; a missing unsigned key defaults to zero.
const META_VARS: &[(&str, MetaKind)] = &[
    ("AUTH_TYPE", MetaKind::Str),
    ("CONTENT_LENGTH", MetaKind::ULong),
    ("CONTENT_TYPE", MetaKind::Str),
    ("GATEWAY_INTERFACE", MetaKind::Str),
    ("PATH_INFO", MetaKind::Str),
    ("PATH_TRANSLATED", MetaKind::Str),
    ("QUERY_STRING", MetaKind::Str),
    ("REMOTE_ADDR", MetaKind::Str),
    ("REMOTE_HOST", MetaKind::Str),
    ("REMOTE_IDENT", MetaKind::Str),
    ("REMOTE_USER", MetaKind::Str),
    ("REQUEST_METHOD", MetaKind::Str),
    ("SCRIPT_NAME", MetaKind::Str),
    ("SERVER_NAME", MetaKind::Str),
    ("SERVER_PORT", MetaKind::ULong),
    ("SERVER_PROTOCOL", MetaKind::Str),
    ("SERVER_SOFTWARE", MetaKind::Str),
    ("HTTP_COOKIE", MetaKind::Str),
    ("HTTP_HOST", MetaKind::Str),
    ("HTTP_REFERER", MetaKind::Str),
    ("HTTP_USER_AGENT", MetaKind::Str),
    ("DOCUMENT_ROOT", MetaKind::Str),
    ("REMOTE_PORT", MetaKind::ULong),
    ("HTTPS", MetaKind::Str),
    ("REQUEST_URI", MetaKind::Str),
    ("SCRIPT_FILENAME", MetaKind::Str),
    ("SERVER_ADMIN", MetaKind::Str),
];

/// Read exactly the declared number of body bytes.
fn read_body(body: &mut dyn Read, declared: u64) -> Result<Vec<u8>, DecodeError> {
    let mut buf = Vec::with_capacity(declared.min(64 * 1024) as usize);
    body.take(declared).read_to_end(&mut buf)?;
    if (buf.len() as u64) < declared {
        return Err(DecodeError::LengthMismatch {
            declared,
            read: buf.len() as u64,
        });
    }
    Ok(buf)
}

/// Stream the body through the multipart decoder, then verify the byte
/// count against the declared length. A shortfall is a decode failure,
/// never a successful partial decode.
fn read_multipart(
    body: &mut dyn Read,
    boundary: &str,
    declared: u64,
    upload_dir: &Path,
) -> Result<
    (
        Map<String, Value>,
        std::collections::BTreeMap<String, super::FileEntry>,
    ),
    DecodeError,
> {
    let mut decoder = MultipartDecoder::new(boundary, upload_dir);
    let mut total: u64 = 0;
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let n = body.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        decoder.feed(&chunk[..n])?;
        total += n as u64;
    }

    if total != declared {
        return Err(DecodeError::LengthMismatch {
            declared,
            read: total,
        });
    }

    decoder.finish()
}

fn overlay(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (key, value) in src {
        dst.insert(key.clone(), value.clone());
    }
}

/// Decode one request cycle.
///
/// `upload_dir` receives multipart upload temp files.
pub fn decode(
    source: &mut dyn RequestSource,
    upload_dir: &Path,
) -> Result<DecodedRequest, DecodeError> {
    let mut req = DecodedRequest::default();

    for (key, kind) in META_VARS {
        match source.param(key) {
            Some(value) => {
                let value = match kind {
                    MetaKind::ULong => Value::from(value.parse::<u64>().unwrap_or(0)),
                    MetaKind::Str => Value::String(value),
                };
                req.metadata.insert((*key).to_string(), value);
            }
            None if matches!(kind, MetaKind::ULong) => {
                req.metadata.insert((*key).to_string(), Value::from(0u64));
            }
            None => {}
        }
    }

    let method = req
        .meta_str("REQUEST_METHOD")
        .unwrap_or_default()
        .to_string();

    if method.eq_ignore_ascii_case("GET") {
        if let Some(query) = req.meta_str("QUERY_STRING").map(str::to_string) {
            req.query = parse_query_pairs(&query);
        }
    } else if method.eq_ignore_ascii_case("POST") {
        let declared = req.meta_ulong("CONTENT_LENGTH");
        let content_type = req.meta_str("CONTENT_TYPE").map(str::to_string);
        if declared > 0
            && let Some(content_type) = content_type
        {
            let ct = ContentType::parse(&content_type)?;
            match classify(&ct)? {
                BodyKind::FormUrlencoded => {
                    let buf = read_body(source.body(), declared)?;
                    req.body = Value::Object(parse_query_pairs(&String::from_utf8_lossy(&buf)));
                }
                BodyKind::Json => {
                    let buf = read_body(source.body(), declared)?;
                    req.body = serde_json::from_slice(&buf)?;
                }
                BodyKind::Plain => {
                    let buf = read_body(source.body(), declared)?;
                    req.body = Value::String(String::from_utf8_lossy(&buf).into_owned());
                }
                BodyKind::Multipart { boundary } => {
                    let (post, files) =
                        read_multipart(source.body(), &boundary, declared, upload_dir)?;
                    req.body = Value::Object(post);
                    req.files = files;
                }
            }
        }
    }

    if let Some(cookie) = req.meta_str("HTTP_COOKIE").map(str::to_string) {
        for (name, value) in parse_attr_list(&cookie) {
            req.cookie.insert(name, Value::String(value));
        }
    }

    // An absent body still binds as an empty field map.
    if req.body.is_null() {
        req.body = Value::Object(Map::new());
    }

    // Merged input: query, then body, then cookie; later sources
    // overwrite earlier ones on key collision.
    let mut merged = Map::new();
    overlay(&mut merged, &req.query);
    match &req.body {
        Value::Object(body) => overlay(&mut merged, body),
        _ => debug!("body is not a field map; leaving it out of the merged input"),
    }
    overlay(&mut merged, &req.cookie);
    req.merged = merged;

    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Cursor;
    use tempfile::tempdir;

    struct TestSource {
        params: HashMap<String, String>,
        body: Cursor<Vec<u8>>,
    }

    impl TestSource {
        fn new(params: &[(&str, &str)], body: &[u8]) -> Self {
            Self {
                params: params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: Cursor::new(body.to_vec()),
            }
        }
    }

    impl RequestSource for TestSource {
        fn param(&self, key: &str) -> Option<String> {
            self.params.get(key).cloned()
        }

        fn body(&mut self) -> &mut dyn Read {
            &mut self.body
        }
    }

    fn decode_with(params: &[(&str, &str)], body: &[u8]) -> Result<DecodedRequest, DecodeError> {
        let dir = tempdir().unwrap();
        let mut source = TestSource::new(params, body);
        decode(&mut source, dir.path())
    }

    #[test]
    fn test_get_query_string_decoding() {
        let req = decode_with(
            &[("REQUEST_METHOD", "GET"), ("QUERY_STRING", "a=1&b=2")],
            b"",
        )
        .unwrap();
        assert_eq!(req.query.get("a"), Some(&json!("1")));
        assert_eq!(req.query.get("b"), Some(&json!("2")));
        assert_eq!(req.merged.get("a"), Some(&json!("1")));
    }

    #[test]
    fn test_method_compared_case_insensitively() {
        let req = decode_with(
            &[("REQUEST_METHOD", "get"), ("QUERY_STRING", "x=y")],
            b"",
        )
        .unwrap();
        assert_eq!(req.query.get("x"), Some(&json!("y")));
    }

    #[test]
    fn test_query_only_for_get_class_methods() {
        let req = decode_with(
            &[("REQUEST_METHOD", "POST"), ("QUERY_STRING", "a=1")],
            b"",
        )
        .unwrap();
        assert!(req.query.is_empty());
    }

    #[test]
    fn test_missing_ulong_defaults_to_zero() {
        let req = decode_with(&[("REQUEST_METHOD", "GET")], b"").unwrap();
        assert_eq!(req.meta_ulong("CONTENT_LENGTH"), 0);
        assert_eq!(req.meta_ulong("SERVER_PORT"), 0);
        assert_eq!(req.meta_str("AUTH_TYPE"), None);
    }

    #[test]
    fn test_post_urlencoded_body() {
        let body = b"title=hello&count=3";
        let req = decode_with(
            &[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
                ("CONTENT_LENGTH", &body.len().to_string()),
            ],
            body,
        )
        .unwrap();
        assert_eq!(req.body["title"], json!("hello"));
        assert_eq!(req.merged.get("count"), Some(&json!("3")));
    }

    #[test]
    fn test_post_json_body() {
        let body = br#"{"name": "fpmd", "tags": [1, 2]}"#;
        let req = decode_with(
            &[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "application/json; charset=utf-8"),
                ("CONTENT_LENGTH", &body.len().to_string()),
            ],
            body,
        )
        .unwrap();
        assert_eq!(req.body["name"], json!("fpmd"));
        assert_eq!(req.merged.get("tags"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_post_plain_body_is_string_value() {
        let body = b"just some text";
        let req = decode_with(
            &[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "text/plain"),
                ("CONTENT_LENGTH", &body.len().to_string()),
            ],
            body,
        )
        .unwrap();
        assert_eq!(req.body, json!("just some text"));
        // A non-map body contributes nothing to the merged input.
        assert!(req.merged.is_empty());
    }

    #[test]
    fn test_post_multipart_body() {
        let boundary = "----decodertest";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nhello\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"doc\"; filename=\"x.txt\"\r\n\
             Content-Type: text/plain\r\n\r\nabc\r\n--{b}--\r\n",
            b = boundary
        );
        let dir = tempdir().unwrap();
        let mut source = TestSource::new(
            &[
                ("REQUEST_METHOD", "POST"),
                (
                    "CONTENT_TYPE",
                    &format!("multipart/form-data; boundary={}", boundary),
                ),
                ("CONTENT_LENGTH", &body.len().to_string()),
            ],
            body.as_bytes(),
        );
        let req = decode(&mut source, dir.path()).unwrap();

        assert_eq!(req.body["title"], json!("hello"));
        let entry = req.files.get("doc").expect("file entry");
        assert_eq!(entry.name, "x.txt");
        assert_eq!(entry.size, 3);
        assert_eq!(std::fs::read(&entry.tmp_name).unwrap(), b"abc");
        assert_eq!(req.merged.get("title"), Some(&json!("hello")));
    }

    #[test]
    fn test_multipart_length_shortfall_is_failure() {
        let boundary = "----decodershort";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"t\"\r\n\r\nhi\r\n--{b}--\r\n",
            b = boundary
        );
        // Declare more than is actually delivered.
        let err = decode_with(
            &[
                ("REQUEST_METHOD", "POST"),
                (
                    "CONTENT_TYPE",
                    &format!("multipart/form-data; boundary={}", boundary),
                ),
                ("CONTENT_LENGTH", "100"),
            ],
            &body.as_bytes()[..40],
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { declared: 100, read: 40 }));
    }

    #[test]
    fn test_urlencoded_length_shortfall_is_failure() {
        let err = decode_with(
            &[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
                ("CONTENT_LENGTH", "50"),
            ],
            b"a=1",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::LengthMismatch {
                declared: 50,
                read: 3
            }
        ));
    }

    #[test]
    fn test_unsupported_content_type_fails() {
        let err = decode_with(
            &[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "application/xml"),
                ("CONTENT_LENGTH", "10"),
            ],
            b"<a></a>xxx",
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedContentType(_)));
    }

    #[test]
    fn test_charset_other_than_utf8_fails() {
        let err = decode_with(
            &[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "text/plain; charset=latin-1"),
                ("CONTENT_LENGTH", "4"),
            ],
            b"data",
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedCharset(_)));
    }

    #[test]
    fn test_zero_length_post_skips_body() {
        let req = decode_with(
            &[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "application/json"),
                ("CONTENT_LENGTH", "0"),
            ],
            b"",
        )
        .unwrap();
        assert_eq!(req.body, json!({}));
    }

    #[test]
    fn test_cookie_header_decoded() {
        let req = decode_with(
            &[
                ("REQUEST_METHOD", "GET"),
                ("HTTP_COOKIE", "session=\"abc\"; theme=dark"),
            ],
            b"",
        )
        .unwrap();
        assert_eq!(req.cookie.get("session"), Some(&json!("abc")));
        assert_eq!(req.cookie.get("theme"), Some(&json!("dark")));
    }

    #[test]
    fn test_merged_overlay_order() {
        // cookie overwrites body overwrites query
        let body = b"k=from-body&only-body=1";
        let req = decode_with(
            &[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
                ("CONTENT_LENGTH", &body.len().to_string()),
                ("HTTP_COOKIE", "k=from-cookie"),
            ],
            body,
        )
        .unwrap();
        assert_eq!(req.merged.get("k"), Some(&json!("from-cookie")));
        assert_eq!(req.merged.get("only-body"), Some(&json!("1")));
    }

    #[test]
    fn test_bad_json_body_fails() {
        let body = b"{not json}";
        let err = decode_with(
            &[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "application/json"),
                ("CONTENT_LENGTH", &body.len().to_string()),
            ],
            body,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }
}
