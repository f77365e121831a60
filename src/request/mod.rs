//! Request decoding.
//!
//! Turns a raw request cycle (environment-style metadata plus an optional
//! body) into a [`DecodedRequest`]: typed metadata, query/body/cookie
//! field maps, uploaded-file entries, and the merged-input map handed to
//! the script engine.

mod attrs;
mod content_type;
pub mod decoder;
pub mod multipart;
mod query;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub use attrs::parse_attr_list;
pub use content_type::{BodyKind, ContentType};
pub use decoder::{RequestSource, decode};
pub use query::parse_query_pairs;

/// Failures that abort a single request cycle before engine invocation.
///
/// Contained to the cycle: the worker logs the error and proceeds to its
/// next cycle.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("bad content type: {0}")]
    BadContentType(String),

    #[error("not supported content type: {0}")]
    UnsupportedContentType(String),

    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),

    #[error("multipart content type without a boundary parameter")]
    MissingBoundary,

    #[error("mismatched content length: declared {declared}, got {read}")]
    LengthMismatch { declared: u64, read: u64 },

    #[error("malformed multipart body at byte {offset}")]
    Multipart { offset: usize },

    #[error("malformed multipart part headers: {0}")]
    MalformedHeaders(&'static str),

    #[error("multipart part carries no form-data disposition")]
    BadDisposition,

    #[error("multipart part carries no name attribute")]
    MissingPartName,

    #[error("multipart body not terminated by a final boundary")]
    Unterminated,

    #[error("part data for '{0}' is not valid UTF-8")]
    InvalidFieldData(String),

    #[error("failed to create upload file: {0}")]
    UploadFile(#[source] std::io::Error),

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error while reading body: {0}")]
    Io(#[from] std::io::Error),
}

/// One uploaded file decoded out of a multipart body.
///
/// Created when a part is classified as a file; `size` is finalized when
/// that part's data stream ends and never mutated afterward. The temp
/// file itself is left in place after the request cycle.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Declared (sanitized) file name.
    pub name: String,
    /// Declared content type, when the part carried one.
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    /// Path of the temporary file holding the part data.
    pub tmp_name: PathBuf,
    /// Final byte count of the part data.
    pub size: u64,
}

/// A fully decoded request cycle.
///
/// Created once per accepted request and owned by the worker; everything
/// is released together when the cycle ends.
#[derive(Debug, Default)]
pub struct DecodedRequest {
    /// Request metadata (string or unsigned values).
    pub metadata: Map<String, Value>,
    /// Query-string fields; populated only for GET-class requests.
    pub query: Map<String, Value>,
    /// Body value; a field map for form bodies, an arbitrary document for
    /// JSON bodies, a string for plain-text bodies.
    pub body: Value,
    /// Cookie attributes from the cookie header.
    pub cookie: Map<String, Value>,
    /// Uploaded files keyed by field name.
    pub files: BTreeMap<String, FileEntry>,
    /// Merged input: query, then body, then cookie, later sources
    /// overwriting earlier ones.
    pub merged: Map<String, Value>,
    released: bool,
}

impl DecodedRequest {
    /// Release everything owned by this cycle.
    ///
    /// Idempotent: a second release is a no-op and never corrupts state
    /// for the next cycle.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.metadata = Map::new();
        self.query = Map::new();
        self.body = Value::Null;
        self.cookie = Map::new();
        self.files.clear();
        self.merged = Map::new();
        self.released = true;
    }

    /// Whether this request has already been released.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Metadata value as a string, if present and a string.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Metadata value as an unsigned integer, defaulting to zero.
    pub fn meta_ulong(&self, key: &str) -> u64 {
        self.metadata
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_release_is_idempotent() {
        let mut req = DecodedRequest {
            body: json!({"a": 1}),
            ..Default::default()
        };
        req.query.insert("q".into(), json!("v"));
        req.files.insert(
            "doc".into(),
            FileEntry {
                name: "x.txt".into(),
                content_type: Some("text/plain".into()),
                tmp_name: PathBuf::from("/var/tmp/upload-abc"),
                size: 3,
            },
        );

        req.release();
        assert!(req.is_released());
        assert!(req.query.is_empty());
        assert!(req.files.is_empty());
        assert_eq!(req.body, Value::Null);

        // Second release must be a no-op.
        req.release();
        assert!(req.query.is_empty());
        assert!(req.is_released());
    }

    #[test]
    fn test_meta_accessors() {
        let mut req = DecodedRequest::default();
        req.metadata.insert("REQUEST_METHOD".into(), json!("GET"));
        req.metadata.insert("CONTENT_LENGTH".into(), json!(42u64));

        assert_eq!(req.meta_str("REQUEST_METHOD"), Some("GET"));
        assert_eq!(req.meta_ulong("CONTENT_LENGTH"), 42);
        assert_eq!(req.meta_str("MISSING"), None);
        assert_eq!(req.meta_ulong("MISSING"), 0);
    }

    #[test]
    fn test_file_entry_serializes_declared_type() {
        let entry = FileEntry {
            name: "x.txt".into(),
            content_type: Some("text/plain".into()),
            tmp_name: PathBuf::from("/var/tmp/u1"),
            size: 3,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], json!("text/plain"));
        assert_eq!(value["size"], json!(3));
    }
}
