//! Streaming multipart/form-data parser.
//!
//! The body arrives in arbitrarily sized chunks; nothing here assumes a
//! header token, a data run, or even the boundary itself is delivered in
//! one piece. [`MultipartParser`] is the byte-level state machine; it
//! reports header fragments, part data and part/body edges to a
//! [`MultipartSink`]. [`MultipartProcessor`] is the sink used for
//! request decoding: it accumulates header fragments, classifies each
//! part as a field or a file at header-completion time, and routes part
//! data into an in-memory buffer or an upload temp file.
//!
//! All parse state lives in these two objects and is dropped when the
//! body decode ends; there is no ambient or global state.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::attrs::{attr, parse_attr_list};
use super::{DecodeError, FileEntry};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Read-chunk size used when draining a body stream.
pub const CHUNK_SIZE: usize = 1024;

/// Events produced by the parser, in stream order:
/// `on_part_begin` (`on_header_field`* `on_header_value`*)*
/// `on_headers_complete` `on_part_data`* `on_part_data_end`,
/// repeated per part, then `on_body_end`.
///
/// Header and data fragments may be partial; consumers concatenate.
pub trait MultipartSink {
    fn on_part_begin(&mut self) -> Result<(), DecodeError>;
    fn on_header_field(&mut self, frag: &[u8]) -> Result<(), DecodeError>;
    fn on_header_value(&mut self, frag: &[u8]) -> Result<(), DecodeError>;
    fn on_headers_complete(&mut self) -> Result<(), DecodeError>;
    fn on_part_data(&mut self, frag: &[u8]) -> Result<(), DecodeError>;
    fn on_part_data_end(&mut self) -> Result<(), DecodeError>;
    fn on_body_end(&mut self) -> Result<(), DecodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Matching the initial `--boundary` line.
    Preamble,
    HeaderFieldStart,
    HeaderField,
    HeadersAlmostDone,
    HeaderValueStart,
    HeaderValue,
    HeaderValueAlmostDone,
    PartDataStart,
    PartData,
    /// Saw CR inside part data; may open a boundary line.
    PartDataAlmostBoundary,
    /// Matching `--boundary` after CRLF inside part data.
    PartDataBoundary,
    /// Boundary matched; deciding between CRLF (next part) and `--` (end).
    PartDataAlmostEnd,
    PartDataEnd,
    PartDataFinalHyphen,
    End,
}

/// Incremental multipart tokenizer.
pub struct MultipartParser {
    /// `--` + the declared boundary token.
    boundary: Vec<u8>,
    /// Bytes tentatively matched against a boundary inside part data.
    /// Replayed as part data when the match falls through, which is what
    /// makes boundaries split across chunks safe.
    lookbehind: Vec<u8>,
    state: State,
    /// Match index within `boundary` (also counts the CRLF tail of the
    /// preamble line).
    index: usize,
    /// Total bytes consumed, for error offsets.
    consumed: usize,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        let mut full = Vec::with_capacity(boundary.len() + 2);
        full.extend_from_slice(b"--");
        full.extend_from_slice(boundary.as_bytes());
        let lookbehind = vec![0u8; full.len() + 8];
        Self {
            boundary: full,
            lookbehind,
            state: State::Preamble,
            index: 0,
            consumed: 0,
        }
    }

    /// Whether the final boundary has been seen.
    pub fn is_done(&self) -> bool {
        self.state == State::End
    }

    fn syntax(&self, i: usize) -> DecodeError {
        DecodeError::Multipart {
            offset: self.consumed + i,
        }
    }

    /// Process one chunk, reporting events to `sink`.
    pub fn feed(
        &mut self,
        buf: &[u8],
        sink: &mut dyn MultipartSink,
    ) -> Result<(), DecodeError> {
        let mut i = 0;
        let mut mark = 0;

        while i < buf.len() {
            let c = buf[i];
            let is_last = i + 1 == buf.len();

            match self.state {
                State::Preamble => {
                    if self.index == self.boundary.len() {
                        if c != CR {
                            return Err(self.syntax(i));
                        }
                        self.index += 1;
                    } else if self.index == self.boundary.len() + 1 {
                        if c != LF {
                            return Err(self.syntax(i));
                        }
                        self.index = 0;
                        sink.on_part_begin()?;
                        self.state = State::HeaderFieldStart;
                    } else {
                        if c != self.boundary[self.index] {
                            return Err(self.syntax(i));
                        }
                        self.index += 1;
                    }
                    i += 1;
                }

                State::HeaderFieldStart => {
                    mark = i;
                    self.state = State::HeaderField;
                    // reprocess this byte as header-field content
                }

                State::HeaderField => {
                    if c == CR {
                        self.state = State::HeadersAlmostDone;
                        i += 1;
                        continue;
                    }
                    if c == b':' {
                        sink.on_header_field(&buf[mark..i])?;
                        self.state = State::HeaderValueStart;
                        i += 1;
                        continue;
                    }
                    if c != b'-' && !c.to_ascii_lowercase().is_ascii_lowercase() {
                        return Err(self.syntax(i));
                    }
                    if is_last {
                        sink.on_header_field(&buf[mark..=i])?;
                    }
                    i += 1;
                }

                State::HeadersAlmostDone => {
                    if c != LF {
                        return Err(self.syntax(i));
                    }
                    self.state = State::PartDataStart;
                    i += 1;
                }

                State::HeaderValueStart => {
                    if c == b' ' {
                        i += 1;
                        continue;
                    }
                    mark = i;
                    self.state = State::HeaderValue;
                    // reprocess this byte as header-value content
                }

                State::HeaderValue => {
                    if c == CR {
                        sink.on_header_value(&buf[mark..i])?;
                        self.state = State::HeaderValueAlmostDone;
                        i += 1;
                        continue;
                    }
                    if is_last {
                        sink.on_header_value(&buf[mark..=i])?;
                    }
                    i += 1;
                }

                State::HeaderValueAlmostDone => {
                    if c != LF {
                        return Err(self.syntax(i));
                    }
                    self.state = State::HeaderFieldStart;
                    i += 1;
                }

                State::PartDataStart => {
                    sink.on_headers_complete()?;
                    mark = i;
                    self.state = State::PartData;
                    // reprocess this byte as part data
                }

                State::PartData => {
                    if c == CR {
                        sink.on_part_data(&buf[mark..i])?;
                        self.lookbehind[0] = CR;
                        self.state = State::PartDataAlmostBoundary;
                        i += 1;
                        continue;
                    }
                    if is_last {
                        sink.on_part_data(&buf[mark..=i])?;
                    }
                    i += 1;
                }

                State::PartDataAlmostBoundary => {
                    if c == LF {
                        self.lookbehind[1] = LF;
                        self.index = 0;
                        self.state = State::PartDataBoundary;
                        i += 1;
                        continue;
                    }
                    // The CR was plain data after all; replay it and
                    // reprocess the current byte.
                    sink.on_part_data(&[CR])?;
                    mark = i;
                    self.state = State::PartData;
                }

                State::PartDataBoundary => {
                    if self.boundary[self.index] != c {
                        // Partial boundary match was plain data; replay
                        // CRLF plus the matched prefix.
                        let matched = 2 + self.index;
                        let replay = self.lookbehind[..matched].to_vec();
                        sink.on_part_data(&replay)?;
                        mark = i;
                        self.state = State::PartData;
                        continue;
                    }
                    self.lookbehind[2 + self.index] = c;
                    self.index += 1;
                    if self.index == self.boundary.len() {
                        sink.on_part_data_end()?;
                        self.state = State::PartDataAlmostEnd;
                    }
                    i += 1;
                }

                State::PartDataAlmostEnd => {
                    if c == b'-' {
                        self.state = State::PartDataFinalHyphen;
                        i += 1;
                        continue;
                    }
                    if c == CR {
                        self.state = State::PartDataEnd;
                        i += 1;
                        continue;
                    }
                    return Err(self.syntax(i));
                }

                State::PartDataFinalHyphen => {
                    if c != b'-' {
                        return Err(self.syntax(i));
                    }
                    sink.on_body_end()?;
                    self.state = State::End;
                    i += 1;
                }

                State::PartDataEnd => {
                    if c != LF {
                        return Err(self.syntax(i));
                    }
                    sink.on_part_begin()?;
                    self.state = State::HeaderFieldStart;
                    i += 1;
                }

                // Epilogue bytes after the final boundary are ignored.
                State::End => {
                    i += 1;
                }
            }
        }

        self.consumed += buf.len();
        Ok(())
    }
}

/// What the current part's data is routed into. Classification happens
/// once, at header completion, and is never revisited.
enum PartTarget {
    None,
    Field { name: String, data: Vec<u8> },
    File { name: String, file: File, written: u64 },
}

/// Sink that turns parser events into field values and file entries.
pub struct MultipartProcessor {
    upload_dir: PathBuf,
    post: Map<String, Value>,
    files: BTreeMap<String, FileEntry>,
    /// Completed headers of the current part, names lowercased.
    headers: Vec<(String, String)>,
    pending_name: Option<Vec<u8>>,
    pending_value: Option<Vec<u8>>,
    target: PartTarget,
}

impl MultipartProcessor {
    pub fn new(upload_dir: &Path) -> Self {
        Self {
            upload_dir: upload_dir.to_path_buf(),
            post: Map::new(),
            files: BTreeMap::new(),
            headers: Vec::new(),
            pending_name: None,
            pending_value: None,
            target: PartTarget::None,
        }
    }

    /// Consume the processor, yielding the field map and the file map.
    pub fn finish(self) -> (Map<String, Value>, BTreeMap<String, FileEntry>) {
        (self.post, self.files)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Commit an accumulated header name/value pair, if any.
    fn commit_pending(&mut self) {
        if let Some(name) = self.pending_name.take() {
            let value = self.pending_value.take().unwrap_or_default();
            self.headers.push((
                String::from_utf8_lossy(&name).to_ascii_lowercase(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }
    }
}

/// Replace whitespace in a declared file name with a neutral character.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

impl MultipartSink for MultipartProcessor {
    fn on_part_begin(&mut self) -> Result<(), DecodeError> {
        self.headers.clear();
        self.pending_name = None;
        self.pending_value = None;
        self.target = PartTarget::None;
        Ok(())
    }

    fn on_header_field(&mut self, frag: &[u8]) -> Result<(), DecodeError> {
        if self.pending_name.is_some() && self.pending_value.is_some() {
            self.commit_pending();
        }
        match &mut self.pending_name {
            Some(name) => name.extend_from_slice(frag),
            None => self.pending_name = Some(frag.to_vec()),
        }
        Ok(())
    }

    fn on_header_value(&mut self, frag: &[u8]) -> Result<(), DecodeError> {
        if self.pending_name.is_none() {
            return Err(DecodeError::MalformedHeaders(
                "header value without a header name",
            ));
        }
        match &mut self.pending_value {
            Some(value) => value.extend_from_slice(frag),
            None => self.pending_value = Some(frag.to_vec()),
        }
        Ok(())
    }

    fn on_headers_complete(&mut self) -> Result<(), DecodeError> {
        self.commit_pending();

        let disposition = self
            .header("content-disposition")
            .ok_or(DecodeError::BadDisposition)?;

        // The value must open with the form-data marker.
        let rest = disposition.trim_start();
        const MARKER: &str = "form-data";
        if rest.len() < MARKER.len() || !rest[..MARKER.len()].eq_ignore_ascii_case(MARKER) {
            return Err(DecodeError::BadDisposition);
        }
        let attrs_part = &rest[MARKER.len()..];
        if !attrs_part.is_empty() && !attrs_part.starts_with(';') {
            return Err(DecodeError::BadDisposition);
        }

        let attrs = parse_attr_list(attrs_part);
        let name = attr(&attrs, "name")
            .ok_or(DecodeError::MissingPartName)?
            .to_string();

        if let Some(filename) = attr(&attrs, "filename") {
            let filename = sanitize_filename(filename);
            std::fs::create_dir_all(&self.upload_dir).map_err(DecodeError::UploadFile)?;
            let tmp = tempfile::Builder::new()
                .prefix("upload-")
                .tempfile_in(&self.upload_dir)
                .map_err(DecodeError::UploadFile)?;
            // The file outlives the request cycle; cleanup is not ours.
            let (file, path) = tmp.keep().map_err(|e| DecodeError::UploadFile(e.error))?;

            debug!(field = %name, file = %filename, tmp = %path.display(), "upload file created");
            self.files.insert(
                name.clone(),
                FileEntry {
                    name: filename,
                    content_type: self.header("content-type").map(str::to_string),
                    tmp_name: path,
                    size: 0,
                },
            );
            self.target = PartTarget::File {
                name,
                file,
                written: 0,
            };
        } else {
            // Placeholder, overwritten once the part data has arrived.
            self.post.insert(name.clone(), Value::Null);
            self.target = PartTarget::Field {
                name,
                data: Vec::new(),
            };
        }

        self.headers.clear();
        Ok(())
    }

    fn on_part_data(&mut self, frag: &[u8]) -> Result<(), DecodeError> {
        match &mut self.target {
            PartTarget::File { file, written, .. } => {
                file.write_all(frag)?;
                *written += frag.len() as u64;
            }
            PartTarget::Field { data, .. } => data.extend_from_slice(frag),
            PartTarget::None => {
                return Err(DecodeError::MalformedHeaders(
                    "part data before headers completed",
                ));
            }
        }
        Ok(())
    }

    fn on_part_data_end(&mut self) -> Result<(), DecodeError> {
        match std::mem::replace(&mut self.target, PartTarget::None) {
            PartTarget::File {
                name,
                mut file,
                written,
            } => {
                file.flush()?;
                if let Some(entry) = self.files.get_mut(&name) {
                    entry.size = written;
                }
                trace!(field = %name, size = written, "upload file finalized");
                // dropping `file` closes the temp file
            }
            PartTarget::Field { name, data } => {
                let value = String::from_utf8(data)
                    .map_err(|_| DecodeError::InvalidFieldData(name.clone()))?;
                self.post.insert(name, Value::String(value));
            }
            PartTarget::None => {}
        }
        Ok(())
    }

    fn on_body_end(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// Parser and processor bundled for one body decode.
pub struct MultipartDecoder {
    parser: MultipartParser,
    processor: MultipartProcessor,
}

impl MultipartDecoder {
    pub fn new(boundary: &str, upload_dir: &Path) -> Self {
        Self {
            parser: MultipartParser::new(boundary),
            processor: MultipartProcessor::new(upload_dir),
        }
    }

    /// Feed one chunk of body bytes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), DecodeError> {
        self.parser.feed(chunk, &mut self.processor)
    }

    /// Finish the decode. Fails when the stream ended before the final
    /// boundary.
    pub fn finish(
        self,
    ) -> Result<(Map<String, Value>, BTreeMap<String, FileEntry>), DecodeError> {
        if !self.parser.is_done() {
            return Err(DecodeError::Unterminated);
        }
        Ok(self.processor.finish())
    }
}
