//! Script-execution engine seam.
//!
//! The engine is an external collaborator: it receives a script
//! reference and the decoded named bindings, runs the script to
//! completion or to an uncaught-failure state, and reports a result
//! value and/or a rendered document. The worker renders or forwards the
//! outcome before releasing request state; an engine failure is not a
//! core error.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value, json};

use crate::error::Result;
use crate::request::{DecodedRequest, FileEntry};

/// The named bindings one request cycle exposes to the engine.
///
/// The merged `request` map is the primary input; the unmerged maps are
/// optional bindings an engine may ignore.
#[derive(Debug)]
pub struct RequestBindings<'a> {
    pub metadata: &'a Map<String, Value>,
    pub query: &'a Map<String, Value>,
    pub body: &'a Value,
    pub cookie: &'a Map<String, Value>,
    pub files: &'a BTreeMap<String, FileEntry>,
    pub request: &'a Map<String, Value>,
}

impl<'a> RequestBindings<'a> {
    pub fn from_request(req: &'a DecodedRequest) -> Self {
        Self {
            metadata: &req.metadata,
            query: &req.query,
            body: &req.body,
            cookie: &req.cookie,
            files: &req.files,
            request: &req.merged,
        }
    }
}

/// What a script run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    /// The script ran to completion.
    Completed {
        result: Option<Value>,
        document: Option<String>,
    },
    /// The script hit an uncaught failure; the engine supplies a failure
    /// identifier and whatever partial output it rendered.
    Failed {
        failure: String,
        result: Option<Value>,
        document: Option<String>,
    },
}

/// A script-execution engine.
pub trait ScriptEngine {
    /// Run the script at `script` with the given bindings.
    ///
    /// Implementations return `Ok(EngineOutcome::Failed { .. })` for
    /// script-level failures; `Err` is reserved for engine-level faults
    /// (e.g. the script cannot be loaded at all).
    fn execute(&mut self, script: &Path, bindings: &RequestBindings<'_>) -> Result<EngineOutcome>;
}

/// Diagnostic engine that renders the decoded bindings back as a JSON
/// document. Default engine of the shipped binary and the test suites'
/// workhorse: it makes the decode pipeline observable end to end without
/// a real script runtime.
#[derive(Debug, Default)]
pub struct EchoEngine;

impl ScriptEngine for EchoEngine {
    fn execute(&mut self, script: &Path, bindings: &RequestBindings<'_>) -> Result<EngineOutcome> {
        let document = json!({
            "script": script.display().to_string(),
            "metadata": bindings.metadata,
            "query": bindings.query,
            "body": bindings.body,
            "cookie": bindings.cookie,
            "files": bindings.files,
            "request": bindings.request,
        });

        Ok(EngineOutcome::Completed {
            result: Some(Value::Object(bindings.request.clone())),
            document: Some(document.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_echo_engine_reflects_bindings() {
        let mut req = DecodedRequest::default();
        req.merged.insert("a".into(), json!("1"));
        req.query.insert("a".into(), json!("1"));
        req.body = json!({});

        let mut engine = EchoEngine;
        let bindings = RequestBindings::from_request(&req);
        let outcome = engine
            .execute(Path::new("/srv/app/index.script"), &bindings)
            .unwrap();

        match outcome {
            EngineOutcome::Completed { result, document } => {
                assert_eq!(result, Some(json!({"a": "1"})));
                let doc: Value = serde_json::from_str(&document.unwrap()).unwrap();
                assert_eq!(doc["script"], json!("/srv/app/index.script"));
                assert_eq!(doc["request"]["a"], json!("1"));
            }
            EngineOutcome::Failed { .. } => panic!("echo engine never fails"),
        }
    }
}
