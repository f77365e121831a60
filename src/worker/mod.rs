//! Worker request loop.
//!
//! Inside a worker process: accept one request cycle, decode it, invoke
//! the execution engine, release resources, repeat. Request cycles are
//! strictly sequential within a worker; cycle N+1 never starts decoding
//! until cycle N's resources are fully released. After a configured
//! maximum number of cycles the loop exits cleanly and the supervisor's
//! respawn path replaces the process, bounding per-worker resource
//! drift.

mod source;

use std::path::PathBuf;

use tracing::{debug, info, warn};

pub use source::{Acceptor, EnvAcceptor, EnvSource, MapSource, QueueAcceptor};

use crate::engine::{EngineOutcome, RequestBindings, ScriptEngine};
use crate::error::{FpmError, Result};
use crate::request::{DecodedRequest, decode};

/// Per-worker loop options.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Request cycles served before the loop exits cleanly.
    pub max_executions: usize,
    /// Directory receiving multipart upload temp files.
    pub upload_dir: PathBuf,
    /// Emit the engine's serialized document/result as diagnostics.
    pub verbose: bool,
}

/// Counters the loop reports back on clean exit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Accepted request cycles, including failed decodes.
    pub cycles: usize,
    /// Cycles that reached the engine and completed.
    pub completed: usize,
    /// Cycles aborted by a decode failure.
    pub decode_failures: usize,
    /// Cycles whose script hit an uncaught failure.
    pub engine_failures: usize,
}

/// Script path for one cycle, from the request metadata.
fn script_path(req: &DecodedRequest) -> Option<PathBuf> {
    req.meta_str("SCRIPT_NAME").map(PathBuf::from)
}

/// Run request cycles until the acceptor drains or the execution cap is
/// reached.
///
/// A decode failure aborts only the current cycle: it is logged and the
/// loop proceeds. An engine failure is not an error at all; the
/// diagnostics the engine supplied are rendered and the loop proceeds.
pub fn run<A, E>(acceptor: &mut A, engine: &mut E, opts: &WorkerOptions) -> Result<WorkerStats>
where
    A: Acceptor,
    E: ScriptEngine,
{
    let mut stats = WorkerStats::default();

    while stats.cycles < opts.max_executions {
        let Some(mut source) = acceptor.accept()? else {
            break;
        };
        stats.cycles += 1;

        let mut request = match decode(&mut source, &opts.upload_dir) {
            Ok(request) => request,
            Err(e) => {
                stats.decode_failures += 1;
                warn!(cycle = stats.cycles, error = %e, "request decode failed");
                continue;
            }
        };

        let outcome = run_engine(engine, &request, opts);
        match outcome {
            Ok(()) => stats.completed += 1,
            Err(failed_engine) => {
                if failed_engine {
                    stats.engine_failures += 1;
                }
            }
        }

        request.release();
    }

    info!(
        cycles = stats.cycles,
        completed = stats.completed,
        decode_failures = stats.decode_failures,
        engine_failures = stats.engine_failures,
        "worker loop finished"
    );
    Ok(stats)
}

/// Invoke the engine for one decoded request and render its outcome.
///
/// Returns `Err(true)` for an uncaught script failure, `Err(false)` for
/// a cycle that never reached a completed run (no script, engine fault).
fn run_engine<E: ScriptEngine>(
    engine: &mut E,
    request: &DecodedRequest,
    opts: &WorkerOptions,
) -> std::result::Result<(), bool> {
    let Some(script) = script_path(request) else {
        warn!("request names no script; skipping engine invocation");
        return Err(false);
    };

    let bindings = RequestBindings::from_request(request);
    match engine.execute(&script, &bindings) {
        Ok(EngineOutcome::Completed { result, document }) => {
            if opts.verbose {
                if let Some(document) = &document {
                    debug!(script = %script.display(), %document, "script document");
                }
                if let Some(result) = &result {
                    debug!(script = %script.display(), %result, "script result");
                }
            }
            Ok(())
        }
        Ok(EngineOutcome::Failed {
            failure,
            result,
            document,
        }) => {
            warn!(script = %script.display(), %failure, "script terminated by uncaught failure");
            if let Some(document) = &document {
                debug!(script = %script.display(), %document, "failure document");
            }
            if opts.verbose
                && let Some(result) = &result
            {
                debug!(script = %script.display(), %result, "partial result");
            }
            Err(true)
        }
        Err(e) => {
            warn!(script = %script.display(), error = %e, "engine invocation failed");
            Err(false)
        }
    }
}

/// Map a worker-loop result onto the process exit status the supervisor
/// classifies: clean exits respawn, status 1 is fatal to the pool.
pub fn exit_status(result: &Result<WorkerStats>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(FpmError::Decode(_)) => 0,
        Err(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EchoEngine;
    use serde_json::{Value, json};
    use std::path::Path;
    use tempfile::tempdir;

    fn get_cycle(query: &str) -> MapSource {
        MapSource::new(
            &[
                ("REQUEST_METHOD", "GET"),
                ("QUERY_STRING", query),
                ("SCRIPT_NAME", "/srv/app/test.script"),
            ],
            b"",
        )
    }

    fn options(dir: &Path) -> WorkerOptions {
        WorkerOptions {
            max_executions: 1000,
            upload_dir: dir.to_path_buf(),
            verbose: false,
        }
    }

    #[test]
    fn test_loop_drains_acceptor() {
        let dir = tempdir().unwrap();
        let mut acceptor = QueueAcceptor::new(vec![get_cycle("a=1"), get_cycle("b=2")]);
        let mut engine = EchoEngine;

        let stats = run(&mut acceptor, &mut engine, &options(dir.path())).unwrap();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.decode_failures, 0);
    }

    #[test]
    fn test_loop_exits_at_execution_cap() {
        let dir = tempdir().unwrap();
        let cycles = (0..10).map(|i| get_cycle(&format!("n={}", i))).collect();
        let mut acceptor = QueueAcceptor::new(cycles);
        let mut engine = EchoEngine;

        let mut opts = options(dir.path());
        opts.max_executions = 3;
        let stats = run(&mut acceptor, &mut engine, &opts).unwrap();
        assert_eq!(stats.cycles, 3);
    }

    #[test]
    fn test_decode_failure_is_contained_to_one_cycle() {
        let dir = tempdir().unwrap();
        let bad = MapSource::new(
            &[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "application/xml"),
                ("CONTENT_LENGTH", "4"),
                ("SCRIPT_NAME", "/srv/app/test.script"),
            ],
            b"<a/>",
        );
        let mut acceptor = QueueAcceptor::new(vec![get_cycle("a=1"), bad, get_cycle("b=2")]);
        let mut engine = EchoEngine;

        let stats = run(&mut acceptor, &mut engine, &options(dir.path())).unwrap();
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.decode_failures, 1);
    }

    #[test]
    fn test_engine_failure_does_not_stop_the_loop() {
        struct FailingEngine;
        impl ScriptEngine for FailingEngine {
            fn execute(
                &mut self,
                _script: &Path,
                _bindings: &RequestBindings<'_>,
            ) -> crate::error::Result<EngineOutcome> {
                Ok(EngineOutcome::Failed {
                    failure: "ZeroDivision".into(),
                    result: None,
                    document: Some("<html>stack</html>".into()),
                })
            }
        }

        let dir = tempdir().unwrap();
        let mut acceptor = QueueAcceptor::new(vec![get_cycle("a=1"), get_cycle("b=2")]);
        let mut engine = FailingEngine;

        let stats = run(&mut acceptor, &mut engine, &options(dir.path())).unwrap();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.engine_failures, 2);
    }

    #[test]
    fn test_missing_script_skips_engine() {
        struct PanicEngine;
        impl ScriptEngine for PanicEngine {
            fn execute(
                &mut self,
                _script: &Path,
                _bindings: &RequestBindings<'_>,
            ) -> crate::error::Result<EngineOutcome> {
                panic!("engine must not be invoked without a script");
            }
        }

        let dir = tempdir().unwrap();
        let no_script = MapSource::new(&[("REQUEST_METHOD", "GET")], b"");
        let mut acceptor = QueueAcceptor::new(vec![no_script]);
        let mut engine = PanicEngine;

        let stats = run(&mut acceptor, &mut engine, &options(dir.path())).unwrap();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn test_engine_sees_merged_input() {
        struct CapturingEngine {
            seen: Option<Value>,
        }
        impl ScriptEngine for CapturingEngine {
            fn execute(
                &mut self,
                _script: &Path,
                bindings: &RequestBindings<'_>,
            ) -> crate::error::Result<EngineOutcome> {
                self.seen = Some(Value::Object(bindings.request.clone()));
                Ok(EngineOutcome::Completed {
                    result: None,
                    document: None,
                })
            }
        }

        let dir = tempdir().unwrap();
        let mut acceptor = QueueAcceptor::new(vec![get_cycle("a=1&b=2")]);
        let mut engine = CapturingEngine { seen: None };

        run(&mut acceptor, &mut engine, &options(dir.path())).unwrap();
        assert_eq!(engine.seen, Some(json!({"a": "1", "b": "2"})));
    }

    #[test]
    fn test_exit_status_mapping() {
        assert_eq!(exit_status(&Ok(WorkerStats::default())), 0);
        assert_eq!(
            exit_status(&Err(FpmError::Engine("engine gone".into()))),
            1
        );
    }
}
