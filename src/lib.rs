//! fpmd - FastCGI-style process manager for script execution engines.
//!
//! fpmd sits between a front-end web server and a script-execution
//! engine: it binds a listening endpoint, drops privileges, forks a pool
//! of worker processes, and inside each worker decodes request cycles
//! (CGI-style metadata plus an optional body, including streaming
//! multipart uploads) into the named bindings a [`engine::ScriptEngine`]
//! consumes.
//!
//! Scheduling is multi-process: workers share nothing but the inherited
//! listening descriptor, and each worker handles request cycles strictly
//! sequentially.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod net;
pub mod privs;
pub mod request;
pub mod supervisor;
pub mod worker;

pub use error::{FpmError, Result};
