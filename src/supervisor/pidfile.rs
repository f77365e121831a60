//! Pid file handling.
//!
//! The supervisor records every spawned worker pid, one per line. The
//! file is created exclusively; a leftover regular file from a previous
//! run is truncated and reused, anything else is startup-fatal.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use tracing::debug;

use crate::error::{FpmError, Result};

#[derive(Debug)]
pub struct PidFile {
    file: File,
    path: PathBuf,
}

impl PidFile {
    /// Open the pid file for this run.
    pub fn create(path: &Path) -> Result<Self> {
        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let meta = std::fs::metadata(path).map_err(|e| {
                    FpmError::PidFile(format!("stating '{}' failed: {}", path.display(), e))
                })?;
                if !meta.is_file() {
                    return Err(FpmError::PidFile(format!(
                        "'{}' exists and isn't a regular file",
                        path.display()
                    )));
                }
                OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .mode(0o644)
                    .open(path)
                    .map_err(|e| {
                        FpmError::PidFile(format!("opening '{}' failed: {}", path.display(), e))
                    })?
            }
            Err(e) => {
                return Err(FpmError::PidFile(format!(
                    "opening '{}' failed: {}",
                    path.display(),
                    e
                )));
            }
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Append one worker pid.
    pub fn append(&mut self, pid: Pid) -> Result<()> {
        writeln!(self.file, "{}", pid)
            .map_err(|e| FpmError::PidFile(format!("writing pid file failed: {}", e)))?;
        debug!(path = %self.path.display(), %pid, "recorded worker pid");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
