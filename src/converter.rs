//! Conversion tool invocation
//!
//! The tool is an opaque executable run as
//! `<program> <args...> <inputs...> -o -` from the sandbox `files` directory.
//! Its output bytes are passed through untouched.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Result of a tool run that got as far as exiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Exit status zero; the captured stdout
    Converted(Vec<u8>),
    /// Non-zero exit (or killed by a signal); the captured stderr
    Failed { code: Option<i32>, stderr: Vec<u8> },
}

/// Runs the external conversion tool
#[derive(Debug, Clone)]
pub struct Converter {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl Converter {
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.program.clone(), config.conversion_timeout)
    }

    /// Full argument list: `args`, then the input names, then `-o -`.
    pub fn command_args(args: &[String], inputs: &[&str]) -> Vec<String> {
        args.iter()
            .cloned()
            .chain(inputs.iter().map(|s| s.to_string()))
            .chain(["-o".to_string(), "-".to_string()])
            .collect()
    }

    /// Run the tool in `working_dir` and wait for it to exit.
    ///
    /// stdout and stderr are drained concurrently while the process runs, so
    /// large outputs cannot fill a pipe and stall it. The child is killed if
    /// this future is dropped or the timeout expires.
    pub async fn run(
        &self,
        working_dir: &Path,
        args: &[String],
        inputs: &[&str],
    ) -> Result<ConversionOutcome> {
        let mut cmd = Command::new(&self.program);
        cmd.args(Self::command_args(args, inputs))
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %self.program.display(), ?args, ?inputs, "Running conversion");

        let child = cmd.spawn().map_err(|source| Error::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| Error::ConversionTimeout { timeout })??,
            None => child.wait_with_output().await?,
        };

        if output.status.success() {
            tracing::info!(bytes = output.stdout.len(), "Conversion succeeded");
            Ok(ConversionOutcome::Converted(output.stdout))
        } else {
            tracing::warn!(status = %output.status, "Error running conversion tool");
            Ok(ConversionOutcome::Failed {
                code: output.status.code(),
                stderr: output.stderr,
            })
        }
    }
}
