//! Narrow seam around external programs.
//!
//! The orchestrator never spawns processes directly; it goes through
//! [`ExternalTool`], so control flow can be exercised in tests with a fake.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::Stdio;
use std::thread;

use tracing::debug;

use crate::error::ToolError;
use crate::runtime;

const STDERR_TAIL_LINES: usize = 8;

pub trait ExternalTool: Send + Sync {
    /// Run `program` to completion. A non-zero exit is an error.
    fn run(&self, program: &str, args: &[String]) -> Result<(), ToolError>;

    /// Run `program` and return its stdout.
    fn capture(&self, program: &str, args: &[String]) -> Result<String, ToolError>;

    fn is_available(&self, program: &str) -> bool;
}

/// Spawns real processes. Stderr is streamed into `tracing` under
/// `target: "tool_stderr"` and the last few lines are kept for the error.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn spawn(
        &self,
        program: &str,
        args: &[String],
        capture_stdout: bool,
    ) -> Result<(String, String), ToolError> {
        if !self.is_available(program) {
            return Err(ToolError::NotFound {
                program: program.to_string(),
            });
        }

        debug!(cmd = %format!("{program} {}", args.join(" ")), "launching external tool");

        let mut child = runtime::command_for(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(if capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stderr_thread = child.stderr.take().map(|stderr| {
            let program = program.to_string();
            thread::spawn(move || drain_stderr(&program, stderr))
        });

        let mut stdout = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            if let Err(e) = pipe.read_to_string(&mut stdout) {
                debug!(program, error = %e, "failed to read tool stdout");
            }
        }

        let status = child.wait().map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stderr_tail = stderr_thread
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(ToolError::Failed {
                program: program.to_string(),
                status: status.to_string(),
                stderr_tail,
            });
        }

        Ok((stdout, stderr_tail))
    }
}

fn drain_stderr(program: &str, stderr: impl Read) -> String {
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    for line in BufReader::new(stderr).lines() {
        match line {
            Ok(line) if !line.trim().is_empty() => {
                debug!(target: "tool_stderr", program, "{}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(_) => {}
            Err(e) => {
                debug!(target: "tool_stderr", program, "read error: {}", e);
                break;
            }
        }
    }
    Vec::from(tail).join(" | ")
}

impl ExternalTool for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<(), ToolError> {
        self.spawn(program, args, false).map(|_| ())
    }

    fn capture(&self, program: &str, args: &[String]) -> Result<String, ToolError> {
        self.spawn(program, args, true).map(|(stdout, _)| stdout)
    }

    fn is_available(&self, program: &str) -> bool {
        runtime::resolve_binary(program).is_some()
    }
}
