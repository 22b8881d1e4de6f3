//! Privileged shell channel.
//!
//! A single long-lived `su` process receives commands on stdin. Each command
//! is followed by an end marker carrying the exit status, so output can be
//! framed without reopening the shell.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use fmcore_common::{VfsError, VfsResult};

const END_MARKER: &str = "__FMCORE_END_";

/// Captured output of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output. Standard error is discarded unless the command
    /// redirects it.
    pub stdout: String,
    /// Exit status of the last statement.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Build an output record.
    pub fn new(stdout: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code,
        }
    }

    /// Check if the command succeeded.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-empty output lines with carriage returns removed.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
    }
}

/// A channel that executes shell commands with elevated privileges.
///
/// Commands run strictly in submission order.
pub trait PrivilegedShell: Send {
    /// Run one command line and wait for its output.
    fn run(&mut self, command: &str) -> VfsResult<CommandOutput>;
}

/// Persistent `su` process.
pub struct SuShell {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    sequence: u64,
}

impl SuShell {
    /// Spawn the privileged shell binary.
    pub fn spawn(su_binary: &str) -> VfsResult<Self> {
        let mut child = Command::new(su_binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                VfsError::BackendUnavailable(format!("failed to spawn {}: {}", su_binary, e))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (stdin, stdout) = match (stdin, stdout) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                let _ = child.kill();
                return Err(VfsError::BackendUnavailable(
                    "privileged shell has no stdio".to_string(),
                ));
            }
        };

        tracing::debug!(binary = %su_binary, pid = child.id(), "Spawned privileged shell");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            sequence: 0,
        })
    }

    fn broken(e: impl std::fmt::Display) -> VfsError {
        VfsError::BackendUnavailable(format!("privileged shell closed: {}", e))
    }
}

impl PrivilegedShell for SuShell {
    fn run(&mut self, command: &str) -> VfsResult<CommandOutput> {
        self.sequence += 1;
        let marker = format!("{}{}__", END_MARKER, self.sequence);

        let script = format!("{}\necho \"{} $?\"\n", command, marker);
        self.stdin
            .write_all(script.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(Self::broken)?;

        let mut stdout = String::new();
        let mut raw = Vec::new();
        loop {
            raw.clear();
            let n = self
                .stdout
                .read_until(b'\n', &mut raw)
                .map_err(Self::broken)?;
            if n == 0 {
                return Err(Self::broken("end of output"));
            }
            let line = String::from_utf8_lossy(&raw);

            // Output without a trailing newline puts the marker mid-line.
            if let Some(idx) = line.find(&marker) {
                stdout.push_str(&line[..idx]);
                let exit_code = line[idx + marker.len()..].trim().parse().unwrap_or(-1);
                return Ok(CommandOutput { stdout, exit_code });
            }
            stdout.push_str(&line);
        }
    }
}

impl Drop for SuShell {
    fn drop(&mut self) {
        let _ = self.stdin.write_all(b"exit\n");
        let _ = self.stdin.flush();
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
