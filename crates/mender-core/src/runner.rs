//! Bounded subprocess execution.
//!
//! Every command runs under `sh -c` with dedicated reader threads for stdout
//! and stderr, and a waiter thread so the caller can give up after a
//! timeout. Each child leads its own process group; on timeout the whole
//! group is killed and the outcome is reported as a distinct `timed_out`
//! result rather than a plain failure.

use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Captured result of one subprocess.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub success: bool,
    pub return_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stderr: message.into(),
            ..Self::default()
        }
    }

    /// Cap stdout and stderr to the given number of characters.
    pub fn truncated(mut self, stdout_limit: usize, stderr_limit: usize) -> Self {
        self.stdout = truncate_chars(&self.stdout, stdout_limit);
        self.stderr = truncate_chars(&self.stderr, stderr_limit);
        self
    }
}

/// Runs shell commands. Swappable so the executor can be exercised without
/// touching the host.
pub trait CommandRunner {
    fn run(&self, command: &str, timeout: Duration) -> CommandOutput;
}

#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, timeout: Duration) -> CommandOutput {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        run_bounded(cmd, None, timeout)
    }
}

/// Run a program with explicit arguments (no shell), optionally feeding
/// `stdin`, under the same timeout rules as [`ShellRunner`].
pub fn run_argv(argv: &[String], stdin: Option<&str>, timeout: Duration) -> CommandOutput {
    let Some((program, args)) = argv.split_first() else {
        return CommandOutput::failed("empty command line");
    };
    let mut cmd = Command::new(program);
    cmd.args(args);
    run_bounded(cmd, stdin, timeout)
}

fn run_bounded(mut cmd: Command, stdin: Option<&str>, timeout: Duration) -> CommandOutput {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .process_group(0);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return CommandOutput::failed(format!("failed to spawn: {e}")),
    };
    let child_pid = child.id();

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_string();
        std::thread::spawn(move || {
            let _ = pipe.write_all(input.as_bytes());
        });
    }

    let stdout_thread = spawn_reader(child.stdout.take());
    let stderr_thread = spawn_reader(child.stderr.take());

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(wait(child));
    });

    let status = match rx.recv_timeout(timeout) {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return CommandOutput::failed(format!("wait failed: {e}")),
        Err(_) => {
            // Reader threads finish on their own once the pipes close.
            kill_group(child_pid);
            return CommandOutput {
                success: false,
                return_code: None,
                stdout: String::new(),
                stderr: format!("timed out after {}s", timeout.as_secs()),
                timed_out: true,
            };
        }
    };

    CommandOutput {
        success: status.success(),
        return_code: status.code(),
        stdout: stdout_thread.join().unwrap_or_default(),
        stderr: stderr_thread.join().unwrap_or_default(),
        timed_out: false,
    }
}

fn wait(mut child: Child) -> std::io::Result<std::process::ExitStatus> {
    child.wait()
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = pipe {
            let _ = r.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// SIGKILL the process group led by `pid`, taking any commands the shell
/// started down with it. Best-effort.
fn kill_group(pid: u32) {
    let _ = Command::new("kill")
        .args(["-9", "--"])
        .arg(format!("-{pid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

pub fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
