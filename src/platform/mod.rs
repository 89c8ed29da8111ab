use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use wait_timeout::ChildExt;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum CommandError {
    Spawn(std::io::Error),
    TimedOut(Duration),
    Wait(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Spawn(err) => write!(f, "プロセス起動に失敗しました: {err}"),
            CommandError::TimedOut(timeout) => write!(f, "タイムアウトしました（{timeout:?}）"),
            CommandError::Wait(err) => write!(f, "プロセス待機に失敗しました: {err}"),
        }
    }
}

impl std::error::Error for CommandError {}

/// Runs `cmd` to completion or until `timeout` elapses, killing it in the
/// latter case. Output pipes are drained on helper threads so a chatty child
/// cannot block on a full pipe while we wait.
///
/// The deadline also covers draining: a background process that inherited
/// the pipes and keeps them open past `timeout` makes the run time out even
/// when the direct child already exited.
pub fn run_command_raw(
    cmd: &str,
    args: &[&str],
    timeout: Duration,
) -> std::result::Result<CommandOutput, CommandError> {
    let deadline = Instant::now() + timeout;
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(CommandError::Spawn)?;

    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let status = match child.wait_timeout(timeout).map_err(CommandError::Wait)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CommandError::TimedOut(timeout));
        }
    };

    let stdout = drain_until(stdout_reader, deadline).ok_or(CommandError::TimedOut(timeout))?;
    let stderr = drain_until(stderr_reader, deadline).ok_or(CommandError::TimedOut(timeout))?;

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

// The reader thread ends on its own once the last writer closes the pipe;
// dropping the receiver just discards whatever it eventually reads.
fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// `None` when the pipe is still open at `deadline`.
fn drain_until(reader: Option<mpsc::Receiver<String>>, deadline: Instant) -> Option<String> {
    let Some(rx) = reader else {
        return Some(String::new());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(out) => Some(out),
        Err(mpsc::RecvTimeoutError::Timeout) => None,
        Err(mpsc::RecvTimeoutError::Disconnected) => Some(String::new()),
    }
}

pub fn effective_home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("環境変数 HOME が設定されていません"))
}

/// Resolves `cmd` against `PATH` the way a shell would.
pub fn find_in_path(cmd: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
