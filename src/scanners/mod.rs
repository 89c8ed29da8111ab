use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::{ScannerKind, ScannerResult};
use crate::headers;
use crate::platform::{self, CommandError, CommandOutput};

/// Runs one scanner against a target. Implementations never fail: every
/// problem (missing binary, timeout, non-zero exit) is reported through
/// `ScannerResult::success` and `ScannerResult::error`.
pub trait ScannerInvoker: Send + Sync {
    fn invoke(&self, kind: ScannerKind, target: &str) -> ScannerResult;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: &'static str,
    pub args: Vec<String>,
}

/// The single place that decides how each scanner is launched.
pub fn command_spec(kind: ScannerKind, target: &str) -> CommandSpec {
    match kind {
        ScannerKind::Nmap => CommandSpec {
            program: "nmap",
            args: vec![
                "-sV".to_string(),
                "--script".to_string(),
                "vuln".to_string(),
                target.to_string(),
            ],
        },
        ScannerKind::Nikto => CommandSpec {
            program: "nikto",
            args: vec![
                "-h".to_string(),
                with_http_scheme(target),
                "-Format".to_string(),
                "txt".to_string(),
            ],
        },
        ScannerKind::Whatweb => CommandSpec {
            program: "whatweb",
            args: vec![
                target.to_string(),
                "--log-verbose".to_string(),
                "-".to_string(),
            ],
        },
        ScannerKind::Curl => CommandSpec {
            program: "curl",
            args: vec!["-I".to_string(), "-L".to_string(), target.to_string()],
        },
    }
}

fn with_http_scheme(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{target}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerTimeouts {
    pub nmap: Duration,
    pub nikto: Duration,
    pub whatweb: Duration,
    pub curl: Duration,
}

impl Default for ScannerTimeouts {
    fn default() -> Self {
        Self {
            nmap: ScannerKind::Nmap.default_timeout(),
            nikto: ScannerKind::Nikto.default_timeout(),
            whatweb: ScannerKind::Whatweb.default_timeout(),
            curl: ScannerKind::Curl.default_timeout(),
        }
    }
}

impl ScannerTimeouts {
    pub fn get(&self, kind: ScannerKind) -> Duration {
        match kind {
            ScannerKind::Nmap => self.nmap,
            ScannerKind::Nikto => self.nikto,
            ScannerKind::Whatweb => self.whatweb,
            ScannerKind::Curl => self.curl,
        }
    }
}

/// Launches the real tools as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    timeouts: ScannerTimeouts,
}

impl ProcessInvoker {
    pub fn new(timeouts: ScannerTimeouts) -> Self {
        Self { timeouts }
    }
}

impl ScannerInvoker for ProcessInvoker {
    fn invoke(&self, kind: ScannerKind, target: &str) -> ScannerResult {
        let spec = command_spec(kind, target);
        let timeout = self.timeouts.get(kind);
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();

        info!(scanner = %kind, target, ?timeout, "スキャナを起動します");
        let started = Instant::now();
        let outcome = platform::run_command_raw(spec.program, &args, timeout);
        debug!(scanner = %kind, elapsed = ?started.elapsed(), "スキャナが終了しました");

        match outcome {
            Ok(output) => result_from_output(kind, output),
            Err(err) => {
                warn!(scanner = %kind, error = %err, "スキャナの実行に失敗しました");
                ScannerResult::failed(describe_failure(kind, spec.program, &err))
            }
        }
    }
}

fn result_from_output(kind: ScannerKind, output: CommandOutput) -> ScannerResult {
    let success = output.exit_code == 0;
    let stderr = output.stderr.trim();
    let error = if success {
        None
    } else if stderr.is_empty() {
        Some(format!("{kind} exited with status {}", output.exit_code))
    } else {
        Some(stderr.to_string())
    };

    let mut result = ScannerResult {
        success,
        output: output.stdout,
        error,
        security_analysis: None,
    };
    if kind == ScannerKind::Curl {
        let analysis = headers::analyze_security_headers(&result.output);
        result = result.with_security_analysis(analysis);
    }
    result
}

fn describe_failure(kind: ScannerKind, program: &str, err: &CommandError) -> String {
    match err {
        CommandError::TimedOut(timeout) => {
            format!("{} scan timed out after {}s", capitalized(kind), timeout.as_secs())
        }
        CommandError::Spawn(io) => format!("failed to start {program}: {io}"),
        CommandError::Wait(io) => format!("failed while waiting for {program}: {io}"),
    }
}

fn capitalized(kind: ScannerKind) -> String {
    let name = kind.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
