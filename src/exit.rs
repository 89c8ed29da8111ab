//! Exit-code classes for the `webscan` binary.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    InvalidArgs,
    /// A scan (or any other operation) ended in the failed state.
    ScanFailed,
    /// A tool invoked directly by a command (not by a scan) failed.
    ExternalCommandFailed,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::InvalidArgs => 2,
            ExitCode::ScanFailed => 10,
            ExitCode::ExternalCommandFailed => 20,
        }
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.err.as_ref())
    }
}

/// Errors without an explicit class count as a failed scan.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(exit) = err.downcast_ref::<ExitError>() {
        return exit.code.as_i32();
    }
    ExitCode::ScanFailed.as_i32()
}

pub fn invalid_args(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, anyhow::anyhow!(message.into())).into()
}

pub fn invalid_args_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, err).into()
}

pub fn scan_failed(scan_id: &str, reason: Option<&str>) -> anyhow::Error {
    let message = match reason {
        Some(reason) => format!("スキャンが失敗しました（{scan_id}）: {reason}"),
        None => format!("スキャンが失敗しました（{scan_id}）"),
    };
    ExitError::new(ExitCode::ScanFailed, anyhow::anyhow!(message)).into()
}

pub fn external_cmd(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(
        ExitCode::ExternalCommandFailed,
        anyhow::anyhow!(message.into()),
    )
    .into()
}
