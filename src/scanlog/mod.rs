use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{ScanSession, VulnStage};

/// One line of the scan ledger, written once per finished scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLogRecord {
    pub timestamp: String,
    pub requester: String,
    pub scan_type: String,
    pub target: String,
    pub vuln_stage: VulnStage,
}

impl ScanLogRecord {
    pub fn from_session(session: &ScanSession) -> Self {
        Self {
            timestamp: session.timestamp.clone(),
            requester: session.requester.clone(),
            scan_type: session.scan_type.clone(),
            target: session.target.clone(),
            vuln_stage: session.vuln_stage,
        }
    }

    /// Comma-separated, with fields quoted when they carry `,`, `"` or a
    /// line break.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            csv_field(&self.timestamp),
            csv_field(&self.requester),
            csv_field(&self.scan_type),
            csv_field(&self.target),
            self.vuln_stage
        )
    }
}

fn csv_field(s: &str) -> Cow<'_, str> {
    if s.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", s.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(s)
    }
}

pub trait ScanLogSink: Send + Sync {
    fn record(&self, record: &ScanLogRecord) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Local,
    Remote,
}

impl std::str::FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(SinkKind::Local),
            "remote" => Ok(SinkKind::Remote),
            other => Err(format!(
                "スキャンログの出力先が不正です: {other}（local|remote を指定してください）"
            )),
        }
    }
}

/// Appends records as comma-separated lines to a file.
#[derive(Debug, Clone)]
pub struct LocalFileSink {
    path: PathBuf,
}

impl LocalFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScanLogSink for LocalFileSink {
    fn record(&self, record: &ScanLogRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "スキャンログのディレクトリ作成に失敗しました: {}",
                        parent.display()
                    )
                })?;
            }
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| {
                format!(
                    "スキャンログを開けませんでした: {}",
                    self.path.display()
                )
            })?;
        writeln!(file, "{}", record.to_line()).with_context(|| {
            format!(
                "スキャンログの書き込みに失敗しました: {}",
                self.path.display()
            )
        })?;
        Ok(())
    }
}

/// Posts records as JSON to an HTTP endpoint, falling back to a local file
/// when the endpoint cannot be reached or rejects the record.
#[derive(Debug, Clone)]
pub struct RemoteSink {
    url: String,
    client: Client,
    fallback: LocalFileSink,
}

impl RemoteSink {
    pub fn new(url: impl Into<String>, timeout: Duration, fallback: LocalFileSink) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("webscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("HTTPクライアントの初期化に失敗しました")?;
        Ok(Self {
            url: url.into(),
            client,
            fallback,
        })
    }

    fn post(&self, record: &ScanLogRecord) -> Result<()> {
        let response = self
            .client
            .post(self.url.as_str())
            .json(record)
            .send()
            .with_context(|| format!("送信に失敗しました: {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "リモートが拒否しました（{}）: {}",
                status.as_u16(),
                self.url
            ));
        }
        Ok(())
    }
}

impl ScanLogSink for RemoteSink {
    fn record(&self, record: &ScanLogRecord) -> Result<()> {
        match self.post(record) {
            Ok(()) => {
                info!(url = %self.url, "スキャンログをリモートへ記録しました");
                Ok(())
            }
            Err(err) => {
                warn!(
                    error = %format!("{err:#}"),
                    fallback = %self.fallback.path().display(),
                    "リモートへの記録に失敗したためローカルへ記録します"
                );
                self.fallback.record(record)
            }
        }
    }
}
