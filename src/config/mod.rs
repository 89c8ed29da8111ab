use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::report::ReportFormat;
use crate::scanlog::SinkKind;
use crate::scanners::ScannerTimeouts;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub scanners: ScannersConfig,
    pub report: ReportConfig,
    pub scanlog: ScanLogConfig,
    pub engine: EngineConfig,
    pub log: LogConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannersConfig {
    pub nmap_timeout_secs: u64,
    pub nikto_timeout_secs: u64,
    pub whatweb_timeout_secs: u64,
    pub curl_timeout_secs: u64,
}

impl ScannersConfig {
    pub fn timeouts(&self) -> ScannerTimeouts {
        ScannerTimeouts {
            nmap: Duration::from_secs(self.nmap_timeout_secs),
            nikto: Duration::from_secs(self.nikto_timeout_secs),
            whatweb: Duration::from_secs(self.whatweb_timeout_secs),
            curl: Duration::from_secs(self.curl_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    pub dir: String,
    pub format: ReportFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanLogConfig {
    pub sink: SinkKind,
    pub local_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub remote_timeout_secs: u64,
    pub requester: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub isolate_collaborator_failures: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl EffectiveConfig {
    pub fn defaults_for(home_dir: &Path) -> Self {
        let data_dir = default_data_dir(home_dir);
        let timeouts = ScannerTimeouts::default();
        Self {
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
            scanners: ScannersConfig {
                nmap_timeout_secs: timeouts.nmap.as_secs(),
                nikto_timeout_secs: timeouts.nikto.as_secs(),
                whatweb_timeout_secs: timeouts.whatweb.as_secs(),
                curl_timeout_secs: timeouts.curl.as_secs(),
            },
            report: ReportConfig {
                dir: data_dir.join("reports").display().to_string(),
                format: ReportFormat::Markdown,
            },
            scanlog: ScanLogConfig {
                sink: SinkKind::Local,
                local_path: data_dir.join("scan_logs.txt").display().to_string(),
                remote_url: None,
                remote_timeout_secs: 10,
                requester: default_requester(),
            },
            engine: EngineConfig {
                isolate_collaborator_failures: false,
                registry_ttl_secs: None,
            },
            log: LogConfig {
                level: "warn".to_string(),
                format: LogFormat::Compact,
            },
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    scanners: Option<RawScannersConfig>,
    report: Option<RawReportConfig>,
    scanlog: Option<RawScanLogConfig>,
    engine: Option<RawEngineConfig>,
    log: Option<RawLogConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawScannersConfig {
    nmap_timeout_secs: Option<u64>,
    nikto_timeout_secs: Option<u64>,
    whatweb_timeout_secs: Option<u64>,
    curl_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawReportConfig {
    dir: Option<String>,
    format: Option<ReportFormat>,
}

#[derive(Debug, Deserialize)]
struct RawScanLogConfig {
    sink: Option<SinkKind>,
    local_path: Option<String>,
    remote_url: Option<String>,
    remote_timeout_secs: Option<u64>,
    requester: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEngineConfig {
    isolate_collaborator_failures: Option<bool>,
    registry_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawLogConfig {
    level: Option<String>,
    format: Option<LogFormat>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/webscan/config.toml")
}

pub fn default_data_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".local/share/webscan")
}

fn default_requester() -> String {
    std::env::var("USER")
        .ok()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::defaults_for(home_dir);

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        apply_toml(&mut cfg, &s)?;
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;
    validate(&cfg)?;

    Ok(cfg)
}

fn apply_toml(cfg: &mut EffectiveConfig, s: &str) -> Result<()> {
    let raw: RawConfig = toml::from_str(s).context("設定ファイル(TOML)の解析に失敗しました")?;
    apply_raw_config(cfg, raw);
    Ok(())
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(scanners) = raw.scanners {
        if let Some(v) = scanners.nmap_timeout_secs {
            cfg.scanners.nmap_timeout_secs = v;
        }
        if let Some(v) = scanners.nikto_timeout_secs {
            cfg.scanners.nikto_timeout_secs = v;
        }
        if let Some(v) = scanners.whatweb_timeout_secs {
            cfg.scanners.whatweb_timeout_secs = v;
        }
        if let Some(v) = scanners.curl_timeout_secs {
            cfg.scanners.curl_timeout_secs = v;
        }
    }

    if let Some(report) = raw.report {
        if let Some(dir) = report.dir {
            cfg.report.dir = dir;
        }
        if let Some(format) = report.format {
            cfg.report.format = format;
        }
    }

    if let Some(scanlog) = raw.scanlog {
        if let Some(sink) = scanlog.sink {
            cfg.scanlog.sink = sink;
        }
        if let Some(local_path) = scanlog.local_path {
            cfg.scanlog.local_path = local_path;
        }
        if let Some(remote_url) = scanlog.remote_url {
            cfg.scanlog.remote_url = Some(remote_url);
        }
        if let Some(v) = scanlog.remote_timeout_secs {
            cfg.scanlog.remote_timeout_secs = v;
        }
        if let Some(requester) = scanlog.requester {
            cfg.scanlog.requester = requester;
        }
    }

    if let Some(engine) = raw.engine {
        if let Some(v) = engine.isolate_collaborator_failures {
            cfg.engine.isolate_collaborator_failures = v;
        }
        if let Some(v) = engine.registry_ttl_secs {
            cfg.engine.registry_ttl_secs = Some(v);
        }
    }

    if let Some(log) = raw.log {
        if let Some(level) = log.level {
            cfg.log.level = level;
        }
        if let Some(format) = log.format {
            cfg.log.format = format;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("WEBSCAN_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "WEBSCAN_UI_COLOR")?;
    }
    for (name, slot) in [
        (
            "WEBSCAN_SCANNERS_NMAP_TIMEOUT_SECS",
            &mut cfg.scanners.nmap_timeout_secs,
        ),
        (
            "WEBSCAN_SCANNERS_NIKTO_TIMEOUT_SECS",
            &mut cfg.scanners.nikto_timeout_secs,
        ),
        (
            "WEBSCAN_SCANNERS_WHATWEB_TIMEOUT_SECS",
            &mut cfg.scanners.whatweb_timeout_secs,
        ),
        (
            "WEBSCAN_SCANNERS_CURL_TIMEOUT_SECS",
            &mut cfg.scanners.curl_timeout_secs,
        ),
    ] {
        if let Ok(v) = std::env::var(name) {
            *slot = v.trim().parse::<u64>().with_context(|| name)?;
        }
    }
    if let Ok(v) = std::env::var("WEBSCAN_REPORT_DIR") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.report.dir = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("WEBSCAN_REPORT_FORMAT") {
        cfg.report.format = v
            .parse::<ReportFormat>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "WEBSCAN_REPORT_FORMAT")?;
    }
    if let Ok(v) = std::env::var("WEBSCAN_SCANLOG_SINK") {
        cfg.scanlog.sink = v
            .parse::<SinkKind>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "WEBSCAN_SCANLOG_SINK")?;
    }
    if let Ok(v) = std::env::var("WEBSCAN_SCANLOG_LOCAL_PATH") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.scanlog.local_path = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("WEBSCAN_SCANLOG_REMOTE_URL") {
        let v = v.trim();
        cfg.scanlog.remote_url = if v.is_empty() {
            None
        } else {
            Some(v.to_string())
        };
    }
    if let Ok(v) = std::env::var("WEBSCAN_SCANLOG_REQUESTER") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.scanlog.requester = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("WEBSCAN_ENGINE_ISOLATE_COLLABORATOR_FAILURES") {
        cfg.engine.isolate_collaborator_failures = parse_bool(&v)
            .with_context(|| "WEBSCAN_ENGINE_ISOLATE_COLLABORATOR_FAILURES")?;
    }
    if let Ok(v) = std::env::var("WEBSCAN_ENGINE_REGISTRY_TTL_SECS") {
        let v = v.trim();
        cfg.engine.registry_ttl_secs = if v.is_empty() {
            None
        } else {
            Some(
                v.parse::<u64>()
                    .with_context(|| "WEBSCAN_ENGINE_REGISTRY_TTL_SECS")?,
            )
        };
    }
    if let Ok(v) = std::env::var("WEBSCAN_LOG_LEVEL") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.log.level = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("WEBSCAN_LOG_FORMAT") {
        cfg.log.format = v
            .parse::<LogFormat>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "WEBSCAN_LOG_FORMAT")?;
    }

    Ok(())
}

fn validate(cfg: &EffectiveConfig) -> Result<()> {
    if cfg.scanlog.sink == SinkKind::Remote && cfg.scanlog.remote_url.is_none() {
        return Err(anyhow::anyhow!(
            "scanlog.sink = \"remote\" には scanlog.remote_url の指定が必要です"
        ));
    }
    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}
