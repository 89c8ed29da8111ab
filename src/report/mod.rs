use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::core::{ScanSession, ScannerKind, Severity};

const MAX_OUTPUT_CHARS: usize = 500;

const GENERAL_RECOMMENDATIONS: [&str; 7] = [
    "Implement missing security headers identified in the curl analysis",
    "Address critical and high severity vulnerabilities immediately",
    "Conduct regular security assessments using multiple scanning tools",
    "Keep all systems and applications patched and updated",
    "Implement a Web Application Firewall (WAF) for additional protection",
    "Conduct penetration testing for critical applications",
    "Develop and maintain an incident response plan",
];

/// Produces a document for a finished scan and returns where it was written.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, session: &ScanSession) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
}

impl ReportFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!(
                "レポート形式が不正です: {other}（markdown|json を指定してください）"
            )),
        }
    }
}

/// Writes reports as files under a directory, one per scan.
#[derive(Debug, Clone)]
pub struct FileReportRenderer {
    dir: PathBuf,
    format: ReportFormat,
}

impl FileReportRenderer {
    pub fn new(dir: impl Into<PathBuf>, format: ReportFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ReportRenderer for FileReportRenderer {
    fn render(&self, session: &ScanSession) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!(
                "レポートディレクトリの作成に失敗しました: {}",
                self.dir.display()
            )
        })?;

        let path = self.dir.join(report_file_name(
            &session.id,
            OffsetDateTime::now_utc(),
            self.format,
        ));
        let body = match self.format {
            ReportFormat::Markdown => format_markdown_report(session).into_bytes(),
            ReportFormat::Json => serde_json::to_vec_pretty(session)
                .context("レポート(JSON)のシリアライズに失敗しました")?,
        };
        std::fs::write(&path, body)
            .with_context(|| format!("レポートの書き込みに失敗しました: {}", path.display()))?;
        Ok(path)
    }
}

pub fn report_file_name(scan_id: &str, at: OffsetDateTime, format: ReportFormat) -> String {
    let stamp = at
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("security_scan_{stamp}_{scan_id}.{}", format.extension())
}

pub fn severity_counts(session: &ScanSession) -> [(Severity, usize); 4] {
    Severity::KNOWN.map(|sev| {
        let n = session
            .findings
            .iter()
            .filter(|f| f.severity == sev)
            .count();
        (sev, n)
    })
}

pub fn format_markdown_report(session: &ScanSession) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Web Application Security Assessment Report");
    let _ = writeln!(out);

    let _ = writeln!(out, "## Executive Summary");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "This report presents the findings of a security assessment conducted on **{}** on **{}**. \
The assessment used multiple scanning tools to identify potential vulnerabilities and security misconfigurations.",
        session.target, session.timestamp
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "**Overall Risk Level: {}**", session.vuln_stage);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "A total of **{}** potential security issues were identified.",
        session.findings.len()
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "## Scan Information");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Field | Value |");
    let _ = writeln!(out, "|---|---|");
    let _ = writeln!(out, "| Target | {} |", table_cell(&session.target));
    let _ = writeln!(out, "| Scan Date | {} |", table_cell(&session.timestamp));
    let _ = writeln!(out, "| Scan Type | {} |", table_cell(&session.scan_type));
    let _ = writeln!(out, "| Requested By | {} |", table_cell(&session.requester));
    let _ = writeln!(out, "| Scan ID | {} |", table_cell(&session.id));

    let _ = writeln!(out);
    let _ = writeln!(out, "## Vulnerability Summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Severity | Findings |");
    let _ = writeln!(out, "|---|---|");
    for (severity, count) in severity_counts(session) {
        let _ = writeln!(out, "| {severity} | {count} |");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Detailed Findings");
    if session.findings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "_No findings._");
    }
    for (i, finding) in session.findings.iter().enumerate() {
        let _ = writeln!(out);
        let _ = writeln!(out, "### {}. {}", i + 1, finding.title);
        let _ = writeln!(out, "- **Severity:** {}", finding.severity);
        let _ = writeln!(out, "- **Description:** {}", finding.description);
        let _ = writeln!(out, "- **Impact:** {}", finding.impact);
        let _ = writeln!(out, "- **Recommendation:** {}", finding.recommendation);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Scanner Outputs");
    for (kind, result) in &session.results {
        if !result.success {
            continue;
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "### {} Results", kind.as_str().to_ascii_uppercase());
        let _ = writeln!(out);

        match (&result.security_analysis, kind) {
            (Some(security), ScannerKind::Curl) => {
                if !security.present.is_empty() {
                    let _ = writeln!(out, "Present security headers:");
                    for header in &security.present {
                        let _ = writeln!(out, "- {header}");
                    }
                }
                if !security.missing.is_empty() {
                    let _ = writeln!(out, "Missing security headers:");
                    for header in &security.missing {
                        let _ = writeln!(out, "- {header}");
                    }
                }
                let _ = writeln!(out);
                let _ = writeln!(out, "Security Score: {}/100", security.score);
            }
            _ => write_fenced_output(&mut out, &result.output),
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Recommendations");
    let _ = writeln!(out);
    for (i, rec) in GENERAL_RECOMMENDATIONS.iter().enumerate() {
        let _ = writeln!(out, "{}. {rec}", i + 1);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "---");
    let _ = writeln!(
        out,
        "_Report generated by webscan v{}._",
        env!("CARGO_PKG_VERSION")
    );
    let _ = writeln!(
        out,
        "_This report is confidential and intended for authorized personnel only._"
    );

    out
}

fn write_fenced_output(out: &mut String, output: &str) {
    let output = if output.is_empty() { "No output" } else { output };
    let body = truncate_chars(output, MAX_OUTPUT_CHARS);
    let body = body.trim_end();
    // The fence must be longer than any backtick run inside the block.
    let fence = "`".repeat(longest_backtick_run(body).max(2) + 1);
    let _ = writeln!(out, "{fence}text");
    let _ = writeln!(out, "{body}");
    let _ = writeln!(out, "{fence}");
}

fn longest_backtick_run(s: &str) -> usize {
    s.split(|c: char| c != '`').map(str::len).max().unwrap_or(0)
}

/// Keeps a value inside one Markdown table cell.
fn table_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... (truncated)", &s[..idx]),
        None => s.to_string(),
    }
}
