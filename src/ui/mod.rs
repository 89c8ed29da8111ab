use anyhow::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use unicode_width::UnicodeWidthChar;

use crate::core::{
    Finding, ScanSession, ScanStatus, ScannerKind, ScannerResult, SecurityHeaderAnalysis,
    Severity, VulnStage,
};

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 詳細を見るには `--verbose` を付けて再実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なコマンド/オプションは `webscan --help` を参照してください"
    );
}

pub fn print_session(session: &ScanSession, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "スキャン: id={}  対象={}  種別={}  依頼者={}",
        session.id, session.target, session.scan_type, session.requester
    );
    let _ = writeln!(
        out,
        "状態: {}  脆弱性段階: {}",
        format_status(session.status, cfg.color),
        format_stage(session.vuln_stage, cfg.color)
    );
    if let Some(err) = &session.error {
        let _ = writeln!(out, "エラー: {err}");
    }
    for err in &session.collaborator_errors {
        let _ = writeln!(out, "警告: {err}");
    }

    write_scanner_results(&mut out, &session.results, cfg);
    write_findings(&mut out, &session.findings, cfg);

    if let Some(path) = &session.report_path {
        let _ = writeln!(out);
        let _ = writeln!(out, "レポート: {path}");
    }
}

/// Output of `analyze`: no session, just what the rules made of the inputs.
pub fn print_analysis(
    results: &std::collections::BTreeMap<ScannerKind, ScannerResult>,
    findings: &[Finding],
    stage: VulnStage,
    cfg: &UiConfig,
) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "解析対象: {}",
        results
            .keys()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let _ = writeln!(out, "脆弱性段階: {}", format_stage(stage, cfg.color));
    write_findings(&mut out, findings, cfg);
}

pub fn print_header_analysis(analysis: &SecurityHeaderAnalysis, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let _ = writeln!(out, "セキュリティヘッダ スコア: {}/100", analysis.score);
    let _ = writeln!(out);
    let _ = writeln!(out, "存在するヘッダ（{}件）:", analysis.present.len());
    for h in &analysis.present {
        let _ = writeln!(out, "- {}", paint(h, "32", cfg.color));
    }
    let _ = writeln!(out, "不足しているヘッダ（{}件）:", analysis.missing.len());
    for m in &analysis.missing {
        let _ = writeln!(out, "- {}", paint(m, "33", cfg.color));
    }
}

pub fn print_tools(tools: &[(ScannerKind, Option<PathBuf>)], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let name_w = tools
        .iter()
        .map(|(k, _)| visible_width_ansi(k.as_str()))
        .max()
        .unwrap_or(0);
    for (kind, path) in tools {
        let name = pad_end_display(kind.as_str(), name_w);
        match path {
            Some(p) => {
                let _ = writeln!(
                    out,
                    "{name}  {}  {}",
                    paint("OK", "32", cfg.color),
                    p.display()
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "{name}  {}  PATH上に見つかりません（{}）",
                    paint("--", "31", cfg.color),
                    kind.role()
                );
            }
        }
    }
}

fn write_scanner_results(
    out: &mut dyn Write,
    results: &std::collections::BTreeMap<ScannerKind, ScannerResult>,
    cfg: &UiConfig,
) {
    if results.is_empty() {
        return;
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "スキャナ:");
    for (kind, result) in results {
        if result.success {
            let detail = match &result.security_analysis {
                Some(a) => format!("ヘッダスコア {}/100", a.score),
                None => format!("{} 行", result.output.lines().count()),
            };
            let _ = writeln!(
                out,
                "- {} [{}] {detail}",
                kind,
                paint("成功", "32", cfg.color)
            );
        } else {
            let _ = writeln!(
                out,
                "- {} [{}] {}",
                kind,
                paint("失敗", "31", cfg.color),
                result.error.as_deref().unwrap_or("")
            );
        }
    }
}

fn write_findings(out: &mut dyn Write, findings: &[Finding], cfg: &UiConfig) {
    let _ = writeln!(out);
    if findings.is_empty() {
        let _ = writeln!(out, "所見はありません。");
        return;
    }

    let total = findings.len();
    let rows = cfg.max_table_rows.max(1).min(total);
    if total > rows {
        let _ = writeln!(out, "所見（{rows}件表示 / 全{total}件）:");
    } else {
        let _ = writeln!(out, "所見（{rows}件）:");
    }
    print_findings_table(out, findings, rows, cfg.color);

    if cfg.verbose {
        for f in findings.iter().take(rows) {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", f.title);
            let _ = writeln!(out, "  説明: {}", f.description);
            let _ = writeln!(out, "  影響: {}", f.impact);
            let _ = writeln!(out, "  対策: {}", f.recommendation);
        }
    }
}

fn print_findings_table(out: &mut dyn Write, findings: &[Finding], rows: usize, color: bool) {
    let label_sev = "深刻度";
    let label_title = "タイトル";

    let sev_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(f.severity.as_str()))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_sev));
    let title_w = visible_width_ansi(label_title).max(5);

    let _ = writeln!(out, "{}  {}", pad_end_display(label_sev, sev_w), label_title);
    let _ = writeln!(out, "{}  {}", "-".repeat(sev_w), "-".repeat(title_w));

    for finding in findings.iter().take(rows) {
        let sev = pad_end_ansi(&format_severity(finding.severity, color), sev_w);
        let _ = writeln!(out, "{sev}  {}", finding.title);
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "31",
        Severity::High => "91",
        Severity::Medium => "33",
        Severity::Low => "32",
        Severity::Unrecognized => "90",
    }
}

pub fn format_severity(severity: Severity, color: bool) -> String {
    paint(severity.as_str(), severity_color(severity), color)
}

pub fn format_stage(stage: VulnStage, color: bool) -> String {
    let code = match stage {
        VulnStage::Critical => "31",
        VulnStage::High => "91",
        VulnStage::Medium => "33",
        VulnStage::Low => "32",
        VulnStage::Default => "90",
    };
    paint(stage.as_str(), code, color)
}

fn format_status(status: ScanStatus, color: bool) -> String {
    let code = match status {
        ScanStatus::Completed => "32",
        ScanStatus::Failed => "31",
        ScanStatus::Running | ScanStatus::Pending => "33",
    };
    paint(status.as_str(), code, color)
}

fn paint(s: &str, code: &str, color: bool) -> String {
    if !color {
        return s.to_string();
    }
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    pad_end_ansi(s, width)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
