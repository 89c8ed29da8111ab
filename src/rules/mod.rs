use std::collections::BTreeMap;

use crate::core::{Finding, ScannerKind, ScannerResult, Severity};
use crate::headers;

pub type ScanResults = BTreeMap<ScannerKind, ScannerResult>;

/// Turns raw scanner results into findings, at most one per scanner.
///
/// Scanners that are absent or did not succeed are skipped without comment.
/// The output order is fixed: nmap, nikto, curl.
pub fn extract_findings(results: &ScanResults) -> Vec<Finding> {
    let mut out = Vec::new();
    out.extend(successful(results, ScannerKind::Nmap).and_then(nmap_finding));
    out.extend(successful(results, ScannerKind::Nikto).and_then(nikto_finding));
    out.extend(successful(results, ScannerKind::Curl).and_then(curl_finding));
    out
}

fn successful(results: &ScanResults, kind: ScannerKind) -> Option<&ScannerResult> {
    results.get(&kind).filter(|r| r.success)
}

fn nmap_finding(result: &ScannerResult) -> Option<Finding> {
    let output = &result.output;
    if !(output.contains("VULNERABLE") || output.contains("CVE-")) {
        return None;
    }

    Some(Finding {
        title: "Potential Vulnerabilities Detected by Nmap".to_string(),
        severity: Severity::High,
        description: "Nmap vulnerability scripts detected potential security issues".to_string(),
        impact: "System may be vulnerable to various attacks".to_string(),
        recommendation: "Review Nmap output and patch identified vulnerabilities".to_string(),
    })
}

fn nikto_finding(result: &ScannerResult) -> Option<Finding> {
    let finding_count = result.output.matches('+').count();
    let severity = nikto_severity(finding_count)?;

    Some(Finding {
        title: format!("Web Server Vulnerabilities ({finding_count} findings)"),
        severity,
        description: "Nikto web scanner identified multiple potential vulnerabilities".to_string(),
        impact: "Web application may be exposed to various attacks".to_string(),
        recommendation: "Review Nikto findings and apply necessary patches and configurations"
            .to_string(),
    })
}

fn curl_finding(result: &ScannerResult) -> Option<Finding> {
    let missing_count = match &result.security_analysis {
        Some(analysis) => analysis.missing.len(),
        None => headers::analyze_security_headers(&result.output)
            .missing
            .len(),
    };
    let severity = missing_headers_severity(missing_count)?;

    Some(Finding {
        title: format!("Missing Security Headers ({missing_count} headers)"),
        severity,
        description: "Important security headers are missing from HTTP responses".to_string(),
        impact: "Increased risk of XSS, clickjacking, and other web attacks".to_string(),
        recommendation: "Implement missing security headers in web server configuration"
            .to_string(),
    })
}

fn nikto_severity(finding_count: usize) -> Option<Severity> {
    match finding_count {
        0 => None,
        n if n > 10 => Some(Severity::Critical),
        n if n > 5 => Some(Severity::High),
        n if n > 2 => Some(Severity::Medium),
        _ => Some(Severity::Low),
    }
}

fn missing_headers_severity(missing_count: usize) -> Option<Severity> {
    match missing_count {
        0 => None,
        n if n >= 4 => Some(Severity::High),
        n if n >= 2 => Some(Severity::Medium),
        _ => Some(Severity::Low),
    }
}
