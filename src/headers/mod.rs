use crate::core::SecurityHeaderAnalysis;

/// Recognized security headers with the note reported when each is found.
pub const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("Strict-Transport-Security", "HSTS is implemented - Good"),
    ("Content-Security-Policy", "CSP is implemented - Good"),
    ("X-Frame-Options", "Clickjacking protection - Good"),
    ("X-Content-Type-Options", "MIME sniffing protection - Good"),
    ("X-XSS-Protection", "XSS protection - Good"),
];

const POINTS_PER_HEADER: u32 = 20;

/// Looks for each catalog header name anywhere in `raw`, ignoring case.
///
/// This is a substring match over the whole blob, not a header parser: a name
/// that only shows up inside another header's value still counts as present.
pub fn analyze_security_headers(raw: &str) -> SecurityHeaderAnalysis {
    let haystack = raw.to_ascii_lowercase();

    let mut present = Vec::new();
    let mut missing = Vec::new();
    for (header, note) in SECURITY_HEADERS {
        if haystack.contains(&header.to_ascii_lowercase()) {
            present.push(note.to_string());
        } else {
            missing.push(format!("Missing {header}"));
        }
    }

    let score = POINTS_PER_HEADER * present.len() as u32;
    SecurityHeaderAnalysis {
        present,
        missing,
        score,
    }
}
