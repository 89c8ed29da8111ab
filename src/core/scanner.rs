use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// External tools the engine knows how to drive. Declaration order is the
/// evaluation order of a full scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    Nmap,
    Nikto,
    Whatweb,
    Curl,
}

impl ScannerKind {
    pub const ALL: [ScannerKind; 4] = [
        ScannerKind::Nmap,
        ScannerKind::Nikto,
        ScannerKind::Whatweb,
        ScannerKind::Curl,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ScannerKind::Nmap => "nmap",
            ScannerKind::Nikto => "nikto",
            ScannerKind::Whatweb => "whatweb",
            ScannerKind::Curl => "curl",
        }
    }

    pub const fn role(self) -> &'static str {
        match self {
            ScannerKind::Nmap => "port/service scanner",
            ScannerKind::Nikto => "web vulnerability scanner",
            ScannerKind::Whatweb => "technology fingerprinter",
            ScannerKind::Curl => "HTTP header inspector",
        }
    }

    pub const fn default_timeout(self) -> Duration {
        match self {
            ScannerKind::Nmap => Duration::from_secs(300),
            ScannerKind::Nikto => Duration::from_secs(600),
            ScannerKind::Whatweb => Duration::from_secs(120),
            ScannerKind::Curl => Duration::from_secs(60),
        }
    }
}

impl fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScannerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nmap" => Ok(ScannerKind::Nmap),
            "nikto" => Ok(ScannerKind::Nikto),
            "whatweb" => Ok(ScannerKind::Whatweb),
            "curl" => Ok(ScannerKind::Curl),
            other => Err(format!(
                "スキャナ名が不正です: {other}（nmap|nikto|whatweb|curl を指定してください）"
            )),
        }
    }
}

/// Which scanners a scan request selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanType {
    All,
    Single(ScannerKind),
    Unrecognized(String),
}

impl ScanType {
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim().to_ascii_lowercase();
        match s.as_str() {
            "all" | "1" => ScanType::All,
            "2" => ScanType::Single(ScannerKind::Nmap),
            "3" => ScanType::Single(ScannerKind::Nikto),
            "4" => ScanType::Single(ScannerKind::Curl),
            "5" => ScanType::Single(ScannerKind::Whatweb),
            other => match other.parse::<ScannerKind>() {
                Ok(kind) => ScanType::Single(kind),
                Err(_) => ScanType::Unrecognized(raw.to_string()),
            },
        }
    }

    pub fn scanners(&self) -> Vec<ScannerKind> {
        match self {
            ScanType::All => ScannerKind::ALL.to_vec(),
            ScanType::Single(kind) => vec![*kind],
            ScanType::Unrecognized(_) => vec![],
        }
    }
}
