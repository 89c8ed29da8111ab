use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered from least to most severe; `Unrecognized` sorts below `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    /// Label outside the four known levels, only reachable through
    /// deserialization. Weighs the same as `Low`.
    // serde requires `#[serde(other)]` on the last variant, so the order is
    // defined by `rank` below rather than by declaration order.
    #[serde(other)]
    Unrecognized,
}

impl Severity {
    const fn rank(self) -> u8 {
        match self {
            Severity::Unrecognized => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Severity {
    pub const KNOWN: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Unrecognized => "Unrecognized",
        }
    }

    pub const fn weight(self) -> u32 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low | Severity::Unrecognized => 1,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            other => Err(format!(
                "重大度が不正です: {other}（Critical|High|Medium|Low を指定してください）"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VulnStage {
    #[default]
    Default,
    Low,
    Medium,
    High,
    Critical,
}

impl VulnStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            VulnStage::Default => "Default",
            VulnStage::Low => "Low",
            VulnStage::Medium => "Medium",
            VulnStage::High => "High",
            VulnStage::Critical => "Critical",
        }
    }
}

impl fmt::Display for VulnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
