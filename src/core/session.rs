use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{Finding, ScannerKind, ScannerResult, VulnStage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: String,
    pub timestamp: String,
    pub target: String,
    pub scan_type: String,
    pub requester: String,
    pub status: ScanStatus,
    pub results: BTreeMap<ScannerKind, ScannerResult>,
    pub findings: Vec<Finding>,
    pub vuln_stage: VulnStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collaborator_errors: Vec<String>,
}

impl ScanSession {
    pub fn new(
        id: impl Into<String>,
        timestamp: impl Into<String>,
        target: impl Into<String>,
        scan_type: impl Into<String>,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: timestamp.into(),
            target: target.into(),
            scan_type: scan_type.into(),
            requester: requester.into(),
            status: ScanStatus::Pending,
            results: BTreeMap::new(),
            findings: Vec::new(),
            vuln_stage: VulnStage::Default,
            error: None,
            report_path: None,
            collaborator_errors: Vec::new(),
        }
    }
}
