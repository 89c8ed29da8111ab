use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityHeaderAnalysis {
    pub present: Vec<String>,
    pub missing: Vec<String>,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerResult {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_analysis: Option<SecurityHeaderAnalysis>,
}

impl ScannerResult {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            security_analysis: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            security_analysis: None,
        }
    }

    pub fn with_security_analysis(mut self, analysis: SecurityHeaderAnalysis) -> Self {
        self.security_analysis = Some(analysis);
        self
    }
}
