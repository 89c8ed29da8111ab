use crate::core::{Finding, VulnStage};

pub fn total_weight(findings: &[Finding]) -> u32 {
    findings.iter().map(|f| f.severity.weight()).sum()
}

/// Reduces findings to one overall stage by summing severity weights.
pub fn determine_vuln_stage(findings: &[Finding]) -> VulnStage {
    stage_for_weight(total_weight(findings))
}

pub fn stage_for_weight(total_weight: u32) -> VulnStage {
    match total_weight {
        0 => VulnStage::Default,
        w if w >= 8 => VulnStage::Critical,
        w if w >= 5 => VulnStage::High,
        w if w >= 3 => VulnStage::Medium,
        _ => VulnStage::Low,
    }
}
