mod finding;
mod result;
mod scanner;
mod session;
mod severity;

pub use finding::Finding;
pub use result::{ScannerResult, SecurityHeaderAnalysis};
pub use scanner::{ScanType, ScannerKind};
pub use session::{ScanSession, ScanStatus};
pub use severity::{Severity, VulnStage};
