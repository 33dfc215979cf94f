//! Fsck finding types.
//!
//! Every check performed by storage or leaf fsck produces a `Finding` that
//! is logged, handed to the fsck callback and collected in the report.

/// Severity level for fsck findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Something was repaired or is merely noteworthy.
    Info,
    /// A divergence that fsck repairs or that needs attention.
    Warning,
    /// A check failed and could not be repaired.
    Error,
}

/// A single finding from a store check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Store-relative path the finding is about.
    pub path: String,
    /// What was found or done.
    pub message: String,
    pub severity: Severity,
}

impl Finding {
    pub fn info(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(path, message, Severity::Info)
    }

    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(path, message, Severity::Warning)
    }

    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(path, message, Severity::Error)
    }

    fn new(path: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity,
        }
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.path, self.message)
    }
}

/// Result of a leaf or root fsck run.
#[derive(Debug, Clone, Default)]
pub struct FsckReport {
    pub findings: Vec<Finding>,
    /// Secrets that were re-encrypted.
    pub fixed: Vec<String>,
}

impl FsckReport {
    /// Whether any finding reached `Severity::Error`.
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub(crate) fn merge(&mut self, other: FsckReport) {
        self.findings.extend(other.findings);
        self.fixed.extend(other.fixed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let f = Finding::warning("a/b", "extra recipient X");
        assert_eq!(f.to_string(), "[Warning] a/b: extra recipient X");
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_report_errors() {
        let mut report = FsckReport::default();
        report.findings.push(Finding::info("x", "ok"));
        assert!(!report.has_errors());
        report.merge(FsckReport {
            findings: vec![Finding::error("y", "failed to decrypt")],
            fixed: vec!["y".into()],
        });
        assert!(report.has_errors());
        assert_eq!(report.fixed, vec!["y".to_string()]);
    }
}
