//! Collected diagnostics. Classification and apply errors are gathered so
//! that one run surfaces as many problems as possible; only the relaxation
//! driver aborts the link immediately, since without a stable layout there
//! is nothing valid to continue with.

use crate::error;
use itertools::Itertools as _;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A computed value does not fit its relocation field. Fatal only when
    /// the section is loaded at runtime; debug-only sections warn.
    RelocationOverflow,

    /// A relocation kind the backend does not implement, or one that is
    /// illegal for the requested output kind.
    UnsupportedRelocation,

    /// No stub table covers a branch site, so its reach cannot be extended.
    /// The output keeps a best-effort direct encoding.
    UnreachableBranch,

    /// A TLS marker relocation without its paired helper-call relocation.
    BrokenTlsSequence,

    /// Conflicting ABI attributes between input objects.
    AbiAttributeMismatch,
}

#[derive(Debug)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{prefix}: {}", self.message)
    }
}

#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, kind: DiagnosticKind, severity: Severity, message: String) {
        if severity == Severity::Warning {
            crate::error::warning(&message);
        }
        tracing::debug!(?kind, ?severity, message, "diagnostic");
        self.diagnostics.push(Diagnostic {
            kind,
            severity,
            message,
        });
    }

    pub fn error(&mut self, kind: DiagnosticKind, message: String) {
        self.report(kind, Severity::Error, message);
    }

    pub fn warn(&mut self, kind: DiagnosticKind, message: String) {
        self.report(kind, Severity::Warning, message);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Turns the collected state into the pass result: `Ok` if nothing rose
    /// above warning, otherwise one error summarising what was gathered.
    pub fn ensure_no_errors(&self) -> error::Result {
        let errors = self
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        if errors == 0 {
            return Ok(());
        }
        let summary = self
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .take(3)
            .map(|d| d.message.as_str())
            .join("; ");
        anyhow::bail!("{errors} error(s): {summary}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_do_not_fail_the_pass() {
        let mut sink = DiagnosticSink::new();
        sink.warn(
            DiagnosticKind::UnreachableBranch,
            "branch out of range".to_owned(),
        );
        assert!(!sink.has_errors());
        assert!(sink.ensure_no_errors().is_ok());
    }

    #[test]
    fn test_errors_are_collected_not_thrown() {
        let mut sink = DiagnosticSink::new();
        sink.error(
            DiagnosticKind::UnsupportedRelocation,
            "bad reloc".to_owned(),
        );
        sink.error(
            DiagnosticKind::RelocationOverflow,
            "overflow".to_owned(),
        );
        assert_eq!(sink.diagnostics().len(), 2);
        let err = sink.ensure_no_errors().unwrap_err();
        assert!(err.to_string().contains("2 error(s)"));
    }
}
