use std::path::PathBuf;

use crate::ast::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    pub fn describe(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }
}

/// One user-facing diagnostic with a stable `XXX-NNNN` code.
///
/// Location components are optional and degrade gracefully when absent.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub module: Option<String>,
    pub file: Option<PathBuf>,
    pub span: Option<SourceSpan>,
}

impl Diagnostic {
    pub fn new<C: Into<String>, M: Into<String>>(severity: Severity, code: C, message: M) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            module: None,
            file: None,
            span: None,
        }
    }

    pub fn error<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn warning<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn line(&self) -> Option<usize> {
        self.span.map(|s| s.line)
    }

    pub fn column(&self) -> Option<usize> {
        self.span.map(|s| s.column)
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Error)
            .count()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Sort the entries of the most recent pass by source position.
    ///
    /// Only the tail starting at `from` is reordered, so cross-pass
    /// ordering stays append-only.
    pub fn sort_tail(&mut self, from: usize) {
        if from >= self.entries.len() {
            return;
        }
        self.entries[from..].sort_by(|a, b| {
            let key = |d: &Diagnostic| {
                (
                    d.file.clone(),
                    d.line().unwrap_or(0),
                    d.column().unwrap_or(0),
                    d.code.clone(),
                )
            };
            key(a).cmp(&key(b))
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
