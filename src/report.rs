//! The error bundle: structured diagnostics anchored at manifest tokens.
//!
//! Every user-attributable fetch failure lands here with a precise source
//! location before the coarse `PackageFetchFailed` error is surfaced; the
//! embedding compiler drains the bundle and renders it however it likes.

use std::path::{Path, PathBuf};

/// Byte range of a token inside a manifest source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

/// Everything needed to anchor a diagnostic at a manifest token. Cheap to
/// copy, so callers build one per dependency and hand it down the fetch
/// pipeline.
#[derive(Clone, Copy)]
pub struct DiagnosticSite<'a> {
    pub path: &'a Path,
    pub source: &'a str,
    pub span: Span,
}

impl<'a> DiagnosticSite<'a> {
    pub fn new(path: &'a Path, source: &'a str, span: Span) -> Self {
        DiagnosticSite { path, source, span }
    }

    pub fn with_span(self, span: Span) -> Self {
        DiagnosticSite { span, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub span: Span,
    /// 1-based.
    pub line: usize,
    /// 1-based byte column.
    pub column: usize,
    /// The full text of the offending source line.
    pub source_line: String,
    pub message: String,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(site: DiagnosticSite<'_>, message: impl Into<String>) -> Self {
        let (line, column, source_line) = locate(site.source, site.span.start);
        Diagnostic {
            path: site.path.to_path_buf(),
            span: site.span,
            line,
            column,
            source_line,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

fn locate(source: &str, offset: usize) -> (usize, usize, String) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = offset - line_start + 1;
    let line_end = source[line_start..]
        .find('\n')
        .map(|i| line_start + i)
        .unwrap_or_else(|| source.len());
    (line, column, source[line_start..line_end].to_string())
}

/// The sink the fetch core pushes root errors into.
#[derive(Debug, Default)]
pub struct Report {
    diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn new() -> Self {
        Report::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
