//! Terminal rendering of diagnostics
//!
//! Uses codespan-reporting for the familiar `code: message` header with a
//! source snippet, plus plain-text rendering for logs and tests.

use super::catalog::Diagnostic;
use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label, Severity};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term::{self, Config};
use termcolor::{BufferWriter, ColorChoice};

/// Render a diagnostic as plain text, one line of header plus optional
/// hint/suggestion/caused-by lines and the source context slice.
pub fn render_diagnostic(diag: &Diagnostic) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} [{}]: {} ({}:{}:{})",
        diag.kind, diag.code, diag.description, diag.file, diag.line, diag.column
    ));
    if let Some(token) = &diag.token {
        out.push_str(&format!("\n  token: `{}`", token));
    }
    for line in &diag.context_lines {
        out.push_str(&format!("\n  | {}", line));
    }
    if let Some(hint) = &diag.hint {
        out.push_str(&format!("\n  hint: {}", hint));
    }
    if let Some(suggestion) = &diag.suggestion {
        out.push_str(&format!("\n  suggestion: {}", suggestion));
    }
    if let Some(caused_by) = &diag.caused_by {
        out.push_str(&format!("\n  caused by: {}", caused_by));
    }
    out
}

/// Render a diagnostic with colours through codespan-reporting.
///
/// `source` is the file's full text; the label is anchored at the byte range
/// of the reported line when it can be located.
pub fn render_diagnostic_colored(diag: &Diagnostic, source: &str) -> String {
    let file = SimpleFile::new(diag.file.clone(), source.to_string());

    let range = line_byte_range(source, diag.line);
    let mut cs = CsDiagnostic::new(Severity::Error)
        .with_code(diag.code.clone())
        .with_message(diag.description.clone());
    if let Some(range) = range {
        let mut label = Label::primary((), range);
        if let Some(token) = &diag.token {
            label = label.with_message(format!("problematic token `{}`", token));
        }
        cs = cs.with_labels(vec![label]);
    }
    let mut notes = Vec::new();
    if let Some(hint) = &diag.hint {
        notes.push(format!("hint: {}", hint));
    }
    if let Some(suggestion) = &diag.suggestion {
        notes.push(format!("suggestion: {}", suggestion));
    }
    if let Some(caused_by) = &diag.caused_by {
        notes.push(format!("caused by: {}", caused_by));
    }
    cs = cs.with_notes(notes);

    let writer = BufferWriter::stderr(ColorChoice::Never);
    let mut buffer = writer.buffer();
    let config = Config::default();
    if term::emit(&mut buffer, &config, &file, &cs).is_err() {
        return render_diagnostic(diag);
    }
    String::from_utf8_lossy(buffer.as_slice()).into_owned()
}

/// Byte range of a 1-based line within source text
fn line_byte_range(source: &str, line: u32) -> Option<std::ops::Range<usize>> {
    if line == 0 {
        return None;
    }
    let mut start = 0usize;
    for (i, text) in source.split('\n').enumerate() {
        let end = start + text.len();
        if i as u32 + 1 == line {
            return Some(start..end);
        }
        start = end + 1;
    }
    None
}
