use std::fmt::Write as _;

use crate::diagnostics::Diagnostic;

/// Render the one-line diagnostic header:
/// `[path]:[line]:[column]([module]): severity: [CODE] message`.
///
/// Missing components are simply omitted.
pub fn render_header(diagnostic: &Diagnostic) -> String {
    let mut loc = String::new();
    if let Some(file) = &diagnostic.file {
        loc.push_str(&file.display().to_string());
    }
    if let Some(line) = diagnostic.line() {
        let _ = write!(loc, ":{line}");
        if let Some(column) = diagnostic.column() {
            let _ = write!(loc, ":{column}");
        }
        if let Some(module) = &diagnostic.module {
            let _ = write!(loc, "({module})");
        }
    }
    if !loc.is_empty() {
        loc.push_str(": ");
    }
    format!(
        "{loc}{}: [{}] {}",
        diagnostic.severity.describe(),
        diagnostic.code,
        diagnostic.message
    )
}

/// Render a diagnostic with an optional source snippet and caret line.
///
/// `source` is the full text of the file the diagnostic points into, when
/// the caller has it at hand; without it only the header is produced.
pub fn render(diagnostic: &Diagnostic, source: Option<&str>) -> String {
    let mut out = render_header(diagnostic);

    let (Some(span), Some(source)) = (diagnostic.span, source) else {
        return out;
    };
    if span.line == 0 {
        return out;
    }
    let Some(line_text) = source.lines().nth(span.line - 1) else {
        return out;
    };

    let gutter = format!("{:>6} | ", span.line);
    out.push('\n');
    out.push_str(&gutter);
    out.push_str(line_text);
    out.push('\n');

    // Caret line under the span's column range (single-line spans only).
    let caret_count = if span.end_line == span.line && span.end_column > span.column {
        span.end_column - span.column
    } else {
        1
    };
    let pad = " ".repeat(gutter.len() + span.column.saturating_sub(1));
    out.push_str(&pad);
    out.push_str(&"^".repeat(caret_count.max(1)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceSpan;
    use crate::diagnostics::Diagnostic;

    #[test]
    fn header_omits_missing_components() {
        let diag = Diagnostic::error("TYP-0070", "if condition must have type 'bool'");
        assert_eq!(
            render_header(&diag),
            "error: [TYP-0070] if condition must have type 'bool'"
        );
    }

    #[test]
    fn header_includes_full_location() {
        let diag = Diagnostic::error("PAR-0100", "expected ';' after statement")
            .with_file("src/app.l0")
            .with_module("app")
            .with_span(SourceSpan::new(3, 14, 3, 15));
        assert_eq!(
            render_header(&diag),
            "src/app.l0:3:14(app): error: [PAR-0100] expected ';' after statement"
        );
    }

    #[test]
    fn caret_line_spans_column_range() {
        let source = "module m;\nlet x = 1 + true;\n";
        let diag = Diagnostic::error("TYP-0170", "operator '+' expects operands of type 'int'")
            .with_span(SourceSpan::new(2, 9, 2, 17));
        let rendered = render(&diag, Some(source));
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("let x = 1 + true;"));
        assert!(lines[2].trim_start().chars().all(|c| c == '^'));
        assert_eq!(lines[2].trim_start().len(), 8);
    }
}
