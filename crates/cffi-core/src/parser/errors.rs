//! Error formatting for declaration parse errors

use crate::errors::FfiError;
use chumsky::error::{Rich, RichReason};

/// Convert Chumsky error reason to readable message
pub fn format_error_reason(reason: &RichReason<char>) -> String {
    match reason {
        RichReason::ExpectedFound { found, .. } => match found {
            Some(c) => format!("unexpected '{}'", c.escape_debug()),
            None => "unexpected end of input".to_string(),
        },
        RichReason::Custom(msg) => msg.to_string(),
    }
}

/// Collapse parser errors into a single declaration error. Only the first
/// error is reported, with the offending source line for context.
pub fn errors_to_declaration(errors: Vec<Rich<char>>, source: &str) -> FfiError {
    let Some(first) = errors.into_iter().next() else {
        return FfiError::declaration("invalid declaration");
    };
    let start = first.span().start.min(source.len());
    let line = source.get(..start).unwrap_or(source).matches('\n').count() + 1;
    let near = source
        .get(start..)
        .unwrap_or_default()
        .split(|c: char| c.is_whitespace())
        .find(|s| !s.is_empty());
    let message = format_error_reason(first.reason());
    match near {
        Some(token) => FfiError::declaration(format!("{message} near '{token}' at line {line}")),
        None => FfiError::declaration(format!("{message} at line {line}")),
    }
}
