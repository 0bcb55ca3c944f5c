//! Academic operations ledger: enrollment, attendance and grading rules on
//! top of the workspace database.
//!
//! Every operation borrows a [`rusqlite::Connection`] for its duration and
//! takes the current instant from the caller, so the rules stay independent
//! of the wall clock.

pub mod attendance;
pub mod catalog;
pub mod directory;
pub mod enrollment;
pub mod error;
pub mod grading;
pub mod model;
pub mod students;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{LedgerError, LedgerResult};

pub(crate) fn require_non_blank<'a>(value: &'a str, field: &str) -> LedgerResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_collapse_to_none() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some(" Ana ".into())).as_deref(), Some("Ana"));
        assert_eq!(require_non_blank(" S1 ", "code").ok(), Some("S1"));
        assert!(require_non_blank("", "code").is_err());
    }
}
