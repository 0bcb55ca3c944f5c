use super::model::AttendanceStatus;
use serde_json::json;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failures reported by ledger operations. None of them are retried here.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error(transparent)]
    Conflict(#[from] Conflict),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Uniqueness or state invariants that would be broken by a write.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Conflict {
    #[error("student already holds an active enrollment in cycle \"{cycle_name}\"")]
    ActiveEnrollment { cycle_id: String, cycle_name: String },

    #[error("student is already enrolled in cycle {cycle_id}")]
    AlreadyEnrolled { cycle_id: String },

    #[error("attendance already recorded today as {status}")]
    AlreadyMarked { status: AttendanceStatus },

    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },
}

impl LedgerError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Stable wire code used in the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidInput(_) => "bad_params",
            Self::InvalidState(_) => "invalid_state",
            Self::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NotFound { entity, key } => Some(json!({ "entity": entity, "key": key })),
            Self::Conflict(Conflict::ActiveEnrollment {
                cycle_id,
                cycle_name,
            }) => Some(json!({
                "reason": "active_enrollment",
                "cycleId": cycle_id,
                "cycleName": cycle_name
            })),
            Self::Conflict(Conflict::AlreadyEnrolled { cycle_id }) => Some(json!({
                "reason": "already_enrolled",
                "cycleId": cycle_id
            })),
            Self::Conflict(Conflict::AlreadyMarked { status }) => Some(json!({
                "reason": "already_marked",
                "status": status.as_str()
            })),
            Self::Conflict(Conflict::Duplicate { entity, key }) => Some(json!({
                "reason": "duplicate",
                "entity": entity,
                "key": key
            })),
            Self::InvalidInput(_) | Self::InvalidState(_) | Self::Storage(_) => None,
        }
    }
}

pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_details_report_existing_status() {
        let e = LedgerError::from(Conflict::AlreadyMarked {
            status: AttendanceStatus::Late,
        });
        assert_eq!(e.code(), "conflict");
        assert_eq!(
            e.details().and_then(|d| d.get("status").cloned()),
            Some(json!("Late"))
        );
        assert_eq!(e.to_string(), "attendance already recorded today as Late");
    }

    #[test]
    fn unique_violation_is_detected() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE t(k TEXT UNIQUE); INSERT INTO t VALUES('a');")
            .expect("seed");
        let e = conn
            .execute("INSERT INTO t VALUES('a')", [])
            .expect_err("duplicate insert");
        assert!(is_unique_violation(&e));
    }
}
