use thiserror::Error;

use crate::digest::BlueprintId;
use crate::model::Source;
use crate::result_spec::DecodeError;

/// Failure modes of store operations.
///
/// Distinguishes what the caller can act on: transient faults are worth a
/// bounded retry, everything else surfaces as-is after rollback.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient database failure")]
    Transient(#[source] rusqlite::Error),

    #[error("unexpected constraint violation")]
    Constraint(#[source] rusqlite::Error),

    #[error("corrupt result spec on run {src}/{ext_id}")]
    CorruptPayload {
        src: Source,
        ext_id: i64,
        #[source]
        cause: DecodeError,
    },

    #[error("blueprint {blueprint_id} has a malformed member list ({len} bytes)")]
    CorruptMembers { blueprint_id: BlueprintId, len: usize },

    #[error("run {src}/{ext_id} enumerates test {test_id} outside blueprint {blueprint_id}")]
    MemberMismatch {
        src: Source,
        ext_id: i64,
        blueprint_id: BlueprintId,
        test_id: BlueprintId,
    },

    #[error("operation cancelled")]
    Cancelled(#[source] rusqlite::Error),

    #[error("invalid test run: {0}")]
    ExternalInput(String),

    #[error("database failure")]
    Db(#[source] rusqlite::Error),
}

impl StoreError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &e {
            rusqlite::Error::SqliteFailure(f, _) => match f.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StoreError::Transient(e),
                ErrorCode::ConstraintViolation => StoreError::Constraint(e),
                ErrorCode::OperationInterrupted => StoreError::Cancelled(e),
                _ => StoreError::Db(e),
            },
            _ => StoreError::Db(e),
        }
    }
}
