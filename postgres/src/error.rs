//! Mapping from sqlx errors onto [`StoreError`].

use boxoffice_core::StoreError;

/// `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";
/// `serialization_failure`
const SERIALIZATION_FAILURE: &str = "40001";
/// `deadlock_detected`
const DEADLOCK_DETECTED: &str = "40P01";

/// Classify a sqlx error.
///
/// Constraint races and serialization failures become `Conflict`; rows that do
/// not decode become `Corrupt`; everything else means the statement may not have
/// run and becomes `Unavailable`.
pub(crate) fn map_sqlx(err: sqlx::Error) -> StoreError {
    let mapped = match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(UNIQUE_VIOLATION | SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        },
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(err.to_string()),
        _ => StoreError::Unavailable(err.to_string()),
    };

    metrics::counter!("boxoffice_store_errors_total", "kind" => error_kind(&mapped)).increment(1);
    tracing::debug!(error = %err, kind = error_kind(&mapped), "Store statement failed");
    mapped
}

const fn error_kind(err: &StoreError) -> &'static str {
    match err {
        StoreError::Unavailable(_) => "unavailable",
        StoreError::Conflict(_) => "conflict",
        StoreError::Corrupt(_) => "corrupt",
    }
}

/// Decode a stored counter.
pub(crate) fn count_from_db(column: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

/// Encode a count for binding. Every `u32` fits a `BIGINT`.
pub(crate) fn count_to_db(value: u32) -> i64 {
    i64::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_unavailable() {
        assert!(matches!(
            map_sqlx(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn missing_column_is_corrupt() {
        assert!(matches!(
            map_sqlx(sqlx::Error::ColumnNotFound("sold_count".to_string())),
            StoreError::Corrupt(_)
        ));
    }

    #[test]
    fn negative_count_is_corrupt() {
        assert!(matches!(
            count_from_db("held_count", -1),
            Err(StoreError::Corrupt(_))
        ));
        assert_eq!(count_from_db("held_count", 7), Ok(7));
    }
}
