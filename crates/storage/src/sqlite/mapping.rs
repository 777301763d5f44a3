use serde::{Serialize, de::DeserializeOwned};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Maps driver errors, turning unique-constraint violations into `Conflict`.
pub(crate) fn db(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Database(ref inner) if inner.is_unique_violation() => StorageError::Conflict,
        other => StorageError::Connection(other.to_string()),
    }
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn u8_from_i64(field: &'static str, v: i64) -> Result<u8, StorageError> {
    u8::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

/// Reads an integer column holding an id and wraps it in its newtype.
pub(crate) fn get_id<T>(
    row: &SqliteRow,
    column: &'static str,
    wrap: fn(u64) -> T,
) -> Result<T, StorageError> {
    let raw: i64 = row.try_get(column).map_err(ser)?;
    Ok(wrap(i64_to_u64(column, raw)?))
}

pub(crate) fn get_opt_id<T>(
    row: &SqliteRow,
    column: &'static str,
    wrap: fn(u64) -> T,
) -> Result<Option<T>, StorageError> {
    let raw: Option<i64> = row.try_get(column).map_err(ser)?;
    raw.map(|v| i64_to_u64(column, v).map(wrap)).transpose()
}

pub(crate) fn get_u32(row: &SqliteRow, column: &'static str) -> Result<u32, StorageError> {
    u32_from_i64(column, row.try_get::<i64, _>(column).map_err(ser)?)
}

pub(crate) fn get_u64(row: &SqliteRow, column: &'static str) -> Result<u64, StorageError> {
    i64_to_u64(column, row.try_get::<i64, _>(column).map_err(ser)?)
}

/// Parses a text column through the type's `FromStr`.
pub(crate) fn get_parsed<T>(row: &SqliteRow, column: &'static str) -> Result<T, StorageError>
where
    T: std::str::FromStr,
    T::Err: core::fmt::Display,
{
    let raw: String = row.try_get(column).map_err(ser)?;
    raw.parse().map_err(ser)
}

/// Embedded lists and nested values are stored as JSON text.
pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

pub(crate) fn get_json<T: DeserializeOwned>(
    row: &SqliteRow,
    column: &'static str,
) -> Result<T, StorageError> {
    let raw: String = row.try_get(column).map_err(ser)?;
    serde_json::from_str(&raw).map_err(ser)
}

pub(crate) fn bool_i64(v: bool) -> i64 {
    i64::from(v)
}

pub(crate) fn get_bool(row: &SqliteRow, column: &'static str) -> Result<bool, StorageError> {
    Ok(row.try_get::<i64, _>(column).map_err(ser)? != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_ids_are_rejected() {
        assert!(matches!(
            i64_to_u64("id", -1),
            Err(StorageError::Serialization(_))
        ));
        assert_eq!(id_i64("id", 7).unwrap(), 7);
        assert!(id_i64("id", u64::MAX).is_err());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(db(sqlx::Error::RowNotFound), StorageError::NotFound));
        assert!(matches!(
            db(sqlx::Error::PoolTimedOut),
            StorageError::Connection(_)
        ));
    }
}
