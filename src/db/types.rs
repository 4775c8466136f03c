//! Row decoding into backend-neutral records.
//!
//! Values are tried from the narrowest to the widest representation; a column
//! none of them can decode falls back to JSON null rather than failing the row.

use crate::models::Record;
use serde_json::Value as JsonValue;
use sqlx::{Column, ColumnIndex, Decode, Row, Type};

/// Convert a row into a [`Record`] keyed by column name.
pub(crate) fn row_to_record<'r, R>(row: &'r R) -> Record
where
    R: Row,
    usize: ColumnIndex<R>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    i32: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    bool: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
{
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| (column.name().to_string(), decode_column(row, idx)))
        .collect()
}

fn decode_column<'r, R>(row: &'r R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    i32: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    bool: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
{
    if let Some(value) = try_decode::<R, i64>(row, idx) {
        return value.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(value) = try_decode::<R, i32>(row, idx) {
        return value.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(value) = try_decode::<R, f64>(row, idx) {
        return value.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(value) = try_decode::<R, bool>(row, idx) {
        return value.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(value) = try_decode::<R, String>(row, idx) {
        return value.map_or(JsonValue::Null, JsonValue::from);
    }
    JsonValue::Null
}

/// `Some(decoded)` when the column is compatible with `T`, `None` on a type mismatch.
fn try_decode<'r, R, T>(row: &'r R, idx: usize) -> Option<Option<T>>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, usize>(idx).ok()
}
