//! Conversions between SQLite rows and ledger records.
//!
//! Decimals are stored as canonical text and timestamps as RFC 3339 text so
//! that no precision is lost in either direction.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tally_types::{
    Balance, BalanceId, RelationId, Relationship, Studio, StudioId, Transaction, TransactionId,
    TypeError, UserId,
};

use crate::error::{StoreError, StoreResult};

pub(crate) const BALANCE_COLUMNS: &str =
    "id, player_id, provider_id, studio_id, type, amount, frozen_amount, created_at, updated_at";

pub(crate) const TRANSACTION_COLUMNS: &str =
    "id, balance_id, type, amount, before_amount, after_amount, description, operator_id, created_at";

pub(crate) const RELATION_COLUMNS: &str =
    "id, provider_id, studio_id, status, applied_at, processed_at, notes, created_at, updated_at";

pub(crate) const STUDIO_COLUMNS: &str = "id, owner_id, name, created_at";

/// Bind form of an identifier.
pub(crate) fn sql_id(id: u64) -> StoreResult<i64> {
    i64::try_from(id).map_err(|_| StoreError::OutOfRange(id))
}

pub(crate) fn sql_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn sql_decimal(value: Decimal) -> String {
    value.to_string()
}

fn id(row: &SqliteRow, table: &'static str, column: &str) -> StoreResult<u64> {
    let raw: i64 = row.try_get(column)?;
    u64::try_from(raw).map_err(|_| StoreError::corrupt(table, format!("negative {column}: {raw}")))
}

fn decimal(row: &SqliteRow, table: &'static str, column: &str) -> StoreResult<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw)
        .map_err(|e| StoreError::corrupt(table, format!("{column} {raw:?}: {e}")))
}

fn timestamp(row: &SqliteRow, table: &'static str, column: &str) -> StoreResult<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    parse_timestamp(table, column, &raw)
}

fn optional_timestamp(
    row: &SqliteRow,
    table: &'static str,
    column: &str,
) -> StoreResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| parse_timestamp(table, column, &raw))
        .transpose()
}

fn parse_timestamp(table: &'static str, column: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(table, format!("{column} {raw:?}: {e}")))
}

fn variant<T>(row: &SqliteRow, table: &'static str, column: &str) -> StoreResult<T>
where
    T: FromStr<Err = TypeError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: TypeError| StoreError::corrupt(table, e.to_string()))
}

pub(crate) fn balance(row: &SqliteRow) -> StoreResult<Balance> {
    const T: &str = "balances";
    Ok(Balance {
        id: BalanceId(id(row, T, "id")?),
        player_id: UserId(id(row, T, "player_id")?),
        provider_id: UserId(id(row, T, "provider_id")?),
        studio_id: StudioId(id(row, T, "studio_id")?),
        balance_type: variant(row, T, "type")?,
        amount: decimal(row, T, "amount")?,
        frozen_amount: decimal(row, T, "frozen_amount")?,
        created_at: timestamp(row, T, "created_at")?,
        updated_at: timestamp(row, T, "updated_at")?,
    })
}

pub(crate) fn transaction(row: &SqliteRow) -> StoreResult<Transaction> {
    const T: &str = "balance_transactions";
    Ok(Transaction {
        id: TransactionId(id(row, T, "id")?),
        balance_id: BalanceId(id(row, T, "balance_id")?),
        kind: variant(row, T, "type")?,
        amount: decimal(row, T, "amount")?,
        before_amount: decimal(row, T, "before_amount")?,
        after_amount: decimal(row, T, "after_amount")?,
        description: row.try_get("description")?,
        operator_id: UserId(id(row, T, "operator_id")?),
        created_at: timestamp(row, T, "created_at")?,
    })
}

pub(crate) fn relationship(row: &SqliteRow) -> StoreResult<Relationship> {
    const T: &str = "provider_studio_relations";
    Ok(Relationship {
        id: RelationId(id(row, T, "id")?),
        provider_id: UserId(id(row, T, "provider_id")?),
        studio_id: StudioId(id(row, T, "studio_id")?),
        status: variant(row, T, "status")?,
        applied_at: timestamp(row, T, "applied_at")?,
        processed_at: optional_timestamp(row, T, "processed_at")?,
        notes: row.try_get("notes")?,
        created_at: timestamp(row, T, "created_at")?,
        updated_at: timestamp(row, T, "updated_at")?,
    })
}

pub(crate) fn studio(row: &SqliteRow) -> StoreResult<Studio> {
    const T: &str = "studios";
    Ok(Studio {
        id: StudioId(id(row, T, "id")?),
        owner_id: UserId(id(row, T, "owner_id")?),
        name: row.try_get("name")?,
        created_at: timestamp(row, T, "created_at")?,
    })
}

/// Translate a failed insert, reporting uniqueness violations as
/// [`StoreError::Conflict`].
pub(crate) fn insert_error(error: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    let unique = error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        StoreError::Conflict(what())
    } else {
        StoreError::Backend(error)
    }
}
