//! SQLite DDL. Every statement is idempotent.

pub(crate) const CREATE_STUDIOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS studios (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

pub(crate) const CREATE_BALANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS balances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id INTEGER NOT NULL,
    provider_id INTEGER NOT NULL,
    studio_id INTEGER NOT NULL DEFAULT 0,
    type TEXT NOT NULL,
    amount TEXT NOT NULL DEFAULT '0',
    frozen_amount TEXT NOT NULL DEFAULT '0',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (player_id, provider_id, studio_id, type)
)
"#;

pub(crate) const CREATE_BALANCES_PROVIDER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_balances_provider ON balances (provider_id)";

pub(crate) const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS balance_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    balance_id INTEGER NOT NULL REFERENCES balances (id),
    type TEXT NOT NULL,
    amount TEXT NOT NULL,
    before_amount TEXT NOT NULL,
    after_amount TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    operator_id INTEGER NOT NULL,
    created_at TEXT NOT NULL
)
"#;

pub(crate) const CREATE_TRANSACTIONS_BALANCE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_balance_transactions_balance ON balance_transactions (balance_id, id)";

pub(crate) const CREATE_RELATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS provider_studio_relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL,
    studio_id INTEGER NOT NULL REFERENCES studios (id),
    status TEXT NOT NULL DEFAULT 'pending',
    applied_at TEXT NOT NULL,
    processed_at TEXT,
    notes TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (provider_id, studio_id)
)
"#;

/// Statements run by `migrate`, in order.
pub(crate) const MIGRATIONS: &[&str] = &[
    CREATE_STUDIOS_TABLE,
    CREATE_BALANCES_TABLE,
    CREATE_BALANCES_PROVIDER_INDEX,
    CREATE_TRANSACTIONS_TABLE,
    CREATE_TRANSACTIONS_BALANCE_INDEX,
    CREATE_RELATIONS_TABLE,
];
