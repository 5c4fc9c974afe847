//! SQLite ledger store.
//!
//! Every [`LedgerTx`] is a `BEGIN IMMEDIATE` transaction, so the write lock is
//! taken before the first read and concurrent read-modify-write cycles queue
//! behind one another instead of racing.

mod rows;
mod schema;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool};
use tally_types::{
    Balance, BalanceId, BalanceKey, BalanceType, Page, PageRequest, RelationId, RelationStatus,
    Relationship, Studio, StudioId, Transaction, TransactionKind, TypeSummary, UserId,
};
use tracing::{debug, info};

use crate::aggregate::summarize;
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::records::{BalanceUpdate, NewRelationship, NewStudio, NewTransaction, RelationDecision};
use crate::traits::{LedgerStore, LedgerTx};
use rows::{
    insert_error, sql_decimal, sql_id, sql_timestamp, BALANCE_COLUMNS, RELATION_COLUMNS,
    STUDIO_COLUMNS, TRANSACTION_COLUMNS,
};

/// Ledger store backed by a SQLite database.
#[derive(Clone, Debug)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Open a pool for `config` and create the schema if needed.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StoreError::Config(format!("invalid database url {:?}: {e}", config.url)))?
            .create_if_missing(config.create_if_missing)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        let pool_options = if config.is_memory() {
            // An in-memory database lives and dies with its connection.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url = %config.url, "sqlite ledger store ready");
        Ok(store)
    }

    /// A private in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect(&DatabaseConfig::in_memory()).await
    }

    /// Wrap an existing pool. The schema is not touched.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes that do not exist yet.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in schema::MIGRATIONS {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        debug!(statements = schema::MIGRATIONS.len(), "schema migrated");
        Ok(())
    }

    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn page_bounds(page: PageRequest) -> StoreResult<(i64, i64)> {
    Ok((sql_id(page.limit())?, sql_id(page.offset())?))
}

fn count(row: &sqlx::sqlite::SqliteRow) -> StoreResult<u64> {
    let total: i64 = row.try_get(0)?;
    Ok(u64::try_from(total).unwrap_or_default())
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn balance(&self, id: BalanceId) -> StoreResult<Option<Balance>> {
        let sql = format!("SELECT {BALANCE_COLUMNS} FROM balances WHERE id = ?1");
        sqlx::query(&sql)
            .bind(sql_id(id.get())?)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(rows::balance)
            .transpose()
    }

    async fn balances_for_player(
        &self,
        player: UserId,
        balance_type: Option<BalanceType>,
        page: PageRequest,
    ) -> StoreResult<Page<Balance>> {
        let player_id = sql_id(player.get())?;
        let type_filter = balance_type.map(|ty| ty.as_str());
        let (limit, offset) = page_bounds(page)?;

        let total = sqlx::query(
            "SELECT COUNT(*) FROM balances WHERE player_id = ?1 AND (?2 IS NULL OR type = ?2)",
        )
        .bind(player_id)
        .bind(type_filter)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM balances \
             WHERE player_id = ?1 AND (?2 IS NULL OR type = ?2) \
             ORDER BY id LIMIT ?3 OFFSET ?4"
        );
        let items = sqlx::query(&sql)
            .bind(player_id)
            .bind(type_filter)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(rows::balance)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Page::new(items, count(&total)?, page))
    }

    async fn balances_with_provider(
        &self,
        player: UserId,
        provider: UserId,
        studio: StudioId,
    ) -> StoreResult<Vec<Balance>> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM balances \
             WHERE player_id = ?1 AND provider_id = ?2 AND studio_id = ?3 ORDER BY id"
        );
        sqlx::query(&sql)
            .bind(sql_id(player.get())?)
            .bind(sql_id(provider.get())?)
            .bind(sql_id(studio.get())?)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(rows::balance)
            .collect()
    }

    async fn transactions(
        &self,
        balance: BalanceId,
        kind: Option<TransactionKind>,
        page: PageRequest,
    ) -> StoreResult<Page<Transaction>> {
        let balance_id = sql_id(balance.get())?;
        let kind_filter = kind.map(|k| k.as_str());
        let (limit, offset) = page_bounds(page)?;

        let total = sqlx::query(
            "SELECT COUNT(*) FROM balance_transactions \
             WHERE balance_id = ?1 AND (?2 IS NULL OR type = ?2)",
        )
        .bind(balance_id)
        .bind(kind_filter)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM balance_transactions \
             WHERE balance_id = ?1 AND (?2 IS NULL OR type = ?2) \
             ORDER BY id DESC LIMIT ?3 OFFSET ?4"
        );
        let items = sqlx::query(&sql)
            .bind(balance_id)
            .bind(kind_filter)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(rows::transaction)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Page::new(items, count(&total)?, page))
    }

    async fn transaction_chain(&self, balance: BalanceId) -> StoreResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM balance_transactions WHERE balance_id = ?1 ORDER BY id"
        );
        sqlx::query(&sql)
            .bind(sql_id(balance.get())?)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(rows::transaction)
            .collect()
    }

    async fn summarize_provider(&self, provider: UserId) -> StoreResult<Vec<TypeSummary>> {
        // Amounts are TEXT, so totals are folded in Rust rather than with SUM().
        let sql = format!("SELECT {BALANCE_COLUMNS} FROM balances WHERE provider_id = ?1");
        let balances = sqlx::query(&sql)
            .bind(sql_id(provider.get())?)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(rows::balance)
            .collect::<StoreResult<Vec<_>>>()?;
        summarize(&balances)
    }

    async fn studio(&self, id: StudioId) -> StoreResult<Option<Studio>> {
        let sql = format!("SELECT {STUDIO_COLUMNS} FROM studios WHERE id = ?1");
        sqlx::query(&sql)
            .bind(sql_id(id.get())?)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(rows::studio)
            .transpose()
    }

    async fn relationships_for_studio(
        &self,
        studio: StudioId,
        status: Option<RelationStatus>,
        page: PageRequest,
    ) -> StoreResult<Page<Relationship>> {
        let studio_id = sql_id(studio.get())?;
        let status_filter = status.map(|s| s.as_str());
        let (limit, offset) = page_bounds(page)?;

        let total = sqlx::query(
            "SELECT COUNT(*) FROM provider_studio_relations \
             WHERE studio_id = ?1 AND (?2 IS NULL OR status = ?2)",
        )
        .bind(studio_id)
        .bind(status_filter)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {RELATION_COLUMNS} FROM provider_studio_relations \
             WHERE studio_id = ?1 AND (?2 IS NULL OR status = ?2) \
             ORDER BY id LIMIT ?3 OFFSET ?4"
        );
        let items = sqlx::query(&sql)
            .bind(studio_id)
            .bind(status_filter)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(rows::relationship)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Page::new(items, count(&total)?, page))
    }
}

/// An open `BEGIN IMMEDIATE` transaction. Dropping it rolls back.
struct SqliteTx {
    tx: sqlx::Transaction<'static, Sqlite>,
}

impl SqliteTx {
    async fn fetch_balance(&mut self, id: BalanceId) -> StoreResult<Option<Balance>> {
        let sql = format!("SELECT {BALANCE_COLUMNS} FROM balances WHERE id = ?1");
        sqlx::query(&sql)
            .bind(sql_id(id.get())?)
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(rows::balance)
            .transpose()
    }
}

#[async_trait]
impl LedgerTx for SqliteTx {
    async fn studio_by_owner(&mut self, owner: UserId) -> StoreResult<Option<Studio>> {
        let sql = format!("SELECT {STUDIO_COLUMNS} FROM studios WHERE owner_id = ?1");
        sqlx::query(&sql)
            .bind(sql_id(owner.get())?)
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(rows::studio)
            .transpose()
    }

    async fn studio(&mut self, id: StudioId) -> StoreResult<Option<Studio>> {
        let sql = format!("SELECT {STUDIO_COLUMNS} FROM studios WHERE id = ?1");
        sqlx::query(&sql)
            .bind(sql_id(id.get())?)
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(rows::studio)
            .transpose()
    }

    async fn relationship(&mut self, id: RelationId) -> StoreResult<Option<Relationship>> {
        let sql = format!("SELECT {RELATION_COLUMNS} FROM provider_studio_relations WHERE id = ?1");
        sqlx::query(&sql)
            .bind(sql_id(id.get())?)
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(rows::relationship)
            .transpose()
    }

    async fn relationship_between(
        &mut self,
        provider: UserId,
        studio: StudioId,
    ) -> StoreResult<Option<Relationship>> {
        let sql = format!(
            "SELECT {RELATION_COLUMNS} FROM provider_studio_relations \
             WHERE provider_id = ?1 AND studio_id = ?2"
        );
        sqlx::query(&sql)
            .bind(sql_id(provider.get())?)
            .bind(sql_id(studio.get())?)
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(rows::relationship)
            .transpose()
    }

    async fn lock_balance(&mut self, key: &BalanceKey) -> StoreResult<Option<Balance>> {
        // The IMMEDIATE transaction already holds the database write lock.
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM balances \
             WHERE player_id = ?1 AND provider_id = ?2 AND studio_id = ?3 AND type = ?4"
        );
        sqlx::query(&sql)
            .bind(sql_id(key.player_id.get())?)
            .bind(sql_id(key.provider_id.get())?)
            .bind(sql_id(key.studio_id.get())?)
            .bind(key.balance_type.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(rows::balance)
            .transpose()
    }

    async fn insert_balance(&mut self, key: &BalanceKey) -> StoreResult<Balance> {
        let now = sql_timestamp(Utc::now());
        let result = sqlx::query(
            "INSERT INTO balances \
             (player_id, provider_id, studio_id, type, amount, frozen_amount, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, '0', '0', ?5, ?5)",
        )
        .bind(sql_id(key.player_id.get())?)
        .bind(sql_id(key.provider_id.get())?)
        .bind(sql_id(key.studio_id.get())?)
        .bind(key.balance_type.as_str())
        .bind(&now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            insert_error(e, || {
                format!(
                    "balance already exists for player {} provider {} studio {} type {}",
                    key.player_id, key.provider_id, key.studio_id, key.balance_type
                )
            })
        })?;

        let id = BalanceId(u64::try_from(result.last_insert_rowid()).unwrap_or_default());
        self.fetch_balance(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("balance {id}")))
    }

    async fn update_balance(
        &mut self,
        id: BalanceId,
        update: BalanceUpdate,
    ) -> StoreResult<Balance> {
        let (sql, value) = match update {
            BalanceUpdate::Amount(amount) => (
                "UPDATE balances SET amount = ?1, updated_at = ?2 WHERE id = ?3",
                amount,
            ),
            BalanceUpdate::Frozen(frozen) => (
                "UPDATE balances SET frozen_amount = ?1, updated_at = ?2 WHERE id = ?3",
                frozen,
            ),
        };
        let result = sqlx::query(sql)
            .bind(sql_decimal(value))
            .bind(sql_timestamp(Utc::now()))
            .bind(sql_id(id.get())?)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("balance {id}")));
        }
        self.fetch_balance(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("balance {id}")))
    }

    async fn append_transaction(&mut self, entry: NewTransaction) -> StoreResult<Transaction> {
        if self.fetch_balance(entry.balance_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("balance {}", entry.balance_id)));
        }
        let result = sqlx::query(
            "INSERT INTO balance_transactions \
             (balance_id, type, amount, before_amount, after_amount, description, operator_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(sql_id(entry.balance_id.get())?)
        .bind(entry.kind.as_str())
        .bind(sql_decimal(entry.amount))
        .bind(sql_decimal(entry.before_amount))
        .bind(sql_decimal(entry.after_amount))
        .bind(&entry.description)
        .bind(sql_id(entry.operator_id.get())?)
        .bind(sql_timestamp(Utc::now()))
        .execute(&mut *self.tx)
        .await?;

        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM balance_transactions WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(result.last_insert_rowid())
            .fetch_one(&mut *self.tx)
            .await?;
        rows::transaction(&row)
    }

    async fn insert_studio(&mut self, studio: NewStudio) -> StoreResult<Studio> {
        let result = sqlx::query(
            "INSERT INTO studios (owner_id, name, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(sql_id(studio.owner_id.get())?)
        .bind(&studio.name)
        .bind(sql_timestamp(Utc::now()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| insert_error(e, || format!("user {} already owns a studio", studio.owner_id)))?;

        let sql = format!("SELECT {STUDIO_COLUMNS} FROM studios WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(result.last_insert_rowid())
            .fetch_one(&mut *self.tx)
            .await?;
        rows::studio(&row)
    }

    async fn insert_relationship(
        &mut self,
        relationship: NewRelationship,
    ) -> StoreResult<Relationship> {
        let NewRelationship {
            provider_id,
            studio_id,
            notes,
        } = relationship;
        let now = sql_timestamp(Utc::now());
        let result = sqlx::query(
            "INSERT INTO provider_studio_relations \
             (provider_id, studio_id, status, applied_at, notes, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?4, ?4)",
        )
        .bind(sql_id(provider_id.get())?)
        .bind(sql_id(studio_id.get())?)
        .bind(RelationStatus::Pending.as_str())
        .bind(&now)
        .bind(&notes)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            insert_error(e, || {
                format!("provider {provider_id} already applied to studio {studio_id}")
            })
        })?;

        let sql = format!("SELECT {RELATION_COLUMNS} FROM provider_studio_relations WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(result.last_insert_rowid())
            .fetch_one(&mut *self.tx)
            .await?;
        rows::relationship(&row)
    }

    async fn decide_relationship(
        &mut self,
        id: RelationId,
        decision: RelationDecision,
    ) -> StoreResult<Relationship> {
        let current = self
            .relationship(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("relationship {id}")))?;
        if !current.status.can_transition_to(decision.status) {
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: decision.status,
            });
        }

        let now = sql_timestamp(Utc::now());
        sqlx::query(
            "UPDATE provider_studio_relations \
             SET status = ?1, notes = ?2, processed_at = ?3, updated_at = ?3 \
             WHERE id = ?4 AND status = ?5",
        )
        .bind(decision.status.as_str())
        .bind(&decision.notes)
        .bind(&now)
        .bind(sql_id(id.get())?)
        .bind(current.status.as_str())
        .execute(&mut *self.tx)
        .await?;

        self.relationship(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("relationship {id}")))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
