use async_trait::async_trait;
use tally_types::{
    Balance, BalanceId, BalanceKey, BalanceType, Page, PageRequest, RelationId, RelationStatus,
    Relationship, Studio, StudioId, Transaction, TransactionKind, TypeSummary, UserId,
};

use crate::error::StoreResult;
use crate::records::{BalanceUpdate, NewRelationship, NewStudio, NewTransaction, RelationDecision};

/// Durable home of balances, the transaction log, and the relationship
/// directory.
///
/// All implementations must satisfy these invariants:
/// - Every mutation happens inside a [`LedgerTx`] obtained from
///   [`LedgerStore::begin`]; nothing is visible to other readers until
///   [`LedgerTx::commit`].
/// - A transaction dropped without `commit` rolls back.
/// - Concurrent transactions touching the same balance are serialized for
///   their whole lifetime, so a read-modify-write inside one transaction can
///   never lose an update.
/// - At most one balance exists per [`BalanceKey`] and at most one
///   relationship per (provider, studio) pair.
/// - The read methods below are side-effect free.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a serialized read-write transaction.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>>;

    async fn balance(&self, id: BalanceId) -> StoreResult<Option<Balance>>;

    /// A player's balances ordered by id, optionally restricted to one type.
    async fn balances_for_player(
        &self,
        player: UserId,
        balance_type: Option<BalanceType>,
        page: PageRequest,
    ) -> StoreResult<Page<Balance>>;

    /// Every unit type a player holds with one provider under one studio.
    async fn balances_with_provider(
        &self,
        player: UserId,
        provider: UserId,
        studio: StudioId,
    ) -> StoreResult<Vec<Balance>>;

    /// A balance's log entries, newest first.
    async fn transactions(
        &self,
        balance: BalanceId,
        kind: Option<TransactionKind>,
        page: PageRequest,
    ) -> StoreResult<Page<Transaction>>;

    /// A balance's full log in application order (oldest first).
    async fn transaction_chain(&self, balance: BalanceId) -> StoreResult<Vec<Transaction>>;

    /// Per-type totals and distinct player counts over a provider's balances.
    async fn summarize_provider(&self, provider: UserId) -> StoreResult<Vec<TypeSummary>>;

    async fn studio(&self, id: StudioId) -> StoreResult<Option<Studio>>;

    /// Applications to a studio ordered by id.
    async fn relationships_for_studio(
        &self,
        studio: StudioId,
        status: Option<RelationStatus>,
        page: PageRequest,
    ) -> StoreResult<Page<Relationship>>;
}

/// One open store transaction.
///
/// Reads made through a `LedgerTx` observe its own uncommitted writes.
#[async_trait]
pub trait LedgerTx: Send {
    async fn studio_by_owner(&mut self, owner: UserId) -> StoreResult<Option<Studio>>;

    async fn studio(&mut self, id: StudioId) -> StoreResult<Option<Studio>>;

    async fn relationship(&mut self, id: RelationId) -> StoreResult<Option<Relationship>>;

    async fn relationship_between(
        &mut self,
        provider: UserId,
        studio: StudioId,
    ) -> StoreResult<Option<Relationship>>;

    /// Read the balance for `key`, holding it for the rest of the
    /// transaction.
    async fn lock_balance(&mut self, key: &BalanceKey) -> StoreResult<Option<Balance>>;

    /// Create a zeroed balance for `key`.
    ///
    /// Fails with [`StoreError::Conflict`](crate::StoreError::Conflict) if a
    /// balance for `key` already exists.
    async fn insert_balance(&mut self, key: &BalanceKey) -> StoreResult<Balance>;

    async fn update_balance(&mut self, id: BalanceId, update: BalanceUpdate)
        -> StoreResult<Balance>;

    async fn append_transaction(&mut self, entry: NewTransaction) -> StoreResult<Transaction>;

    /// Fails with `Conflict` if the owner already has a studio.
    async fn insert_studio(&mut self, studio: NewStudio) -> StoreResult<Studio>;

    /// Fails with `Conflict` if the pair already has a relationship.
    async fn insert_relationship(
        &mut self,
        relationship: NewRelationship,
    ) -> StoreResult<Relationship>;

    /// Apply a decision to a pending relationship.
    ///
    /// Fails with `InvalidTransition` unless the stored status is pending and
    /// the decision is final.
    async fn decide_relationship(
        &mut self,
        id: RelationId,
        decision: RelationDecision,
    ) -> StoreResult<Relationship>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
