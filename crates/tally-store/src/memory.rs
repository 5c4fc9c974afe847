use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tally_types::{
    Balance, BalanceId, BalanceKey, BalanceType, Page, PageRequest, RelationId, RelationStatus,
    Relationship, Studio, StudioId, Transaction, TransactionId, TransactionKind, TypeSummary,
    UserId,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::aggregate::summarize;
use crate::error::{StoreError, StoreResult};
use crate::records::{BalanceUpdate, NewRelationship, NewStudio, NewTransaction, RelationDecision};
use crate::traits::{LedgerStore, LedgerTx};

/// In-memory ledger store for tests and embedding.
///
/// A transaction owns the store's mutex for its whole lifetime, which
/// serializes every read-modify-write. Writes are staged inside the
/// transaction and published only on commit, so dropping a transaction
/// discards them.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    ids: IdCounters,
    balances: BTreeMap<BalanceId, Balance>,
    balance_keys: HashMap<BalanceKey, BalanceId>,
    transactions: Vec<Transaction>,
    studios: BTreeMap<StudioId, Studio>,
    relations: BTreeMap<RelationId, Relationship>,
}

#[derive(Clone, Copy, Default)]
struct IdCounters {
    balance: u64,
    transaction: u64,
    studio: u64,
    relation: u64,
}

impl IdCounters {
    fn next_balance(&mut self) -> BalanceId {
        self.balance += 1;
        BalanceId(self.balance)
    }

    fn next_transaction(&mut self) -> TransactionId {
        self.transaction += 1;
        TransactionId(self.transaction)
    }

    fn next_studio(&mut self) -> StudioId {
        self.studio += 1;
        StudioId(self.studio)
    }

    fn next_relation(&mut self) -> RelationId {
        self.relation += 1;
        RelationId(self.relation)
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed balance rows.
    pub async fn balance_count(&self) -> usize {
        self.state.lock().await.balances.len()
    }

    /// Number of committed transaction log entries.
    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }
}

impl std::fmt::Debug for InMemoryLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedgerStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let state = Arc::clone(&self.state).lock_owned().await;
        let ids = state.ids;
        Ok(Box::new(MemoryTx {
            state,
            staged: Staged {
                ids,
                ..Staged::default()
            },
        }))
    }

    async fn balance(&self, id: BalanceId) -> StoreResult<Option<Balance>> {
        Ok(self.state.lock().await.balances.get(&id).cloned())
    }

    async fn balances_for_player(
        &self,
        player: UserId,
        balance_type: Option<BalanceType>,
        page: PageRequest,
    ) -> StoreResult<Page<Balance>> {
        let state = self.state.lock().await;
        let matching: Vec<Balance> = state
            .balances
            .values()
            .filter(|b| b.player_id == player)
            .filter(|b| balance_type.map_or(true, |ty| b.balance_type == ty))
            .cloned()
            .collect();
        Ok(Page::new(page.slice(&matching), matching.len() as u64, page))
    }

    async fn balances_with_provider(
        &self,
        player: UserId,
        provider: UserId,
        studio: StudioId,
    ) -> StoreResult<Vec<Balance>> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .values()
            .filter(|b| b.player_id == player && b.provider_id == provider && b.studio_id == studio)
            .cloned()
            .collect())
    }

    async fn transactions(
        &self,
        balance: BalanceId,
        kind: Option<TransactionKind>,
        page: PageRequest,
    ) -> StoreResult<Page<Transaction>> {
        let state = self.state.lock().await;
        let matching: Vec<Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.balance_id == balance)
            .filter(|t| kind.map_or(true, |k| t.kind == k))
            .cloned()
            .collect();
        Ok(Page::new(page.slice(&matching), matching.len() as u64, page))
    }

    async fn transaction_chain(&self, balance: BalanceId) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.balance_id == balance)
            .cloned()
            .collect())
    }

    async fn summarize_provider(&self, provider: UserId) -> StoreResult<Vec<TypeSummary>> {
        let state = self.state.lock().await;
        summarize(state.balances.values().filter(|b| b.provider_id == provider))
    }

    async fn studio(&self, id: StudioId) -> StoreResult<Option<Studio>> {
        Ok(self.state.lock().await.studios.get(&id).cloned())
    }

    async fn relationships_for_studio(
        &self,
        studio: StudioId,
        status: Option<RelationStatus>,
        page: PageRequest,
    ) -> StoreResult<Page<Relationship>> {
        let state = self.state.lock().await;
        let matching: Vec<Relationship> = state
            .relations
            .values()
            .filter(|r| r.studio_id == studio)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        Ok(Page::new(page.slice(&matching), matching.len() as u64, page))
    }
}

/// Writes made by an open [`MemoryTx`], not yet visible to readers.
#[derive(Default)]
struct Staged {
    ids: IdCounters,
    balances: BTreeMap<BalanceId, Balance>,
    transactions: Vec<Transaction>,
    studios: BTreeMap<StudioId, Studio>,
    relations: BTreeMap<RelationId, Relationship>,
}

struct MemoryTx {
    state: OwnedMutexGuard<MemoryState>,
    staged: Staged,
}

impl MemoryTx {
    fn find_balance(&self, key: &BalanceKey) -> Option<Balance> {
        self.staged
            .balances
            .values()
            .find(|b| b.key() == *key)
            .or_else(|| {
                self.state
                    .balance_keys
                    .get(key)
                    .and_then(|id| self.state.balances.get(id))
            })
            .cloned()
    }

    fn find_studio(&self, predicate: impl Fn(&Studio) -> bool) -> Option<Studio> {
        self.staged
            .studios
            .values()
            .find(|&s| predicate(s))
            .or_else(|| self.state.studios.values().find(|&s| predicate(s)))
            .cloned()
    }

    fn find_relation(&self, predicate: impl Fn(&Relationship) -> bool) -> Option<Relationship> {
        self.staged
            .relations
            .values()
            .find(|&r| predicate(r))
            .or_else(|| self.state.relations.values().find(|&r| predicate(r)))
            .cloned()
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn studio_by_owner(&mut self, owner: UserId) -> StoreResult<Option<Studio>> {
        Ok(self.find_studio(|s| s.owner_id == owner))
    }

    async fn studio(&mut self, id: StudioId) -> StoreResult<Option<Studio>> {
        Ok(self.find_studio(|s| s.id == id))
    }

    async fn relationship(&mut self, id: RelationId) -> StoreResult<Option<Relationship>> {
        Ok(self.find_relation(|r| r.id == id))
    }

    async fn relationship_between(
        &mut self,
        provider: UserId,
        studio: StudioId,
    ) -> StoreResult<Option<Relationship>> {
        Ok(self.find_relation(|r| r.provider_id == provider && r.studio_id == studio))
    }

    async fn lock_balance(&mut self, key: &BalanceKey) -> StoreResult<Option<Balance>> {
        Ok(self.find_balance(key))
    }

    async fn insert_balance(&mut self, key: &BalanceKey) -> StoreResult<Balance> {
        if self.find_balance(key).is_some() {
            return Err(StoreError::Conflict(format!(
                "balance already exists for player {} provider {} studio {} type {}",
                key.player_id, key.provider_id, key.studio_id, key.balance_type
            )));
        }
        let id = self.staged.ids.next_balance();
        let balance = Balance::opened(id, *key, Utc::now());
        self.staged.balances.insert(id, balance.clone());
        Ok(balance)
    }

    async fn update_balance(
        &mut self,
        id: BalanceId,
        update: BalanceUpdate,
    ) -> StoreResult<Balance> {
        let mut balance = self
            .staged
            .balances
            .get(&id)
            .or_else(|| self.state.balances.get(&id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("balance {id}")))?;
        match update {
            BalanceUpdate::Amount(amount) => balance.amount = amount,
            BalanceUpdate::Frozen(frozen) => balance.frozen_amount = frozen,
        }
        balance.updated_at = Utc::now();
        self.staged.balances.insert(id, balance.clone());
        Ok(balance)
    }

    async fn append_transaction(&mut self, entry: NewTransaction) -> StoreResult<Transaction> {
        let known = self.staged.balances.contains_key(&entry.balance_id)
            || self.state.balances.contains_key(&entry.balance_id);
        if !known {
            return Err(StoreError::NotFound(format!("balance {}", entry.balance_id)));
        }
        let transaction = Transaction {
            id: self.staged.ids.next_transaction(),
            balance_id: entry.balance_id,
            kind: entry.kind,
            amount: entry.amount,
            before_amount: entry.before_amount,
            after_amount: entry.after_amount,
            description: entry.description,
            operator_id: entry.operator_id,
            created_at: Utc::now(),
        };
        self.staged.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn insert_studio(&mut self, studio: NewStudio) -> StoreResult<Studio> {
        if self.find_studio(|s| s.owner_id == studio.owner_id).is_some() {
            return Err(StoreError::Conflict(format!(
                "user {} already owns a studio",
                studio.owner_id
            )));
        }
        let studio = Studio {
            id: self.staged.ids.next_studio(),
            owner_id: studio.owner_id,
            name: studio.name,
            created_at: Utc::now(),
        };
        self.staged.studios.insert(studio.id, studio.clone());
        Ok(studio)
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
        if self
            .find_relation(|r| r.provider_id == provider_id && r.studio_id == studio_id)
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "provider {provider_id} already applied to studio {studio_id}"
            )));
        }
        let now = Utc::now();
        let relationship = Relationship {
            id: self.staged.ids.next_relation(),
            provider_id,
            studio_id,
            status: RelationStatus::Pending,
            applied_at: now,
            processed_at: None,
            notes,
            created_at: now,
            updated_at: now,
        };
        self.staged
            .relations
            .insert(relationship.id, relationship.clone());
        Ok(relationship)
    }

    async fn decide_relationship(
        &mut self,
        id: RelationId,
        decision: RelationDecision,
    ) -> StoreResult<Relationship> {
        let mut relationship = self
            .find_relation(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("relationship {id}")))?;
        if !relationship.status.can_transition_to(decision.status) {
            return Err(StoreError::InvalidTransition {
                from: relationship.status,
                to: decision.status,
            });
        }
        let now = Utc::now();
        relationship.status = decision.status;
        relationship.notes = decision.notes;
        relationship.processed_at = Some(now);
        relationship.updated_at = now;
        self.staged.relations.insert(id, relationship.clone());
        Ok(relationship)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut state, staged } = *self;
        for (id, balance) in staged.balances {
            state.balance_keys.insert(balance.key(), id);
            state.balances.insert(id, balance);
        }
        state.transactions.extend(staged.transactions);
        state.studios.extend(staged.studios);
        state.relations.extend(staged.relations);
        state.ids = staged.ids;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
