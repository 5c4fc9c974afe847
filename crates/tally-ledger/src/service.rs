use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_gate::{CreditGate, CreditRequest, GateFacts};
use tally_store::{
    BalanceUpdate, LedgerStore, LedgerTx, NewRelationship, NewStudio, NewTransaction,
    RelationDecision, StoreError,
};
use tally_types::{
    Actor, Balance, BalanceId, BalanceKey, BalanceType, BalanceView, Page, PageRequest,
    RelationId, RelationStatus, Relationship, Role, Studio, StudioId, Transaction,
    TransactionKind, TypeSummary, UserId,
};
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditReport, BalanceAuditor};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};

/// One requested balance movement.
///
/// `amount` is the positive magnitude; the sign applied to the balance comes
/// from the movement kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub player_id: UserId,
    pub provider_id: UserId,
    /// Ignored for studio actors, whose own studio is used instead.
    #[serde(default)]
    pub studio_id: StudioId,
    #[serde(rename = "type")]
    pub balance_type: BalanceType,
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
}

/// The ledger: every balance movement, query, and directory change goes
/// through here.
///
/// Each movement runs as one store transaction: the gate facts are read, the
/// gate decides, the balance row is found or created, updated, and a
/// transaction log entry appended, then everything commits together. Any
/// failure drops the transaction, which rolls it back.
pub struct LedgerService<S: LedgerStore> {
    store: Arc<S>,
    gate: CreditGate,
    config: LedgerConfig,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, LedgerConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: LedgerConfig) -> Self {
        Self {
            store,
            gate: CreditGate::with_default_stages(),
            config,
        }
    }

    /// Replace the authorization pipeline.
    pub fn with_gate(mut self, gate: CreditGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Normalize raw paging input with the configured default size.
    pub fn page_request(&self, page: i64, page_size: i64) -> PageRequest {
        PageRequest::with_default_size(page, page_size, self.config.default_page_size)
    }

    // -----------------------------------------------------------------------
    // Movements
    // -----------------------------------------------------------------------

    /// Credit a balance, creating it on first use.
    pub async fn add_balance(&self, actor: Actor, movement: Movement) -> LedgerResult<BalanceView> {
        self.apply(actor, TransactionKind::Recharge, movement).await
    }

    /// Spend from the available (unfrozen) part of an existing balance.
    pub async fn consume(&self, actor: Actor, movement: Movement) -> LedgerResult<BalanceView> {
        self.apply(actor, TransactionKind::Consume, movement).await
    }

    /// Return value to an existing balance.
    pub async fn refund(&self, actor: Actor, movement: Movement) -> LedgerResult<BalanceView> {
        self.apply(actor, TransactionKind::Refund, movement).await
    }

    /// Reserve part of the available amount.
    pub async fn freeze(&self, actor: Actor, movement: Movement) -> LedgerResult<BalanceView> {
        self.apply(actor, TransactionKind::Freeze, movement).await
    }

    /// Release reserved value.
    pub async fn unfreeze(&self, actor: Actor, movement: Movement) -> LedgerResult<BalanceView> {
        self.apply(actor, TransactionKind::Unfreeze, movement).await
    }

    /// Apply one movement atomically.
    #[instrument(
        skip(self, movement),
        fields(
            player = %movement.player_id,
            provider = %movement.provider_id,
            balance_type = %movement.balance_type,
            amount = %movement.amount,
        )
    )]
    pub async fn apply(
        &self,
        actor: Actor,
        kind: TransactionKind,
        movement: Movement,
    ) -> LedgerResult<BalanceView> {
        self.validate(&movement)?;

        let request = CreditRequest {
            actor,
            player_id: movement.player_id,
            provider_id: movement.provider_id,
            studio_id: movement.studio_id,
            balance_type: movement.balance_type,
        };

        let mut tx = self.store.begin().await?;
        let facts = gate_facts(tx.as_mut(), &request).await?;
        let credit = match self.gate.authorize(&request, &facts)? {
            Ok(credit) => credit,
            Err(denial) => {
                warn!(%actor, stage = %denial.stage, reason = %denial.reason, "movement denied");
                return Err(denial.into());
            }
        };
        let key = credit.balance_key();

        let balance = if kind.creates_balance() {
            self.find_or_create(tx.as_mut(), &key).await?
        } else {
            tx.lock_balance(&key)
                .await?
                .ok_or_else(|| LedgerError::NotFound(describe_key(&key)))?
        };

        check_precondition(&balance, kind, movement.amount)?;

        let column = kind.column();
        let before = balance.column(column);
        let delta = if kind.is_increase() {
            movement.amount
        } else {
            -movement.amount
        };
        let after = before.checked_add(delta).ok_or_else(|| {
            LedgerError::Validation(format!(
                "amount {} overflows balance {} ({column:?} is {before})",
                movement.amount, balance.id
            ))
        })?;

        let updated = tx
            .update_balance(balance.id, BalanceUpdate::for_column(column, after))
            .await?;
        let entry = tx
            .append_transaction(NewTransaction {
                balance_id: balance.id,
                kind,
                amount: delta,
                before_amount: before,
                after_amount: after,
                description: movement.description,
                operator_id: actor.id,
            })
            .await?;
        tx.commit().await?;

        info!(
            balance = %updated.id,
            transaction = %entry.id,
            %kind,
            %before,
            %after,
            "movement committed"
        );
        self.view(updated).await
    }

    fn validate(&self, movement: &Movement) -> LedgerResult<()> {
        if movement.amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "amount must be positive, got {}",
                movement.amount
            )));
        }
        let len = movement.description.chars().count();
        if len > self.config.max_description_len {
            return Err(LedgerError::Validation(format!(
                "description is {len} characters, limit is {}",
                self.config.max_description_len
            )));
        }
        Ok(())
    }

    /// Read the balance for `key`, creating it if absent.
    ///
    /// A conflicting insert means another writer created the row first; the
    /// row is re-read instead of failing the movement.
    async fn find_or_create(&self, tx: &mut dyn LedgerTx, key: &BalanceKey) -> LedgerResult<Balance> {
        let attempts = self.config.create_retries.max(1);
        for attempt in 1..=attempts {
            if let Some(balance) = tx.lock_balance(key).await? {
                return Ok(balance);
            }
            match tx.insert_balance(key).await {
                Ok(balance) => {
                    debug!(balance = %balance.id, "balance created");
                    return Ok(balance);
                }
                Err(StoreError::Conflict(reason)) => {
                    warn!(attempt, %reason, "balance created concurrently, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LedgerError::Conflict(format!(
            "{} could not be created after {attempts} attempts",
            describe_key(key)
        )))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// A player's own balances, ordered by id.
    #[instrument(skip(self))]
    pub async fn list_balances(
        &self,
        player: UserId,
        balance_type: Option<BalanceType>,
        page: PageRequest,
    ) -> LedgerResult<Page<BalanceView>> {
        let balances = self
            .store
            .balances_for_player(player, balance_type, page)
            .await?;
        let studios = self.studios_for(&balances.items).await?;
        Ok(balances.map(|balance| {
            let studio = studios.get(&balance.studio_id).cloned();
            BalanceView { balance, studio }
        }))
    }

    /// Every unit type a player holds with one provider under one studio.
    #[instrument(skip(self))]
    pub async fn balances_with_provider(
        &self,
        player: UserId,
        provider: UserId,
        studio: StudioId,
    ) -> LedgerResult<Vec<BalanceView>> {
        let balances = self
            .store
            .balances_with_provider(player, provider, studio)
            .await?;
        let studios = self.studios_for(&balances).await?;
        Ok(balances
            .into_iter()
            .map(|balance| {
                let studio = studios.get(&balance.studio_id).cloned();
                BalanceView { balance, studio }
            })
            .collect())
    }

    /// A balance's log, newest first.
    ///
    /// A missing balance is reported as forbidden, like a foreign one, so the
    /// answer does not disclose which balance ids exist.
    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        balance: BalanceId,
        requester: UserId,
        kind: Option<TransactionKind>,
        page: PageRequest,
    ) -> LedgerResult<Page<Transaction>> {
        let owned = self
            .store
            .balance(balance)
            .await?
            .is_some_and(|b| b.player_id == requester);
        if !owned {
            warn!(%balance, %requester, "transaction history denied");
            return Err(LedgerError::Forbidden(format!(
                "balance {balance} does not belong to player {requester}"
            )));
        }
        Ok(self.store.transactions(balance, kind, page).await?)
    }

    /// Per-type totals over a provider's balances, ordered money, time, point.
    #[instrument(skip(self))]
    pub async fn summarize_by_type(&self, provider: UserId) -> LedgerResult<Vec<TypeSummary>> {
        Ok(self.store.summarize_provider(provider).await?)
    }

    /// Replay a balance's full log and compare it with the stored columns.
    #[instrument(skip(self))]
    pub async fn audit_balance(&self, balance: BalanceId) -> LedgerResult<AuditReport> {
        let stored = self
            .store
            .balance(balance)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("balance {balance}")))?;
        let chain = self.store.transaction_chain(balance).await?;
        let report = BalanceAuditor::replay(&stored, &chain);
        if !report.is_consistent() {
            warn!(%balance, violations = report.violations.len(), "balance audit failed");
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Studio directory
    // -----------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn create_studio(&self, owner: UserId, name: &str) -> LedgerResult<Studio> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::Validation("studio name must not be empty".into()));
        }

        let mut tx = self.store.begin().await?;
        if let Some(existing) = tx.studio_by_owner(owner).await? {
            return Err(LedgerError::Conflict(format!(
                "user {owner} already owns studio {}",
                existing.id
            )));
        }
        let studio = tx
            .insert_studio(NewStudio {
                owner_id: owner,
                name: name.to_string(),
            })
            .await
            .map_err(conflict)?;
        tx.commit().await?;

        info!(studio = %studio.id, %owner, "studio created");
        Ok(studio)
    }

    /// File a provider's pending application to a studio.
    #[instrument(skip(self, notes))]
    pub async fn apply_to_studio(
        &self,
        actor: Actor,
        studio: StudioId,
        notes: &str,
    ) -> LedgerResult<Relationship> {
        if actor.role != Role::Provider {
            return Err(LedgerError::Forbidden(format!(
                "only providers may apply to studios, not {}",
                actor.role
            )));
        }

        let mut tx = self.store.begin().await?;
        if tx.studio(studio).await?.is_none() {
            return Err(LedgerError::NotFound(format!("studio {studio}")));
        }
        if tx.relationship_between(actor.id, studio).await?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "application already exists for provider {} and studio {studio}",
                actor.id
            )));
        }
        let relationship = tx
            .insert_relationship(NewRelationship {
                provider_id: actor.id,
                studio_id: studio,
                notes: notes.to_string(),
            })
            .await
            .map_err(conflict)?;
        tx.commit().await?;

        info!(relation = %relationship.id, provider = %actor.id, %studio, "application filed");
        Ok(relationship)
    }

    /// Approve or reject a pending application. Only the studio's owner may
    /// decide, and only once.
    #[instrument(skip(self, notes))]
    pub async fn process_application(
        &self,
        actor: Actor,
        relation: RelationId,
        decision: RelationStatus,
        notes: &str,
    ) -> LedgerResult<Relationship> {
        if decision == RelationStatus::Pending {
            return Err(LedgerError::Validation(
                "decision must be approved or rejected".into(),
            ));
        }
        if actor.role != Role::Studio {
            return Err(LedgerError::Forbidden(format!(
                "only studio owners may process applications, not {}",
                actor.role
            )));
        }

        let mut tx = self.store.begin().await?;
        let current = tx
            .relationship(relation)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("relationship {relation}")))?;
        let owner = tx.studio(current.studio_id).await?.map(|s| s.owner_id);
        if owner != Some(actor.id) {
            return Err(LedgerError::Forbidden(format!(
                "user {} does not own studio {}",
                actor.id, current.studio_id
            )));
        }
        if current.status != RelationStatus::Pending {
            return Err(LedgerError::Validation(format!(
                "application {relation} already processed ({})",
                current.status
            )));
        }

        let decided = tx
            .decide_relationship(
                relation,
                RelationDecision {
                    status: decision,
                    notes: notes.to_string(),
                },
            )
            .await
            .map_err(|e| match e {
                StoreError::InvalidTransition { from, .. } => LedgerError::Validation(format!(
                    "application {relation} already processed ({from})"
                )),
                other => other.into(),
            })?;
        tx.commit().await?;

        info!(%relation, status = %decided.status, "application processed");
        Ok(decided)
    }

    /// Applications to a studio, visible to its owner only.
    #[instrument(skip(self))]
    pub async fn list_applications(
        &self,
        actor: Actor,
        studio: StudioId,
        status: Option<RelationStatus>,
        page: PageRequest,
    ) -> LedgerResult<Page<Relationship>> {
        let found = self
            .store
            .studio(studio)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("studio {studio}")))?;
        if actor.role != Role::Studio || found.owner_id != actor.id {
            return Err(LedgerError::Forbidden(format!(
                "{actor} may not list applications of studio {studio}"
            )));
        }
        Ok(self
            .store
            .relationships_for_studio(studio, status, page)
            .await?)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn view(&self, balance: Balance) -> LedgerResult<BalanceView> {
        let studio = if balance.studio_id.is_independent() {
            None
        } else {
            self.store.studio(balance.studio_id).await?
        };
        Ok(BalanceView { balance, studio })
    }

    async fn studios_for(&self, balances: &[Balance]) -> LedgerResult<HashMap<StudioId, Studio>> {
        let mut studios = HashMap::new();
        for balance in balances {
            let id = balance.studio_id;
            if id.is_independent() || studios.contains_key(&id) {
                continue;
            }
            if let Some(studio) = self.store.studio(id).await? {
                studios.insert(id, studio);
            }
        }
        Ok(studios)
    }
}

/// Directory state the gate needs, read inside the movement's transaction.
async fn gate_facts(tx: &mut dyn LedgerTx, request: &CreditRequest) -> LedgerResult<GateFacts> {
    if request.actor.role != Role::Studio {
        return Ok(GateFacts::none());
    }
    let Some(studio) = tx.studio_by_owner(request.actor.id).await? else {
        return Ok(GateFacts::none());
    };
    let relationship = tx.relationship_between(request.provider_id, studio.id).await?;
    Ok(GateFacts::with_studio(studio, relationship))
}

fn check_precondition(balance: &Balance, kind: TransactionKind, amount: Decimal) -> LedgerResult<()> {
    match kind {
        TransactionKind::Consume | TransactionKind::Freeze if balance.available() < amount => {
            Err(LedgerError::Validation(format!(
                "insufficient available balance: {} available, {amount} requested",
                balance.available()
            )))
        }
        TransactionKind::Unfreeze if balance.frozen_amount < amount => {
            Err(LedgerError::Validation(format!(
                "insufficient frozen balance: {} frozen, {amount} requested",
                balance.frozen_amount
            )))
        }
        _ => Ok(()),
    }
}

fn conflict(error: StoreError) -> LedgerError {
    match error {
        StoreError::Conflict(reason) => LedgerError::Conflict(reason),
        other => other.into(),
    }
}

fn describe_key(key: &BalanceKey) -> String {
    format!(
        "{} balance of player {} with provider {} (studio {})",
        key.balance_type, key.player_id, key.provider_id, key.studio_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tally_store::{DatabaseConfig, InMemoryLedgerStore, SqliteLedgerStore, StoreResult};

    fn memory() -> LedgerService<InMemoryLedgerStore> {
        LedgerService::new(Arc::new(InMemoryLedgerStore::new()))
    }

    async fn sqlite() -> LedgerService<SqliteLedgerStore> {
        LedgerService::new(Arc::new(SqliteLedgerStore::in_memory().await.unwrap()))
    }

    fn movement(player: u64, provider: u64, studio: u64, amount: Decimal) -> Movement {
        Movement {
            player_id: UserId(player),
            provider_id: UserId(provider),
            studio_id: StudioId(studio),
            balance_type: BalanceType::Money,
            amount,
            description: String::new(),
        }
    }

    /// Studio 9 owns a studio, provider 3 is approved in it.
    async fn affiliate<S: LedgerStore>(ledger: &LedgerService<S>) -> Studio {
        let studio = ledger.create_studio(UserId(9), "North").await.unwrap();
        let application = ledger
            .apply_to_studio(Actor::provider(3u64), studio.id, "")
            .await
            .unwrap();
        ledger
            .process_application(
                Actor::studio(9u64),
                application.id,
                RelationStatus::Approved,
                "",
            )
            .await
            .unwrap();
        studio
    }

    // -----------------------------------------------------------------------
    // Scenarios shared by both backends
    // -----------------------------------------------------------------------

    async fn self_credit_accumulates<S: LedgerStore>(ledger: LedgerService<S>) {
        let first = ledger
            .add_balance(Actor::provider(3u64), movement(7, 3, 0, dec!(100.00)))
            .await
            .unwrap();
        assert_eq!(first.balance.amount, dec!(100.00));
        assert!(first.studio.is_none());

        let second = ledger
            .add_balance(Actor::provider(3u64), movement(7, 3, 0, dec!(50.00)))
            .await
            .unwrap();
        assert_eq!(second.balance.id, first.balance.id);
        assert_eq!(second.balance.amount, dec!(150.00));

        let log = ledger
            .list_transactions(first.balance.id, UserId(7), None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(log.total, 2);
        let newest = &log.items[0];
        assert_eq!(newest.kind, TransactionKind::Recharge);
        assert_eq!(
            (newest.before_amount, newest.amount, newest.after_amount),
            (dec!(100), dec!(50), dec!(150))
        );
        let oldest = &log.items[1];
        assert_eq!(
            (oldest.before_amount, oldest.amount, oldest.after_amount),
            (dec!(0), dec!(100), dec!(100))
        );
        assert_eq!(oldest.operator_id, UserId(3));
    }

    async fn studio_credit_uses_owned_studio<S: LedgerStore>(ledger: LedgerService<S>) {
        let req = movement(7, 3, 0, dec!(10));
        let denied = ledger
            .add_balance(Actor::studio(9u64), req.clone())
            .await
            .unwrap_err();
        assert_eq!(denied.kind(), ErrorKind::NotFound);

        let studio = ledger.create_studio(UserId(9), "North").await.unwrap();
        let denied = ledger
            .add_balance(Actor::studio(9u64), req.clone())
            .await
            .unwrap_err();
        assert_eq!(denied.kind(), ErrorKind::Forbidden);

        let application = ledger
            .apply_to_studio(Actor::provider(3u64), studio.id, "please")
            .await
            .unwrap();
        let denied = ledger
            .add_balance(Actor::studio(9u64), req.clone())
            .await
            .unwrap_err();
        assert_eq!(denied.kind(), ErrorKind::Forbidden);

        ledger
            .process_application(Actor::studio(9u64), application.id, RelationStatus::Approved, "ok")
            .await
            .unwrap();
        let view = ledger.add_balance(Actor::studio(9u64), req).await.unwrap();
        assert_eq!(view.balance.studio_id, studio.id);
        assert_eq!(view.studio.as_ref().map(|s| s.id), Some(studio.id));

        let listed = ledger
            .balances_with_provider(UserId(7), UserId(3), studio.id)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].balance.amount, dec!(10));
        assert!(ledger
            .balances_with_provider(UserId(7), UserId(3), StudioId::INDEPENDENT)
            .await
            .unwrap()
            .is_empty());
    }

    async fn symmetric_movements<S: LedgerStore>(ledger: LedgerService<S>) {
        let provider = Actor::provider(3u64);
        let missing = ledger
            .consume(provider, movement(7, 3, 0, dec!(1)))
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        ledger
            .add_balance(provider, movement(7, 3, 0, dec!(100)))
            .await
            .unwrap();
        let frozen = ledger
            .freeze(provider, movement(7, 3, 0, dec!(30)))
            .await
            .unwrap();
        assert_eq!(frozen.balance.frozen_amount, dec!(30));
        assert_eq!(frozen.balance.available(), dec!(70));

        let over = ledger
            .consume(provider, movement(7, 3, 0, dec!(71)))
            .await
            .unwrap_err();
        assert_eq!(over.kind(), ErrorKind::Validation);
        assert!(over.to_string().contains("insufficient available balance"));

        ledger
            .consume(provider, movement(7, 3, 0, dec!(70)))
            .await
            .unwrap();
        let too_much = ledger
            .unfreeze(provider, movement(7, 3, 0, dec!(31)))
            .await
            .unwrap_err();
        assert!(too_much.to_string().contains("insufficient frozen balance"));

        ledger
            .unfreeze(provider, movement(7, 3, 0, dec!(10)))
            .await
            .unwrap();
        let refunded = ledger
            .refund(provider, movement(7, 3, 0, dec!(5)))
            .await
            .unwrap();
        assert_eq!(refunded.balance.amount, dec!(35));
        assert_eq!(refunded.balance.frozen_amount, dec!(20));

        let report = ledger.audit_balance(refunded.balance.id).await.unwrap();
        assert!(report.is_consistent(), "{:?}", report.violations);
        assert_eq!(report.transaction_count, 5);

        let consumes = ledger
            .list_transactions(
                refunded.balance.id,
                UserId(7),
                Some(TransactionKind::Consume),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(consumes.total, 1);
        assert_eq!(consumes.items[0].amount, dec!(-70));
    }

    async fn denials_leave_no_trace<S: LedgerStore>(ledger: LedgerService<S>) {
        let player = ledger
            .add_balance(Actor::player(7u64), movement(7, 3, 0, dec!(1)))
            .await
            .unwrap_err();
        assert_eq!(player.kind(), ErrorKind::Forbidden);

        let other = ledger
            .add_balance(Actor::provider(4u64), movement(7, 3, 0, dec!(1)))
            .await
            .unwrap_err();
        assert_eq!(other.kind(), ErrorKind::Forbidden);

        for amount in [dec!(0), dec!(-5)] {
            let err = ledger
                .add_balance(Actor::provider(3u64), movement(7, 3, 0, amount))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        let mut long = movement(7, 3, 0, dec!(1));
        long.description = "x".repeat(256);
        let err = ledger
            .add_balance(Actor::provider(3u64), long)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let page = ledger
            .list_balances(UserId(7), None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    async fn history_is_owner_only<S: LedgerStore>(ledger: LedgerService<S>) {
        let view = ledger
            .add_balance(Actor::provider(3u64), movement(7, 3, 0, dec!(1)))
            .await
            .unwrap();
        let foreign = ledger
            .list_transactions(view.balance.id, UserId(8), None, PageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(foreign.kind(), ErrorKind::Forbidden);
        let missing = ledger
            .list_transactions(BalanceId(999), UserId(7), None, PageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Forbidden);
    }

    async fn listing_and_summary<S: LedgerStore>(ledger: LedgerService<S>) {
        let studio = affiliate(&ledger).await;
        let provider = Actor::provider(3u64);
        for (player, ty, amount) in [
            (7, BalanceType::Point, dec!(5)),
            (7, BalanceType::Money, dec!(10)),
            (8, BalanceType::Money, dec!(20)),
            (7, BalanceType::Time, dec!(60)),
        ] {
            let mut m = movement(player, 3, 0, amount);
            m.balance_type = ty;
            ledger.add_balance(provider, m).await.unwrap();
        }
        ledger
            .add_balance(Actor::studio(9u64), movement(7, 3, 0, dec!(1)))
            .await
            .unwrap();

        let all = ledger
            .list_balances(UserId(7), None, ledger.page_request(0, 500))
            .await
            .unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.page, 1);
        assert_eq!(all.page_size, 10);
        assert!(all.items.windows(2).all(|w| w[0].balance.id < w[1].balance.id));
        let with_studio: Vec<_> = all.items.iter().filter(|v| v.studio.is_some()).collect();
        assert_eq!(with_studio.len(), 1);
        assert_eq!(with_studio[0].balance.studio_id, studio.id);

        let money = ledger
            .list_balances(UserId(7), Some(BalanceType::Money), PageRequest::new(1, 1))
            .await
            .unwrap();
        assert_eq!(money.total, 2);
        assert_eq!(money.items.len(), 1);

        let summary = ledger.summarize_by_type(UserId(3)).await.unwrap();
        let rows: Vec<_> = summary
            .iter()
            .map(|s| (s.balance_type, s.total_amount, s.player_count))
            .collect();
        assert_eq!(
            rows,
            vec![
                (BalanceType::Money, dec!(31), 2),
                (BalanceType::Time, dec!(60), 1),
                (BalanceType::Point, dec!(5), 1),
            ]
        );
        assert!(ledger.summarize_by_type(UserId(99)).await.unwrap().is_empty());
    }

    async fn directory_rules<S: LedgerStore>(ledger: LedgerService<S>) {
        let blank = ledger.create_studio(UserId(9), "   ").await.unwrap_err();
        assert_eq!(blank.kind(), ErrorKind::Validation);

        let studio = ledger.create_studio(UserId(9), "North").await.unwrap();
        let dup = ledger.create_studio(UserId(9), "South").await.unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::Conflict);

        let not_provider = ledger
            .apply_to_studio(Actor::player(7u64), studio.id, "")
            .await
            .unwrap_err();
        assert_eq!(not_provider.kind(), ErrorKind::Forbidden);
        let nowhere = ledger
            .apply_to_studio(Actor::provider(3u64), StudioId(404), "")
            .await
            .unwrap_err();
        assert_eq!(nowhere.kind(), ErrorKind::NotFound);

        let application = ledger
            .apply_to_studio(Actor::provider(3u64), studio.id, "hi")
            .await
            .unwrap();
        assert_eq!(application.status, RelationStatus::Pending);
        let twice = ledger
            .apply_to_studio(Actor::provider(3u64), studio.id, "hi again")
            .await
            .unwrap_err();
        assert_eq!(twice.kind(), ErrorKind::Conflict);

        let stranger = ledger
            .process_application(Actor::studio(10u64), application.id, RelationStatus::Approved, "")
            .await
            .unwrap_err();
        assert_eq!(stranger.kind(), ErrorKind::Forbidden);
        let unknown = ledger
            .process_application(Actor::studio(9u64), RelationId(404), RelationStatus::Approved, "")
            .await
            .unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::NotFound);

        let rejected = ledger
            .process_application(Actor::studio(9u64), application.id, RelationStatus::Rejected, "no")
            .await
            .unwrap();
        assert_eq!(rejected.status, RelationStatus::Rejected);
        assert!(rejected.processed_at.is_some());
        let again = ledger
            .process_application(Actor::studio(9u64), application.id, RelationStatus::Approved, "")
            .await
            .unwrap_err();
        assert_eq!(again.kind(), ErrorKind::Validation);
        assert!(again.to_string().contains("already processed"));

        let listed = ledger
            .list_applications(Actor::studio(9u64), studio.id, None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(listed.total, 1);
        let pending = ledger
            .list_applications(
                Actor::studio(9u64),
                studio.id,
                Some(RelationStatus::Pending),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(pending.total, 0);
        let foreign = ledger
            .list_applications(Actor::studio(10u64), studio.id, None, PageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(foreign.kind(), ErrorKind::Forbidden);
    }

    async fn overflow_is_rejected<S: LedgerStore>(ledger: LedgerService<S>) {
        let provider = Actor::provider(3u64);
        let first = ledger
            .add_balance(provider, movement(7, 3, 0, Decimal::MAX))
            .await
            .unwrap();
        let err = ledger
            .add_balance(provider, movement(7, 3, 0, Decimal::MAX))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("overflows"), "{err}");

        let stored = ledger.store().balance(first.balance.id).await.unwrap().unwrap();
        assert_eq!(stored.amount, Decimal::MAX);
        let chain = ledger.store().transaction_chain(first.balance.id).await.unwrap();
        assert_eq!(chain.len(), 1);
    }

    async fn concurrent_credits<S: LedgerStore + 'static>(ledger: LedgerService<S>) {
        let ledger = Arc::new(ledger);
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    ledger
                        .add_balance(Actor::provider(3u64), movement(7, 3, 0, dec!(1)))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let page = ledger
            .list_balances(UserId(7), None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        let balance = &page.items[0].balance;
        assert_eq!(balance.amount, dec!(50));

        let log = ledger
            .list_transactions(balance.id, UserId(7), None, PageRequest::new(1, 100))
            .await
            .unwrap();
        assert_eq!(log.total, 50);
        let report = ledger.audit_balance(balance.id).await.unwrap();
        assert!(report.is_consistent(), "{:?}", report.violations);
    }

    macro_rules! on_both_backends {
        ($($scenario:ident),* $(,)?) => {
            mod memory_backend {
                use super::*;
                $(
                    #[tokio::test]
                    async fn $scenario() {
                        super::$scenario(memory()).await;
                    }
                )*
            }

            mod sqlite_backend {
                use super::*;
                $(
                    #[tokio::test]
                    async fn $scenario() {
                        super::$scenario(sqlite().await).await;
                    }
                )*
            }
        };
    }

    on_both_backends!(
        self_credit_accumulates,
        studio_credit_uses_owned_studio,
        symmetric_movements,
        denials_leave_no_trace,
        history_is_owner_only,
        listing_and_summary,
        directory_rules,
        overflow_is_rejected,
    );

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_credits_in_memory() {
        concurrent_credits(memory()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_credits_on_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("tally.db").display()),
            busy_timeout_ms: 30_000,
            ..DatabaseConfig::default()
        };
        let store = SqliteLedgerStore::connect(&config).await.unwrap();
        concurrent_credits(LedgerService::new(Arc::new(store))).await;
    }

    #[tokio::test]
    async fn description_limit_follows_config() {
        let config = LedgerConfig {
            max_description_len: 4,
            ..LedgerConfig::default()
        };
        let ledger = LedgerService::with_config(Arc::new(InMemoryLedgerStore::new()), config);
        let mut m = movement(7, 3, 0, dec!(1));
        m.description = "abcd".into();
        ledger.add_balance(Actor::provider(3u64), m.clone()).await.unwrap();
        m.description = "abcde".into();
        let err = ledger.add_balance(Actor::provider(3u64), m).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn movement_deserializes_with_defaults() {
        let m: Movement = serde_json::from_str(
            r#"{"player_id": 7, "provider_id": 3, "type": "time", "amount": "12.5"}"#,
        )
        .unwrap();
        assert_eq!(m.studio_id, StudioId::INDEPENDENT);
        assert_eq!(m.balance_type, BalanceType::Time);
        assert_eq!(m.amount, dec!(12.5));
        assert!(m.description.is_empty());
    }

    // -----------------------------------------------------------------------
    // Balance creation races
    // -----------------------------------------------------------------------

    /// In-memory store whose balance inserts lose a simulated race with
    /// another writer.
    ///
    /// The first `losses` inserts report `Conflict`. When `competitor_lands`
    /// is set the competing row is written first, as if the other writer had
    /// committed it.
    struct RacingStore {
        inner: InMemoryLedgerStore,
        losses: Arc<AtomicUsize>,
        competitor_lands: bool,
        attempts: Arc<AtomicUsize>,
    }

    impl RacingStore {
        fn new(losses: usize, competitor_lands: bool) -> Self {
            Self {
                inner: InMemoryLedgerStore::new(),
                losses: Arc::new(AtomicUsize::new(losses)),
                competitor_lands,
                attempts: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct RacingTx {
        inner: Box<dyn LedgerTx>,
        losses: Arc<AtomicUsize>,
        competitor_lands: bool,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LedgerStore for RacingStore {
        async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
            Ok(Box::new(RacingTx {
                inner: self.inner.begin().await?,
                losses: Arc::clone(&self.losses),
                competitor_lands: self.competitor_lands,
                attempts: Arc::clone(&self.attempts),
            }))
        }

        async fn balance(&self, id: BalanceId) -> StoreResult<Option<Balance>> {
            self.inner.balance(id).await
        }

        async fn balances_for_player(
            &self,
            player: UserId,
            balance_type: Option<BalanceType>,
            page: PageRequest,
        ) -> StoreResult<Page<Balance>> {
            self.inner.balances_for_player(player, balance_type, page).await
        }

        async fn balances_with_provider(
            &self,
            player: UserId,
            provider: UserId,
            studio: StudioId,
        ) -> StoreResult<Vec<Balance>> {
            self.inner.balances_with_provider(player, provider, studio).await
        }

        async fn transactions(
            &self,
            balance: BalanceId,
            kind: Option<TransactionKind>,
            page: PageRequest,
        ) -> StoreResult<Page<Transaction>> {
            self.inner.transactions(balance, kind, page).await
        }

        async fn transaction_chain(&self, balance: BalanceId) -> StoreResult<Vec<Transaction>> {
            self.inner.transaction_chain(balance).await
        }

        async fn summarize_provider(&self, provider: UserId) -> StoreResult<Vec<TypeSummary>> {
            self.inner.summarize_provider(provider).await
        }

        async fn studio(&self, id: StudioId) -> StoreResult<Option<Studio>> {
            self.inner.studio(id).await
        }

        async fn relationships_for_studio(
            &self,
            studio: StudioId,
            status: Option<RelationStatus>,
            page: PageRequest,
        ) -> StoreResult<Page<Relationship>> {
            self.inner.relationships_for_studio(studio, status, page).await
        }
    }

    #[async_trait]
    impl LedgerTx for RacingTx {
        async fn studio_by_owner(&mut self, owner: UserId) -> StoreResult<Option<Studio>> {
            self.inner.studio_by_owner(owner).await
        }

        async fn studio(&mut self, id: StudioId) -> StoreResult<Option<Studio>> {
            self.inner.studio(id).await
        }

        async fn relationship(&mut self, id: RelationId) -> StoreResult<Option<Relationship>> {
            self.inner.relationship(id).await
        }

        async fn relationship_between(
            &mut self,
            provider: UserId,
            studio: StudioId,
        ) -> StoreResult<Option<Relationship>> {
            self.inner.relationship_between(provider, studio).await
        }

        async fn lock_balance(&mut self, key: &BalanceKey) -> StoreResult<Option<Balance>> {
            self.inner.lock_balance(key).await
        }

        async fn insert_balance(&mut self, key: &BalanceKey) -> StoreResult<Balance> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let lost = self
                .losses
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !lost {
                return self.inner.insert_balance(key).await;
            }
            if self.competitor_lands {
                self.inner.insert_balance(key).await?;
            }
            Err(StoreError::Conflict(format!("balance {key:?} already exists")))
        }

        async fn update_balance(
            &mut self,
            id: BalanceId,
            update: BalanceUpdate,
        ) -> StoreResult<Balance> {
            self.inner.update_balance(id, update).await
        }

        async fn append_transaction(&mut self, entry: NewTransaction) -> StoreResult<Transaction> {
            self.inner.append_transaction(entry).await
        }

        async fn insert_studio(&mut self, studio: NewStudio) -> StoreResult<Studio> {
            self.inner.insert_studio(studio).await
        }

        async fn insert_relationship(
            &mut self,
            relationship: NewRelationship,
        ) -> StoreResult<Relationship> {
            self.inner.insert_relationship(relationship).await
        }

        async fn decide_relationship(
            &mut self,
            id: RelationId,
            decision: RelationDecision,
        ) -> StoreResult<Relationship> {
            self.inner.decide_relationship(id, decision).await
        }

        async fn commit(self: Box<Self>) -> StoreResult<()> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> StoreResult<()> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn lost_creation_race_rereads_the_row() {
        let store = RacingStore::new(1, true);
        let attempts = Arc::clone(&store.attempts);
        let ledger = LedgerService::new(Arc::new(store));

        let view = ledger
            .add_balance(Actor::provider(3u64), movement(7, 3, 0, dec!(5)))
            .await
            .unwrap();
        assert_eq!(view.balance.amount, dec!(5));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let page = ledger
            .list_balances(UserId(7), None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].balance.id, view.balance.id);
        let log = ledger
            .list_transactions(view.balance.id, UserId(7), None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(log.total, 1);
    }

    #[tokio::test]
    async fn persistent_creation_conflict_gives_up_after_retries() {
        let store = RacingStore::new(usize::MAX, false);
        let attempts = Arc::clone(&store.attempts);
        let ledger = LedgerService::new(Arc::new(store));

        let err = ledger
            .add_balance(Actor::provider(3u64), movement(7, 3, 0, dec!(5)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            attempts.load(Ordering::SeqCst),
            LedgerConfig::default().create_retries as usize
        );

        let page = ledger
            .list_balances(UserId(7), None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn credits_sum_and_replay(cents in proptest::collection::vec(1i64..1_000_000, 1..20)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (stored, expected, report) = runtime.block_on(async {
                let ledger = memory();
                let mut expected = Decimal::ZERO;
                let mut last = None;
                for c in &cents {
                    let amount = Decimal::new(*c, 2);
                    expected += amount;
                    last = Some(
                        ledger
                            .add_balance(Actor::provider(3u64), movement(7, 3, 0, amount))
                            .await
                            .unwrap(),
                    );
                }
                let view = last.unwrap();
                let report = ledger.audit_balance(view.balance.id).await.unwrap();
                (view.balance.amount, expected, report)
            });
            prop_assert_eq!(stored, expected);
            prop_assert!(report.is_consistent());
            prop_assert_eq!(report.transaction_count, cents.len() as u64);
            prop_assert_eq!(report.replayed_amount, expected);
        }
    }
}
