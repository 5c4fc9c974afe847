use std::time::{Duration, Instant};

use tally_types::{Actor, BalanceKey, BalanceType, Role, StudioId, UserId};
use tracing::debug;

use crate::error::GateError;
use crate::stage::{
    CreditRequest, DenyKind, GateContext, GateFacts, GateStage, StageDecision, StageResult,
};
use crate::stages::{ProviderSelfStage, RoleStage, StudioAffiliationStage};

// ---------------------------------------------------------------------------
// AuthorizedCredit
// ---------------------------------------------------------------------------

/// Proof that a request passed the gate, carrying the resolved balance tuple.
///
/// Only [`CreditGate`] can build one, and the balance key of a movement can
/// only be taken from it, so the studio resolution cannot be skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthorizedCredit {
    actor: Actor,
    player_id: UserId,
    provider_id: UserId,
    studio_id: StudioId,
    balance_type: BalanceType,
}

impl AuthorizedCredit {
    pub fn actor(&self) -> Actor {
        self.actor
    }

    pub fn provider_id(&self) -> UserId {
        self.provider_id
    }

    /// The studio the balance is filed under after resolution.
    pub fn studio_id(&self) -> StudioId {
        self.studio_id
    }

    pub fn balance_key(&self) -> BalanceKey {
        BalanceKey::new(
            self.player_id,
            self.provider_id,
            self.studio_id,
            self.balance_type,
        )
    }
}

// ---------------------------------------------------------------------------
// GateResult
// ---------------------------------------------------------------------------

/// Why a request was turned away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Denial {
    pub kind: DenyKind,
    pub stage: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    Authorized(AuthorizedCredit),
    Denied(Denial),
}

/// The outcome of running a request through the full gate pipeline.
#[derive(Clone, Debug)]
pub struct GateResult {
    pub outcome: GateOutcome,
    /// Per-stage results in evaluation order.
    pub stage_results: Vec<StageResult>,
    /// Total wall-clock time for the pipeline evaluation.
    pub elapsed: Duration,
}

impl GateResult {
    pub fn is_authorized(&self) -> bool {
        matches!(self.outcome, GateOutcome::Authorized(_))
    }

    pub fn into_authorized(self) -> Result<AuthorizedCredit, Denial> {
        match self.outcome {
            GateOutcome::Authorized(credit) => Ok(credit),
            GateOutcome::Denied(denial) => Err(denial),
        }
    }
}

// ---------------------------------------------------------------------------
// CreditGate
// ---------------------------------------------------------------------------

/// The authorization gate: an ordered pipeline of stages every balance
/// movement passes before the ledger touches storage.
///
/// Evaluation is a pure function of the request and the supplied
/// [`GateFacts`].
pub struct CreditGate {
    stages: Vec<Box<dyn GateStage>>,
}

impl Default for CreditGate {
    fn default() -> Self {
        Self::with_default_stages()
    }
}

impl CreditGate {
    /// Create a gate with an empty pipeline.
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Create a gate with the default stage pipeline:
    /// Role -> ProviderSelf -> StudioAffiliation
    pub fn with_default_stages() -> Self {
        let mut gate = Self::new();
        gate.add_stage(Box::new(RoleStage));
        gate.add_stage(Box::new(ProviderSelfStage));
        gate.add_stage(Box::new(StudioAffiliationStage));
        gate
    }

    /// Append a stage to the end of the pipeline.
    pub fn add_stage(&mut self, stage: Box<dyn GateStage>) {
        self.stages.push(stage);
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Evaluate a request through the full pipeline.
    ///
    /// The pipeline is **fail-fast**: the first denying stage stops
    /// evaluation. If every stage passes or skips, the request is authorized
    /// and its studio resolved: studio actors always file under the studio
    /// they own, everyone else under the requested studio.
    pub fn evaluate(
        &self,
        request: &CreditRequest,
        facts: &GateFacts,
    ) -> Result<GateResult, GateError> {
        let pipeline_start = Instant::now();
        let mut context = GateContext::new(facts);
        let mut stage_results = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let stage_start = Instant::now();
            let decision = stage.evaluate(request, &context)?;
            let result = StageResult {
                stage_name: stage.name().to_string(),
                passed: decision.allows(),
                skipped: decision == StageDecision::Skip,
                reason: match &decision {
                    StageDecision::Deny { reason, .. } => Some(reason.clone()),
                    _ => None,
                },
                elapsed: stage_start.elapsed(),
            };
            stage_results.push(result.clone());
            context.previous_stages.push(result);

            if let StageDecision::Deny { kind, reason } = decision {
                debug!(actor = %request.actor, stage = stage.name(), %kind, %reason, "credit denied");
                return Ok(GateResult {
                    outcome: GateOutcome::Denied(Denial {
                        kind,
                        stage: stage.name().to_string(),
                        reason,
                    }),
                    stage_results,
                    elapsed: pipeline_start.elapsed(),
                });
            }
        }

        let studio_id = match request.actor.role {
            Role::Studio => facts
                .owned_studio
                .as_ref()
                .map(|studio| studio.id)
                .ok_or_else(|| {
                    GateError::InconsistentFacts("studio actor authorized without a studio".into())
                })?,
            Role::Player | Role::Provider => request.studio_id,
        };
        let credit = AuthorizedCredit {
            actor: request.actor,
            player_id: request.player_id,
            provider_id: request.provider_id,
            studio_id,
            balance_type: request.balance_type,
        };
        debug!(actor = %request.actor, studio = %studio_id, "credit authorized");

        Ok(GateResult {
            outcome: GateOutcome::Authorized(credit),
            stage_results,
            elapsed: pipeline_start.elapsed(),
        })
    }

    /// Evaluate and unwrap the outcome.
    pub fn authorize(
        &self,
        request: &CreditRequest,
        facts: &GateFacts,
    ) -> Result<Result<AuthorizedCredit, Denial>, GateError> {
        Ok(self.evaluate(request, facts)?.into_authorized())
    }
}
