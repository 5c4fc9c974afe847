use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_types::{Actor, BalanceType, Relationship, Studio, StudioId, UserId};

use crate::error::GateError;

// ---------------------------------------------------------------------------
// CreditRequest
// ---------------------------------------------------------------------------

/// A request to move value on one balance tuple, as supplied by the caller.
///
/// `studio_id` is advisory: for studio actors the gate replaces it with the
/// studio the actor owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRequest {
    pub actor: Actor,
    pub player_id: UserId,
    pub provider_id: UserId,
    pub studio_id: StudioId,
    pub balance_type: BalanceType,
}

// ---------------------------------------------------------------------------
// GateFacts
// ---------------------------------------------------------------------------

/// Directory state the gate decides over.
///
/// The ledger reads these inside the same store transaction as the mutation
/// they authorize. Both are `None` unless the actor is a studio.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GateFacts {
    /// The studio owned by the actor.
    pub owned_studio: Option<Studio>,
    /// The relationship between the requested provider and `owned_studio`.
    pub relationship: Option<Relationship>,
}

impl GateFacts {
    /// No directory state; sufficient for player and provider actors.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_studio(studio: Studio, relationship: Option<Relationship>) -> Self {
        Self {
            owned_studio: Some(studio),
            relationship,
        }
    }
}

// ---------------------------------------------------------------------------
// StageDecision
// ---------------------------------------------------------------------------

/// Category of a denial, mapped by the ledger onto its error kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyKind {
    Forbidden,
    NotFound,
}

impl fmt::Display for DenyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Forbidden => "forbidden",
            Self::NotFound => "not found",
        })
    }
}

/// The outcome of a single gate stage evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageDecision {
    /// The stage passed; proceed to the next stage.
    Pass,
    /// The stage does not apply to this actor's role.
    Skip,
    /// The request must not proceed.
    Deny { kind: DenyKind, reason: String },
}

impl StageDecision {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Deny {
            kind: DenyKind::Forbidden,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::Deny {
            kind: DenyKind::NotFound,
            reason: reason.into(),
        }
    }

    /// Returns `true` unless the decision is `Deny`.
    pub fn allows(&self) -> bool {
        !matches!(self, Self::Deny { .. })
    }
}

// ---------------------------------------------------------------------------
// StageResult
// ---------------------------------------------------------------------------

/// Recorded result from a completed stage evaluation.
#[derive(Clone, Debug)]
pub struct StageResult {
    /// Name of the stage that produced this result.
    pub stage_name: String,
    /// Whether the stage let the request through (passed or skipped).
    pub passed: bool,
    /// Whether the stage judged the request at all.
    pub skipped: bool,
    /// Populated on denial.
    pub reason: Option<String>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// GateContext
// ---------------------------------------------------------------------------

/// Contextual information available to every gate stage.
pub struct GateContext<'a> {
    pub facts: &'a GateFacts,
    /// Results from stages that have already run in this evaluation.
    pub previous_stages: Vec<StageResult>,
}

impl<'a> GateContext<'a> {
    pub fn new(facts: &'a GateFacts) -> Self {
        Self {
            facts,
            previous_stages: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// GateStage trait
// ---------------------------------------------------------------------------

/// A single evaluation stage in the gate pipeline.
///
/// Stages are evaluated in order and must not have side effects. The trait
/// is object-safe so stages can be stored in a `Vec<Box<dyn GateStage>>`.
pub trait GateStage: Send + Sync {
    /// Human-readable name of this stage (e.g., "role", "provider-self").
    fn name(&self) -> &str;

    fn evaluate(
        &self,
        request: &CreditRequest,
        context: &GateContext<'_>,
    ) -> Result<StageDecision, GateError>;
}
