//! Authorization gate for Tally balance movements.
//!
//! Every recharge, consume, refund, freeze and unfreeze must pass through the
//! gate before the ledger opens a balance row. The gate runs an ordered
//! pipeline of stages (role, provider-self, studio affiliation) over the
//! request and the directory facts the ledger read for it, and produces either
//! an [`AuthorizedCredit`] carrying the resolved balance tuple or a
//! [`Denial`].
//!
//! # Quick Start
//!
//! ```rust
//! use tally_gate::{CreditGate, CreditRequest, GateFacts};
//! use tally_types::{Actor, BalanceType, StudioId, UserId};
//!
//! let gate = CreditGate::with_default_stages();
//! let request = CreditRequest {
//!     actor: Actor::provider(3u64),
//!     player_id: UserId(7),
//!     provider_id: UserId(3),
//!     studio_id: StudioId::INDEPENDENT,
//!     balance_type: BalanceType::Money,
//! };
//! let result = gate.evaluate(&request, &GateFacts::none()).unwrap();
//! assert!(result.is_authorized());
//! ```

pub mod error;
pub mod gate;
pub mod stage;
pub mod stages;

pub use error::GateError;
pub use gate::{AuthorizedCredit, CreditGate, Denial, GateOutcome, GateResult};
pub use stage::{
    CreditRequest, DenyKind, GateContext, GateFacts, GateStage, StageDecision, StageResult,
};
pub use stages::{ProviderSelfStage, RoleStage, StudioAffiliationStage};
