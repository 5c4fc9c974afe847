use tally_types::Role;

use crate::error::GateError;
use crate::stage::{CreditRequest, GateContext, GateStage, StageDecision};

/// Only providers and studios may move value on a balance.
pub struct RoleStage;

impl GateStage for RoleStage {
    fn name(&self) -> &str {
        "role"
    }

    fn evaluate(
        &self,
        request: &CreditRequest,
        _context: &GateContext<'_>,
    ) -> Result<StageDecision, GateError> {
        match request.actor.role {
            Role::Player => Ok(StageDecision::forbidden(format!(
                "player {} may not modify balances",
                request.actor.id
            ))),
            Role::Provider | Role::Studio => Ok(StageDecision::Pass),
        }
    }
}
