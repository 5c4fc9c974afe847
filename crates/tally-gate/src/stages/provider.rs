use tally_types::Role;

use crate::error::GateError;
use crate::stage::{CreditRequest, GateContext, GateStage, StageDecision};

/// A provider may only touch balances held with itself.
pub struct ProviderSelfStage;

impl GateStage for ProviderSelfStage {
    fn name(&self) -> &str {
        "provider-self"
    }

    fn evaluate(
        &self,
        request: &CreditRequest,
        _context: &GateContext<'_>,
    ) -> Result<StageDecision, GateError> {
        if request.actor.role != Role::Provider {
            return Ok(StageDecision::Skip);
        }
        if request.provider_id != request.actor.id {
            return Ok(StageDecision::forbidden(format!(
                "provider {} cannot modify balances of provider {}",
                request.actor.id, request.provider_id
            )));
        }
        Ok(StageDecision::Pass)
    }
}
