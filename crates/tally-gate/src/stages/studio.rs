use tally_types::Role;

use crate::error::GateError;
use crate::stage::{CreditRequest, GateContext, GateStage, StageDecision};

/// Studio verification stage.
///
/// A studio actor must own a studio, and the requested provider must hold an
/// approved relationship with it. Pending and rejected applications are
/// treated the same as no application.
pub struct StudioAffiliationStage;

impl GateStage for StudioAffiliationStage {
    fn name(&self) -> &str {
        "studio-affiliation"
    }

    fn evaluate(
        &self,
        request: &CreditRequest,
        context: &GateContext<'_>,
    ) -> Result<StageDecision, GateError> {
        if request.actor.role != Role::Studio {
            return Ok(StageDecision::Skip);
        }

        let Some(studio) = &context.facts.owned_studio else {
            return Ok(StageDecision::not_found(format!(
                "user {} does not own a studio",
                request.actor.id
            )));
        };
        if studio.owner_id != request.actor.id {
            return Err(GateError::InconsistentFacts(format!(
                "studio {} is owned by {}, not {}",
                studio.id, studio.owner_id, request.actor.id
            )));
        }

        let Some(relationship) = &context.facts.relationship else {
            return Ok(StageDecision::forbidden(format!(
                "provider {} has no relationship with studio {}",
                request.provider_id, studio.id
            )));
        };
        if relationship.studio_id != studio.id || relationship.provider_id != request.provider_id
        {
            return Err(GateError::InconsistentFacts(format!(
                "relationship {} links provider {} to studio {}",
                relationship.id, relationship.provider_id, relationship.studio_id
            )));
        }
        if !relationship.is_approved() {
            return Ok(StageDecision::forbidden(format!(
                "provider {} is not approved by studio {} (status {})",
                request.provider_id, studio.id, relationship.status
            )));
        }

        Ok(StageDecision::Pass)
    }
}
