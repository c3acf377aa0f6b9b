use serde::Serialize;

use taskforge_core::{OrganizationId, UserId};

use crate::{AccessDecision, Permission, Role};

/// Why the engine reached its decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionBasis {
    /// The user has no membership in the organization.
    NoMembership,
    /// Storage could not answer; the request was denied.
    LookupFailed { error: String },
    RoleGrants,
    RoleLacksPermission,
}

/// Detailed, operator-facing record of one authorization decision.
///
/// This is an audit artifact. The response sent to the requester stays a
/// plain "forbidden" no matter what this says.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub required: Permission,
    pub role: Option<Role>,
    pub decision: AccessDecision,
    pub basis: DecisionBasis,
}

impl AuthorizationExplanation {
    pub fn granted(&self) -> bool {
        self.decision.is_granted()
    }

    /// JSON rendering for structured audit logs.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "user_id": self.user_id,
            "organization_id": self.organization_id,
            "required": self.required.to_string(),
            "role": self.role,
            "decision": self.decision,
            "basis": self.basis,
        })
    }
}
