//! Permission engine: membership resolution + matrix lookup.
//!
//! - Read-only, never mutates storage
//! - Fails closed: a storage error is logged and answered with "denied"
//! - Organization is always an explicit argument (no ambient tenant)

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use taskforge_core::{OrganizationId, UserId};

use crate::{
    Action, AuthorizationExplanation, DecisionBasis, LookupError, MembershipLookup, Permission,
    PermissionMatrix, Role, Subject,
};

/// Outcome of a permission query before it is collapsed to a boolean.
///
/// `Indeterminate` means storage could not answer. The public boolean API
/// treats it exactly like `Denied`; the variant exists so logs and
/// explanations can tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Granted,
    Denied,
    Indeterminate,
}

impl AccessDecision {
    pub fn is_granted(self) -> bool {
        matches!(self, AccessDecision::Granted)
    }
}

/// What the engine is asked to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement<'a> {
    One(Permission),
    All(&'a [Permission]),
    Any(&'a [Permission]),
}

/// Membership state for one (user, organization) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Role(Role),
    NotMember,
    Failed(LookupError),
}

/// Evaluates permission queries against a [`PermissionMatrix`] and a
/// [`MembershipLookup`].
///
/// Holds no per-request state, so one engine can serve concurrent requests.
#[derive(Debug)]
pub struct PermissionEngine<L> {
    lookup: L,
    matrix: Arc<PermissionMatrix>,
}

impl<L: Clone> Clone for PermissionEngine<L> {
    fn clone(&self) -> Self {
        Self {
            lookup: self.lookup.clone(),
            matrix: self.matrix.clone(),
        }
    }
}

impl<L: MembershipLookup> PermissionEngine<L> {
    /// Engine over the standard permission table.
    pub fn new(lookup: L) -> Self {
        Self::with_matrix(lookup, Arc::new(PermissionMatrix::standard()))
    }

    pub fn with_matrix(lookup: L, matrix: Arc<PermissionMatrix>) -> Self {
        for gap in matrix.inheritance_gaps() {
            warn!(
                higher = %gap.higher,
                lower = %gap.lower,
                permission = %gap.permission,
                "permission held by a lower role is missing from a higher role"
            );
        }
        Self { lookup, matrix }
    }

    pub fn matrix(&self) -> &PermissionMatrix {
        &self.matrix
    }

    /// Single membership resolution path shared by every query.
    pub(crate) async fn resolve(&self, user_id: UserId, organization_id: OrganizationId) -> Resolution {
        match self.lookup.find(user_id, organization_id).await {
            Ok(Some(membership)) => {
                if membership.user_id != user_id || membership.organization_id != organization_id {
                    warn!(
                        %user_id,
                        %organization_id,
                        returned_user = %membership.user_id,
                        returned_organization = %membership.organization_id,
                        "membership lookup returned a record for a different key"
                    );
                    return Resolution::Failed(LookupError::Corrupt(
                        "membership key mismatch".to_string(),
                    ));
                }
                Resolution::Role(membership.role)
            }
            Ok(None) => Resolution::NotMember,
            Err(err) => {
                warn!(%user_id, %organization_id, error = %err, "membership lookup failed; denying");
                Resolution::Failed(err)
            }
        }
    }

    fn evaluate(&self, role: Role, requirement: &Requirement<'_>) -> bool {
        let granted = self.matrix.permissions_for(role);
        match requirement {
            Requirement::One(p) => granted.contains(p),
            Requirement::All(ps) => ps.iter().all(|p| granted.contains(p)),
            Requirement::Any(ps) => ps.iter().any(|p| granted.contains(p)),
        }
    }

    /// Tri-state evaluation of a requirement.
    ///
    /// An empty `All` list is vacuously granted and an empty `Any` list is
    /// denied; neither consults storage.
    pub async fn check(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        requirement: Requirement<'_>,
    ) -> AccessDecision {
        match requirement {
            Requirement::All([]) => return AccessDecision::Granted,
            Requirement::Any([]) => return AccessDecision::Denied,
            _ => {}
        }

        let decision = match self.resolve(user_id, organization_id).await {
            Resolution::Role(role) if self.evaluate(role, &requirement) => AccessDecision::Granted,
            Resolution::Role(_) | Resolution::NotMember => AccessDecision::Denied,
            Resolution::Failed(_) => AccessDecision::Indeterminate,
        };

        debug!(%user_id, %organization_id, ?requirement, ?decision, "permission check");
        decision
    }

    /// Whether the user may perform `action` on `subject` in the organization.
    pub async fn has_permission(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        action: Action,
        subject: Subject,
    ) -> bool {
        self.check(
            user_id,
            organization_id,
            Requirement::One(Permission::new(action, subject)),
        )
        .await
        .is_granted()
    }

    /// [`has_permission`](Self::has_permission) for raw string tags.
    ///
    /// Unknown tags are denied without touching storage.
    pub async fn has_permission_tags(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        action: &str,
        subject: &str,
    ) -> bool {
        match Permission::from_tags(action, subject) {
            Some(p) => self.has_permission(user_id, organization_id, p.action, p.subject).await,
            None => {
                debug!(%user_id, %organization_id, action, subject, "unknown permission tag; denying");
                false
            }
        }
    }

    /// True iff every listed permission is granted.
    ///
    /// An empty list returns `true` without any lookup. That answer says
    /// nothing about the user; do not read it as "a check was performed".
    pub async fn has_all_permissions(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        permissions: &[Permission],
    ) -> bool {
        self.check(user_id, organization_id, Requirement::All(permissions))
            .await
            .is_granted()
    }

    /// True iff at least one listed permission is granted. An empty list is `false`.
    pub async fn has_any_permission(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        permissions: &[Permission],
    ) -> bool {
        self.check(user_id, organization_id, Requirement::Any(permissions))
            .await
            .is_granted()
    }

    /// The user's role in the organization, or `None` when absent or unknown.
    pub async fn get_user_role(&self, user_id: UserId, organization_id: OrganizationId) -> Option<Role> {
        match self.resolve(user_id, organization_id).await {
            Resolution::Role(role) => Some(role),
            Resolution::NotMember | Resolution::Failed(_) => None,
        }
    }

    pub async fn is_owner(&self, user_id: UserId, organization_id: OrganizationId) -> bool {
        self.get_user_role(user_id, organization_id).await == Some(Role::Owner)
    }

    /// Operator-facing account of a single permission decision.
    ///
    /// Meant for audit logs. Never hand this to the requesting user: it names
    /// the role and the reason.
    pub async fn explain(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        permission: Permission,
    ) -> AuthorizationExplanation {
        let (role, decision, basis) = match self.resolve(user_id, organization_id).await {
            Resolution::Role(role) if self.matrix.grants(role, permission) => {
                (Some(role), AccessDecision::Granted, DecisionBasis::RoleGrants)
            }
            Resolution::Role(role) => (
                Some(role),
                AccessDecision::Denied,
                DecisionBasis::RoleLacksPermission,
            ),
            Resolution::NotMember => (None, AccessDecision::Denied, DecisionBasis::NoMembership),
            Resolution::Failed(err) => (
                None,
                AccessDecision::Indeterminate,
                DecisionBasis::LookupFailed {
                    error: err.to_string(),
                },
            ),
        };

        AuthorizationExplanation {
            user_id,
            organization_id,
            required: permission,
            role,
            decision,
            basis,
        }
    }
}
