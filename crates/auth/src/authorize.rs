//! Request-boundary guard.
//!
//! Turns the engine's boolean into a `Result` so handlers can use `?`, and
//! separates "no principal" (401-class) from "principal lacks permission"
//! (403-class).

use thiserror::Error;
use tracing::info;

use taskforge_core::{OrganizationId, UserId};

use crate::{MembershipLookup, Permission, PermissionEngine};

/// Authorization failure as seen by the caller.
///
/// Deliberately uninformative: it never says which role or permission would
/// have been enough.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,
}

impl AuthzError {
    /// Conventional HTTP status for the error.
    pub fn status_code(self) -> u16 {
        match self {
            AuthzError::Unauthenticated => 401,
            AuthzError::Forbidden => 403,
        }
    }
}

/// Authorize `principal` for `required` within `organization_id`.
///
/// `principal` is whatever the session layer resolved; `None` means the
/// request carried no authenticated identity.
pub async fn require_permission<L: MembershipLookup>(
    engine: &PermissionEngine<L>,
    principal: Option<UserId>,
    organization_id: OrganizationId,
    required: Permission,
) -> Result<UserId, AuthzError> {
    let user_id = principal.ok_or(AuthzError::Unauthenticated)?;

    // One resolution serves both the decision and the audit record.
    let explanation = engine.explain(user_id, organization_id, required).await;
    if explanation.granted() {
        return Ok(user_id);
    }

    info!(audit = %explanation.to_json(), "authorization denied");
    Err(AuthzError::Forbidden)
}

/// Authorize `principal` for every permission in `required`.
///
/// An empty `required` authorizes nothing and is rejected without a lookup.
pub async fn require_all<L: MembershipLookup>(
    engine: &PermissionEngine<L>,
    principal: Option<UserId>,
    organization_id: OrganizationId,
    required: &[Permission],
) -> Result<UserId, AuthzError> {
    let user_id = principal.ok_or(AuthzError::Unauthenticated)?;

    if required.is_empty() {
        info!(%user_id, %organization_id, "authorization denied: empty requirement");
        return Err(AuthzError::Forbidden);
    }

    if engine
        .has_all_permissions(user_id, organization_id, required)
        .await
    {
        Ok(user_id)
    } else {
        info!(%user_id, %organization_id, ?required, "authorization denied");
        Err(AuthzError::Forbidden)
    }
}
