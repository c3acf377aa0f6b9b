use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use taskforge_core::{OrganizationId, UserId};

use crate::Role;

/// The record binding a user to a role within one organization.
///
/// Storage guarantees at most one membership per (user, organization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Failure to answer a membership query.
///
/// "Not a member" is not an error; it is `Ok(None)`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("membership storage unavailable: {0}")]
    Unavailable(String),

    /// The stored row exists but cannot be interpreted (e.g. an unknown role tag).
    #[error("corrupt membership record: {0}")]
    Corrupt(String),
}

/// Narrow read interface the permission engine needs from storage.
#[async_trait::async_trait]
pub trait MembershipLookup: Send + Sync {
    async fn find(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<Membership>, LookupError>;
}

#[async_trait::async_trait]
impl<L> MembershipLookup for Arc<L>
where
    L: MembershipLookup + ?Sized,
{
    async fn find(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<Membership>, LookupError> {
        (**self).find(user_id, organization_id).await
    }
}
