use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use taskforge_auth::{Action, AuthzError, Permission, Role, Subject, require_permission};
use taskforge_core::{DomainError, OrganizationId, UserId};
use taskforge_saga::{Compensation, SequentialOperationExecutor, Step, with_timeout};

use super::registration::validate_email;
use super::{FlowError, Flows};
use crate::store::{InvitationRecord, MembershipRow, NewInvitation, StoreError, Table};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteMember {
    pub organization_id: OrganizationId,
    pub email: String,
    pub role: Role,
}

/// Why an invitation token could not be redeemed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvitationRejected {
    #[error("invitation not found")]
    NotFound,

    #[error("invitation already accepted")]
    AlreadyAccepted,

    #[error("invitation expired")]
    Expired,

    #[error("invitation was issued to a different email address")]
    EmailMismatch,
}

impl InvitationRejected {
    pub fn status_code(self) -> u16 {
        match self {
            InvitationRejected::NotFound => 404,
            InvitationRejected::AlreadyAccepted => 409,
            InvitationRejected::Expired => 410,
            InvitationRejected::EmailMismatch => 403,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Acceptance {
    Loaded(InvitationRecord),
    Joined(MembershipRow),
    Accepted(InvitationRecord),
}

fn loaded_invitation(done: &[Acceptance]) -> anyhow::Result<InvitationRecord> {
    match done.first() {
        Some(Acceptance::Loaded(invitation)) => Ok(invitation.clone()),
        _ => Err(anyhow::anyhow!("invitation was not loaded before joining")),
    }
}

impl Flows {
    /// Issue an invitation token for `input.email`.
    ///
    /// Requires `create:invitation` in the organization. Ownership cannot be
    /// handed out through an invitation.
    pub async fn invite_member(
        &self,
        principal: Option<UserId>,
        input: InviteMember,
    ) -> Result<InvitationRecord, FlowError> {
        let inviter = require_permission(
            &self.engine,
            principal,
            input.organization_id,
            Permission::new(Action::Create, Subject::Invitation),
        )
        .await?;

        validate_email(&input.email)?;
        if input.role == Role::Owner {
            return Err(DomainError::validation("the owner role cannot be granted by invitation").into());
        }

        // A membership can outlive its organization if a delete raced it.
        let organization = self
            .bounded(self.store.get_organization(input.organization_id))
            .await?;
        if organization.is_none() {
            return Err(DomainError::not_found("organization").into());
        }

        let existing = self.bounded(self.store.find_user_by_email(&input.email)).await?;
        if let Some(user) = existing {
            let membership = self
                .bounded(self.store.find_membership(user.id, input.organization_id))
                .await?;
            if membership.is_some() {
                return Err(DomainError::conflict(format!(
                    "{} is already a member of organization {}",
                    user.email, input.organization_id
                ))
                .into());
            }
        }

        let invitation = self
            .bounded(self.store.insert_invitation(NewInvitation {
                organization_id: input.organization_id,
                email: input.email,
                role: input.role,
                invited_by: inviter,
                expires_at: Utc::now() + self.config.invitation_ttl,
            }))
            .await?;

        info!(
            organization_id = %invitation.organization_id,
            invited_by = %inviter,
            role = %invitation.role,
            expires_at = %invitation.expires_at,
            "invitation issued"
        );
        Ok(invitation)
    }

    /// Redeem an invitation token for the signed-in user.
    ///
    /// `load_invitation` -> `create_membership` -> `mark_invitation_accepted`.
    /// If the invitation cannot be marked accepted (for instance a concurrent
    /// accept won), the membership is deleted again.
    pub async fn accept_invitation(
        &self,
        principal: Option<UserId>,
        token: Uuid,
    ) -> Result<MembershipRow, FlowError> {
        let user_id = principal.ok_or(AuthzError::Unauthenticated)?;
        let limit = self.config.step_timeout;

        let load_store = self.store.clone();
        let load_invitation = Step::new("load_invitation", move |_done: Vec<Acceptance>| {
            with_timeout(limit, async move {
                let user = load_store
                    .get_user(user_id)
                    .await?
                    .ok_or(StoreError::NotFound { table: Table::Users })?;
                let invitation = load_store
                    .get_invitation(token)
                    .await?
                    .ok_or(InvitationRejected::NotFound)?;

                if invitation.accepted_at.is_some() {
                    return Err(anyhow::Error::new(InvitationRejected::AlreadyAccepted));
                }
                if invitation.is_expired(Utc::now()) {
                    return Err(anyhow::Error::new(InvitationRejected::Expired));
                }
                if invitation.email != user.email {
                    return Err(anyhow::Error::new(InvitationRejected::EmailMismatch));
                }
                Ok(Acceptance::Loaded(invitation))
            })
        });

        let join_store = self.store.clone();
        let create_membership = Step::new("create_membership", move |done: Vec<Acceptance>| {
            with_timeout(limit, async move {
                let invitation = loaded_invitation(&done)?;
                let row = join_store
                    .insert_membership(user_id, invitation.organization_id, invitation.role)
                    .await?;
                Ok(Acceptance::Joined(row))
            })
        });

        let leave_store = self.store.clone();
        let delete_membership = Compensation::new(move |out: Acceptance| {
            with_timeout(limit, async move {
                if let Acceptance::Joined(row) = out {
                    leave_store
                        .delete_membership(row.user_id, row.organization_id)
                        .await?;
                }
                Ok(())
            })
        });

        let accept_store = self.store.clone();
        let mark_invitation_accepted = Step::new("mark_invitation_accepted", move |_done: Vec<Acceptance>| {
            with_timeout(limit, async move {
                let invitation = accept_store.mark_invitation_accepted(token, Utc::now()).await?;
                Ok(Acceptance::Accepted(invitation))
            })
        });

        let results = SequentialOperationExecutor::new("accept_invitation")
            .run_all(
                vec![load_invitation, create_membership, mark_invitation_accepted],
                vec![None, Some(delete_membership)],
            )
            .await?;

        let mut membership = None;
        let mut accepted_at = None;
        for out in results {
            match out {
                Acceptance::Joined(row) => membership = Some(row),
                Acceptance::Accepted(invitation) => accepted_at = invitation.accepted_at,
                Acceptance::Loaded(_) => {}
            }
        }
        let membership = membership
            .ok_or_else(|| FlowError::Inconsistent("accept_invitation produced no membership".to_string()))?;

        info!(
            user_id = %membership.user_id,
            organization_id = %membership.organization_id,
            role = %membership.role,
            ?accepted_at,
            "invitation accepted"
        );
        Ok(membership)
    }

    /// Memberships of an organization; requires `read:member`.
    pub async fn list_members(
        &self,
        principal: Option<UserId>,
        organization_id: OrganizationId,
    ) -> Result<Vec<MembershipRow>, FlowError> {
        require_permission(
            &self.engine,
            principal,
            organization_id,
            Permission::new(Action::Read, Subject::Member),
        )
        .await?;
        self.bounded(self.store.list_memberships(organization_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_distinct_statuses() {
        let statuses = [
            InvitationRejected::NotFound,
            InvitationRejected::AlreadyAccepted,
            InvitationRejected::Expired,
            InvitationRejected::EmailMismatch,
        ]
        .map(InvitationRejected::status_code);
        assert_eq!(statuses, [404, 409, 410, 403]);
    }

    #[test]
    fn joined_step_needs_a_loaded_invitation() {
        assert!(loaded_invitation(&[]).is_err());
    }
}
