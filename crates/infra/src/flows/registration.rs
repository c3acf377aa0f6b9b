use serde::{Deserialize, Serialize};
use tracing::info;

use taskforge_auth::Role;
use taskforge_core::{DomainError, DomainResult, UserId};
use taskforge_saga::{
    Compensation, RelationalCreateOrchestrator, SequentialOperationExecutor, Step, with_timeout,
};

use super::{FlowError, Flows};
use crate::store::{MembershipRow, NewOrganization, NewUser, OrganizationRecord, UserRecord};

/// Sign-up of a new user together with the organization they will own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOwner {
    pub email: String,
    pub display_name: String,
    pub organization_name: String,
    pub organization_slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub user: UserRecord,
    pub organization: OrganizationRecord,
    pub membership: MembershipRow,
}

/// Output of one step of the organization-with-owner saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizationSetup {
    Organization(OrganizationRecord),
    OwnerMembership(MembershipRow),
}

pub(crate) fn validate_email(email: &str) -> DomainResult<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => {
            Ok(())
        }
        _ => Err(DomainError::validation(format!("'{email}' is not an email address"))),
    }
}

/// Lowercase ASCII letters, digits and inner hyphens; 3 to 63 characters.
fn validate_slug(slug: &str) -> DomainResult<()> {
    let well_formed = (3..=63).contains(&slug.len())
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !slug.starts_with('-')
        && !slug.ends_with('-');
    if well_formed {
        Ok(())
    } else {
        Err(DomainError::validation(format!("'{slug}' is not a valid organization slug")))
    }
}

fn validate_organization(new: &NewOrganization) -> DomainResult<()> {
    if new.name.trim().is_empty() {
        return Err(DomainError::validation("organization name must not be empty"));
    }
    validate_slug(&new.slug)
}

impl RegisterOwner {
    pub fn validate(&self) -> DomainResult<()> {
        validate_email(&self.email)?;
        if self.display_name.trim().is_empty() {
            return Err(DomainError::validation("display name must not be empty"));
        }
        validate_organization(&self.organization())
    }

    fn organization(&self) -> NewOrganization {
        NewOrganization {
            name: self.organization_name.trim().to_string(),
            slug: self.organization_slug.clone(),
        }
    }
}

fn created_organization(done: &[OrganizationSetup]) -> anyhow::Result<OrganizationRecord> {
    done.iter()
        .find_map(|out| match out {
            OrganizationSetup::Organization(org) => Some(org.clone()),
            OrganizationSetup::OwnerMembership(_) => None,
        })
        .ok_or_else(|| anyhow::anyhow!("no organization was created before the owner membership step"))
}

impl Flows {
    /// Create a user, then their organization and owner membership.
    ///
    /// The user is not rolled back when the organization half fails: the
    /// account stays and the caller sees the organization error.
    pub async fn register_owner(&self, input: RegisterOwner) -> Result<Registration, FlowError> {
        input.validate()?;

        let new_user = NewUser {
            email: input.email.clone(),
            display_name: input.display_name.trim().to_string(),
        };
        let new_organization = input.organization();
        let limit = self.config.step_timeout;
        let store = self.store.clone();

        let created = RelationalCreateOrchestrator::new("register_owner")
            .create_with_relations(
                move || with_timeout(limit, async move { Ok(store.insert_user(new_user).await?) }),
                |user: UserRecord| async move {
                    self.create_organization_with_owner(user.id, new_organization)
                        .await
                        .map_err(anyhow::Error::new)
                },
            )
            .await?;

        let (organization, membership) = created.related;
        info!(user_id = %created.main.id, organization_id = %organization.id, "owner registered");
        Ok(Registration {
            user: created.main,
            organization,
            membership,
        })
    }

    /// Create an organization and make `owner` its owner.
    ///
    /// Runs as a saga: if the membership cannot be written the organization
    /// is deleted again.
    pub async fn create_organization_with_owner(
        &self,
        owner: UserId,
        new: NewOrganization,
    ) -> Result<(OrganizationRecord, MembershipRow), FlowError> {
        validate_organization(&new)?;
        let limit = self.config.step_timeout;

        let create_store = self.store.clone();
        let create_organization = Step::new("create_organization", move |_done: Vec<OrganizationSetup>| {
            with_timeout(limit, async move {
                let org = create_store.insert_organization(new, owner).await?;
                Ok(OrganizationSetup::Organization(org))
            })
        });

        let undo_store = self.store.clone();
        let delete_organization = Compensation::new(move |out: OrganizationSetup| {
            with_timeout(limit, async move {
                if let OrganizationSetup::Organization(org) = out {
                    undo_store.delete_organization(org.id).await?;
                }
                Ok(())
            })
        });

        let member_store = self.store.clone();
        let create_owner_membership = Step::new("create_owner_membership", move |done: Vec<OrganizationSetup>| {
            with_timeout(limit, async move {
                let org = created_organization(&done)?;
                let row = member_store.insert_membership(owner, org.id, Role::Owner).await?;
                Ok(OrganizationSetup::OwnerMembership(row))
            })
        });

        let results = SequentialOperationExecutor::new("create_organization_with_owner")
            .run_all(
                vec![create_organization, create_owner_membership],
                vec![Some(delete_organization)],
            )
            .await?;

        match <[OrganizationSetup; 2]>::try_from(results) {
            Ok([OrganizationSetup::Organization(org), OrganizationSetup::OwnerMembership(row)]) => Ok((org, row)),
            Ok(other) => Err(FlowError::Inconsistent(format!("unexpected step outputs: {other:?}"))),
            Err(other) => Err(FlowError::Inconsistent(format!(
                "expected two step outputs, got {}",
                other.len()
            ))),
        }
    }
}
