use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use taskforge_auth::Role;
use taskforge_core::{OrganizationId, UserId};

use super::{
    InvitationRecord, MembershipRow, NewInvitation, NewOrganization, NewUser, OrganizationRecord,
    StoreError, Table, UserRecord,
};

#[derive(Debug, Default)]
struct Tables {
    next_user_id: i64,
    next_organization_id: i64,
    users: HashMap<UserId, UserRecord>,
    organizations: HashMap<OrganizationId, OrganizationRecord>,
    memberships: HashMap<(UserId, OrganizationId), MembershipRow>,
    invitations: HashMap<Uuid, InvitationRecord>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    failing_writes: HashSet<Table>,
    stalled_writes: HashSet<Table>,
    yield_per_call: bool,
}

/// In-memory store for tests/dev.
///
/// Unique keys: user email (case-insensitive), organization slug,
/// (user, organization) membership, invitation token.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    faults: RwLock<Faults>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("store lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── fault injection ──────────────────────────────────────────────────

    /// Make every read and write fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut faults) = self.faults.write() {
            faults.unavailable = unavailable;
        }
    }

    /// Make writes to `table` fail with [`StoreError::Unavailable`].
    pub fn fail_writes_to(&self, table: Table) {
        if let Ok(mut faults) = self.faults.write() {
            faults.failing_writes.insert(table);
        }
    }

    /// Make writes to `table` never complete.
    pub fn stall_writes_to(&self, table: Table) {
        if let Ok(mut faults) = self.faults.write() {
            faults.stalled_writes.insert(table);
        }
    }

    /// Yield to the scheduler at the start of every call, so that flows
    /// running concurrently on one task interleave between store calls.
    pub fn yield_on_every_call(&self, enabled: bool) {
        if let Ok(mut faults) = self.faults.write() {
            faults.yield_per_call = enabled;
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.write() {
            *faults = Faults::default();
        }
    }

    async fn yield_if_requested(&self) -> Result<(), StoreError> {
        let yielding = self.faults.read().map_err(|_| poisoned())?.yield_per_call;
        if yielding {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn check_read(&self) -> Result<(), StoreError> {
        self.yield_if_requested().await?;
        let faults = self.faults.read().map_err(|_| poisoned())?;
        if faults.unavailable {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn check_write(&self, table: Table) -> Result<(), StoreError> {
        self.yield_if_requested().await?;
        let stalled = {
            let faults = self.faults.read().map_err(|_| poisoned())?;
            if faults.unavailable || faults.failing_writes.contains(&table) {
                return Err(StoreError::Unavailable(format!("write to {table} rejected")));
            }
            faults.stalled_writes.contains(&table)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    // ── users ────────────────────────────────────────────────────────────

    pub async fn insert_user(&self, new: NewUser) -> Result<UserRecord, StoreError> {
        self.check_write(Table::Users).await?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        let email = normalize_email(&new.email);
        if tables.users.values().any(|u| u.email == email) {
            return Err(StoreError::UniqueViolation {
                table: Table::Users,
                key: email,
            });
        }

        tables.next_user_id += 1;
        let record = UserRecord {
            id: UserId::new(tables.next_user_id),
            email,
            display_name: new.display_name,
            created_at: Utc::now(),
        };
        tables.users.insert(record.id, record.clone());
        Ok(record)
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        self.check_read().await?;
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.users.get(&id).cloned())
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        self.check_read().await?;
        let email = normalize_email(email);
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    // ── organizations ────────────────────────────────────────────────────

    pub async fn insert_organization(
        &self,
        new: NewOrganization,
        created_by: UserId,
    ) -> Result<OrganizationRecord, StoreError> {
        self.check_write(Table::Organizations).await?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        if tables.organizations.values().any(|o| o.slug == new.slug) {
            return Err(StoreError::UniqueViolation {
                table: Table::Organizations,
                key: new.slug,
            });
        }

        tables.next_organization_id += 1;
        let record = OrganizationRecord {
            id: OrganizationId::new(tables.next_organization_id),
            name: new.name,
            slug: new.slug,
            created_by,
            created_at: Utc::now(),
        };
        tables.organizations.insert(record.id, record.clone());
        Ok(record)
    }

    pub async fn get_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<OrganizationRecord>, StoreError> {
        self.check_read().await?;
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.organizations.get(&id).cloned())
    }

    pub async fn delete_organization(&self, id: OrganizationId) -> Result<(), StoreError> {
        self.check_write(Table::Organizations).await?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables
            .organizations
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                table: Table::Organizations,
            })
    }

    pub async fn count_organizations(&self) -> Result<usize, StoreError> {
        self.check_read().await?;
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.organizations.len())
    }

    // ── memberships ──────────────────────────────────────────────────────

    pub async fn insert_membership(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        role: Role,
    ) -> Result<MembershipRow, StoreError> {
        self.insert_membership_row(MembershipRow {
            user_id,
            organization_id,
            role: role.as_str().to_string(),
            joined_at: Utc::now(),
        })
        .await
    }

    /// Insert a membership exactly as given, role tag included.
    ///
    /// Used by imports; ordinary code goes through [`insert_membership`](Self::insert_membership).
    pub async fn insert_membership_row(&self, row: MembershipRow) -> Result<MembershipRow, StoreError> {
        self.check_write(Table::Memberships).await?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        let key = (row.user_id, row.organization_id);
        if tables.memberships.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                table: Table::Memberships,
                key: format!("({}, {})", row.user_id, row.organization_id),
            });
        }
        tables.memberships.insert(key, row.clone());
        Ok(row)
    }

    pub async fn find_membership(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<MembershipRow>, StoreError> {
        self.check_read().await?;
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.memberships.get(&(user_id, organization_id)).cloned())
    }

    pub async fn list_memberships(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<MembershipRow>, StoreError> {
        self.check_read().await?;
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut rows: Vec<MembershipRow> = tables
            .memberships
            .values()
            .filter(|m| m.organization_id == organization_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.user_id);
        Ok(rows)
    }

    pub async fn delete_membership(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<(), StoreError> {
        self.check_write(Table::Memberships).await?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables
            .memberships
            .remove(&(user_id, organization_id))
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                table: Table::Memberships,
            })
    }

    // ── invitations ──────────────────────────────────────────────────────

    pub async fn insert_invitation(&self, new: NewInvitation) -> Result<InvitationRecord, StoreError> {
        self.check_write(Table::Invitations).await?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        let record = InvitationRecord {
            token: Uuid::now_v7(),
            organization_id: new.organization_id,
            email: normalize_email(&new.email),
            role: new.role,
            invited_by: new.invited_by,
            created_at: Utc::now(),
            expires_at: new.expires_at,
            accepted_at: None,
        };
        if tables.invitations.contains_key(&record.token) {
            return Err(StoreError::UniqueViolation {
                table: Table::Invitations,
                key: record.token.to_string(),
            });
        }
        tables.invitations.insert(record.token, record.clone());
        Ok(record)
    }

    pub async fn get_invitation(&self, token: Uuid) -> Result<Option<InvitationRecord>, StoreError> {
        self.check_read().await?;
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.invitations.get(&token).cloned())
    }

    /// Conditional update: succeeds only if the invitation is still pending.
    pub async fn mark_invitation_accepted(
        &self,
        token: Uuid,
        at: DateTime<Utc>,
    ) -> Result<InvitationRecord, StoreError> {
        self.check_write(Table::Invitations).await?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        let invitation = tables
            .invitations
            .get_mut(&token)
            .ok_or(StoreError::NotFound {
                table: Table::Invitations,
            })?;
        if invitation.accepted_at.is_some() {
            return Err(StoreError::Conflict {
                table: Table::Invitations,
                reason: "invitation already accepted".to_string(),
            });
        }
        invitation.accepted_at = Some(at);
        Ok(invitation.clone())
    }
}
