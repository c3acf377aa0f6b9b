use std::sync::Arc;

use taskforge_auth::{LookupError, Membership, MembershipLookup, Role};
use taskforge_core::{OrganizationId, UserId};

use super::{InMemoryStore, MembershipRow, StoreError};

/// Adapts [`InMemoryStore`] to the engine's [`MembershipLookup`].
#[derive(Debug, Clone)]
pub struct StoreMembershipLookup {
    store: Arc<InMemoryStore>,
}

impl StoreMembershipLookup {
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self { store }
    }
}

fn to_membership(row: MembershipRow) -> Result<Membership, LookupError> {
    let role: Role = row
        .role
        .parse()
        .map_err(|e| LookupError::Corrupt(format!("{e} for user {} in organization {}", row.user_id, row.organization_id)))?;
    Ok(Membership {
        user_id: row.user_id,
        organization_id: row.organization_id,
        role,
        joined_at: row.joined_at,
    })
}

#[async_trait::async_trait]
impl MembershipLookup for StoreMembershipLookup {
    async fn find(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<Membership>, LookupError> {
        match self.store.find_membership(user_id, organization_id).await {
            Ok(Some(row)) => to_membership(row).map(Some),
            Ok(None) => Ok(None),
            Err(StoreError::Unavailable(reason)) => Err(LookupError::Unavailable(reason)),
            Err(other) => Err(LookupError::Unavailable(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn missing_row_is_not_an_error() {
        let lookup = StoreMembershipLookup::new(Arc::new(InMemoryStore::new()));
        let found = lookup.find(UserId::new(1), OrganizationId::new(1)).await;
        assert_eq!(found, Ok(None));
    }

    #[tokio::test]
    async fn stored_tag_is_parsed_into_role() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_membership(UserId::new(7), OrganizationId::new(42), Role::Admin)
            .await
            .unwrap();

        let lookup = StoreMembershipLookup::new(store);
        let membership = lookup
            .find(UserId::new(7), OrganizationId::new(42))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(membership.role, Role::Admin);
    }

    #[tokio::test]
    async fn unknown_tag_is_corrupt() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_membership_row(MembershipRow {
                user_id: UserId::new(7),
                organization_id: OrganizationId::new(42),
                role: "superuser".to_string(),
                joined_at: Utc::now(),
            })
            .await
            .unwrap();

        let lookup = StoreMembershipLookup::new(store);
        let err = lookup
            .find(UserId::new(7), OrganizationId::new(42))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::Corrupt(_)));
    }

    #[tokio::test]
    async fn outage_is_unavailable() {
        let store = Arc::new(InMemoryStore::new());
        store.set_unavailable(true);

        let lookup = StoreMembershipLookup::new(store);
        let err = lookup
            .find(UserId::new(7), OrganizationId::new(42))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::Unavailable(_)));
    }
}
