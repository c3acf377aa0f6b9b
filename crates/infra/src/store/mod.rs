//! Storage collaborator used by the write flows.
//!
//! Models a driver without multi-statement transactions: every method is one
//! independent write or read, and the only consistency tool it offers is
//! unique keys. Multi-entity writes go through `taskforge-saga`.

mod in_memory;
mod membership_lookup;
mod records;

pub use in_memory::InMemoryStore;
pub use membership_lookup::StoreMembershipLookup;
pub use records::{
    InvitationRecord, MembershipRow, NewInvitation, NewOrganization, NewUser, OrganizationRecord,
    UserRecord,
};

use thiserror::Error;

/// Tables known to the store (used in errors and fault injection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Organizations,
    Memberships,
    Invitations,
}

impl core::fmt::Display for Table {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Table::Users => "users",
            Table::Organizations => "organizations",
            Table::Memberships => "memberships",
            Table::Invitations => "invitations",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("unique constraint violated on {table}: {key}")]
    UniqueViolation { table: Table, key: String },

    #[error("no matching row in {table}")]
    NotFound { table: Table },

    /// A conditional write found the row in an unexpected state.
    #[error("write conflict on {table}: {reason}")]
    Conflict { table: Table, reason: String },
}
