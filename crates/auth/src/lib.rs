//! `taskforge-auth`: role-based permission engine.
//!
//! Decoupled from HTTP and storage: membership data arrives through the
//! [`MembershipLookup`] trait and every answer is computed in memory from the
//! static [`PermissionMatrix`].

pub mod authorize;
pub mod engine;
pub mod explain;
pub mod matrix;
pub mod membership;
pub mod permissions;
pub mod roles;

pub use authorize::{AuthzError, require_all, require_permission};
pub use engine::{AccessDecision, PermissionEngine, Requirement};
pub use explain::{AuthorizationExplanation, DecisionBasis};
pub use matrix::{InheritanceGap, PermissionMatrix, RoleDefinition};
pub use membership::{LookupError, Membership, MembershipLookup};
pub use permissions::{Action, Permission, Subject};
pub use roles::{Role, UnknownRole};
