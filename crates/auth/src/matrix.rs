//! Static role → permission table.
//!
//! Each role's grants are listed explicitly. Nothing is derived from another
//! role, so `owner` is not automatically a superset of `admin`; use
//! [`PermissionMatrix::inheritance_gaps`] to surface places where the lists
//! have drifted apart.

use std::collections::HashSet;

use serde::Serialize;

use crate::{Action, Permission, Role, Subject};

/// Total mapping from every [`Role`] to its set of permissions.
///
/// Built once, read-only afterwards. Lookups never fail: every role owns a
/// (possibly empty) set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionMatrix {
    sets: [HashSet<Permission>; 4],
}

/// A permission held by a lower-ranked role but missing from a higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InheritanceGap {
    pub higher: Role,
    pub lower: Role,
    pub permission: Permission,
}

/// Role definition with its granted permissions (for audit/display).
#[derive(Debug, Clone, Serialize)]
pub struct RoleDefinition {
    pub role: Role,
    pub rank: u8,
    pub permissions: Vec<Permission>,
}

fn slot(role: Role) -> usize {
    match role {
        Role::Owner => 0,
        Role::Admin => 1,
        Role::Member => 2,
        Role::Guest => 3,
    }
}

fn all_of(subject: Subject) -> impl Iterator<Item = Permission> {
    Action::ALL.into_iter().map(move |a| Permission::new(a, subject))
}

fn only(subject: Subject, actions: &[Action]) -> impl Iterator<Item = Permission> + '_ {
    actions.iter().map(move |a| Permission::new(*a, subject))
}

/// The shipped permission table.
///
/// The `match` is exhaustive on purpose: a new [`Role`] variant does not
/// compile until its grants are written down here.
fn standard_grants(role: Role) -> Vec<Permission> {
    use Action::*;
    use Subject::*;

    let work_items = [Project, Task, Subtask, Comment];

    match role {
        Role::Owner => only(Organization, &[Read, Update, Delete])
            .chain(all_of(Member))
            .chain(only(Invitation, &[Create, Read, Delete]))
            .chain(work_items.into_iter().flat_map(all_of))
            .collect(),
        Role::Admin => only(Organization, &[Read, Update])
            .chain(all_of(Member))
            .chain(only(Invitation, &[Create, Read, Delete]))
            .chain(work_items.into_iter().flat_map(all_of))
            .collect(),
        Role::Member => only(Organization, &[Read])
            .chain(only(Member, &[Read]))
            .chain(only(Project, &[Read]))
            .chain(only(Task, &[Create, Read, Update]))
            .chain(only(Subtask, &[Create, Read, Update]))
            .chain(only(Comment, &[Create, Read, Update]))
            .collect(),
        Role::Guest => [Organization, Project, Task, Subtask, Comment]
            .into_iter()
            .map(|s| Permission::new(Read, s))
            .collect(),
    }
}

impl PermissionMatrix {
    /// The default taskforge table.
    pub fn standard() -> Self {
        Self::from_fn(standard_grants)
    }

    /// Build a matrix by asking `grants` for each role exactly once.
    pub fn from_fn<F>(grants: F) -> Self
    where
        F: Fn(Role) -> Vec<Permission>,
    {
        let mut sets: [HashSet<Permission>; 4] = Default::default();
        for role in Role::ALL {
            sets[slot(role)] = grants(role).into_iter().collect();
        }
        Self { sets }
    }

    /// Permissions granted to `role`. Total and O(1).
    pub fn permissions_for(&self, role: Role) -> &HashSet<Permission> {
        &self.sets[slot(role)]
    }

    pub fn grants(&self, role: Role, permission: Permission) -> bool {
        self.permissions_for(role).contains(&permission)
    }

    /// Every permission a lower-ranked role holds that a higher-ranked role
    /// does not.
    ///
    /// An empty result means the table happens to be monotonic. A non-empty one
    /// may be intentional or a latent bug; it is reported, never corrected.
    pub fn inheritance_gaps(&self) -> Vec<InheritanceGap> {
        let mut gaps = Vec::new();
        for higher in Role::ALL {
            for lower in Role::ALL {
                if higher.rank() <= lower.rank() {
                    continue;
                }
                let mut missing: Vec<Permission> = self
                    .permissions_for(lower)
                    .difference(self.permissions_for(higher))
                    .copied()
                    .collect();
                missing.sort();
                gaps.extend(missing.into_iter().map(|permission| InheritanceGap {
                    higher,
                    lower,
                    permission,
                }));
            }
        }
        gaps
    }

    /// Per-role listing for audits, most privileged first, permissions sorted.
    pub fn role_definitions(&self) -> Vec<RoleDefinition> {
        Role::ALL
            .into_iter()
            .map(|role| {
                let mut permissions: Vec<Permission> =
                    self.permissions_for(role).iter().copied().collect();
                permissions.sort();
                RoleDefinition {
                    role,
                    rank: role.rank(),
                    permissions,
                }
            })
            .collect()
    }
}

impl Default for PermissionMatrix {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn perm(action: Action, subject: Subject) -> Permission {
        Permission::new(action, subject)
    }

    #[test]
    fn every_role_has_an_entry() {
        let matrix = PermissionMatrix::standard();
        for role in Role::ALL {
            assert!(
                !matrix.permissions_for(role).is_empty(),
                "{role} has no permissions in the standard table"
            );
        }
    }

    #[test]
    fn empty_grants_still_yield_a_set() {
        let matrix = PermissionMatrix::from_fn(|_| Vec::new());
        for role in Role::ALL {
            assert!(matrix.permissions_for(role).is_empty());
        }
    }

    #[test]
    fn member_can_create_tasks_but_not_delete_projects() {
        let matrix = PermissionMatrix::standard();
        assert!(matrix.grants(Role::Member, perm(Action::Create, Subject::Task)));
        assert!(!matrix.grants(Role::Member, perm(Action::Delete, Subject::Project)));
    }

    #[test]
    fn only_owner_can_delete_the_organization() {
        let matrix = PermissionMatrix::standard();
        let delete_org = perm(Action::Delete, Subject::Organization);
        let holders: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|r| matrix.grants(*r, delete_org))
            .collect();
        assert_eq!(holders, vec![Role::Owner]);
    }

    #[test]
    fn guest_is_read_only() {
        let matrix = PermissionMatrix::standard();
        assert!(
            matrix
                .permissions_for(Role::Guest)
                .iter()
                .all(|p| p.action == Action::Read)
        );
    }

    #[test]
    fn standard_table_has_no_inheritance_gaps() {
        assert!(PermissionMatrix::standard().inheritance_gaps().is_empty());
    }

    #[test]
    fn gap_is_reported_not_fixed() {
        let matrix = PermissionMatrix::from_fn(|role| match role {
            Role::Owner => vec![perm(Action::Read, Subject::Project)],
            Role::Admin => vec![
                perm(Action::Read, Subject::Project),
                perm(Action::Delete, Subject::Project),
            ],
            Role::Member | Role::Guest => vec![],
        });

        let gaps = matrix.inheritance_gaps();
        assert_eq!(
            gaps,
            vec![InheritanceGap {
                higher: Role::Owner,
                lower: Role::Admin,
                permission: perm(Action::Delete, Subject::Project),
            }]
        );
        assert!(!matrix.grants(Role::Owner, perm(Action::Delete, Subject::Project)));
    }

    #[test]
    fn role_definitions_are_sorted_and_complete() {
        let defs = PermissionMatrix::standard().role_definitions();
        let roles: Vec<Role> = defs.iter().map(|d| d.role).collect();
        assert_eq!(roles, Role::ALL.to_vec());
        for def in &defs {
            let mut sorted = def.permissions.clone();
            sorted.sort();
            assert_eq!(def.permissions, sorted);
        }
    }

    fn any_role() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::ALL.to_vec())
    }

    fn any_permission() -> impl Strategy<Value = Permission> {
        (
            prop::sample::select(Action::ALL.to_vec()),
            prop::sample::select(Subject::ALL.to_vec()),
        )
            .prop_map(|(a, s)| Permission::new(a, s))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// `grants` agrees with set membership for every role/permission pair.
        #[test]
        fn grants_matches_set_membership(role in any_role(), p in any_permission()) {
            let matrix = PermissionMatrix::standard();
            prop_assert_eq!(matrix.grants(role, p), matrix.permissions_for(role).contains(&p));
        }

        /// `from_fn` stores exactly what the closure returned for each role.
        #[test]
        fn from_fn_is_faithful(perms in prop::collection::vec(any_permission(), 0..12)) {
            let matrix = PermissionMatrix::from_fn(|role| {
                if role == Role::Member { perms.clone() } else { Vec::new() }
            });
            let expected: HashSet<Permission> = perms.iter().copied().collect();
            prop_assert_eq!(matrix.permissions_for(Role::Member), &expected);
            prop_assert!(matrix.permissions_for(Role::Owner).is_empty());
        }
    }
}
