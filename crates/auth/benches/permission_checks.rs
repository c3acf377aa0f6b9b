use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use chrono::Utc;
use taskforge_auth::{
    Action, LookupError, Membership, MembershipLookup, Permission, PermissionEngine,
    PermissionMatrix, Role, Subject,
};
use taskforge_core::{OrganizationId, UserId};

/// Lookup that answers from memory with a fixed role, isolating engine cost.
struct FixedRole(Role);

#[async_trait::async_trait]
impl MembershipLookup for FixedRole {
    async fn find(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<Membership>, LookupError> {
        Ok(Some(Membership {
            user_id,
            organization_id,
            role: self.0,
            joined_at: Utc::now(),
        }))
    }
}

fn bench_matrix(c: &mut Criterion) {
    let matrix = PermissionMatrix::standard();
    let p = Permission::new(Action::Update, Subject::Task);

    c.bench_function("matrix_grants", |b| {
        b.iter(|| black_box(matrix.grants(black_box(Role::Member), black_box(p))))
    });

    c.bench_function("matrix_inheritance_gaps", |b| {
        b.iter(|| black_box(matrix.inheritance_gaps()))
    });
}

fn bench_engine(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let mut group = c.benchmark_group("engine_has_all_permissions");

    let all: Vec<Permission> = Action::ALL
        .into_iter()
        .flat_map(|a| Subject::ALL.into_iter().map(move |s| Permission::new(a, s)))
        .collect();

    for role in Role::ALL {
        let engine = PermissionEngine::new(FixedRole(role));
        group.bench_with_input(BenchmarkId::from_parameter(role), &all, |b, perms| {
            b.iter(|| {
                rt.block_on(engine.has_all_permissions(
                    UserId::new(7),
                    OrganizationId::new(42),
                    black_box(perms),
                ))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_matrix, bench_engine);
criterion_main!(benches);
