use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{NaiveTime, TimeZone, Utc};
use std::sync::Arc;

use accord_auth::{
    Condition, ConditionRecord, GrantRef, NullDecisionLog, PermissionDefinition, PermissionEngine,
    PermissionKey, RequestContext, RoleDefinition, ScopeRecord, TimeWindow,
};
use accord_core::UserId;
use accord_infra::cache::{CacheConfig, CachedGrantStore};
use accord_infra::grant_store::{GrantAdmin, InMemoryGrantStore};

/// A user with `roles` roles, each granting five permissions, plus one
/// time-conditioned scope.
fn seeded_store(roles: usize) -> (Arc<InMemoryGrantStore>, UserId) {
    let store = Arc::new(InMemoryGrantStore::new());
    let user = UserId::new();
    let assigned_at = Utc::now();

    for r in 0..roles {
        let perms: Vec<String> = (0..5).map(|p| format!("area{r}:action{p}")).collect();
        for perm in &perms {
            store
                .define_permission(PermissionDefinition::new(PermissionKey::new(perm.clone())))
                .unwrap();
        }
        store
            .define_role(
                RoleDefinition::new(accord_auth::RoleKey::new(format!("role{r}")), r as i32)
                    .with_permissions(perms.into_iter().map(PermissionKey::new)),
            )
            .unwrap();
        store
            .assign_role(user, accord_auth::RoleKey::new(format!("role{r}")), assigned_at)
            .unwrap();
    }

    store
        .define_permission(PermissionDefinition::new("qc:inspect"))
        .unwrap();
    let scope = ScopeRecord::new(user, "qc:inspect", assigned_at);
    store
        .attach_condition(ConditionRecord::new(
            GrantRef::Scope(scope.id),
            Condition::Time(TimeWindow::new(
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                "America/Los_Angeles",
            )),
        ))
        .unwrap();
    store.insert_scope(scope).unwrap();

    (store, user)
}

fn bench_decide_uncached(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide_uncached");
    group.throughput(Throughput::Elements(1));

    for roles in [1usize, 10, 50] {
        let (store, user) = seeded_store(roles);
        let engine = PermissionEngine::new(store, NullDecisionLog);
        let perm = PermissionKey::new(format!("area{}:action4", roles - 1));
        let ctx = RequestContext::at(Utc::now());

        group.bench_with_input(BenchmarkId::from_parameter(roles), &roles, |b, _| {
            b.iter(|| black_box(engine.decide(user, &perm, None, &ctx)));
        });
    }

    group.finish();
}

fn bench_decide_cached(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide_cached");
    group.throughput(Throughput::Elements(1));

    for roles in [1usize, 10, 50] {
        let (store, user) = seeded_store(roles);
        let cache = CachedGrantStore::new(store.clone(), CacheConfig::default())
            .with_change_feed(store.subscribe_changes());
        let engine = PermissionEngine::new(cache, NullDecisionLog);
        let perm = PermissionKey::new(format!("area{}:action4", roles - 1));
        let ctx = RequestContext::at(Utc::now());

        group.bench_with_input(BenchmarkId::from_parameter(roles), &roles, |b, _| {
            b.iter(|| black_box(engine.decide(user, &perm, None, &ctx)));
        });
    }

    group.finish();
}

fn bench_time_condition(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide_time_condition");
    let (store, user) = seeded_store(1);
    let engine = PermissionEngine::new(store, NullDecisionLog);
    let perm = PermissionKey::new("qc:inspect");
    let inside = RequestContext::at(Utc.with_ymd_and_hms(2024, 6, 3, 17, 0, 0).unwrap());
    let outside = RequestContext::at(Utc.with_ymd_and_hms(2024, 6, 4, 3, 0, 0).unwrap());

    group.bench_function("inside_window", |b| {
        b.iter(|| black_box(engine.decide(user, &perm, None, &inside)));
    });
    group.bench_function("outside_window", |b| {
        b.iter(|| black_box(engine.decide(user, &perm, None, &outside)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decide_uncached,
    bench_decide_cached,
    bench_time_condition
);
criterion_main!(benches);
