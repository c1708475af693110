use std::sync::atomic::Ordering;
use std::time::Duration;

use tenantgate_core::TenantId;
use tenantgate_domain::{GrantSet, PermissionSet, Role, TemplateId};

use crate::config::{NoTemplatePolicy, ResolverPolicy};
use crate::permission_template_service::{
    CreateTemplateInput, PermissionTemplateService, PermissionsPatch, TemplatePatch,
};
use crate::template_assignment_service::TemplateAssignmentService;
use crate::test_support::{Harness, membership, settle, template, user, view_permissions};

use super::{PermissionResolver, PermissionSource, SessionContext};

fn session(
    tenant_id: TenantId,
    user_id: &str,
    role: Role,
    assigned: Option<TemplateId>,
) -> SessionContext {
    let user_id = user(user_id);
    SessionContext {
        membership: Some(membership(tenant_id, &user_id, role, assigned)),
        user_id,
        tenant_id,
        is_owner: false,
    }
}

fn open(harness: &Harness, session: SessionContext) -> PermissionResolver {
    PermissionResolver::open(
        session,
        harness.cache.clone(),
        harness.bus.clone(),
        ResolverPolicy::default(),
    )
}

fn templates(harness: &Harness) -> PermissionTemplateService {
    PermissionTemplateService::new(
        harness.documents.clone(),
        harness.bus.clone(),
        harness.clock.clone(),
    )
}

async fn seed_assigned(
    harness: &Harness,
    tenant_id: TenantId,
    user_id: &str,
    permissions: PermissionSet,
) -> SessionContext {
    let stored = template(tenant_id, "Template", permissions, harness.now());
    harness.documents.seed(stored.clone()).await;
    let session = session(tenant_id, user_id, Role::Staff, Some(stored.id));
    if let Some(membership) = session.membership.clone() {
        harness.memberships.seed(membership).await;
    }
    session
}

#[tokio::test]
async fn owner_gets_universal_set_without_template() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let resolver = open(
        &harness,
        SessionContext {
            user_id: user("owner"),
            tenant_id,
            is_owner: true,
            membership: None,
        },
    );

    assert!(resolver.can_delete("products").await);
    assert!(resolver.can_access("any_future_resource").await);
    assert!(resolver.can_manage_employees(Some(Role::Admin)).await);
    assert!(resolver.can_manage_templates().await);
    assert_eq!(harness.documents.find_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.bus.listener_count(), 0);
}

#[tokio::test]
async fn owner_role_membership_counts_as_owner() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let resolver = open(&harness, session(tenant_id, "o-1", Role::Owner, None));

    let effective = resolver.resolve().await;

    assert_eq!(effective.source(), PermissionSource::Owner);
    assert!(effective.can_edit("settings"));
}

#[tokio::test]
async fn unassigned_member_is_denied_everything() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = session(tenant_id, "u-1", Role::Admin, None);
    if let Some(membership) = session.membership.clone() {
        harness.memberships.seed(membership).await;
    }
    let resolver = open(&harness, session);

    assert!(!resolver.can_access("dashboard").await);
    assert!(!resolver.can_create("sales").await);
    assert!(!resolver.can_edit("sales").await);
    assert!(!resolver.can_delete("sales").await);
    assert!(!resolver.can_manage_employees(None).await);
    assert_eq!(
        resolver.effective_permissions().map(|effective| effective.source()),
        Some(PermissionSource::Unassigned)
    );
}

#[tokio::test]
async fn role_defaults_policy_grants_role_table() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let resolver = PermissionResolver::open(
        session(tenant_id, "u-1", Role::Manager, None),
        harness.cache.clone(),
        harness.bus.clone(),
        ResolverPolicy {
            no_template: NoTemplatePolicy::RoleDefaults,
        },
    );

    let effective = resolver.resolve().await;

    assert_eq!(effective.source(), PermissionSource::RoleDefault(Role::Manager));
    assert!(effective.can_access("sales"));
    assert!(!effective.can_access("settings"));
}

#[tokio::test]
async fn role_defaults_policy_never_covers_dangling_templates() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let missing = TemplateId::new();
    let resolver = PermissionResolver::open(
        session(tenant_id, "u-1", Role::Manager, Some(missing)),
        harness.cache.clone(),
        harness.bus.clone(),
        ResolverPolicy {
            no_template: NoTemplatePolicy::RoleDefaults,
        },
    );

    let effective = resolver.resolve().await;

    assert_eq!(effective.source(), PermissionSource::DanglingTemplate(missing));
    assert!(effective.permissions().is_empty());
}

#[tokio::test]
async fn assigned_template_answers_checks() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(
        &harness,
        tenant_id,
        "u-1",
        view_permissions(&["dashboard", "sales"]),
    )
    .await;
    let resolver = open(&harness, session);

    assert!(resolver.can_access("sales").await);
    assert!(!resolver.can_access("finance").await);
    assert_eq!(harness.documents.find_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.memberships.find_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn legacy_alias_matches_canonical_grant() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session =
        seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["products_stocks"])).await;
    let resolver = open(&harness, session);

    assert!(resolver.can_access("products").await);
    assert!(resolver.can_access("inventory").await);
}

#[tokio::test]
async fn create_falls_back_to_edit_for_older_templates() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let permissions = PermissionSet {
        can_create: None,
        can_edit: GrantSet::from_values(["sales"]),
        ..PermissionSet::empty()
    };
    let session = seed_assigned(&harness, tenant_id, "u-1", permissions).await;
    let resolver = open(&harness, session);

    assert!(resolver.can_create("sales").await);
    assert!(!resolver.can_create("finance").await);
}

#[tokio::test]
async fn base_role_label_never_grants_access() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let mut labelled = template(tenant_id, "Admin-ish", PermissionSet::empty(), harness.now());
    labelled.base_role_label = Some(Role::Admin);
    harness.documents.seed(labelled.clone()).await;
    let resolver = open(
        &harness,
        session(tenant_id, "u-1", Role::Staff, Some(labelled.id)),
    );

    assert!(!resolver.can_access("settings").await);
    assert!(!resolver.can_manage_employees(None).await);
    assert!(!resolver.can_manage_templates().await);
}

#[tokio::test]
async fn template_update_flips_open_session() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(
        &harness,
        tenant_id,
        "u-1",
        view_permissions(&["dashboard", "sales"]),
    )
    .await;
    let template_id = session
        .membership
        .as_ref()
        .and_then(|membership| membership.assigned_template_id);
    let resolver = open(&harness, session);
    assert!(!resolver.can_access("finance").await);

    let Some(template_id) = template_id else {
        panic!("session should carry a template");
    };
    let updated = templates(&harness)
        .update(
            tenant_id,
            template_id,
            TemplatePatch {
                permissions: Some(PermissionsPatch {
                    can_view: Some(GrantSet::from_values(["dashboard", "sales", "finance"])),
                    ..PermissionsPatch::default()
                }),
                ..TemplatePatch::default()
            },
        )
        .await;
    assert!(updated.is_ok());
    assert!(resolver.is_stale());

    assert!(resolver.can_access("finance").await);
}

#[tokio::test]
async fn live_push_from_another_process_flips_open_session() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["sales"])).await;
    let resolver = open(&harness, session);
    assert!(!resolver.can_access("finance").await);
    settle().await;

    let Some(mut edited) = harness
        .cache
        .entry(&user("u-1"), tenant_id)
        .await
        .and_then(|entry| entry.template_snapshot)
    else {
        panic!("template should be cached");
    };
    edited.permissions = view_permissions(&["sales", "finance"]);
    harness.documents.seed(edited.clone()).await;
    harness.documents.push(edited.id, Some(edited));
    settle().await;

    assert!(resolver.is_stale());
    assert!(resolver.can_access("finance").await);
}

#[tokio::test]
async fn deleting_template_denies_open_session() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["ALL"])).await;
    let template_id = session
        .membership
        .as_ref()
        .and_then(|membership| membership.assigned_template_id);
    let resolver = open(&harness, session);
    assert!(resolver.can_access("sales").await);

    let Some(template_id) = template_id else {
        panic!("session should carry a template");
    };
    assert!(templates(&harness).delete(tenant_id, template_id).await.is_ok());

    for resource in ["dashboard", "sales", "finance", "settings"] {
        assert!(!resolver.can_access(resource).await);
    }
    assert_eq!(
        resolver.effective_permissions().map(|effective| effective.source()),
        Some(PermissionSource::DanglingTemplate(template_id))
    );
}

#[tokio::test]
async fn events_for_other_templates_are_ignored() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["sales"])).await;
    let resolver = open(&harness, session);
    assert!(resolver.can_access("sales").await);

    let other = templates(&harness)
        .create(
            tenant_id,
            &user("owner"),
            CreateTemplateInput {
                name: "Other".to_owned(),
                description: None,
                base_role_label: None,
                permissions: PermissionSet::empty(),
            },
        )
        .await;
    let Ok(other) = other else {
        panic!("create should succeed");
    };
    assert!(templates(&harness).delete(tenant_id, other.id).await.is_ok());
    assert!(
        templates(&harness)
            .delete(TenantId::new(), other.id)
            .await
            .is_ok()
    );

    assert!(!resolver.is_stale());
}

#[tokio::test]
async fn nonexistent_template_assignment_resolves_empty() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let user_id = user("u-2");
    harness
        .memberships
        .seed(membership(tenant_id, &user_id, Role::Staff, None))
        .await;
    let assigned = TemplateAssignmentService::new(harness.memberships.clone())
        .assign(tenant_id, &user_id, Some(TemplateId::new()))
        .await;
    let Ok(assigned) = assigned else {
        panic!("assignment should succeed");
    };

    let resolver = open(
        &harness,
        SessionContext {
            user_id,
            tenant_id,
            is_owner: false,
            membership: Some(assigned),
        },
    );
    let effective = resolver.resolve().await;

    assert!(effective.permissions().is_empty());
    assert!(matches!(effective.source(), PermissionSource::DanglingTemplate(_)));
}

#[tokio::test]
async fn reassignment_is_seen_after_invalidation() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["sales"])).await;
    let finance = template(tenant_id, "Finance", view_permissions(&["finance"]), harness.now());
    harness.documents.seed(finance.clone()).await;
    let user_id = session.user_id.clone();
    let resolver = open(&harness, session);
    assert!(!resolver.can_access("finance").await);

    let assigned = TemplateAssignmentService::new(harness.memberships.clone())
        .assign(tenant_id, &user_id, Some(finance.id))
        .await;
    assert!(assigned.is_ok());
    harness.cache.invalidate(&user_id, tenant_id).await;

    assert!(resolver.can_access("finance").await);
    assert!(!resolver.can_access("sales").await);
}

#[tokio::test]
async fn unavailable_documents_fail_closed() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["ALL"])).await;
    harness.documents.fail_finds.store(true, Ordering::SeqCst);
    let resolver = PermissionResolver::open(
        session,
        harness.cache.clone(),
        harness.bus.clone(),
        ResolverPolicy {
            no_template: NoTemplatePolicy::RoleDefaults,
        },
    );

    let effective = resolver.resolve().await;

    assert_eq!(effective.source(), PermissionSource::Unavailable);
    assert!(!effective.can_access("dashboard"));
}

#[tokio::test]
async fn close_unsubscribes_and_releases_live_feed() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["sales"])).await;
    let resolver = open(&harness, session);
    assert!(resolver.can_access("sales").await);
    settle().await;
    assert_eq!(harness.bus.listener_count(), 1);
    assert_eq!(harness.documents.open_subscriptions(), 1);

    resolver.close();
    resolver.close();
    settle().await;

    assert_eq!(harness.bus.listener_count(), 0);
    assert_eq!(harness.documents.open_subscriptions(), 0);
    assert!(!resolver.is_open());
    assert!(resolver.effective_permissions().is_none());
    assert!(!resolver.can_access("sales").await);
}

#[tokio::test]
async fn dropping_resolver_closes_it() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["sales"])).await;
    let resolver = open(&harness, session);
    assert!(resolver.can_access("sales").await);

    drop(resolver);
    settle().await;

    assert_eq!(harness.bus.listener_count(), 0);
    assert_eq!(harness.documents.open_subscriptions(), 0);
}

#[tokio::test]
async fn late_result_after_close_is_discarded() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["sales"])).await;
    harness.documents.slow_finds.store(true, Ordering::SeqCst);
    let resolver = open(&harness, session);

    let (allowed, ()) = tokio::join!(resolver.can_access("sales"), async {
        tokio::task::yield_now().await;
        resolver.close();
    });
    settle().await;

    assert!(!allowed);
    assert!(resolver.effective_permissions().is_none());
    assert_eq!(harness.documents.open_subscriptions(), 0);
}

#[tokio::test]
async fn closing_one_session_keeps_sibling_feed_alive() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["sales"])).await;
    let first = open(&harness, session.clone());
    let second = open(&harness, session);
    assert!(first.can_access("sales").await);
    assert!(!second.can_access("finance").await);
    settle().await;

    first.close();
    settle().await;
    assert_eq!(harness.cache.consumer_count(&user("u-1"), tenant_id), 1);
    assert_eq!(harness.documents.open_subscriptions(), 1);

    let Some(mut edited) = harness
        .cache
        .entry(&user("u-1"), tenant_id)
        .await
        .and_then(|entry| entry.template_snapshot)
    else {
        panic!("template should be cached");
    };
    edited.permissions = view_permissions(&["sales", "finance"]);
    harness.documents.seed(edited.clone()).await;
    harness.documents.push(edited.id, Some(edited));
    settle().await;

    assert!(second.is_stale());
    assert!(second.can_access("finance").await);
}

#[tokio::test]
async fn owner_close_leaves_member_feed_alone() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["sales"])).await;
    let member = open(&harness, session.clone());
    assert!(member.can_access("sales").await);
    settle().await;

    let owner = open(
        &harness,
        SessionContext {
            is_owner: true,
            ..session
        },
    );
    owner.close();
    settle().await;

    assert_eq!(harness.cache.consumer_count(&user("u-1"), tenant_id), 1);
    assert_eq!(harness.documents.open_subscriptions(), 1);
}

#[tokio::test]
async fn revoked_assignment_is_denied_once_entry_expires() {
    let harness = Harness::new();
    let tenant_id = TenantId::new();
    let session = seed_assigned(&harness, tenant_id, "u-1", view_permissions(&["sales"])).await;
    let resolver = open(&harness, session);
    assert!(resolver.can_access("sales").await);

    harness
        .memberships
        .seed(membership(tenant_id, &user("u-1"), Role::Staff, None))
        .await;
    harness.clock.advance(Duration::from_secs(301));

    assert!(!resolver.can_access("sales").await);
    assert_eq!(resolver.resolve().await.source(), PermissionSource::Unassigned);
}
