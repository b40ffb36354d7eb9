//! Permission resolution against the in-process store.

use keyhold_auth::error::AuthError;
use keyhold_auth::permission::PermissionResolver;
use keyhold_core::models::access::{AccessLevel, GrantOrganizationAccess, GrantWarehouseAccess};
use keyhold_core::models::permission::{CreatePermission, WILDCARD};
use keyhold_core::models::role::{CreateRole, Role};
use keyhold_core::models::user::{CreateUser, UserStatus};
use keyhold_core::repository::{AccessRepository, RoleRepository, UserRepository};
use keyhold_db::MemoryStore;
use uuid::Uuid;

struct Fixture {
    store: MemoryStore,
    resolver: PermissionResolver<MemoryStore>,
    user: Uuid,
}

async fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let user = store
        .create_user(CreateUser {
            email: format!("{}@example.com", Uuid::new_v4()),
            phone: None,
            display_name: "Picker".into(),
            password_hash: None,
            status: UserStatus::Active,
            email_verified: true,
        })
        .await
        .unwrap();
    Fixture {
        resolver: PermissionResolver::new(store.clone()),
        store,
        user: user.id,
    }
}

async fn role_with(store: &MemoryStore, name: &str, system: bool, codes: &[&str]) -> Role {
    let role = store
        .create_role(CreateRole {
            name: name.into(),
            description: format!("{name} role"),
            is_system_role: system,
            template_role_id: None,
        })
        .await
        .unwrap();
    for code in codes {
        let permission = match store.find_permission_by_code(code).await.unwrap() {
            Some(p) => p,
            None => store
                .create_permission(CreatePermission {
                    code: (*code).into(),
                    module: code.split('.').next().unwrap_or_default().into(),
                    description: String::new(),
                })
                .await
                .unwrap(),
        };
        store.grant_permission(role.id, permission.id).await.unwrap();
    }
    role
}

async fn grant_org(store: &MemoryStore, user: Uuid, org: Uuid, level: AccessLevel) -> Uuid {
    store
        .grant_organization_access(GrantOrganizationAccess {
            user_id: user,
            organization_id: org,
            access_level: level,
            is_default: false,
        })
        .await
        .unwrap()
        .id
}

async fn grant_warehouse(store: &MemoryStore, user: Uuid, wh: Uuid, org: Uuid, default: bool) {
    store
        .grant_warehouse_access(GrantWarehouseAccess {
            user_id: user,
            warehouse_id: wh,
            organization_id: Some(org),
            access_level: AccessLevel::Full,
            is_default: default,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn organization_access_flips_the_decision() {
    let f = fixture().await;
    let org = Uuid::new_v4();
    let role = role_with(&f.store, "viewer", false, &["package.read"]).await;
    f.store.assign_role(f.user, role.id, None).await.unwrap();

    assert!(!f.resolver.can(f.user, "package.read", Some(org), None).await);

    let access = grant_org(&f.store, f.user, org, AccessLevel::ReadOnly).await;
    assert!(f.resolver.can(f.user, "package.read", Some(org), None).await);

    f.store.deactivate_organization_access(access).await.unwrap();
    assert!(!f.resolver.can(f.user, "package.read", Some(org), None).await);
}

#[tokio::test]
async fn access_level_none_is_no_access() {
    let f = fixture().await;
    let org = Uuid::new_v4();
    let role = role_with(&f.store, "viewer", false, &["package.read"]).await;
    f.store.assign_role(f.user, role.id, None).await.unwrap();
    grant_org(&f.store, f.user, org, AccessLevel::None).await;

    assert!(!f.resolver.can(f.user, "package.read", Some(org), None).await);
}

#[tokio::test]
async fn unknown_permission_is_denied() {
    let f = fixture().await;
    let role = role_with(&f.store, "admin", true, &[WILDCARD]).await;
    f.store.assign_role(f.user, role.id, None).await.unwrap();

    assert!(!f.resolver.can(f.user, "no.such.permission", None, None).await);
}

#[tokio::test]
async fn permission_must_come_from_a_role() {
    let f = fixture().await;
    let org = Uuid::new_v4();
    role_with(&f.store, "unassigned", false, &["package.write"]).await;
    let role = role_with(&f.store, "viewer", false, &["package.read"]).await;
    f.store.assign_role(f.user, role.id, None).await.unwrap();
    grant_org(&f.store, f.user, org, AccessLevel::Full).await;

    assert!(f.resolver.can(f.user, "package.read", Some(org), None).await);
    assert!(!f.resolver.can(f.user, "package.write", Some(org), None).await);
}

#[tokio::test]
async fn wildcard_grant_matches_known_codes() {
    let f = fixture().await;
    let org = Uuid::new_v4();
    role_with(&f.store, "catalog", false, &["package.read", "package.write"]).await;
    let role = role_with(&f.store, "manager", false, &[WILDCARD]).await;
    f.store.assign_role(f.user, role.id, None).await.unwrap();
    grant_org(&f.store, f.user, org, AccessLevel::Full).await;

    assert!(f.resolver.can(f.user, "package.write", Some(org), None).await);
}

#[tokio::test]
async fn system_role_bypasses_scope_but_not_grants() {
    let f = fixture().await;
    let org = Uuid::new_v4();
    role_with(&f.store, "catalog", false, &["package.write"]).await;
    let role = role_with(&f.store, "support", true, &["package.read"]).await;
    f.store.assign_role(f.user, role.id, None).await.unwrap();

    assert!(f.resolver.can(f.user, "package.read", Some(org), None).await);
    assert!(f.resolver.can(f.user, "package.read", Some(org), Some(Uuid::new_v4())).await);
    assert!(!f.resolver.can(f.user, "package.write", Some(org), None).await);
}

#[tokio::test]
async fn org_scoped_role_only_counts_in_its_organization() {
    let f = fixture().await;
    let (org_a, org_b) = (Uuid::new_v4(), Uuid::new_v4());
    let role = role_with(&f.store, "picker", false, &["package.read"]).await;
    f.store.assign_role(f.user, role.id, Some(org_a)).await.unwrap();
    grant_org(&f.store, f.user, org_a, AccessLevel::Full).await;
    grant_org(&f.store, f.user, org_b, AccessLevel::Full).await;

    assert!(f.resolver.can(f.user, "package.read", Some(org_a), None).await);
    assert!(!f.resolver.can(f.user, "package.read", Some(org_b), None).await);
    assert!(!f.resolver.can(f.user, "package.read", None, None).await);
}

#[tokio::test]
async fn warehouse_checks_require_grant_and_matching_org() {
    let f = fixture().await;
    let (org, other_org) = (Uuid::new_v4(), Uuid::new_v4());
    let wh = Uuid::new_v4();
    let role = role_with(&f.store, "picker", false, &["package.read"]).await;
    f.store.assign_role(f.user, role.id, None).await.unwrap();
    grant_org(&f.store, f.user, org, AccessLevel::Full).await;
    grant_org(&f.store, f.user, other_org, AccessLevel::Full).await;

    assert!(!f.resolver.can(f.user, "package.read", Some(org), Some(wh)).await);

    grant_warehouse(&f.store, f.user, wh, org, false).await;
    assert!(f.resolver.can(f.user, "package.read", Some(org), Some(wh)).await);
    // The warehouse implies its organization.
    assert!(f.resolver.can(f.user, "package.read", None, Some(wh)).await);
    assert!(!f.resolver.can(f.user, "package.read", Some(other_org), Some(wh)).await);
}

#[tokio::test]
async fn effective_permissions_are_sorted_and_scoped() {
    let f = fixture().await;
    let org = Uuid::new_v4();
    let global = role_with(&f.store, "viewer", false, &["package.read", "audit.read"]).await;
    let scoped = role_with(&f.store, "writer", false, &["package.write", "package.read"]).await;
    f.store.assign_role(f.user, global.id, None).await.unwrap();
    f.store.assign_role(f.user, scoped.id, Some(org)).await.unwrap();

    assert_eq!(
        f.resolver.effective_permissions(f.user, None).await.unwrap(),
        vec!["audit.read", "package.read"]
    );
    assert_eq!(
        f.resolver
            .effective_permissions(f.user, Some(org))
            .await
            .unwrap(),
        vec!["audit.read", "package.read", "package.write"]
    );
}

#[tokio::test]
async fn default_selection_prefers_flag_then_strength() {
    let f = fixture().await;
    let (org_a, org_b) = (Uuid::new_v4(), Uuid::new_v4());
    grant_org(&f.store, f.user, org_a, AccessLevel::ReadOnly).await;
    grant_org(&f.store, f.user, org_b, AccessLevel::Full).await;

    let picked = f.resolver.default_organization(f.user).await.unwrap().unwrap();
    assert_eq!(picked.organization_id, org_b);

    f.store
        .grant_organization_access(GrantOrganizationAccess {
            user_id: f.user,
            organization_id: org_a,
            access_level: AccessLevel::ReadOnly,
            is_default: true,
        })
        .await
        .unwrap();
    let picked = f.resolver.default_organization(f.user).await.unwrap().unwrap();
    assert_eq!(picked.organization_id, org_a);

    let (wh_a, wh_b) = (Uuid::new_v4(), Uuid::new_v4());
    grant_warehouse(&f.store, f.user, wh_a, org_a, false).await;
    grant_warehouse(&f.store, f.user, wh_b, org_b, true).await;
    let picked = f
        .resolver
        .default_warehouse(f.user, Some(org_a))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(picked.warehouse_id, wh_a);
    let picked = f.resolver.default_warehouse(f.user, None).await.unwrap().unwrap();
    assert_eq!(picked.warehouse_id, wh_b);

    assert!(
        f.resolver
            .default_organization(Uuid::new_v4())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn role_from_template_copies_grants() {
    let f = fixture().await;
    let template = role_with(&f.store, "template", true, &["package.read", "package.write"]).await;

    let role = f
        .resolver
        .create_role_from_template(template.id, "Warehouse staff", None)
        .await
        .unwrap();
    assert!(!role.is_system_role);
    assert_eq!(role.template_role_id, Some(template.id));
    assert_eq!(role.description, "template role");

    let codes: Vec<String> = f
        .store
        .find_role_permissions(role.id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.code)
        .collect();
    assert_eq!(codes, vec!["package.read", "package.write"]);

    let err = f
        .resolver
        .create_role_from_template(Uuid::new_v4(), "Orphan", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NotFound(_)));

    let err = f
        .resolver
        .create_role_from_template(template.id, "  ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidRequest(_)));
}
