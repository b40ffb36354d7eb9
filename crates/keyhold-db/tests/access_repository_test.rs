//! Integration tests for roles, permissions and organization/warehouse
//! grants.

use keyhold_core::error::KeyholdError;
use keyhold_core::models::access::{AccessLevel, GrantOrganizationAccess, GrantWarehouseAccess};
use keyhold_core::models::permission::CreatePermission;
use keyhold_core::models::role::CreateRole;
use keyhold_core::models::user::{CreateUser, UserStatus};
use keyhold_core::repository::{AccessRepository, RoleRepository, UserRepository};
use keyhold_db::MemoryStore;
use uuid::Uuid;

async fn setup() -> (MemoryStore, Uuid) {
    let store = MemoryStore::new();
    let user = store
        .create_user(CreateUser {
            email: "alice@example.com".into(),
            phone: None,
            display_name: "Alice".into(),
            password_hash: None,
            status: UserStatus::Active,
            email_verified: true,
        })
        .await
        .unwrap();
    (store, user.id)
}

fn role(name: &str) -> CreateRole {
    CreateRole {
        name: name.into(),
        description: String::new(),
        is_system_role: false,
        template_role_id: None,
    }
}

#[tokio::test]
async fn permission_codes_are_unique() {
    let (store, _) = setup().await;
    let input = CreatePermission {
        code: "package.read".into(),
        module: "package".into(),
        description: String::new(),
    };
    store.create_permission(input.clone()).await.unwrap();
    let err = store.create_permission(input).await.unwrap_err();
    assert!(matches!(err, KeyholdError::AlreadyExists { .. }));
}

#[tokio::test]
async fn grants_are_idempotent_and_sorted() {
    let (store, _) = setup().await;
    let r = store.create_role(role("clerk")).await.unwrap();
    for code in ["package.write", "package.read"] {
        let p = store
            .create_permission(CreatePermission {
                code: code.into(),
                module: "package".into(),
                description: String::new(),
            })
            .await
            .unwrap();
        store.grant_permission(r.id, p.id).await.unwrap();
        store.grant_permission(r.id, p.id).await.unwrap();
    }

    let codes: Vec<String> = store
        .find_role_permissions(r.id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.code)
        .collect();
    assert_eq!(codes, vec!["package.read", "package.write"]);
}

#[tokio::test]
async fn roles_for_user_respect_org_scope_and_activity() {
    let (store, user_id) = setup().await;
    let (org_a, org_b) = (Uuid::new_v4(), Uuid::new_v4());
    let global = store.create_role(role("global")).await.unwrap();
    let scoped = store.create_role(role("scoped")).await.unwrap();

    store.assign_role(user_id, global.id, None).await.unwrap();
    let assignment = store
        .assign_role(user_id, scoped.id, Some(org_a))
        .await
        .unwrap();

    assert_eq!(store.find_roles_for_user(user_id, None).await.unwrap().len(), 1);
    assert_eq!(
        store
            .find_roles_for_user(user_id, Some(org_a))
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        store
            .find_roles_for_user(user_id, Some(org_b))
            .await
            .unwrap()
            .len(),
        1
    );

    store.deactivate_role_assignment(assignment.id).await.unwrap();
    assert_eq!(
        store
            .find_roles_for_user(user_id, Some(org_a))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn template_must_exist() {
    let (store, _) = setup().await;
    let err = store
        .create_role(CreateRole {
            template_role_id: Some(Uuid::new_v4()),
            ..role("copy")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, KeyholdError::NotFound { .. }));
}

#[tokio::test]
async fn default_organization_is_exclusive() {
    let (store, user_id) = setup().await;
    let (org_a, org_b) = (Uuid::new_v4(), Uuid::new_v4());

    store
        .grant_organization_access(GrantOrganizationAccess {
            user_id,
            organization_id: org_a,
            access_level: AccessLevel::Full,
            is_default: true,
        })
        .await
        .unwrap();
    store
        .grant_organization_access(GrantOrganizationAccess {
            user_id,
            organization_id: org_b,
            access_level: AccessLevel::ReadOnly,
            is_default: true,
        })
        .await
        .unwrap();

    let grants = store.find_organization_access(user_id, None).await.unwrap();
    assert_eq!(grants.len(), 2);
    let defaults: Vec<Uuid> = grants
        .iter()
        .filter(|g| g.is_default)
        .map(|g| g.organization_id)
        .collect();
    assert_eq!(defaults, vec![org_b]);
}

#[tokio::test]
async fn warehouse_grant_update_and_deactivate() {
    let (store, user_id) = setup().await;
    let warehouse_id = Uuid::new_v4();

    let first = store
        .grant_warehouse_access(GrantWarehouseAccess {
            user_id,
            warehouse_id,
            organization_id: None,
            access_level: AccessLevel::Limited,
            is_default: false,
        })
        .await
        .unwrap();
    let second = store
        .grant_warehouse_access(GrantWarehouseAccess {
            user_id,
            warehouse_id,
            organization_id: None,
            access_level: AccessLevel::Full,
            is_default: true,
        })
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.access_level, AccessLevel::Full);

    store.deactivate_warehouse_access(second.id).await.unwrap();
    let grants = store
        .find_warehouse_access(user_id, Some(warehouse_id))
        .await
        .unwrap();
    assert_eq!(grants.len(), 1);
    assert!(!grants[0].is_active);
    assert!(!grants[0].is_default);
}
