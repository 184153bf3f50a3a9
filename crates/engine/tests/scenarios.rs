#![forbid(unsafe_code)]

use ac_engine::{
    Action, Engine, EngineConfig, EngineError, GrantTarget, GroupRole, Permission, ResourceRef,
    StorageKind, UserId, AclGrantRequest,
};
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let dir = base.join(format!("ac_engine_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn engine(test_name: &str) -> Engine {
    Engine::open(EngineConfig::new(temp_dir(test_name))).expect("open engine")
}

#[test]
fn a_session_authorizes_the_owner_end_to_end() {
    let engine = engine("a_session_authorizes_the_owner_end_to_end");
    let ctx = engine
        .session_begin("anon:1", "chat:c1")
        .expect("session begin");

    let root = engine
        .authorize(StorageKind::Files, &ctx, Action::Write, None)
        .expect("owner write");
    let summary = engine
        .describe_workspace(&root)
        .expect("describe")
        .expect("workspace exists");
    assert_eq!(summary.kind, "individual");
    assert_eq!(summary.status, "active");
}

#[test]
fn strangers_get_permission_denied_verbatim() {
    let engine = engine("strangers_get_permission_denied_verbatim");
    let owner_ctx = engine
        .session_begin("anon:1", "chat:c1")
        .expect("owner session");
    let owner_root = engine
        .resolve_root(StorageKind::Files, &owner_ctx)
        .expect("owner root");

    let stranger_ctx = engine
        .session_begin("email:s", "chat:c2")
        .expect("stranger session");
    let pinned = stranger_ctx.with_explicit_workspace(owner_root);

    let err = engine
        .authorize(StorageKind::Files, &pinned, Action::Write, None)
        .expect_err("expected denial");
    match &err {
        EngineError::PermissionDenied {
            action: Action::Write,
            resource: None,
        } => {}
        other => panic!("expected PermissionDenied, got {other:?}"),
    }
    assert_eq!(err.to_string(), "permission denied (write)");
}

#[test]
fn group_membership_flows_through_the_engine() {
    let engine = engine("group_membership_flows_through_the_engine");
    let admin_ctx = engine
        .session_begin("email:a", "chat:c1")
        .expect("admin session");
    let member_ctx = engine
        .session_begin("email:b", "chat:c2")
        .expect("member session");

    let group = engine.create_group("ops").expect("create group");
    let group_id = ac_engine::GroupId::try_new(group.group_id).expect("group id");
    engine
        .group_member_add(&group_id, admin_ctx.user(), GroupRole::Admin)
        .expect("add admin");
    engine
        .group_member_add(&group_id, member_ctx.user(), GroupRole::Member)
        .expect("add member");
    let workspace = engine
        .create_group_workspace(&group_id, "ops space")
        .expect("group workspace");

    assert!(engine
        .can_access(admin_ctx.user(), &workspace, Action::Write, None)
        .expect("admin write"));
    assert!(!engine
        .can_access(admin_ctx.user(), &workspace, Action::Admin, None)
        .expect("admin capped"));
    assert!(engine
        .can_access(member_ctx.user(), &workspace, Action::Read, None)
        .expect("member read"));
    assert!(!engine
        .can_access(member_ctx.user(), &workspace, Action::Write, None)
        .expect("member write denied"));
}

#[test]
fn public_workspace_reads_are_open_writes_are_not() {
    let engine = engine("public_workspace_reads_are_open_writes_are_not");
    let ctx = engine
        .session_begin("email:u", "chat:c1")
        .expect("session");
    let public = engine.ensure_public_workspace().expect("public workspace");

    assert!(engine
        .can_access(ctx.user(), &public, Action::Read, None)
        .expect("read"));
    assert!(!engine
        .can_access(ctx.user(), &public, Action::Write, None)
        .expect("write"));
}

#[test]
fn resource_grants_authorize_through_the_facade() {
    let engine = engine("resource_grants_authorize_through_the_facade");
    let owner_ctx = engine
        .session_begin("email:o", "chat:c1")
        .expect("owner session");
    let guest_ctx = engine
        .session_begin("email:g", "chat:c2")
        .expect("guest session");
    let root = engine
        .resolve_root(StorageKind::Files, &owner_ctx)
        .expect("root");
    let resource = ResourceRef {
        kind: StorageKind::Files,
        resource_id: "notes/today.md".to_string(),
    };

    engine
        .acl_grant(AclGrantRequest {
            workspace_id: root.clone(),
            resource: resource.clone(),
            target: GrantTarget::User(guest_ctx.user().clone()),
            permission: Permission::Read,
            granted_by: owner_ctx.user().clone(),
            expires_at_ms: None,
        })
        .expect("grant");

    let pinned = guest_ctx.with_explicit_workspace(root);
    engine
        .authorize(
            StorageKind::Files,
            &pinned,
            Action::Read,
            Some(resource.clone()),
        )
        .expect("granted read");

    let err = engine
        .authorize(StorageKind::Files, &pinned, Action::Write, Some(resource))
        .expect_err("write still denied");
    match err {
        EngineError::PermissionDenied { resource: Some(resource), .. } => {
            assert_eq!(resource, "notes/today.md");
        }
        other => panic!("expected PermissionDenied, got {other:?}"),
    }
}

#[test]
fn merged_identity_keeps_one_workspace() {
    let engine = engine("merged_identity_keeps_one_workspace");
    let anon_ctx = engine
        .session_begin("anon:1", "chat:c1")
        .expect("anon session");
    let anon_root = engine
        .resolve_root(StorageKind::Files, &anon_ctx)
        .expect("anon root");

    let summary = engine
        .merge_identities("anon:1", "email:x")
        .expect("merge");
    assert_eq!(summary.canonical_user_id, "email:x");
    assert_eq!(summary.workspace_id.as_deref(), Some(anon_root.as_str()));
    assert_eq!(summary.archived_workspace_id, None);

    // The next anonymous message lands on the merged identity and the same root.
    let next_ctx = engine
        .session_begin("anon:1", "chat:c1")
        .expect("post-merge session");
    assert_eq!(next_ctx.user().as_str(), "email:x");
    assert_eq!(
        engine
            .resolve_root(StorageKind::Records, &next_ctx)
            .expect("post-merge root"),
        anon_root
    );

    let canonical = engine
        .resolve_canonical(&UserId::try_new("anon:1").expect("user id"))
        .expect("resolve");
    assert_eq!(canonical.as_str(), "email:x");
}

#[test]
fn merge_into_an_established_identity_archives_the_source() {
    let engine = engine("merge_into_an_established_identity_archives_the_source");
    let anon_ctx = engine
        .session_begin("anon:1", "chat:c1")
        .expect("anon session");
    let anon_root = engine
        .resolve_root(StorageKind::Files, &anon_ctx)
        .expect("anon root");
    let email_ctx = engine
        .session_begin("email:x", "chat:c2")
        .expect("email session");
    let email_root = engine
        .resolve_root(StorageKind::Files, &email_ctx)
        .expect("email root");

    let summary = engine
        .merge_identities("anon:1", "email:x")
        .expect("merge");
    assert_eq!(summary.workspace_id.as_deref(), Some(email_root.as_str()));
    assert_eq!(summary.archived_workspace_id.as_deref(), Some(anon_root.as_str()));

    let archived = engine
        .describe_workspace(&anon_root)
        .expect("describe")
        .expect("workspace exists");
    assert_eq!(archived.status, "archived");

    // The old conversation now routes to the surviving workspace.
    let next_ctx = engine
        .session_begin("anon:1", "chat:c1")
        .expect("post-merge session");
    assert_eq!(
        engine
            .resolve_root(StorageKind::Files, &next_ctx)
            .expect("post-merge root"),
        email_root
    );
}

#[test]
fn malformed_identities_are_rejected_up_front() {
    let engine = engine("malformed_identities_are_rejected_up_front");
    let err = engine
        .session_begin("no-namespace", "chat:c1")
        .expect_err("expected invalid identity");
    match err {
        EngineError::InvalidIdentity(_) => {}
        other => panic!("expected InvalidIdentity, got {other:?}"),
    }
}
