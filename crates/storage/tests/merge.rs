#![forbid(unsafe_code)]

use ac_core::ids::{ConversationId, UserId};
use ac_core::model::WorkspaceStatus;
use ac_storage::{MergeRequest, SqliteStore, StoreError};
use rusqlite::Connection;
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let dir = base.join(format!("ac_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn user(value: &str) -> UserId {
    UserId::try_new(value).expect("user id")
}

#[test]
fn merge_reassigns_workspace_when_target_owns_nothing() {
    let storage_dir = temp_dir("merge_reassigns_workspace_when_target_owns_nothing");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let source = user("anon:1");
    store.ensure_user(&source).expect("ensure source");
    let workspace = store.ensure_user_workspace(&source).expect("workspace");

    let outcome = store
        .merge_identities(MergeRequest {
            source_id: source.clone(),
            target_id: user("email:x"),
        })
        .expect("merge");

    assert_eq!(outcome.canonical_user_id, "email:x");
    assert_eq!(outcome.workspace_id.as_deref(), Some(workspace.as_str()));
    assert_eq!(outcome.archived_workspace_id, None);

    let row = store
        .workspace_get(&workspace)
        .expect("workspace get")
        .expect("workspace exists");
    assert_eq!(row.owner_user_id.as_deref(), Some("email:x"));
    assert_eq!(row.status, WorkspaceStatus::Active);

    let canonical = store.resolve_canonical(&source).expect("resolve");
    assert_eq!(canonical.as_str(), "email:x");

    // The target inherits the existing workspace instead of minting one.
    let target_ws = store
        .ensure_user_workspace(&user("email:x"))
        .expect("target workspace");
    assert_eq!(target_ws, workspace);
}

#[test]
fn merge_archives_source_workspace_when_target_already_owns() {
    let storage_dir = temp_dir("merge_archives_source_workspace_when_target_already_owns");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let source = user("anon:1");
    let target = user("email:x");
    store.ensure_user(&source).expect("ensure source");
    store.ensure_user(&target).expect("ensure target");

    let conversation = ConversationId::try_new("chat:c1").expect("conversation id");
    let source_ws = store
        .ensure_conversation_workspace(&conversation, &source)
        .expect("source workspace");
    let target_ws = store.ensure_user_workspace(&target).expect("target workspace");

    let outcome = store
        .merge_identities(MergeRequest {
            source_id: source.clone(),
            target_id: target.clone(),
        })
        .expect("merge");

    assert_eq!(outcome.workspace_id.as_deref(), Some(target_ws.as_str()));
    assert_eq!(outcome.archived_workspace_id.as_deref(), Some(source_ws.as_str()));

    let archived = store
        .workspace_get(&source_ws)
        .expect("workspace get")
        .expect("workspace exists");
    assert_eq!(archived.status, WorkspaceStatus::Archived);
    // No content moved; the source workspace keeps its original owner column.
    assert_eq!(archived.owner_user_id.as_deref(), Some("anon:1"));

    let kept = store
        .workspace_get(&target_ws)
        .expect("workspace get")
        .expect("workspace exists");
    assert_eq!(kept.status, WorkspaceStatus::Active);
    assert_eq!(kept.owner_user_id.as_deref(), Some("email:x"));

    // The source's conversations follow the merge, not the next message.
    let bound = store
        .conversation_binding_get(&conversation)
        .expect("binding get")
        .expect("binding exists");
    assert_eq!(bound, target_ws);

    assert_eq!(store.resolve_canonical(&source).expect("resolve").as_str(), "email:x");
}

#[test]
fn merge_with_no_workspaces_records_only_the_alias() {
    let storage_dir = temp_dir("merge_with_no_workspaces_records_only_the_alias");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let source = user("anon:1");
    store.ensure_user(&source).expect("ensure source");

    let outcome = store
        .merge_identities(MergeRequest {
            source_id: source.clone(),
            target_id: user("email:x"),
        })
        .expect("merge");

    assert_eq!(outcome.workspace_id, None);
    assert_eq!(outcome.archived_workspace_id, None);
    assert_eq!(store.resolve_canonical(&source).expect("resolve").as_str(), "email:x");
}

#[test]
fn merging_an_identity_into_itself_is_a_conflict() {
    let storage_dir = temp_dir("merging_an_identity_into_itself_is_a_conflict");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let source = user("anon:1");
    store.ensure_user(&source).expect("ensure source");

    let err = store
        .merge_identities(MergeRequest {
            source_id: source.clone(),
            target_id: source.clone(),
        })
        .expect_err("expected conflict");
    match err {
        StoreError::MergeConflict(message) => {
            assert_eq!(message, "identities are already unified");
        }
        other => panic!("expected MergeConflict, got {other:?}"),
    }
}

#[test]
fn repeated_and_reversed_merges_are_conflicts() {
    let storage_dir = temp_dir("repeated_and_reversed_merges_are_conflicts");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");
    let a = user("anon:1");
    let b = user("email:x");
    store.ensure_user(&a).expect("ensure a");

    store
        .merge_identities(MergeRequest {
            source_id: a.clone(),
            target_id: b.clone(),
        })
        .expect("first merge");

    // Same merge again: the source now resolves to the target.
    let err = store
        .merge_identities(MergeRequest {
            source_id: a.clone(),
            target_id: b.clone(),
        })
        .expect_err("expected conflict");
    match err {
        StoreError::MergeConflict(_) => {}
        other => panic!("expected MergeConflict, got {other:?}"),
    }

    // Reversing the merge would alias the canonical user to itself.
    let err = store
        .merge_identities(MergeRequest {
            source_id: b.clone(),
            target_id: a.clone(),
        })
        .expect_err("expected conflict");
    match err {
        StoreError::MergeConflict(_) => {}
        other => panic!("expected MergeConflict, got {other:?}"),
    }
}

#[test]
fn merge_of_unknown_source_is_a_conflict() {
    let storage_dir = temp_dir("merge_of_unknown_source_is_a_conflict");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    let err = store
        .merge_identities(MergeRequest {
            source_id: user("anon:ghost"),
            target_id: user("email:x"),
        })
        .expect_err("expected conflict");
    match err {
        StoreError::MergeConflict(message) => {
            assert_eq!(message, "source identity does not exist");
        }
        other => panic!("expected MergeConflict, got {other:?}"),
    }

    // The failed merge must not have created the target as a side effect.
    let conn = Connection::open(storage_dir.join("anchorage.db")).expect("open db");
    let count: i64 = conn
        .query_row("SELECT COUNT(1) FROM users", [], |row| row.get(0))
        .expect("count users");
    assert_eq!(count, 0);
}
