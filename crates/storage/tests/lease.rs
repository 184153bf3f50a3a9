#![forbid(unsafe_code)]

use ac_storage::{LeaseClaimRequest, LeaseReleaseRequest, LeaseRenewRequest, SqliteStore, StoreError};
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

fn claim(conversation: &str, holder: &str, force: bool) -> LeaseClaimRequest {
    LeaseClaimRequest {
        conversation_id: conversation.to_string(),
        holder: holder.to_string(),
        ttl_ms: 0,
        force,
    }
}

#[test]
fn second_holder_cannot_claim_a_live_lease() {
    let storage_dir = temp_dir("second_holder_cannot_claim_a_live_lease");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    store
        .conversation_lease_claim(claim("chat:c1", "worker-a", false))
        .expect("first claim");

    let err = store
        .conversation_lease_claim(claim("chat:c1", "worker-b", false))
        .expect_err("expected held");
    match err {
        StoreError::ConversationLeaseHeld { holder, .. } => assert_eq!(holder, "worker-a"),
        other => panic!("expected ConversationLeaseHeld, got {other:?}"),
    }

    // Re-claiming one's own live lease is a no-op that returns it.
    let lease = store
        .conversation_lease_claim(claim("chat:c1", "worker-a", false))
        .expect("reclaim");
    assert_eq!(lease.holder, "worker-a");
}

#[test]
fn force_claim_takes_over_and_locks_out_the_old_holder() {
    let storage_dir = temp_dir("force_claim_takes_over_and_locks_out_the_old_holder");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    store
        .conversation_lease_claim(claim("chat:c1", "worker-a", false))
        .expect("first claim");
    let lease = store
        .conversation_lease_claim(claim("chat:c1", "worker-b", true))
        .expect("takeover");
    assert_eq!(lease.holder, "worker-b");

    let err = store
        .conversation_lease_renew(LeaseRenewRequest {
            conversation_id: "chat:c1".to_string(),
            holder: "worker-a".to_string(),
            ttl_ms: 0,
        })
        .expect_err("expected not held");
    match err {
        StoreError::ConversationLeaseNotHeld { holder, .. } => {
            assert_eq!(holder.as_deref(), Some("worker-b"));
        }
        other => panic!("expected ConversationLeaseNotHeld, got {other:?}"),
    }
}

#[test]
fn renew_extends_and_release_frees_the_lease() {
    let storage_dir = temp_dir("renew_extends_and_release_frees_the_lease");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    let first = store
        .conversation_lease_claim(claim("chat:c1", "worker-a", false))
        .expect("claim");
    let renewed = store
        .conversation_lease_renew(LeaseRenewRequest {
            conversation_id: "chat:c1".to_string(),
            holder: "worker-a".to_string(),
            ttl_ms: 60_000,
        })
        .expect("renew");
    assert!(renewed.expires_at_ms >= first.expires_at_ms);

    store
        .conversation_lease_release(LeaseReleaseRequest {
            conversation_id: "chat:c1".to_string(),
            holder: "worker-a".to_string(),
        })
        .expect("release");

    let lease = store
        .conversation_lease_claim(claim("chat:c1", "worker-b", false))
        .expect("claim after release");
    assert_eq!(lease.holder, "worker-b");
}

#[test]
fn releasing_without_holding_is_an_error() {
    let storage_dir = temp_dir("releasing_without_holding_is_an_error");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    let err = store
        .conversation_lease_release(LeaseReleaseRequest {
            conversation_id: "chat:c1".to_string(),
            holder: "worker-a".to_string(),
        })
        .expect_err("expected not held");
    match err {
        StoreError::ConversationLeaseNotHeld { holder: None, .. } => {}
        other => panic!("expected ConversationLeaseNotHeld, got {other:?}"),
    }
}

#[test]
fn expired_leases_are_treated_as_absent() {
    let storage_dir = temp_dir("expired_leases_are_treated_as_absent");
    let mut store = SqliteStore::open(&storage_dir).expect("open store");

    store
        .conversation_lease_claim(claim("chat:c1", "worker-a", false))
        .expect("claim");

    // Expire the lease behind the store's back.
    {
        let conn = Connection::open(storage_dir.join("anchorage.db")).expect("open db");
        conn.execute("UPDATE conversation_leases SET expires_at_ms=1", [])
            .expect("expire lease");
    }

    let lease = store
        .conversation_lease_claim(claim("chat:c1", "worker-b", false))
        .expect("claim over expired");
    assert_eq!(lease.holder, "worker-b");
}
