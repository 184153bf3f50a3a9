#![forbid(unsafe_code)]

use ac_engine::{Engine, EngineConfig, StorageKind};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;

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

#[test]
fn concurrent_first_contacts_converge_on_one_workspace() {
    let storage_dir = temp_dir("concurrent_first_contacts_converge_on_one_workspace");
    let engine = Arc::new(Engine::open(EngineConfig::new(&storage_dir)).expect("open engine"));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(std::thread::spawn(move || {
            let ctx = engine
                .session_begin("anon:1", "chat:c1")
                .expect("session begin");
            engine
                .resolve_root(StorageKind::Files, &ctx)
                .expect("resolve root")
        }));
    }

    let roots = handles
        .into_iter()
        .map(|handle| handle.join().expect("join thread"))
        .collect::<Vec<_>>();
    for pair in roots.windows(2) {
        assert_eq!(pair[0], pair[1]);
    }

    let conn = Connection::open(storage_dir.join("anchorage.db")).expect("open db");
    let workspaces: i64 = conn
        .query_row("SELECT COUNT(1) FROM workspaces", [], |row| row.get(0))
        .expect("count workspaces");
    assert_eq!(workspaces, 1);
    let users: i64 = conn
        .query_row("SELECT COUNT(1) FROM users", [], |row| row.get(0))
        .expect("count users");
    assert_eq!(users, 1);
}

#[test]
fn concurrent_sessions_do_not_leak_context_across_units() {
    let storage_dir = temp_dir("concurrent_sessions_do_not_leak_context_across_units");
    let engine = Arc::new(Engine::open(EngineConfig::new(&storage_dir)).expect("open engine"));

    let mut handles = Vec::new();
    for index in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(std::thread::spawn(move || {
            let raw = format!("anon:{index}");
            let conversation = format!("chat:c{index}");
            let ctx = engine
                .session_begin(&raw, &conversation)
                .expect("session begin");
            assert_eq!(ctx.user().as_str(), raw);
            engine
                .resolve_root(StorageKind::Files, &ctx)
                .expect("resolve root")
        }));
    }

    let mut roots = handles
        .into_iter()
        .map(|handle| handle.join().expect("join thread"))
        .collect::<Vec<_>>();
    roots.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    roots.dedup();
    assert_eq!(roots.len(), 4, "each user must keep their own root");
}
