#![forbid(unsafe_code)]

mod access;
mod error;
mod events;
mod grants;
mod groups;
mod identity;
mod lease;
mod merge;
mod ownership;
mod requests;

pub use error::StoreError;
pub use requests::*;

use ac_core::model::{UserStatus, WorkspaceKind, WorkspaceStatus};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA_VERSION: i64 = 1;
const DB_FILE: &str = "anchorage.db";

/// `owner_system_tag` value of the process-wide public workspace.
pub const PUBLIC_WORKSPACE_TAG: &str = "public";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join(DB_FILE);
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            "#,
        )?;

        install_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counters (
          name TEXT PRIMARY KEY,
          value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
          user_id TEXT PRIMARY KEY,
          status TEXT NOT NULL CHECK(status IN ('active', 'suspended')),
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS aliases (
          alias_id TEXT PRIMARY KEY,
          user_id TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          FOREIGN KEY(user_id) REFERENCES users(user_id) ON DELETE CASCADE,
          CHECK(alias_id <> user_id)
        );

        CREATE TABLE IF NOT EXISTS groups (
          group_id TEXT PRIMARY KEY,
          name TEXT NOT NULL UNIQUE,
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_members (
          group_id TEXT NOT NULL,
          user_id TEXT NOT NULL,
          role TEXT NOT NULL CHECK(role IN ('admin', 'member')),
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY(group_id, user_id),
          FOREIGN KEY(group_id) REFERENCES groups(group_id) ON DELETE CASCADE,
          FOREIGN KEY(user_id) REFERENCES users(user_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS workspaces (
          workspace_id TEXT PRIMARY KEY,
          kind TEXT NOT NULL CHECK(kind IN ('individual', 'group', 'public')),
          name TEXT NOT NULL,
          status TEXT NOT NULL CHECK(status IN ('active', 'archived')),
          owner_user_id TEXT,
          owner_group_id TEXT,
          owner_system_tag TEXT,
          created_at_ms INTEGER NOT NULL,
          FOREIGN KEY(owner_user_id) REFERENCES users(user_id) ON DELETE RESTRICT,
          FOREIGN KEY(owner_group_id) REFERENCES groups(group_id) ON DELETE RESTRICT,
          CHECK(
            (CASE WHEN owner_user_id IS NOT NULL THEN 1 ELSE 0 END
             + CASE WHEN owner_group_id IS NOT NULL THEN 1 ELSE 0 END
             + CASE WHEN owner_system_tag IS NOT NULL THEN 1 ELSE 0 END) = 1
          ),
          CHECK((kind = 'individual') = (owner_user_id IS NOT NULL)),
          CHECK((kind = 'group') = (owner_group_id IS NOT NULL)),
          CHECK((kind = 'public') = (owner_system_tag IS NOT NULL))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_workspaces_owner_user_active
          ON workspaces(owner_user_id)
          WHERE owner_user_id IS NOT NULL AND status = 'active';

        CREATE UNIQUE INDEX IF NOT EXISTS idx_workspaces_owner_group
          ON workspaces(owner_group_id)
          WHERE owner_group_id IS NOT NULL;

        CREATE UNIQUE INDEX IF NOT EXISTS idx_workspaces_owner_tag
          ON workspaces(owner_system_tag)
          WHERE owner_system_tag IS NOT NULL;

        CREATE TABLE IF NOT EXISTS user_workspaces (
          user_id TEXT PRIMARY KEY,
          workspace_id TEXT NOT NULL,
          FOREIGN KEY(user_id) REFERENCES users(user_id) ON DELETE RESTRICT,
          FOREIGN KEY(workspace_id) REFERENCES workspaces(workspace_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS group_workspaces (
          group_id TEXT PRIMARY KEY,
          workspace_id TEXT NOT NULL,
          FOREIGN KEY(group_id) REFERENCES groups(group_id) ON DELETE RESTRICT,
          FOREIGN KEY(workspace_id) REFERENCES workspaces(workspace_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS conversation_workspaces (
          conversation_id TEXT PRIMARY KEY,
          workspace_id TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          FOREIGN KEY(workspace_id) REFERENCES workspaces(workspace_id) ON DELETE RESTRICT
        );

        CREATE INDEX IF NOT EXISTS idx_conversation_workspaces_workspace
          ON conversation_workspaces(workspace_id);

        CREATE TABLE IF NOT EXISTS workspace_members (
          workspace_id TEXT NOT NULL,
          user_id TEXT NOT NULL,
          role TEXT NOT NULL CHECK(role IN ('admin', 'editor', 'reader')),
          granted_by TEXT NOT NULL,
          granted_at_ms INTEGER NOT NULL,
          PRIMARY KEY(workspace_id, user_id),
          FOREIGN KEY(workspace_id) REFERENCES workspaces(workspace_id) ON DELETE CASCADE,
          FOREIGN KEY(user_id) REFERENCES users(user_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS acl_grants (
          workspace_id TEXT NOT NULL,
          resource_type TEXT NOT NULL CHECK(resource_type IN ('files', 'records', 'search', 'reminders')),
          resource_id TEXT NOT NULL,
          target_user_id TEXT,
          target_group_id TEXT,
          permission TEXT NOT NULL CHECK(permission IN ('read', 'write')),
          granted_by TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          expires_at_ms INTEGER,
          FOREIGN KEY(workspace_id) REFERENCES workspaces(workspace_id) ON DELETE CASCADE,
          FOREIGN KEY(target_user_id) REFERENCES users(user_id) ON DELETE CASCADE,
          FOREIGN KEY(target_group_id) REFERENCES groups(group_id) ON DELETE CASCADE,
          CHECK(
            (CASE WHEN target_user_id IS NOT NULL THEN 1 ELSE 0 END
             + CASE WHEN target_group_id IS NOT NULL THEN 1 ELSE 0 END) = 1
          )
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_acl_grants_user_target
          ON acl_grants(workspace_id, resource_type, resource_id, target_user_id)
          WHERE target_user_id IS NOT NULL;

        CREATE UNIQUE INDEX IF NOT EXISTS idx_acl_grants_group_target
          ON acl_grants(workspace_id, resource_type, resource_id, target_group_id)
          WHERE target_group_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS conversation_leases (
          conversation_id TEXT PRIMARY KEY,
          holder TEXT NOT NULL,
          acquired_at_ms INTEGER NOT NULL,
          expires_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          ts_ms INTEGER NOT NULL,
          workspace_id TEXT,
          user_id TEXT,
          type TEXT NOT NULL,
          payload_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_workspace_seq ON events(workspace_id, seq);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

fn next_counter_tx(tx: &Transaction<'_>, name: &str) -> Result<i64, StoreError> {
    let current: i64 = tx
        .query_row(
            "SELECT value FROM counters WHERE name=?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    let next = current + 1;
    tx.execute(
        r#"
        INSERT INTO counters(name, value) VALUES (?1, ?2)
        ON CONFLICT(name) DO UPDATE SET value=excluded.value
        "#,
        params![name, next],
    )?;
    Ok(next)
}

fn mint_workspace_id_tx(tx: &Transaction<'_>) -> Result<String, StoreError> {
    let seq = next_counter_tx(tx, "workspace_seq")?;
    Ok(format!("ws_{seq:06}"))
}

fn mint_group_id_tx(tx: &Transaction<'_>) -> Result<String, StoreError> {
    let seq = next_counter_tx(tx, "group_seq")?;
    Ok(format!("grp_{seq:06}"))
}

fn user_row_from_sql(
    user_id: String,
    status: String,
    created_at_ms: i64,
) -> Result<UserRow, StoreError> {
    let status =
        UserStatus::parse(&status).ok_or(StoreError::InvalidInput("invalid user status row"))?;
    Ok(UserRow {
        user_id,
        status,
        created_at_ms,
    })
}

fn user_row_conn(conn: &Connection, user_id: &str) -> Result<Option<UserRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT user_id, status, created_at_ms FROM users WHERE user_id=?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((user_id, status, created_at_ms)) => {
            Ok(Some(user_row_from_sql(user_id, status, created_at_ms)?))
        }
        None => Ok(None),
    }
}

fn workspace_row_conn(
    conn: &Connection,
    workspace_id: &str,
) -> Result<Option<WorkspaceRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT workspace_id, kind, name, status, owner_user_id, owner_group_id, owner_system_tag, created_at_ms \
             FROM workspaces WHERE workspace_id=?1",
            params![workspace_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((workspace_id, kind, name, status, owner_user_id, owner_group_id, owner_system_tag, created_at_ms)) =
        row
    else {
        return Ok(None);
    };

    let kind =
        WorkspaceKind::parse(&kind).ok_or(StoreError::InvalidInput("invalid workspace kind row"))?;
    let status = WorkspaceStatus::parse(&status)
        .ok_or(StoreError::InvalidInput("invalid workspace status row"))?;

    Ok(Some(WorkspaceRow {
        workspace_id,
        kind,
        name,
        status,
        owner_user_id,
        owner_group_id,
        owner_system_tag,
        created_at_ms,
    }))
}
