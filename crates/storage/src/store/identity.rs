#![forbid(unsafe_code)]

use super::*;
use ac_core::ids::UserId;
use super::events::insert_event_tx;
use std::collections::BTreeSet;

const MAX_ALIAS_DEPTH: usize = 32;

/// Walks the alias chain to the canonical user. Aliases are consulted before
/// user rows: a merged identity keeps its user row (it may still own an
/// archived workspace), and the alias is what redirects it.
pub(super) fn resolve_canonical_conn(
    conn: &Connection,
    id: &UserId,
) -> Result<UserId, StoreError> {
    let mut current = id.as_str().to_string();
    let mut seen = BTreeSet::new();

    loop {
        if !seen.insert(current.clone()) {
            return Err(StoreError::AliasCycle {
                start: id.as_str().to_string(),
            });
        }
        if seen.len() > MAX_ALIAS_DEPTH {
            return Err(StoreError::AliasChainTooDeep {
                start: id.as_str().to_string(),
            });
        }

        let alias_target = conn
            .query_row(
                "SELECT user_id FROM aliases WHERE alias_id=?1",
                params![current],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        if let Some(target) = alias_target {
            current = target;
            continue;
        }

        let exists = conn
            .query_row(
                "SELECT 1 FROM users WHERE user_id=?1",
                params![current],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();

        if exists {
            return UserId::try_new(current)
                .map_err(|_| StoreError::InvalidInput("invalid user row"));
        }
        return Err(StoreError::AliasNotFound { id: current });
    }
}

pub(super) fn ensure_user_tx(
    tx: &Transaction<'_>,
    user_id: &str,
    now_ms: i64,
) -> Result<bool, StoreError> {
    let inserted = tx.execute(
        "INSERT INTO users(user_id, status, created_at_ms) VALUES (?1, 'active', ?2) \
         ON CONFLICT(user_id) DO NOTHING",
        params![user_id, now_ms],
    )?;
    if inserted > 0 {
        let payload = serde_json::json!({ "user_id": user_id }).to_string();
        insert_event_tx(tx, now_ms, None, Some(user_id), "user_created", &payload)?;
    }
    Ok(inserted > 0)
}

impl SqliteStore {
    /// Create-or-get. Concurrent first contacts for the same identity
    /// converge on one row via the primary-key conflict, never read-then-write.
    pub fn ensure_user(&mut self, user: &UserId) -> Result<UserRow, StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_user_tx(&tx, user.as_str(), now_ms)?;
        let row = user_row_conn(&tx, user.as_str())?.ok_or(StoreError::UnknownUser)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn resolve_canonical(&self, id: &UserId) -> Result<UserId, StoreError> {
        resolve_canonical_conn(&self.conn, id)
    }

    pub fn user_get(&self, id: &UserId) -> Result<Option<UserRow>, StoreError> {
        user_row_conn(&self.conn, id.as_str())
    }

    pub fn user_set_status(
        &mut self,
        id: &UserId,
        status: ac_core::model::UserStatus,
    ) -> Result<UserRow, StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let canonical = resolve_canonical_conn(&tx, id)?;
        let updated = tx.execute(
            "UPDATE users SET status=?2 WHERE user_id=?1",
            params![canonical.as_str(), status.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownUser);
        }

        let payload = serde_json::json!({
            "user_id": canonical.as_str(),
            "status": status.as_str(),
        })
        .to_string();
        insert_event_tx(
            &tx,
            now_ms,
            None,
            Some(canonical.as_str()),
            "user_status_changed",
            &payload,
        )?;

        let row = user_row_conn(&tx, canonical.as_str())?.ok_or(StoreError::UnknownUser)?;
        tx.commit()?;
        Ok(row)
    }
}
