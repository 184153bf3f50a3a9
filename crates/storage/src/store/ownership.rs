#![forbid(unsafe_code)]

use super::*;
use ac_core::ids::{ConversationId, GroupId, UserId, WorkspaceId};
use super::events::insert_event_tx;
use super::identity::resolve_canonical_conn;

pub(super) fn user_workspace_mapping_conn(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT workspace_id FROM user_workspaces WHERE user_id=?1",
            params![user_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

pub(super) fn conversation_binding_conn(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT workspace_id FROM conversation_workspaces WHERE conversation_id=?1",
            params![conversation_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

/// Workspace + mapping land in the same transaction. A concurrent winner
/// surfaces as a constraint violation, which converges to its mapping.
pub(super) fn ensure_user_workspace_tx(
    tx: &Transaction<'_>,
    user_id: &str,
    now_ms: i64,
) -> Result<String, StoreError> {
    if let Some(workspace_id) = user_workspace_mapping_conn(tx, user_id)? {
        return Ok(workspace_id);
    }

    let exists = tx
        .query_row(
            "SELECT 1 FROM users WHERE user_id=?1",
            params![user_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !exists {
        return Err(StoreError::UnknownUser);
    }

    let workspace_id = mint_workspace_id_tx(tx)?;
    let insert = tx.execute(
        "INSERT INTO workspaces(workspace_id, kind, name, status, owner_user_id, created_at_ms) \
         VALUES (?1, 'individual', ?2, 'active', ?2, ?3)",
        params![workspace_id, user_id, now_ms],
    );
    if let Err(err) = insert {
        if is_constraint_violation(&err) {
            if let Some(existing) = user_workspace_mapping_conn(tx, user_id)? {
                return Ok(existing);
            }
        }
        return Err(StoreError::Sql(err));
    }

    tx.execute(
        "INSERT INTO user_workspaces(user_id, workspace_id) VALUES (?1, ?2)",
        params![user_id, workspace_id],
    )?;

    let payload = serde_json::json!({
        "workspace_id": workspace_id,
        "kind": "individual",
        "owner_user_id": user_id,
    })
    .to_string();
    insert_event_tx(
        tx,
        now_ms,
        Some(workspace_id.as_str()),
        Some(user_id),
        "workspace_created",
        &payload,
    )?;

    Ok(workspace_id)
}

impl SqliteStore {
    pub fn ensure_user_workspace(&mut self, user: &UserId) -> Result<WorkspaceId, StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let canonical = match resolve_canonical_conn(&tx, user) {
            Ok(id) => id,
            Err(StoreError::AliasNotFound { .. }) => return Err(StoreError::UnknownUser),
            Err(err) => return Err(err),
        };
        let workspace_id = ensure_user_workspace_tx(&tx, canonical.as_str(), now_ms)?;

        tx.commit()?;
        WorkspaceId::try_new(workspace_id)
            .map_err(|_| StoreError::InvalidInput("invalid workspace row"))
    }

    pub fn ensure_conversation_workspace(
        &mut self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<WorkspaceId, StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        if let Some(workspace_id) = conversation_binding_conn(&tx, conversation.as_str())? {
            tx.commit()?;
            return WorkspaceId::try_new(workspace_id)
                .map_err(|_| StoreError::InvalidInput("invalid workspace row"));
        }

        let canonical = match resolve_canonical_conn(&tx, user) {
            Ok(id) => id,
            Err(StoreError::AliasNotFound { .. }) => return Err(StoreError::UnknownUser),
            Err(err) => return Err(err),
        };
        let workspace_id = ensure_user_workspace_tx(&tx, canonical.as_str(), now_ms)?;

        tx.execute(
            "INSERT INTO conversation_workspaces(conversation_id, workspace_id, created_at_ms) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(conversation_id) DO NOTHING",
            params![conversation.as_str(), workspace_id, now_ms],
        )?;

        // A racing creator may have won; the stored mapping is the answer.
        let bound = conversation_binding_conn(&tx, conversation.as_str())?
            .ok_or(StoreError::InvalidInput("conversation binding missing"))?;

        if bound == workspace_id {
            let payload = serde_json::json!({
                "conversation_id": conversation.as_str(),
                "workspace_id": bound,
            })
            .to_string();
            insert_event_tx(
                &tx,
                now_ms,
                Some(bound.as_str()),
                Some(canonical.as_str()),
                "conversation_bound",
                &payload,
            )?;
        }

        tx.commit()?;
        WorkspaceId::try_new(bound).map_err(|_| StoreError::InvalidInput("invalid workspace row"))
    }

    /// One workspace per group; a second creation attempt fails outright
    /// instead of converging.
    pub fn create_group_workspace(
        &mut self,
        group: &GroupId,
        name: &str,
    ) -> Result<WorkspaceId, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidInput("workspace name must not be empty"));
        }

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM groups WHERE group_id=?1",
                params![group.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(StoreError::UnknownGroup);
        }

        let owned = tx
            .query_row(
                "SELECT workspace_id FROM group_workspaces WHERE group_id=?1",
                params![group.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        if owned.is_some() {
            return Err(StoreError::GroupAlreadyOwnsWorkspace);
        }

        let workspace_id = mint_workspace_id_tx(&tx)?;
        let insert = tx.execute(
            "INSERT INTO workspaces(workspace_id, kind, name, status, owner_group_id, created_at_ms) \
             VALUES (?1, 'group', ?2, 'active', ?3, ?4)",
            params![workspace_id, name, group.as_str(), now_ms],
        );
        if let Err(err) = insert {
            if is_constraint_violation(&err) {
                return Err(StoreError::GroupAlreadyOwnsWorkspace);
            }
            return Err(StoreError::Sql(err));
        }

        tx.execute(
            "INSERT INTO group_workspaces(group_id, workspace_id) VALUES (?1, ?2)",
            params![group.as_str(), workspace_id],
        )?;

        let payload = serde_json::json!({
            "workspace_id": workspace_id,
            "kind": "group",
            "owner_group_id": group.as_str(),
            "name": name,
        })
        .to_string();
        insert_event_tx(
            &tx,
            now_ms,
            Some(workspace_id.as_str()),
            None,
            "workspace_created",
            &payload,
        )?;

        tx.commit()?;
        WorkspaceId::try_new(workspace_id)
            .map_err(|_| StoreError::InvalidInput("invalid workspace row"))
    }

    /// Process-wide singleton, created lazily on first reference.
    pub fn ensure_public_workspace(&mut self, name: &str) -> Result<WorkspaceId, StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        if let Some(workspace_id) = public_workspace_conn(&tx)? {
            tx.commit()?;
            return WorkspaceId::try_new(workspace_id)
                .map_err(|_| StoreError::InvalidInput("invalid workspace row"));
        }

        let workspace_id = mint_workspace_id_tx(&tx)?;
        let insert = tx.execute(
            "INSERT INTO workspaces(workspace_id, kind, name, status, owner_system_tag, created_at_ms) \
             VALUES (?1, 'public', ?2, 'active', ?3, ?4)",
            params![workspace_id, name, PUBLIC_WORKSPACE_TAG, now_ms],
        );
        if let Err(err) = insert {
            if is_constraint_violation(&err) {
                if let Some(existing) = public_workspace_conn(&tx)? {
                    tx.commit()?;
                    return WorkspaceId::try_new(existing)
                        .map_err(|_| StoreError::InvalidInput("invalid workspace row"));
                }
            }
            return Err(StoreError::Sql(err));
        }

        let payload = serde_json::json!({
            "workspace_id": workspace_id,
            "kind": "public",
            "name": name,
        })
        .to_string();
        insert_event_tx(
            &tx,
            now_ms,
            Some(workspace_id.as_str()),
            None,
            "workspace_created",
            &payload,
        )?;

        tx.commit()?;
        WorkspaceId::try_new(workspace_id)
            .map_err(|_| StoreError::InvalidInput("invalid workspace row"))
    }

    pub fn workspace_get(&self, id: &WorkspaceId) -> Result<Option<WorkspaceRow>, StoreError> {
        workspace_row_conn(&self.conn, id.as_str())
    }

    pub fn conversation_binding_get(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<WorkspaceId>, StoreError> {
        match conversation_binding_conn(&self.conn, conversation.as_str())? {
            Some(workspace_id) => Ok(Some(
                WorkspaceId::try_new(workspace_id)
                    .map_err(|_| StoreError::InvalidInput("invalid workspace row"))?,
            )),
            None => Ok(None),
        }
    }

    /// Administrative archival. Conversations keep their mapping; the
    /// workspace stays readable by explicit reference only.
    pub fn workspace_archive(&mut self, id: &WorkspaceId) -> Result<(), StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let row = workspace_row_conn(&tx, id.as_str())?.ok_or(StoreError::UnknownWorkspace)?;
        if row.status == ac_core::model::WorkspaceStatus::Archived {
            tx.commit()?;
            return Ok(());
        }

        tx.execute(
            "UPDATE workspaces SET status='archived' WHERE workspace_id=?1",
            params![id.as_str()],
        )?;
        if let Some(owner) = row.owner_user_id.as_deref() {
            tx.execute(
                "DELETE FROM user_workspaces WHERE user_id=?1 AND workspace_id=?2",
                params![owner, id.as_str()],
            )?;
        }

        let payload = serde_json::json!({ "workspace_id": id.as_str() }).to_string();
        insert_event_tx(
            &tx,
            now_ms,
            Some(id.as_str()),
            None,
            "workspace_archived",
            &payload,
        )?;

        tx.commit()?;
        Ok(())
    }
}

fn public_workspace_conn(conn: &Connection) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT workspace_id FROM workspaces WHERE owner_system_tag=?1",
            params![PUBLIC_WORKSPACE_TAG],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}
