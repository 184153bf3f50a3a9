#![forbid(unsafe_code)]

use super::*;
use super::events::insert_event_tx;
use super::identity::{ensure_user_tx, resolve_canonical_conn};
use super::ownership::user_workspace_mapping_conn;

impl SqliteStore {
    /// Identity-only unification: ownership is reassigned or archived and an
    /// alias is recorded, in one transaction. Stored content never moves.
    pub fn merge_identities(&mut self, request: MergeRequest) -> Result<MergeOutcome, StoreError> {
        let MergeRequest {
            source_id,
            target_id,
        } = request;

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let source = match resolve_canonical_conn(&tx, &source_id) {
            Ok(id) => id,
            Err(StoreError::AliasNotFound { .. }) => {
                return Err(StoreError::MergeConflict("source identity does not exist"));
            }
            Err(err) => return Err(err),
        };

        let target = match resolve_canonical_conn(&tx, &target_id) {
            Ok(id) => id,
            Err(StoreError::AliasNotFound { .. }) => {
                ensure_user_tx(&tx, target_id.as_str(), now_ms)?;
                target_id.clone()
            }
            Err(err) => return Err(err),
        };

        if source == target {
            return Err(StoreError::MergeConflict("identities are already unified"));
        }

        let source_workspace = user_workspace_mapping_conn(&tx, source.as_str())?;
        let target_workspace = user_workspace_mapping_conn(&tx, target.as_str())?;

        let (workspace_id, archived_workspace_id) = match (source_workspace, target_workspace) {
            (Some(source_ws), None) => {
                tx.execute(
                    "UPDATE workspaces SET owner_user_id=?2 WHERE workspace_id=?1",
                    params![source_ws, target.as_str()],
                )?;
                tx.execute(
                    "DELETE FROM user_workspaces WHERE user_id=?1",
                    params![source.as_str()],
                )?;
                tx.execute(
                    "INSERT INTO user_workspaces(user_id, workspace_id) VALUES (?1, ?2)",
                    params![target.as_str(), source_ws],
                )?;
                (Some(source_ws), None)
            }
            (Some(source_ws), Some(target_ws)) => {
                tx.execute(
                    "UPDATE workspaces SET status='archived' WHERE workspace_id=?1",
                    params![source_ws],
                )?;
                tx.execute(
                    "DELETE FROM user_workspaces WHERE user_id=?1",
                    params![source.as_str()],
                )?;
                // Conversation mappings may only move here, never lazily on
                // the next message.
                tx.execute(
                    "UPDATE conversation_workspaces SET workspace_id=?2 WHERE workspace_id=?1",
                    params![source_ws, target_ws],
                )?;

                let payload = serde_json::json!({ "workspace_id": source_ws }).to_string();
                insert_event_tx(
                    &tx,
                    now_ms,
                    Some(source_ws.as_str()),
                    Some(source.as_str()),
                    "workspace_archived",
                    &payload,
                )?;

                (Some(target_ws), Some(source_ws))
            }
            (None, target_ws) => (target_ws, None),
        };

        let alias = tx.execute(
            "INSERT INTO aliases(alias_id, user_id, created_at_ms) VALUES (?1, ?2, ?3)",
            params![source.as_str(), target.as_str(), now_ms],
        );
        if let Err(err) = alias {
            if is_constraint_violation(&err) {
                return Err(StoreError::MergeConflict("source is already merged"));
            }
            return Err(StoreError::Sql(err));
        }

        let payload = serde_json::json!({
            "source_user_id": source.as_str(),
            "target_user_id": target.as_str(),
            "workspace_id": workspace_id,
            "archived_workspace_id": archived_workspace_id,
        })
        .to_string();
        insert_event_tx(
            &tx,
            now_ms,
            workspace_id.as_deref(),
            Some(target.as_str()),
            "identities_merged",
            &payload,
        )?;

        tx.commit()?;
        Ok(MergeOutcome {
            canonical_user_id: target.as_str().to_string(),
            workspace_id,
            archived_workspace_id,
        })
    }
}
