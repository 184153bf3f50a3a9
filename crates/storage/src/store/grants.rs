#![forbid(unsafe_code)]

use super::*;
use ac_core::ids::{UserId, WorkspaceId};
use ac_core::model::{MemberRole, Permission, ResourceRef, StorageKind};
use super::events::insert_event_tx;
use super::groups::group_exists_conn;
use super::identity::resolve_canonical_conn;

fn workspace_exists_conn(conn: &Connection, workspace_id: &str) -> Result<(), StoreError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM workspaces WHERE workspace_id=?1",
            params![workspace_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(StoreError::UnknownWorkspace)
    }
}

/// Expired grants are treated as absent at decision time; writes here sweep
/// them opportunistically so the table does not accrete garbage.
fn gc_expired_grants_tx(
    tx: &Transaction<'_>,
    workspace_id: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "DELETE FROM acl_grants \
         WHERE workspace_id=?1 AND expires_at_ms IS NOT NULL AND expires_at_ms <= ?2",
        params![workspace_id, now_ms],
    )?;
    Ok(())
}

impl SqliteStore {
    pub fn workspace_member_add(
        &mut self,
        request: WorkspaceMemberAddRequest,
    ) -> Result<WorkspaceMemberRow, StoreError> {
        let WorkspaceMemberAddRequest {
            workspace_id,
            user_id,
            role,
            granted_by,
        } = request;

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        workspace_exists_conn(&tx, workspace_id.as_str())?;
        let canonical = match resolve_canonical_conn(&tx, &user_id) {
            Ok(id) => id,
            Err(StoreError::AliasNotFound { .. }) => return Err(StoreError::UnknownUser),
            Err(err) => return Err(err),
        };

        tx.execute(
            r#"
            INSERT INTO workspace_members(workspace_id, user_id, role, granted_by, granted_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(workspace_id, user_id) DO UPDATE
              SET role=excluded.role, granted_by=excluded.granted_by, granted_at_ms=excluded.granted_at_ms
            "#,
            params![
                workspace_id.as_str(),
                canonical.as_str(),
                role.as_str(),
                granted_by.as_str(),
                now_ms
            ],
        )?;

        let payload = serde_json::json!({
            "workspace_id": workspace_id.as_str(),
            "user_id": canonical.as_str(),
            "role": role.as_str(),
            "granted_by": granted_by.as_str(),
        })
        .to_string();
        insert_event_tx(
            &tx,
            now_ms,
            Some(workspace_id.as_str()),
            Some(canonical.as_str()),
            "workspace_member_added",
            &payload,
        )?;

        tx.commit()?;
        Ok(WorkspaceMemberRow {
            workspace_id: workspace_id.as_str().to_string(),
            user_id: canonical.as_str().to_string(),
            role,
            granted_by: granted_by.as_str().to_string(),
            granted_at_ms: now_ms,
        })
    }

    pub fn workspace_member_remove(
        &mut self,
        workspace: &WorkspaceId,
        user: &UserId,
    ) -> Result<bool, StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let canonical = match resolve_canonical_conn(&tx, user) {
            Ok(id) => id,
            Err(StoreError::AliasNotFound { .. }) => return Err(StoreError::UnknownUser),
            Err(err) => return Err(err),
        };
        let deleted = tx.execute(
            "DELETE FROM workspace_members WHERE workspace_id=?1 AND user_id=?2",
            params![workspace.as_str(), canonical.as_str()],
        )?;

        if deleted > 0 {
            let payload = serde_json::json!({
                "workspace_id": workspace.as_str(),
                "user_id": canonical.as_str(),
            })
            .to_string();
            insert_event_tx(
                &tx,
                now_ms,
                Some(workspace.as_str()),
                Some(canonical.as_str()),
                "workspace_member_removed",
                &payload,
            )?;
        }

        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn list_workspace_members(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<WorkspaceMemberRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT workspace_id, user_id, role, granted_by, granted_at_ms
            FROM workspace_members
            WHERE workspace_id=?1
            ORDER BY user_id ASC
            "#,
        )?;

        let mut rows = stmt.query(params![workspace.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let role: String = row.get(2)?;
            out.push(WorkspaceMemberRow {
                workspace_id: row.get(0)?,
                user_id: row.get(1)?,
                role: MemberRole::parse(&role)
                    .ok_or(StoreError::InvalidInput("invalid member role row"))?,
                granted_by: row.get(3)?,
                granted_at_ms: row.get(4)?,
            });
        }
        Ok(out)
    }

    /// Grants are per (resource, target); granting again replaces the
    /// permission and expiry. Admin is never grantable here.
    pub fn acl_grant(&mut self, request: AclGrantRequest) -> Result<AclGrantRow, StoreError> {
        let AclGrantRequest {
            workspace_id,
            resource,
            target,
            permission,
            granted_by,
            expires_at_ms,
        } = request;

        let now_ms = now_ms();
        if expires_at_ms.is_some_and(|expiry| expiry <= now_ms) {
            return Err(StoreError::InvalidInput("grant expiry is in the past"));
        }

        let tx = self.conn.transaction()?;
        workspace_exists_conn(&tx, workspace_id.as_str())?;
        gc_expired_grants_tx(&tx, workspace_id.as_str(), now_ms)?;

        let (target_user_id, target_group_id) = match &target {
            GrantTarget::User(user) => {
                let canonical = match resolve_canonical_conn(&tx, user) {
                    Ok(id) => id,
                    Err(StoreError::AliasNotFound { .. }) => return Err(StoreError::UnknownUser),
                    Err(err) => return Err(err),
                };
                (Some(canonical.as_str().to_string()), None)
            }
            GrantTarget::Group(group) => {
                if !group_exists_conn(&tx, group.as_str())? {
                    return Err(StoreError::UnknownGroup);
                }
                (None, Some(group.as_str().to_string()))
            }
        };

        match (&target_user_id, &target_group_id) {
            (Some(user_id), None) => {
                tx.execute(
                    r#"
                    INSERT INTO acl_grants(workspace_id, resource_type, resource_id, target_user_id, permission, granted_by, created_at_ms, expires_at_ms)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(workspace_id, resource_type, resource_id, target_user_id) WHERE target_user_id IS NOT NULL
                      DO UPDATE SET permission=excluded.permission, granted_by=excluded.granted_by,
                                    created_at_ms=excluded.created_at_ms, expires_at_ms=excluded.expires_at_ms
                    "#,
                    params![
                        workspace_id.as_str(),
                        resource.kind.as_str(),
                        resource.resource_id,
                        user_id,
                        permission.as_str(),
                        granted_by.as_str(),
                        now_ms,
                        expires_at_ms
                    ],
                )?;
            }
            (None, Some(group_id)) => {
                tx.execute(
                    r#"
                    INSERT INTO acl_grants(workspace_id, resource_type, resource_id, target_group_id, permission, granted_by, created_at_ms, expires_at_ms)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(workspace_id, resource_type, resource_id, target_group_id) WHERE target_group_id IS NOT NULL
                      DO UPDATE SET permission=excluded.permission, granted_by=excluded.granted_by,
                                    created_at_ms=excluded.created_at_ms, expires_at_ms=excluded.expires_at_ms
                    "#,
                    params![
                        workspace_id.as_str(),
                        resource.kind.as_str(),
                        resource.resource_id,
                        group_id,
                        permission.as_str(),
                        granted_by.as_str(),
                        now_ms,
                        expires_at_ms
                    ],
                )?;
            }
            _ => return Err(StoreError::InvalidInput("grant target must be set")),
        }

        let payload = serde_json::json!({
            "workspace_id": workspace_id.as_str(),
            "resource_type": resource.kind.as_str(),
            "resource_id": resource.resource_id,
            "target_user_id": target_user_id,
            "target_group_id": target_group_id,
            "permission": permission.as_str(),
            "expires_at_ms": expires_at_ms,
        })
        .to_string();
        insert_event_tx(
            &tx,
            now_ms,
            Some(workspace_id.as_str()),
            target_user_id.as_deref(),
            "acl_granted",
            &payload,
        )?;

        tx.commit()?;
        Ok(AclGrantRow {
            workspace_id: workspace_id.as_str().to_string(),
            resource,
            target_user_id,
            target_group_id,
            permission,
            granted_by: granted_by.as_str().to_string(),
            created_at_ms: now_ms,
            expires_at_ms,
        })
    }

    pub fn acl_revoke(&mut self, request: AclRevokeRequest) -> Result<bool, StoreError> {
        let AclRevokeRequest {
            workspace_id,
            resource,
            target,
        } = request;

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        gc_expired_grants_tx(&tx, workspace_id.as_str(), now_ms)?;

        let deleted = match &target {
            GrantTarget::User(user) => {
                let canonical = match resolve_canonical_conn(&tx, user) {
                    Ok(id) => id,
                    Err(StoreError::AliasNotFound { .. }) => return Err(StoreError::UnknownUser),
                    Err(err) => return Err(err),
                };
                tx.execute(
                    "DELETE FROM acl_grants \
                     WHERE workspace_id=?1 AND resource_type=?2 AND resource_id=?3 AND target_user_id=?4",
                    params![
                        workspace_id.as_str(),
                        resource.kind.as_str(),
                        resource.resource_id,
                        canonical.as_str()
                    ],
                )?
            }
            GrantTarget::Group(group) => tx.execute(
                "DELETE FROM acl_grants \
                 WHERE workspace_id=?1 AND resource_type=?2 AND resource_id=?3 AND target_group_id=?4",
                params![
                    workspace_id.as_str(),
                    resource.kind.as_str(),
                    resource.resource_id,
                    group.as_str()
                ],
            )?,
        };

        if deleted > 0 {
            let payload = serde_json::json!({
                "workspace_id": workspace_id.as_str(),
                "resource_type": resource.kind.as_str(),
                "resource_id": resource.resource_id,
            })
            .to_string();
            insert_event_tx(
                &tx,
                now_ms,
                Some(workspace_id.as_str()),
                None,
                "acl_revoked",
                &payload,
            )?;
        }

        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Live grants only; expiry is evaluated against the current clock.
    pub fn acl_list(
        &self,
        workspace: &WorkspaceId,
        resource: &ResourceRef,
    ) -> Result<Vec<AclGrantRow>, StoreError> {
        let now_ms = now_ms();
        let mut stmt = self.conn.prepare(
            r#"
            SELECT workspace_id, resource_type, resource_id, target_user_id, target_group_id,
                   permission, granted_by, created_at_ms, expires_at_ms
            FROM acl_grants
            WHERE workspace_id=?1 AND resource_type=?2 AND resource_id=?3
              AND (expires_at_ms IS NULL OR expires_at_ms > ?4)
            ORDER BY created_at_ms ASC
            "#,
        )?;

        let mut rows = stmt.query(params![
            workspace.as_str(),
            resource.kind.as_str(),
            resource.resource_id,
            now_ms
        ])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let resource_type: String = row.get(1)?;
            let permission: String = row.get(5)?;
            out.push(AclGrantRow {
                workspace_id: row.get(0)?,
                resource: ResourceRef {
                    kind: StorageKind::parse(&resource_type)
                        .ok_or(StoreError::InvalidInput("invalid resource type row"))?,
                    resource_id: row.get(2)?,
                },
                target_user_id: row.get(3)?,
                target_group_id: row.get(4)?,
                permission: Permission::parse(&permission)
                    .ok_or(StoreError::InvalidInput("invalid permission row"))?,
                granted_by: row.get(6)?,
                created_at_ms: row.get(7)?,
                expires_at_ms: row.get(8)?,
            });
        }
        Ok(out)
    }
}
