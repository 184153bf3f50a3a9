#![forbid(unsafe_code)]

use super::*;
use ac_core::model::{Action, GroupRole, MemberRole, Permission, UserStatus};
use super::identity::resolve_canonical_conn;

impl SqliteStore {
    /// Pure decision over persisted state, evaluated in a fixed order; the
    /// first rule that grants wins, nothing here writes.
    pub fn can_access(&self, request: &AccessRequest) -> Result<bool, StoreError> {
        let conn = &self.conn;

        let canonical = match resolve_canonical_conn(conn, &request.user_id) {
            Ok(id) => id,
            // An identity nobody has ever seen holds no permissions.
            Err(StoreError::AliasNotFound { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };

        let user = user_row_conn(conn, canonical.as_str())?.ok_or(StoreError::UnknownUser)?;
        if user.status == UserStatus::Suspended {
            return Ok(false);
        }

        let workspace = workspace_row_conn(conn, request.workspace_id.as_str())?
            .ok_or(StoreError::UnknownWorkspace)?;

        // Archived workspaces stay readable by explicit reference; every
        // mutation is refused regardless of role.
        if workspace.status == ac_core::model::WorkspaceStatus::Archived
            && request.action != Action::Read
        {
            return Ok(false);
        }

        if workspace.owner_user_id.as_deref() == Some(canonical.as_str()) {
            return Ok(true);
        }

        if let Some(role) = member_role_conn(conn, &workspace.workspace_id, canonical.as_str())? {
            if role.allows(request.action) {
                return Ok(true);
            }
        }

        if let Some(group_id) = workspace.owner_group_id.as_deref() {
            if let Some(role) = group_role_conn(conn, group_id, canonical.as_str())? {
                if role.allows(request.action) {
                    return Ok(true);
                }
            }
        }

        if workspace.owner_system_tag.is_some() && request.action == Action::Read {
            return Ok(true);
        }

        if let Some(resource) = &request.resource {
            let now_ms = now_ms();
            let mut stmt = conn.prepare(
                r#"
                SELECT permission FROM acl_grants
                WHERE workspace_id=?1 AND resource_type=?2 AND resource_id=?3
                  AND (expires_at_ms IS NULL OR expires_at_ms > ?4)
                  AND (target_user_id = ?5
                       OR target_group_id IN (SELECT group_id FROM group_members WHERE user_id=?5))
                "#,
            )?;
            let mut rows = stmt.query(params![
                workspace.workspace_id,
                resource.kind.as_str(),
                resource.resource_id,
                now_ms,
                canonical.as_str()
            ])?;
            while let Some(row) = rows.next()? {
                let permission: String = row.get(0)?;
                let permission = Permission::parse(&permission)
                    .ok_or(StoreError::InvalidInput("invalid permission row"))?;
                if permission.covers(request.action) {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}

fn member_role_conn(
    conn: &Connection,
    workspace_id: &str,
    user_id: &str,
) -> Result<Option<MemberRole>, StoreError> {
    let role = conn
        .query_row(
            "SELECT role FROM workspace_members WHERE workspace_id=?1 AND user_id=?2",
            params![workspace_id, user_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    match role {
        Some(role) => Ok(Some(
            MemberRole::parse(&role).ok_or(StoreError::InvalidInput("invalid member role row"))?,
        )),
        None => Ok(None),
    }
}

fn group_role_conn(
    conn: &Connection,
    group_id: &str,
    user_id: &str,
) -> Result<Option<GroupRole>, StoreError> {
    let role = conn
        .query_row(
            "SELECT role FROM group_members WHERE group_id=?1 AND user_id=?2",
            params![group_id, user_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    match role {
        Some(role) => Ok(Some(
            GroupRole::parse(&role).ok_or(StoreError::InvalidInput("invalid group role row"))?,
        )),
        None => Ok(None),
    }
}
