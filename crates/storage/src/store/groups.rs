#![forbid(unsafe_code)]

use super::*;
use ac_core::ids::{GroupId, UserId};
use ac_core::model::GroupRole;
use super::events::insert_event_tx;
use super::identity::resolve_canonical_conn;

pub(super) fn group_exists_conn(conn: &Connection, group_id: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM groups WHERE group_id=?1",
            params![group_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

impl SqliteStore {
    pub fn create_group(&mut self, name: &str) -> Result<GroupRow, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("group name must not be empty"));
        }

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let group_id = mint_group_id_tx(&tx)?;
        let insert = tx.execute(
            "INSERT INTO groups(group_id, name, created_at_ms) VALUES (?1, ?2, ?3)",
            params![group_id, name, now_ms],
        );
        if let Err(err) = insert {
            if is_constraint_violation(&err) {
                return Err(StoreError::InvalidInput("group name already exists"));
            }
            return Err(StoreError::Sql(err));
        }

        let payload = serde_json::json!({ "group_id": group_id, "name": name }).to_string();
        insert_event_tx(&tx, now_ms, None, None, "group_created", &payload)?;

        tx.commit()?;
        Ok(GroupRow {
            group_id,
            name: name.to_string(),
            created_at_ms: now_ms,
        })
    }

    pub fn group_get(&self, group: &GroupId) -> Result<Option<GroupRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT group_id, name, created_at_ms FROM groups WHERE group_id=?1",
                params![group.as_str()],
                |row| {
                    Ok(GroupRow {
                        group_id: row.get(0)?,
                        name: row.get(1)?,
                        created_at_ms: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Upserts the membership; re-adding an existing member updates the role.
    pub fn group_member_add(
        &mut self,
        group: &GroupId,
        user: &UserId,
        role: GroupRole,
    ) -> Result<GroupMemberRow, StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        if !group_exists_conn(&tx, group.as_str())? {
            return Err(StoreError::UnknownGroup);
        }
        let canonical = match resolve_canonical_conn(&tx, user) {
            Ok(id) => id,
            Err(StoreError::AliasNotFound { .. }) => return Err(StoreError::UnknownUser),
            Err(err) => return Err(err),
        };

        tx.execute(
            r#"
            INSERT INTO group_members(group_id, user_id, role, created_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(group_id, user_id) DO UPDATE SET role=excluded.role
            "#,
            params![group.as_str(), canonical.as_str(), role.as_str(), now_ms],
        )?;

        let payload = serde_json::json!({
            "group_id": group.as_str(),
            "user_id": canonical.as_str(),
            "role": role.as_str(),
        })
        .to_string();
        insert_event_tx(
            &tx,
            now_ms,
            None,
            Some(canonical.as_str()),
            "group_member_added",
            &payload,
        )?;

        tx.commit()?;
        Ok(GroupMemberRow {
            group_id: group.as_str().to_string(),
            user_id: canonical.as_str().to_string(),
            role,
            created_at_ms: now_ms,
        })
    }

    pub fn group_member_remove(
        &mut self,
        group: &GroupId,
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
            "DELETE FROM group_members WHERE group_id=?1 AND user_id=?2",
            params![group.as_str(), canonical.as_str()],
        )?;

        if deleted > 0 {
            let payload = serde_json::json!({
                "group_id": group.as_str(),
                "user_id": canonical.as_str(),
            })
            .to_string();
            insert_event_tx(
                &tx,
                now_ms,
                None,
                Some(canonical.as_str()),
                "group_member_removed",
                &payload,
            )?;
        }

        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn list_group_members(&self, group: &GroupId) -> Result<Vec<GroupMemberRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT group_id, user_id, role, created_at_ms
            FROM group_members
            WHERE group_id=?1
            ORDER BY user_id ASC
            "#,
        )?;

        let mut rows = stmt.query(params![group.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let role: String = row.get(2)?;
            out.push(GroupMemberRow {
                group_id: row.get(0)?,
                user_id: row.get(1)?,
                role: GroupRole::parse(&role)
                    .ok_or(StoreError::InvalidInput("invalid group role row"))?,
                created_at_ms: row.get(3)?,
            });
        }
        Ok(out)
    }
}
