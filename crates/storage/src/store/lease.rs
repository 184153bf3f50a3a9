#![forbid(unsafe_code)]

use super::*;
use super::events::insert_event_tx;

const DEFAULT_LEASE_TTL_MS: i64 = 30_000;
const MAX_LEASE_TTL_MS: i64 = 600_000;

fn load_lease_conn(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Option<ConversationLease>, StoreError> {
    conn.query_row(
        "SELECT conversation_id, holder, acquired_at_ms, expires_at_ms \
         FROM conversation_leases WHERE conversation_id=?1",
        params![conversation_id],
        |row| {
            Ok(ConversationLease {
                conversation_id: row.get(0)?,
                holder: row.get(1)?,
                acquired_at_ms: row.get(2)?,
                expires_at_ms: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::from)
}

fn clamp_ttl(ttl_ms: i64) -> Result<i64, StoreError> {
    let ttl_ms = if ttl_ms <= 0 {
        DEFAULT_LEASE_TTL_MS
    } else {
        ttl_ms
    };
    if ttl_ms > MAX_LEASE_TTL_MS {
        return Err(StoreError::InvalidInput("ttl_ms exceeds max_ttl_ms=600000"));
    }
    Ok(ttl_ms)
}

impl SqliteStore {
    /// Advisory lock for the resolve-then-mutate window of one conversation.
    /// Expired leases are treated as absent; claims may GC them.
    pub fn conversation_lease_claim(
        &mut self,
        request: LeaseClaimRequest,
    ) -> Result<ConversationLease, StoreError> {
        let LeaseClaimRequest {
            conversation_id,
            holder,
            ttl_ms,
            force,
        } = request;

        if holder.trim().is_empty() {
            return Err(StoreError::InvalidInput("lease holder must not be empty"));
        }
        let ttl_ms = clamp_ttl(ttl_ms)?;

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let mut takeover_from: Option<String> = None;
        if let Some(lease) = load_lease_conn(&tx, &conversation_id)? {
            if now_ms < lease.expires_at_ms {
                if lease.holder == holder {
                    tx.commit()?;
                    return Ok(lease);
                }
                if !force {
                    return Err(StoreError::ConversationLeaseHeld {
                        conversation_id,
                        holder: lease.holder,
                        expires_at_ms: lease.expires_at_ms,
                    });
                }
                takeover_from = Some(lease.holder);
            }

            tx.execute(
                "DELETE FROM conversation_leases WHERE conversation_id=?1",
                params![conversation_id],
            )?;
        }

        let expires_at_ms = now_ms + ttl_ms;
        tx.execute(
            "INSERT INTO conversation_leases(conversation_id, holder, acquired_at_ms, expires_at_ms) \
             VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, holder, now_ms, expires_at_ms],
        )?;

        let event_type = if takeover_from.is_some() {
            "conversation_lease_taken_over"
        } else {
            "conversation_lease_claimed"
        };
        let payload = serde_json::json!({
            "conversation_id": conversation_id,
            "holder": holder,
            "ttl_ms": ttl_ms,
            "takeover_from": takeover_from,
        })
        .to_string();
        insert_event_tx(&tx, now_ms, None, None, event_type, &payload)?;

        tx.commit()?;
        Ok(ConversationLease {
            conversation_id,
            holder,
            acquired_at_ms: now_ms,
            expires_at_ms,
        })
    }

    pub fn conversation_lease_renew(
        &mut self,
        request: LeaseRenewRequest,
    ) -> Result<ConversationLease, StoreError> {
        let LeaseRenewRequest {
            conversation_id,
            holder,
            ttl_ms,
        } = request;

        let ttl_ms = clamp_ttl(ttl_ms)?;
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let lease = load_lease_conn(&tx, &conversation_id)?;
        let Some(lease) = lease else {
            return Err(StoreError::ConversationLeaseNotHeld {
                conversation_id,
                holder: None,
            });
        };
        if now_ms >= lease.expires_at_ms {
            return Err(StoreError::ConversationLeaseNotHeld {
                conversation_id,
                holder: None,
            });
        }
        if lease.holder != holder {
            return Err(StoreError::ConversationLeaseNotHeld {
                conversation_id,
                holder: Some(lease.holder),
            });
        }

        let expires_at_ms = now_ms + ttl_ms;
        tx.execute(
            "UPDATE conversation_leases SET expires_at_ms=?3 \
             WHERE conversation_id=?1 AND holder=?2",
            params![conversation_id, holder, expires_at_ms],
        )?;

        let payload = serde_json::json!({
            "conversation_id": conversation_id,
            "holder": holder,
            "ttl_ms": ttl_ms,
        })
        .to_string();
        insert_event_tx(&tx, now_ms, None, None, "conversation_lease_renewed", &payload)?;

        tx.commit()?;
        Ok(ConversationLease {
            conversation_id,
            holder,
            acquired_at_ms: lease.acquired_at_ms,
            expires_at_ms,
        })
    }

    pub fn conversation_lease_release(
        &mut self,
        request: LeaseReleaseRequest,
    ) -> Result<(), StoreError> {
        let LeaseReleaseRequest {
            conversation_id,
            holder,
        } = request;

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let lease = load_lease_conn(&tx, &conversation_id)?;
        let Some(lease) = lease else {
            return Err(StoreError::ConversationLeaseNotHeld {
                conversation_id,
                holder: None,
            });
        };
        if now_ms >= lease.expires_at_ms {
            return Err(StoreError::ConversationLeaseNotHeld {
                conversation_id,
                holder: None,
            });
        }
        if lease.holder != holder {
            return Err(StoreError::ConversationLeaseNotHeld {
                conversation_id,
                holder: Some(lease.holder),
            });
        }

        tx.execute(
            "DELETE FROM conversation_leases WHERE conversation_id=?1 AND holder=?2",
            params![conversation_id, holder],
        )?;

        let payload = serde_json::json!({
            "conversation_id": conversation_id,
            "holder": holder,
        })
        .to_string();
        insert_event_tx(&tx, now_ms, None, None, "conversation_lease_released", &payload)?;

        tx.commit()?;
        Ok(())
    }
}
