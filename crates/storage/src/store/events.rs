#![forbid(unsafe_code)]

use super::*;

pub(super) fn insert_event_tx(
    tx: &Transaction<'_>,
    ts_ms: i64,
    workspace_id: Option<&str>,
    user_id: Option<&str>,
    event_type: &str,
    payload_json: &str,
) -> Result<i64, StoreError> {
    tx.execute(
        r#"
        INSERT INTO events(ts_ms, workspace_id, user_id, type, payload_json)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![ts_ms, workspace_id, user_id, event_type, payload_json],
    )?;
    Ok(tx.last_insert_rowid())
}

fn parse_event_id(event_id: &str) -> Option<i64> {
    let digits = event_id.strip_prefix("evt_")?;
    digits.parse::<i64>().ok()
}

impl SqliteStore {
    pub fn list_events(&self, request: ListEventsRequest) -> Result<Vec<EventRow>, StoreError> {
        let since_seq = match request.since_event_id.as_deref() {
            None => 0i64,
            Some(event_id) => parse_event_id(event_id)
                .ok_or(StoreError::InvalidInput("since must be like evt_<16-digit-seq>"))?,
        };
        let limit = i64::try_from(request.limit)
            .map_err(|_| StoreError::InvalidInput("numeric overflow"))?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT seq, ts_ms, workspace_id, user_id, type, payload_json
            FROM events
            WHERE seq > ?1 AND (?2 IS NULL OR workspace_id = ?2)
            ORDER BY seq ASC
            LIMIT ?3
            "#,
        )?;
        let workspace = request.workspace_id.as_ref().map(|id| id.as_str().to_string());
        let rows = stmt.query_map(params![since_seq, workspace, limit], |row| {
            Ok(EventRow {
                seq: row.get(0)?,
                ts_ms: row.get(1)?,
                workspace_id: row.get(2)?,
                user_id: row.get(3)?,
                event_type: row.get(4)?,
                payload_json: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
