use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};

use super::{HitQuery, HitTypeFilter, RecordStore, StoreResult};
use crate::{
    allocation_cache::AllocationRecord,
    hit::{Hit, HitId, HitStatus, HitType, NewHit, PAYLOAD_VERSION},
    visitor::Identity,
    StoreError,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    visitor_id TEXT,
    anonymous_id TEXT NOT NULL,
    hit_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    payload_version INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS hits_by_status_group_time
    ON hits (status, visitor_id, anonymous_id, timestamp);
CREATE INDEX IF NOT EXISTS hits_by_anonymous_id ON hits (anonymous_id);
CREATE INDEX IF NOT EXISTS hits_by_visitor_id ON hits (visitor_id);

CREATE TABLE IF NOT EXISTS allocations (
    visitor_id TEXT NOT NULL,
    variation_group_id TEXT NOT NULL,
    campaign_id TEXT NOT NULL,
    variation_id TEXT NOT NULL,
    is_reference INTEGER NOT NULL,
    PRIMARY KEY (visitor_id, variation_group_id)
);

CREATE TABLE IF NOT EXISTS documents (
    key TEXT PRIMARY KEY,
    body TEXT NOT NULL
);
";

const HIT_COLUMNS: &str =
    "id, visitor_id, anonymous_id, hit_type, payload, payload_version, timestamp, status";

/// A [`RecordStore`] backed by an SQLite database.
///
/// The database runs in WAL mode; every method executes as a single statement or transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<SqliteStore> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous=NORMAL;", [])?;
        SqliteStore::bootstrap(conn)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> StoreResult<SqliteStore> {
        SqliteStore::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> StoreResult<SqliteStore> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Row as read from the `hits` table, before validation.
struct RawHit {
    id: i64,
    visitor_id: Option<String>,
    anonymous_id: String,
    hit_type: String,
    payload: String,
    payload_version: u32,
    timestamp: i64,
    status: String,
}

impl RawHit {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<RawHit> {
        Ok(RawHit {
            id: row.get(0)?,
            visitor_id: row.get(1)?,
            anonymous_id: row.get(2)?,
            hit_type: row.get(3)?,
            payload: row.get(4)?,
            payload_version: row.get(5)?,
            timestamp: row.get(6)?,
            status: row.get(7)?,
        })
    }

    fn decode(self) -> StoreResult<Hit> {
        if self.payload_version > PAYLOAD_VERSION {
            return Err(StoreError::UnsupportedPayloadVersion(self.payload_version));
        }
        let corrupted = |what: &str| StoreError::Corrupted(format!("hit {}: {}", self.id, what));

        let hit_type = HitType::parse(&self.hit_type).ok_or_else(|| corrupted("hit_type"))?;
        let status = HitStatus::parse(&self.status).ok_or_else(|| corrupted("status"))?;
        let timestamp =
            DateTime::from_timestamp_micros(self.timestamp).ok_or_else(|| corrupted("timestamp"))?;
        let payload = serde_json::from_str(&self.payload).map_err(|_| corrupted("payload"))?;

        Ok(Hit {
            id: HitId(self.id),
            identity: Identity {
                visitor_id: self.visitor_id,
                anonymous_id: self.anonymous_id,
            },
            hit_type,
            payload,
            timestamp,
            status,
        })
    }
}

/// SQL `WHERE` clause and its positional parameters for `query`.
fn where_clause(query: &HitQuery) -> (String, Vec<Value>) {
    let mut conditions = vec!["1 = 1".to_owned()];
    let mut values = Vec::new();

    if let Some(status) = query.status {
        values.push(Value::Text(status.as_str().to_owned()));
        conditions.push(format!("status = ?{}", values.len()));
    }
    if let Some(older_than) = query.older_than {
        values.push(Value::Integer(older_than.timestamp_micros()));
        conditions.push(format!("timestamp < ?{}", values.len()));
    }
    match query.hit_type {
        HitTypeFilter::Any => {}
        HitTypeFilter::Only(hit_type) => {
            values.push(Value::Text(hit_type.as_str().to_owned()));
            conditions.push(format!("hit_type = ?{}", values.len()));
        }
        HitTypeFilter::Except(hit_type) => {
            values.push(Value::Text(hit_type.as_str().to_owned()));
            conditions.push(format!("hit_type != ?{}", values.len()));
        }
    }
    if let Some(identity) = &query.identity {
        values.push(match &identity.visitor_id {
            Some(visitor_id) => Value::Text(visitor_id.clone()),
            None => Value::Null,
        });
        // `IS` compares NULLs as equal.
        conditions.push(format!("visitor_id IS ?{}", values.len()));
        values.push(Value::Text(identity.anonymous_id.clone()));
        conditions.push(format!("anonymous_id = ?{}", values.len()));
    }

    (conditions.join(" AND "), values)
}

fn id_list(ids: &[HitId]) -> (String, Vec<i64>) {
    let placeholders = (1..=ids.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    (placeholders, ids.iter().map(|id| id.0).collect())
}

// SQLite limits the number of host parameters per statement.
const MAX_IDS_PER_STATEMENT: usize = 500;

impl RecordStore for SqliteStore {
    fn insert_hit(
        &self,
        identity: &Identity,
        hit: NewHit,
        timestamp: DateTime<Utc>,
        status: HitStatus,
    ) -> StoreResult<Hit> {
        let payload = serde_json::to_string(&hit.payload)
            .map_err(|err| StoreError::Corrupted(format!("unserializable payload: {err}")))?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO hits (visitor_id, anonymous_id, hit_type, payload, payload_version, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                identity.visitor_id,
                identity.anonymous_id,
                hit.hit_type.as_str(),
                payload,
                PAYLOAD_VERSION,
                timestamp.timestamp_micros(),
                status.as_str(),
            ],
        )?;
        let id = HitId(conn.last_insert_rowid());

        Ok(Hit {
            id,
            identity: identity.clone(),
            hit_type: hit.hit_type,
            payload: hit.payload,
            timestamp,
            status,
        })
    }

    fn get_hit(&self, id: HitId) -> StoreResult<Option<Hit>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {HIT_COLUMNS} FROM hits WHERE id = ?1"),
                params![id.0],
                RawHit::from_row,
            )
            .optional()?;
        raw.map(RawHit::decode).transpose()
    }

    fn set_hit_status(&self, ids: &[HitId], status: HitStatus) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let (placeholders, values) = id_list(chunk);
            updated += tx.execute(
                &format!(
                    "UPDATE hits SET status = ?{} WHERE id IN ({placeholders})",
                    chunk.len() + 1
                ),
                params_from_iter(
                    values
                        .into_iter()
                        .map(Value::Integer)
                        .chain(std::iter::once(Value::Text(status.as_str().to_owned()))),
                ),
            )?;
        }
        tx.commit()?;
        Ok(updated)
    }

    fn delete_hits(&self, ids: &[HitId]) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let (placeholders, values) = id_list(chunk);
            deleted += tx.execute(
                &format!("DELETE FROM hits WHERE id IN ({placeholders})"),
                params_from_iter(values),
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn delete_hits_with_status(&self, status: HitStatus) -> StoreResult<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM hits WHERE status = ?1",
            params![status.as_str()],
        )?;
        Ok(deleted)
    }

    fn delete_hits_for_visitor(&self, id: &str) -> StoreResult<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM hits WHERE visitor_id = ?1 OR anonymous_id = ?1",
            params![id],
        )?;
        Ok(deleted)
    }

    fn query_hits(&self, query: &HitQuery) -> StoreResult<Vec<Hit>> {
        let (filter, values) = where_clause(query);
        let sql = match query.limit_per_group {
            Some(limit) => format!(
                "SELECT {HIT_COLUMNS} FROM (
                    SELECT *, ROW_NUMBER() OVER (
                        PARTITION BY visitor_id, anonymous_id ORDER BY timestamp, id
                    ) AS position
                    FROM hits WHERE {filter}
                 )
                 WHERE position <= {limit}
                 ORDER BY visitor_id, anonymous_id, timestamp, id"
            ),
            None => format!(
                "SELECT {HIT_COLUMNS} FROM hits WHERE {filter}
                 ORDER BY visitor_id, anonymous_id, timestamp, id"
            ),
        };

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), RawHit::from_row)?;
        let hits = rows
            .map(|row| row.map_err(StoreError::from).and_then(RawHit::decode))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(hits)
    }

    fn hit_groups(&self, query: &HitQuery) -> StoreResult<Vec<Identity>> {
        let (filter, values) = where_clause(query);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT visitor_id, anonymous_id FROM hits WHERE {filter}
             ORDER BY visitor_id, anonymous_id"
        ))?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(Identity {
                visitor_id: row.get(0)?,
                anonymous_id: row.get(1)?,
            })
        })?;
        let groups = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    fn count_hits(&self, query: &HitQuery) -> StoreResult<usize> {
        let (filter, values) = where_clause(query);
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM hits WHERE {filter}"),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        usize::try_from(count)
            .map_err(|_| StoreError::Corrupted(format!("hit count {count} out of range")))
    }

    fn put_allocation(&self, record: &AllocationRecord) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO allocations (visitor_id, variation_group_id, campaign_id, variation_id, is_reference)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (visitor_id, variation_group_id) DO UPDATE SET
                campaign_id = excluded.campaign_id,
                variation_id = excluded.variation_id,
                is_reference = excluded.is_reference",
            params![
                record.visitor_id,
                record.variation_group_id,
                record.campaign_id,
                record.variation_id,
                record.is_reference,
            ],
        )?;
        Ok(())
    }

    fn get_allocation(
        &self,
        visitor_id: &str,
        variation_group_id: &str,
    ) -> StoreResult<Option<AllocationRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT visitor_id, variation_group_id, campaign_id, variation_id, is_reference
                 FROM allocations WHERE visitor_id = ?1 AND variation_group_id = ?2",
                params![visitor_id, variation_group_id],
                |row| {
                    Ok(AllocationRecord {
                        visitor_id: row.get(0)?,
                        variation_group_id: row.get(1)?,
                        campaign_id: row.get(2)?,
                        variation_id: row.get(3)?,
                        is_reference: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn delete_allocations(&self, visitor_id: &str) -> StoreResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM allocations WHERE visitor_id = ?1",
            params![visitor_id],
        )?)
    }

    fn put_document(&self, key: &str, body: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO documents (key, body) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET body = excluded.body",
            params![key, body],
        )?;
        Ok(())
    }

    fn get_document(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT body FROM documents WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn delete_document(&self, key: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM documents WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }
}
