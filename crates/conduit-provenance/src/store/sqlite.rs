//! SQLite-backed event log for durable provenance storage.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::SecondsFormat;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::EventLog;
use crate::error::{ProvenanceError, Result};
use crate::event::ProvenanceEventRecord;
use crate::search::{Query, SearchableField};

/// Durable event log.
///
/// Appends and reads share one connection; the highest id is mirrored in an
/// atomic so `max_event_id` never takes the lock.
pub struct SqliteEventLog {
    conn: Mutex<Connection>,
    max_event_id: AtomicU64,
}

impl SqliteEventLog {
    /// Open (or create) a log at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ProvenanceError::Storage(format!("open: {}", e)))?;
        Self::init_with_connection(conn)
    }

    /// Create an in-memory SQLite log (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ProvenanceError::Storage(format!("open_in_memory: {}", e)))?;
        Self::init_with_connection(conn)
    }

    fn init_with_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        Self::register_functions(&conn)?;

        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(event_id), 0) FROM provenance_events",
            [],
            |row| row.get(0),
        )?;
        tracing::debug!("Opened SQLite provenance log at event id {}", max);

        Ok(Self {
            conn: Mutex::new(conn),
            max_event_id: AtomicU64::new(max as u64),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS provenance_events (
                event_id INTEGER PRIMARY KEY,
                event_type TEXT NOT NULL,
                flow_unit_uuid TEXT NOT NULL,
                lineage_identity TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                component_id TEXT NOT NULL,
                component_type TEXT NOT NULL,
                relationship TEXT,
                details TEXT,
                transit_uri TEXT,
                record TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS provenance_links (
                event_id INTEGER NOT NULL REFERENCES provenance_events(event_id),
                flow_unit_uuid TEXT NOT NULL,
                role TEXT NOT NULL,
                PRIMARY KEY (event_id, flow_unit_uuid, role)
            );

            CREATE TABLE IF NOT EXISTS provenance_attributes (
                event_id INTEGER NOT NULL REFERENCES provenance_events(event_id),
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (event_id, name)
            );

            CREATE INDEX IF NOT EXISTS idx_provenance_flow_unit
                ON provenance_events(flow_unit_uuid);
            CREATE INDEX IF NOT EXISTS idx_provenance_lineage
                ON provenance_events(lineage_identity);
            CREATE INDEX IF NOT EXISTS idx_provenance_component
                ON provenance_events(component_id);
            CREATE INDEX IF NOT EXISTS idx_provenance_timestamp
                ON provenance_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_provenance_links_uuid
                ON provenance_links(flow_unit_uuid);
            CREATE INDEX IF NOT EXISTS idx_provenance_attributes_name
                ON provenance_attributes(name, value);
            "#,
        )
        .map_err(|e| ProvenanceError::Storage(format!("init_schema: {}", e)))?;
        Ok(())
    }

    /// `unicode_lower(text)`; the built-in `lower` and `LIKE` only fold ASCII.
    fn register_functions(conn: &Connection) -> Result<()> {
        conn.create_scalar_function(
            "unicode_lower",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text: Option<String> = ctx.get(0)?;
                Ok(text.map(|t| t.to_lowercase()))
            },
        )
        .map_err(|e| ProvenanceError::Storage(format!("register functions: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ProvenanceError::Storage(e.to_string()))
    }

    /// Insert one event with its link and attribute rows.
    fn insert_event(conn: &Connection, event: &ProvenanceEventRecord) -> Result<()> {
        let record_json = serde_json::to_string(event)?;
        let event_id = event.event_id as i64;

        conn.execute(
            r#"
            INSERT INTO provenance_events
                (event_id, event_type, flow_unit_uuid, lineage_identity, timestamp,
                 component_id, component_type, relationship, details, transit_uri, record)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                event_id,
                event.event_type.to_string(),
                event.flow_unit_uuid.to_string(),
                event.lineage_identity.to_string(),
                format_timestamp(event),
                event.component_id,
                event.component_type,
                event.relationship,
                event.details,
                event.transit_uri,
                record_json,
            ],
        )?;

        let links = std::iter::once((event.flow_unit_uuid, "subject"))
            .chain(event.parent_uuids.iter().map(|u| (*u, "parent")))
            .chain(event.child_uuids.iter().map(|u| (*u, "child")));
        for (uuid, role) in links {
            conn.execute(
                "INSERT OR IGNORE INTO provenance_links (event_id, flow_unit_uuid, role) VALUES (?1, ?2, ?3)",
                params![event_id, uuid.to_string(), role],
            )?;
        }

        for (name, value) in event.attributes() {
            conn.execute(
                "INSERT INTO provenance_attributes (event_id, name, value) VALUES (?1, ?2, ?3)",
                params![event_id, name, value],
            )?;
        }

        Ok(())
    }

    /// Decode a `(event_id, record)` row.
    fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String)> {
        Ok((row.get(0)?, row.get(1)?))
    }

    fn decode((event_id, record_json): (i64, String)) -> Result<ProvenanceEventRecord> {
        let mut event: ProvenanceEventRecord = serde_json::from_str(&record_json)?;
        event.event_id = event_id as u64;
        Ok(event)
    }

    fn query_events(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ProvenanceEventRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(Self::decode).collect()
    }
}

impl EventLog for SqliteEventLog {
    fn append(&self, events: Vec<ProvenanceEventRecord>) -> Result<Vec<ProvenanceEventRecord>> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ProvenanceError::Storage(format!("begin tx: {}", e)))?;

        let mut next_id = self.max_event_id.load(Ordering::SeqCst);
        let mut stored = Vec::with_capacity(events.len());
        for mut event in events {
            next_id += 1;
            event.event_id = next_id;
            Self::insert_event(&tx, &event)?;
            stored.push(event);
        }

        tx.commit()
            .map_err(|e| ProvenanceError::Storage(format!("commit: {}", e)))?;
        self.max_event_id.store(next_id, Ordering::SeqCst);

        Ok(stored)
    }

    fn get(&self, event_id: u64) -> Result<Option<ProvenanceEventRecord>> {
        let Some(event_id) = stored_id(event_id) else {
            return Ok(None);
        };
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT event_id, record FROM provenance_events WHERE event_id = ?1",
                params![event_id],
                Self::row_to_event,
            )
            .optional()?;
        drop(conn);

        row.map(Self::decode).transpose()
    }

    fn range(&self, first_id: u64, max_records: usize) -> Result<Vec<ProvenanceEventRecord>> {
        let Some(first_id) = stored_id(first_id) else {
            return Ok(Vec::new());
        };
        self.query_events(
            "SELECT event_id, record FROM provenance_events WHERE event_id >= ?1 ORDER BY event_id LIMIT ?2",
            &[&first_id, &sql_limit(max_records)],
        )
    }

    fn max_event_id(&self) -> u64 {
        self.max_event_id.load(Ordering::SeqCst)
    }

    fn events_for_flow_unit(&self, uuid: &Uuid) -> Result<Vec<ProvenanceEventRecord>> {
        self.query_events(
            r#"
            SELECT event_id, record FROM provenance_events
            WHERE event_id IN (SELECT event_id FROM provenance_links WHERE flow_unit_uuid = ?1)
            ORDER BY event_id
            "#,
            &[&uuid.to_string()],
        )
    }

    fn search(
        &self,
        query: &Query,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<ProvenanceEventRecord>> {
        let Some(after_id) = stored_id(after_id) else {
            return Ok(Vec::new());
        };
        let mut clauses = vec!["e.event_id > ?1".to_string()];
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(after_id)];

        if let Some(min) = query.min_event_id {
            let Some(min) = stored_id(min) else {
                return Ok(Vec::new());
            };
            params_vec.push(Box::new(min));
            clauses.push(format!("e.event_id >= ?{}", params_vec.len()));
        }
        if let Some(start) = query.start_date {
            params_vec.push(Box::new(start.to_rfc3339_opts(SecondsFormat::Micros, true)));
            clauses.push(format!("e.timestamp >= ?{}", params_vec.len()));
        }
        if let Some(end) = query.end_date {
            params_vec.push(Box::new(end.to_rfc3339_opts(SecondsFormat::Micros, true)));
            clauses.push(format!("e.timestamp <= ?{}", params_vec.len()));
        }

        for term in &query.search_terms {
            let pattern = like_pattern(&term.value.to_lowercase());
            match &term.field {
                SearchableField::Attribute(name) => {
                    params_vec.push(Box::new(name.clone()));
                    let name_idx = params_vec.len();
                    params_vec.push(Box::new(pattern));
                    clauses.push(format!(
                        "EXISTS (SELECT 1 FROM provenance_attributes a WHERE a.event_id = e.event_id AND a.name = ?{} AND unicode_lower(a.value) LIKE ?{} ESCAPE '\\')",
                        name_idx,
                        params_vec.len()
                    ));
                }
                field => {
                    params_vec.push(Box::new(pattern));
                    clauses.push(format!(
                        "unicode_lower(e.{}) LIKE ?{} ESCAPE '\\'",
                        column_for(field),
                        params_vec.len()
                    ));
                }
            }
        }

        params_vec.push(Box::new(sql_limit(limit)));
        let sql = format!(
            "SELECT e.event_id, e.record FROM provenance_events e WHERE {} ORDER BY e.event_id LIMIT ?{}",
            clauses.join(" AND "),
            params_vec.len()
        );

        let params_ref: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        self.query_events(&sql, params_ref.as_slice())
    }
}

/// Ids past `i64::MAX` can never have been assigned.
fn stored_id(id: u64) -> Option<i64> {
    i64::try_from(id).ok()
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Timestamps are stored in a fixed-width UTC form so text order is time order.
fn format_timestamp(event: &ProvenanceEventRecord) -> String {
    event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn column_for(field: &SearchableField) -> &'static str {
    match field {
        SearchableField::EventType => "event_type",
        SearchableField::FlowUnitUuid => "flow_unit_uuid",
        SearchableField::LineageIdentity => "lineage_identity",
        SearchableField::ComponentId => "component_id",
        SearchableField::ComponentType => "component_type",
        SearchableField::Relationship => "relationship",
        SearchableField::Details => "details",
        SearchableField::TransitUri => "transit_uri",
        // Attributes are matched through provenance_attributes.
        SearchableField::Attribute(_) => "record",
    }
}

/// Translate a `*` wildcard value into an escaped LIKE pattern.
fn like_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '%' | '_' => {
                pattern.push('\\');
                pattern.push(c);
            }
            '*' => pattern.push('%'),
            c => pattern.push(c),
        }
    }
    pattern
}

// MARK: - Tests
