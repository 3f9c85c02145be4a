//! Durable storage for sessions, query ledger rows, and leak findings.
//!
//! The store trait is synchronous: every operation is a single small SQLite
//! statement, and the engine calls them between awaits. `SqliteStore` guards
//! the connection with a mutex; `MemoryStore` backs the test suite.

use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    LeakCategory, LeakStatus, PlatformCategory, ResearchQuery, ResearchSession, RiskLevel,
    SessionStatus, TradeDataLeak,
};
use crate::protocol::ResearchPhase;

/// Persistence seam for the research engine.
pub trait ResearchStore: Send + Sync {
    fn insert_session(&self, session: &ResearchSession) -> Result<(), StoreError>;

    /// Overwrite the stored row for an existing session.
    fn update_session(&self, session: &ResearchSession) -> Result<(), StoreError>;

    fn get_session(&self, session_id: Uuid) -> Result<ResearchSession, StoreError>;

    fn insert_query(&self, query: &ResearchQuery) -> Result<(), StoreError>;

    fn queries_for_session(&self, session_id: Uuid) -> Result<Vec<ResearchQuery>, StoreError>;

    /// Insert a leak unless a row with the same `(session_id, source_url)`
    /// already exists. Returns whether a row was written.
    fn upsert_leak(&self, leak: &TradeDataLeak) -> Result<bool, StoreError>;

    fn leaks_for_session(&self, session_id: Uuid) -> Result<Vec<TradeDataLeak>, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS research_sessions (
    id                    TEXT PRIMARY KEY,
    requester_id          TEXT NOT NULL,
    target_company        TEXT NOT NULL,
    status                TEXT NOT NULL,
    total_queries         INTEGER NOT NULL DEFAULT 0,
    total_results_examined INTEGER NOT NULL DEFAULT 0,
    verified_leaks_found  INTEGER NOT NULL DEFAULT 0,
    potential_leaks_found INTEGER NOT NULL DEFAULT 0,
    error_message         TEXT,
    started_at            TEXT NOT NULL,
    completed_at          TEXT,
    metadata              TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS research_queries (
    id           TEXT PRIMARY KEY,
    session_id   TEXT NOT NULL REFERENCES research_sessions(id),
    query_text   TEXT NOT NULL,
    phase        TEXT NOT NULL,
    result_count INTEGER NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queries_session ON research_queries(session_id);

CREATE TABLE IF NOT EXISTS trade_data_leaks (
    id                 TEXT PRIMARY KEY,
    session_id         TEXT NOT NULL REFERENCES research_sessions(id),
    requester_id       TEXT NOT NULL,
    source_url         TEXT NOT NULL,
    platform_type      TEXT NOT NULL,
    leak_type          TEXT NOT NULL,
    status             TEXT NOT NULL,
    risk_assessment    TEXT NOT NULL,
    partners_mentioned TEXT NOT NULL DEFAULT '[]',
    evidence_snippet   TEXT NOT NULL,
    analysis_notes     TEXT NOT NULL,
    discovered_at      TEXT NOT NULL,
    UNIQUE(session_id, source_url)
);
";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and bootstrap the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Database {
                    message: format!("failed to create database directory: {}", e),
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests that want real SQL behavior.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
        chrono::DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| StoreError::Serialization {
                message: format!("bad timestamp '{}': {}", raw, e),
            })
    }

    fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
        Uuid::parse_str(raw).map_err(|e| StoreError::Serialization {
            message: format!("bad uuid '{}': {}", raw, e),
        })
    }

    fn parse_label<T>(raw: &str, parse: fn(&str) -> Option<T>, kind: &str) -> Result<T, StoreError> {
        parse(raw).ok_or_else(|| StoreError::Serialization {
            message: format!("unknown {} label '{}'", kind, raw),
        })
    }
}

impl ResearchStore for SqliteStore {
    fn insert_session(&self, session: &ResearchSession) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let metadata = serde_json::to_string(&session.metadata).map_err(|e| {
            StoreError::Serialization {
                message: e.to_string(),
            }
        })?;
        conn.execute(
            "INSERT INTO research_sessions
             (id, requester_id, target_company, status, total_queries,
              total_results_examined, verified_leaks_found,
              potential_leaks_found, error_message, started_at, completed_at,
              metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session.id.to_string(),
                session.requester_id,
                session.target_company,
                session.status.as_str(),
                session.total_queries,
                session.total_results_examined,
                session.verified_leaks_found,
                session.potential_leaks_found,
                session.error_message,
                session.started_at.to_rfc3339(),
                session.completed_at.map(|t| t.to_rfc3339()),
                metadata,
            ],
        )?;
        Ok(())
    }

    fn update_session(&self, session: &ResearchSession) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let metadata = serde_json::to_string(&session.metadata).map_err(|e| {
            StoreError::Serialization {
                message: e.to_string(),
            }
        })?;
        let updated = conn.execute(
            "UPDATE research_sessions SET
               status = ?2, total_queries = ?3, total_results_examined = ?4,
               verified_leaks_found = ?5, potential_leaks_found = ?6,
               error_message = ?7, completed_at = ?8, metadata = ?9
             WHERE id = ?1",
            params![
                session.id.to_string(),
                session.status.as_str(),
                session.total_queries,
                session.total_results_examined,
                session.verified_leaks_found,
                session.potential_leaks_found,
                session.error_message,
                session.completed_at.map(|t| t.to_rfc3339()),
                metadata,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound {
                session_id: session.id,
            });
        }
        Ok(())
    }

    fn get_session(&self, session_id: Uuid) -> Result<ResearchSession, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, requester_id, target_company, status, total_queries,
                        total_results_examined, verified_leaks_found,
                        potential_leaks_found, error_message, started_at,
                        completed_at, metadata
                 FROM research_sessions WHERE id = ?1",
                params![session_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, usize>(4)?,
                        row.get::<_, usize>(5)?,
                        row.get::<_, usize>(6)?,
                        row.get::<_, usize>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, Option<String>>(10)?,
                        row.get::<_, String>(11)?,
                    ))
                },
            )
            .optional()?
            .ok_or(StoreError::SessionNotFound { session_id })?;

        let completed_at = match row.10 {
            Some(raw) => Some(Self::parse_timestamp(&raw)?),
            None => None,
        };
        Ok(ResearchSession {
            id: Self::parse_uuid(&row.0)?,
            requester_id: row.1,
            target_company: row.2,
            status: Self::parse_label(&row.3, SessionStatus::parse, "session status")?,
            total_queries: row.4,
            total_results_examined: row.5,
            verified_leaks_found: row.6,
            potential_leaks_found: row.7,
            error_message: row.8,
            started_at: Self::parse_timestamp(&row.9)?,
            completed_at,
            metadata: serde_json::from_str(&row.11).map_err(|e| StoreError::Serialization {
                message: e.to_string(),
            })?,
        })
    }

    fn insert_query(&self, query: &ResearchQuery) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO research_queries
             (id, session_id, query_text, phase, result_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                query.id.to_string(),
                query.session_id.to_string(),
                query.query_text,
                query.phase.as_str(),
                query.result_count,
                query.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn queries_for_session(&self, session_id: Uuid) -> Result<Vec<ResearchQuery>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, query_text, phase, result_count, created_at
             FROM research_queries WHERE session_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, usize>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut queries = Vec::new();
        for row in rows {
            let row = row?;
            queries.push(ResearchQuery {
                id: Self::parse_uuid(&row.0)?,
                session_id: Self::parse_uuid(&row.1)?,
                query_text: row.2,
                phase: Self::parse_label(&row.3, ResearchPhase::parse, "phase")?,
                result_count: row.4,
                created_at: Self::parse_timestamp(&row.5)?,
            });
        }
        Ok(queries)
    }

    fn upsert_leak(&self, leak: &TradeDataLeak) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let partners = serde_json::to_string(&leak.partners_mentioned).map_err(|e| {
            StoreError::Serialization {
                message: e.to_string(),
            }
        })?;
        let inserted = conn.execute(
            "INSERT INTO trade_data_leaks
             (id, session_id, requester_id, source_url, platform_type,
              leak_type, status, risk_assessment, partners_mentioned,
              evidence_snippet, analysis_notes, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(session_id, source_url) DO NOTHING",
            params![
                leak.id.to_string(),
                leak.session_id.to_string(),
                leak.requester_id,
                leak.source_url,
                leak.platform_type.as_str(),
                leak.leak_type.as_str(),
                leak.status.as_str(),
                leak.risk_assessment.as_str(),
                partners,
                leak.evidence_snippet,
                leak.analysis_notes,
                leak.discovered_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn leaks_for_session(&self, session_id: Uuid) -> Result<Vec<TradeDataLeak>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, requester_id, source_url, platform_type,
                    leak_type, status, risk_assessment, partners_mentioned,
                    evidence_snippet, analysis_notes, discovered_at
             FROM trade_data_leaks WHERE session_id = ?1 ORDER BY discovered_at, id",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
            ))
        })?;

        let mut leaks = Vec::new();
        for row in rows {
            let row = row?;
            leaks.push(TradeDataLeak {
                id: Self::parse_uuid(&row.0)?,
                session_id: Self::parse_uuid(&row.1)?,
                requester_id: row.2,
                source_url: row.3,
                platform_type: Self::parse_label(&row.4, PlatformCategory::parse, "platform")?,
                leak_type: Self::parse_label(&row.5, LeakCategory::parse, "leak type")?,
                status: Self::parse_label(&row.6, LeakStatus::parse, "leak status")?,
                risk_assessment: Self::parse_label(&row.7, RiskLevel::parse, "risk level")?,
                partners_mentioned: serde_json::from_str(&row.8).map_err(|e| {
                    StoreError::Serialization {
                        message: e.to_string(),
                    }
                })?,
                evidence_snippet: row.9,
                analysis_notes: row.10,
                discovered_at: Self::parse_timestamp(&row.11)?,
            });
        }
        Ok(leaks)
    }
}

/// In-memory store for unit tests that do not care about SQL behavior.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<Vec<ResearchSession>>,
    queries: Mutex<Vec<ResearchQuery>>,
    leaks: Mutex<Vec<TradeDataLeak>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResearchStore for MemoryStore {
    fn insert_session(&self, session: &ResearchSession) -> Result<(), StoreError> {
        self.sessions.lock().unwrap().push(session.clone());
        Ok(())
    }

    fn update_session(&self, session: &ResearchSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(StoreError::SessionNotFound {
                session_id: session.id,
            }),
        }
    }

    fn get_session(&self, session_id: Uuid) -> Result<ResearchSession, StoreError> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or(StoreError::SessionNotFound { session_id })
    }

    fn insert_query(&self, query: &ResearchQuery) -> Result<(), StoreError> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(())
    }

    fn queries_for_session(&self, session_id: Uuid) -> Result<Vec<ResearchQuery>, StoreError> {
        Ok(self
            .queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.session_id == session_id)
            .cloned()
            .collect())
    }

    fn upsert_leak(&self, leak: &TradeDataLeak) -> Result<bool, StoreError> {
        let mut leaks = self.leaks.lock().unwrap();
        let exists = leaks
            .iter()
            .any(|l| l.session_id == leak.session_id && l.source_url == leak.source_url);
        if exists {
            return Ok(false);
        }
        leaks.push(leak.clone());
        Ok(true)
    }

    fn leaks_for_session(&self, session_id: Uuid) -> Result<Vec<TradeDataLeak>, StoreError> {
        Ok(self
            .leaks
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_leak(session_id: Uuid, url: &str) -> TradeDataLeak {
        TradeDataLeak {
            id: Uuid::new_v4(),
            session_id,
            requester_id: "analyst-1".to_string(),
            source_url: url.to_string(),
            platform_type: PlatformCategory::DataBroker,
            leak_type: LeakCategory::SupplierRelationship,
            status: LeakStatus::Verified,
            risk_assessment: RiskLevel::High,
            partners_mentioned: vec!["Shenzhen Widget Co".to_string()],
            evidence_snippet: "42 shipments since 2024".to_string(),
            analysis_notes: "Supplier relationship exposed.".to_string(),
            discovered_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_session_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut session = ResearchSession::new("analyst-1", "Acme Trading Corp");
        session
            .metadata
            .insert("model".to_string(), serde_json::json!("mock-model"));
        store.insert_session(&session).unwrap();

        let loaded = store.get_session(session.id).unwrap();
        assert_eq!(loaded.target_company, "Acme Trading Corp");
        assert_eq!(loaded.status, SessionStatus::Initiated);
        assert_eq!(loaded.metadata["model"], serde_json::json!("mock-model"));

        session.begin().unwrap();
        session.complete(2, 1).unwrap();
        session.total_queries = 17;
        store.update_session(&session).unwrap();

        let loaded = store.get_session(session.id).unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert_eq!(loaded.total_queries, 17);
        assert_eq!(loaded.verified_leaks_found, 2);
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn test_update_unknown_session() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = ResearchSession::new("analyst-1", "Acme");
        assert!(matches!(
            store.update_session(&session),
            Err(StoreError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_query_rows_ordered() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = ResearchSession::new("analyst-1", "Acme");
        store.insert_session(&session).unwrap();

        for (text, phase) in [
            ("acme suppliers", ResearchPhase::BroadSweep),
            ("acme bill of lading", ResearchPhase::BroadSweep),
            ("acme gmbh", ResearchPhase::VectorSearch),
        ] {
            store
                .insert_query(&ResearchQuery::new(session.id, text, phase, 5))
                .unwrap();
        }

        let queries = store.queries_for_session(session.id).unwrap();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].query_text, "acme suppliers");
        assert_eq!(queries[2].phase, ResearchPhase::VectorSearch);
    }

    #[test]
    fn test_leak_upsert_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = ResearchSession::new("analyst-1", "Acme");
        store.insert_session(&session).unwrap();

        let url = "https://panjiva.com/acme";
        assert!(store.upsert_leak(&sample_leak(session.id, url)).unwrap());
        assert!(!store.upsert_leak(&sample_leak(session.id, url)).unwrap());
        assert!(
            store
                .upsert_leak(&sample_leak(session.id, "https://volza.com/acme"))
                .unwrap()
        );

        let leaks = store.leaks_for_session(session.id).unwrap();
        assert_eq!(leaks.len(), 2);
        assert_eq!(leaks[0].partners_mentioned, vec!["Shenzhen Widget Co"]);
    }

    #[test]
    fn test_same_url_different_sessions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = ResearchSession::new("analyst-1", "Acme");
        let second = ResearchSession::new("analyst-2", "Acme");
        store.insert_session(&first).unwrap();
        store.insert_session(&second).unwrap();

        let url = "https://panjiva.com/acme";
        assert!(store.upsert_leak(&sample_leak(first.id, url)).unwrap());
        assert!(store.upsert_leak(&sample_leak(second.id, url)).unwrap());
    }

    #[test]
    fn test_sqlite_store_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("research.db");
        let store = SqliteStore::open(&path).unwrap();
        let session = ResearchSession::new("analyst-1", "Acme");
        store.insert_session(&session).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_memory_store_upsert() {
        let store = MemoryStore::new();
        let session = ResearchSession::new("analyst-1", "Acme");
        store.insert_session(&session).unwrap();

        let url = "https://panjiva.com/acme";
        assert!(store.upsert_leak(&sample_leak(session.id, url)).unwrap());
        assert!(!store.upsert_leak(&sample_leak(session.id, url)).unwrap());
        assert_eq!(store.leaks_for_session(session.id).unwrap().len(), 1);
    }
}
