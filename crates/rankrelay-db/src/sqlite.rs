//! SQLite-backed feedback store.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::info;

use rankrelay_core::{
    CallId, Choices, Cid, DataPaths, Error, Labels, Qid, Query, Result, StatusMap,
};

use crate::db::{Db, LapBoard};
use crate::schema::SCHEMA_SQL;

/// Feedback store persisted to a single SQLite file.
pub struct SqliteDb {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    laps: LapBoard,
}

impl SqliteDb {
    /// Open or create the store under the data directory.
    pub fn open(paths: &DataPaths) -> Result<Self> {
        let db_path = paths.db_file.clone();
        let conn = Connection::open(&db_path).map_err(|e| Error::Db(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Db(e.to_string()))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Db(format!("schema init failed: {e}")))?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path,
            laps: LapBoard::default(),
        };
        let queries = db.count("queries")?;
        info!(
            "feedback store opened: {} queries, path={}",
            queries,
            db.db_path.display()
        );
        Ok(db)
    }

    fn count(&self, table: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .map_err(|e| Error::Db(e.to_string()))
    }
}

#[async_trait]
impl Db for SqliteDb {
    fn name(&self) -> &'static str {
        "SqliteDb"
    }

    async fn save(&self, query: &Query, choices: &Choices) -> Result<(Qid, Vec<Cid>)> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| Error::Db(e.to_string()))?;
        let qid = tx
            .prepare_cached("INSERT INTO queries (text, created_at) VALUES (?1, ?2)")
            .map_err(|e| Error::Db(e.to_string()))?
            .insert(params![query.0, now])
            .map_err(|e| Error::Db(e.to_string()))?;
        let mut cids = Vec::with_capacity(choices.len());
        for (pos, choice) in choices.iter().enumerate() {
            let body = serde_json::to_string(choice)?;
            let cid = tx
                .prepare_cached("INSERT INTO choices (qid, pos, body) VALUES (?1, ?2, ?3)")
                .map_err(|e| Error::Db(e.to_string()))?
                .insert(params![qid, pos as i64, body])
                .map_err(|e| Error::Db(e.to_string()))?;
            cids.push(Cid(cid));
        }
        tx.commit().map_err(|e| Error::Db(e.to_string()))?;
        Ok((Qid(qid), cids))
    }

    async fn get(&self, qid: Qid, cids: &[Cid]) -> Result<(Query, Choices, Labels)> {
        let conn = self.conn.lock();
        let text: Option<String> = conn
            .prepare_cached("SELECT text FROM queries WHERE qid = ?1")
            .map_err(|e| Error::Db(e.to_string()))?
            .query_row(params![qid.0], |row| row.get(0))
            .optional()
            .map_err(|e| Error::Db(e.to_string()))?;
        let text = text.ok_or_else(|| Error::Db(format!("unknown qid {}", qid.0)))?;

        let mut stmt = conn
            .prepare_cached("SELECT cid, body FROM choices WHERE qid = ?1 ORDER BY pos")
            .map_err(|e| Error::Db(e.to_string()))?;
        let rows = stmt
            .query_map(params![qid.0], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| Error::Db(e.to_string()))?;

        let mut choices = Choices::new();
        let mut labels = Vec::new();
        for row in rows {
            let (cid, body) = row.map_err(|e| Error::Db(e.to_string()))?;
            let choice: Value = serde_json::from_str(&body)
                .map_err(|e| Error::Db(format!("corrupt choice {cid}: {e}")))?;
            let flagged = cids.iter().any(|c| c.0 == cid);
            choices.push(choice);
            labels.push((Cid(cid), if flagged { 1.0 } else { 0.0 }));
        }
        // Every flagged cid must belong to this query.
        for flagged in cids {
            if !labels.iter().any(|(cid, _)| cid == flagged) {
                return Err(Error::Db(format!(
                    "cid {} does not belong to qid {}",
                    flagged.0, qid.0
                )));
            }
        }
        Ok((Query(text), choices, Labels(labels)))
    }

    fn lap(&self, ms: f64, call: CallId) {
        self.laps.record(ms, call);
    }

    fn chain_state(&self, mut state: StatusMap) -> StatusMap {
        let queries = self.count("queries").unwrap_or(-1);
        let choices = self.count("choices").unwrap_or(-1);
        let db_bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        state.insert(
            self.name().to_string(),
            json!({
                "queries": queries,
                "choices": choices,
                "db_bytes": db_bytes,
                "path": self.db_path.display().to_string(),
                "laps": self.laps.fragment(),
            }),
        );
        state
    }
}
