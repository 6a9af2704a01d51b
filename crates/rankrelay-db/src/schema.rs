//! Feedback store schema.

/// Queries and their candidate choices, one row per choice.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS queries (
    qid INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS choices (
    cid INTEGER PRIMARY KEY AUTOINCREMENT,
    qid INTEGER NOT NULL REFERENCES queries(qid) ON DELETE CASCADE,
    pos INTEGER NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_choices_qid ON choices(qid, pos);
"#;
