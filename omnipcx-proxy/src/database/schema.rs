//! Database schema definitions.

/// SQL schema for the CDR store.
pub const SCHEMA_SQL: &str = r#"
-- Undelivered call detail records, oldest first by id
CREATE TABLE IF NOT EXISTS cdr (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload BLOB NOT NULL,               -- SMDR payload without framing or line end
    buffered_at INTEGER DEFAULT (strftime('%s', 'now'))
);
"#;
