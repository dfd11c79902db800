//! SQL migration definitions for the paperpipe database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: chunks, FTS5 over chunks",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Section chunks, one per (document, section key)
CREATE TABLE IF NOT EXISTS chunks (
    id               TEXT PRIMARY KEY,
    document_locator TEXT NOT NULL,
    section_key      TEXT NOT NULL,
    text             TEXT NOT NULL,
    metadata_json    TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    UNIQUE(document_locator, section_key)
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_locator);

-- Full-text ranking over chunk text
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    section_key,
    text,
    content=chunks,
    content_rowid=rowid
);

CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, section_key, text)
    VALUES (new.rowid, new.section_key, new.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, section_key, text)
    VALUES ('delete', old.rowid, old.section_key, old.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_update AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, section_key, text)
    VALUES ('delete', old.rowid, old.section_key, old.text);
    INSERT INTO chunks_fts(rowid, section_key, text)
    VALUES (new.rowid, new.section_key, new.text);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Article metadata from abstract searches",
            sql: r#"
CREATE TABLE IF NOT EXISTS articles (
    id            TEXT PRIMARY KEY,
    pdf_locator   TEXT NOT NULL,
    html_locator  TEXT NOT NULL,
    title         TEXT NOT NULL,
    abstract      TEXT NOT NULL,
    keywords_json TEXT NOT NULL,
    authors_json  TEXT NOT NULL,
    published_at  TEXT,
    updated_at    TEXT,
    query         TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_query ON articles(query);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
