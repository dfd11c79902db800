//! libSQL storage layer (local file, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding section chunks
//! (content-addressed, ranked with FTS5) and article metadata from abstract
//! searches. [`VectorStore`] is the seam the write stage talks to.
//!
//! **Access rules:**
//! - pipeline runs: read-write via [`Storage::open`]
//! - `query`: read-only via [`Storage::open_readonly`]

mod migrations;
pub mod schema_cache;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tracing::debug;

use paperpipe_shared::{ArticleMetadata, PaperpipeError, Result, StoredChunk};

pub use schema_cache::SchemaCache;

// ---------------------------------------------------------------------------
// VectorStore
// ---------------------------------------------------------------------------

/// Result of an idempotent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// A document with the same id already existed; nothing was written.
    Skipped,
}

/// A ranked chunk returned by [`VectorStore::query`].
#[derive(Debug, Clone)]
pub struct ChunkMatch {
    pub id: String,
    pub document_locator: String,
    pub section_key: String,
    pub text: String,
    /// Relevance; higher is better.
    pub score: f64,
}

/// Content-addressed chunk collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Store `chunk` under its content address unless that id is present.
    async fn upsert(&self, chunk: &StoredChunk) -> Result<UpsertOutcome>;

    /// Up to `k` chunks ranked against `text`.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<ChunkMatch>>;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PaperpipeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for queries only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PaperpipeError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PaperpipeError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PaperpipeError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(sql, params![])
            .await
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(PaperpipeError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    pub async fn chunk_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM chunks").await
    }

    /// Stored chunks of one document, in key order.
    pub async fn chunks_for_document(&self, document_locator: &str) -> Result<Vec<ChunkMatch>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, document_locator, section_key, text
                 FROM chunks WHERE document_locator = ?1 ORDER BY section_key",
                params![document_locator],
            )
            .await
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;

        collect_rows(&mut rows, |row| row_to_chunk(row, 0.0)).await
    }

    // -----------------------------------------------------------------------
    // Article operations
    // -----------------------------------------------------------------------

    /// Insert an article found by `query`. Existing ids are left untouched.
    pub async fn insert_article(
        &self,
        article: &ArticleMetadata,
        query: &str,
    ) -> Result<UpsertOutcome> {
        self.check_writable()?;
        let keywords = serde_json::to_string(&article.keywords)
            .map_err(|e| PaperpipeError::Conversion(e.to_string()))?;
        let authors = serde_json::to_string(&article.authors)
            .map_err(|e| PaperpipeError::Conversion(e.to_string()))?;

        let changed = self
            .conn
            .execute(
                "INSERT INTO articles (id, pdf_locator, html_locator, title, abstract,
                                       keywords_json, authors_json, published_at, updated_at,
                                       query, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    article.id.as_str(),
                    article.pdf_locator.as_str(),
                    article.html_locator.as_str(),
                    article.title.as_str(),
                    article.abstract_text.as_str(),
                    keywords,
                    authors,
                    article.published_at.map(|t| t.to_rfc3339()),
                    article.updated_at.map(|t| t.to_rfc3339()),
                    query,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;

        Ok(if changed == 0 {
            UpsertOutcome::Skipped
        } else {
            UpsertOutcome::Inserted
        })
    }

    pub async fn get_article(&self, id: &str) -> Result<Option<ArticleMetadata>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, pdf_locator, html_locator, title, abstract, keywords_json,
                        authors_json, published_at, updated_at
                 FROM articles WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_article(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(PaperpipeError::Storage(e.to_string())),
        }
    }

    pub async fn article_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM articles").await
    }
}

#[async_trait]
impl VectorStore for Storage {
    async fn exists(&self, id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM chunks WHERE id = ?1", params![id])
            .await
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(PaperpipeError::Storage(e.to_string())),
        }
    }

    async fn upsert(&self, chunk: &StoredChunk) -> Result<UpsertOutcome> {
        self.check_writable()?;
        let id = chunk.address.id();
        if self.exists(&id).await? {
            debug!(%id, section = %chunk.address.section_key, "chunk exists, skipping");
            return Ok(UpsertOutcome::Skipped);
        }

        let changed = self
            .conn
            .execute(
                "INSERT INTO chunks (id, document_locator, section_key, text, metadata_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT DO NOTHING",
                params![
                    id.as_str(),
                    chunk.address.document_locator.as_str(),
                    chunk.address.section_key.as_str(),
                    chunk.text.as_str(),
                    chunk.metadata().to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;

        Ok(if changed == 0 {
            UpsertOutcome::Skipped
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<ChunkMatch>> {
        let Some(expr) = fts_expression(text) else {
            return Ok(Vec::new());
        };

        let mut rows = self
            .conn
            .query(
                "SELECT c.id, c.document_locator, c.section_key, c.text, bm25(chunks_fts) AS score
                 FROM chunks_fts
                 JOIN chunks c ON c.rowid = chunks_fts.rowid
                 WHERE chunks_fts MATCH ?1
                 ORDER BY score
                 LIMIT ?2",
                params![expr, k as i64],
            )
            .await
            .map_err(|e| PaperpipeError::Storage(e.to_string()))?;

        collect_rows(&mut rows, |row| {
            // bm25() is lower-is-better; flip it so callers sort descending.
            let score = -row.get::<f64>(4).unwrap_or(0.0);
            row_to_chunk(row, score)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Quote each alphanumeric term and OR them, so free text never reaches the
/// FTS5 query grammar.
fn fts_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" OR "))
}

/// Map every remaining row; a failed fetch is an error, not the end of
/// the result set.
async fn collect_rows<T>(
    rows: &mut libsql::Rows,
    mut map: impl FnMut(&libsql::Row) -> Result<T>,
) -> Result<Vec<T>> {
    let mut results = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => results.push(map(&row)?),
            Ok(None) => return Ok(results),
            Err(e) => return Err(PaperpipeError::Storage(e.to_string())),
        }
    }
}

fn row_to_chunk(row: &libsql::Row, score: f64) -> Result<ChunkMatch> {
    let get = |idx: i32| {
        row.get::<String>(idx)
            .map_err(|e| PaperpipeError::Storage(e.to_string()))
    };
    Ok(ChunkMatch {
        id: get(0)?,
        document_locator: get(1)?,
        section_key: get(2)?,
        text: get(3)?,
        score,
    })
}

fn row_to_article(row: &libsql::Row) -> Result<ArticleMetadata> {
    let get = |idx: i32| {
        row.get::<String>(idx)
            .map_err(|e| PaperpipeError::Storage(e.to_string()))
    };
    let list = |idx: i32| -> Result<Vec<String>> {
        serde_json::from_str(&get(idx)?)
            .map_err(|e| PaperpipeError::Storage(format!("invalid json column: {e}")))
    };
    let time = |idx: i32| -> Option<DateTime<Utc>> {
        row.get::<String>(idx)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
    };

    Ok(ArticleMetadata {
        id: get(0)?,
        pdf_locator: get(1)?,
        html_locator: get(2)?,
        title: get(3)?,
        abstract_text: get(4)?,
        keywords: list(5)?,
        authors: list(6)?,
        published_at: time(7),
        updated_at: time(8),
    })
}
