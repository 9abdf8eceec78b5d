//! SQLite-backed [`Store`] implementation.
//!
//! A single embedded database file per document. `init` creates tables if
//! missing and applies schema migrations, including folding the legacy
//! `summary_chunks` join table into the `chunk_id` column.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use super::{AdjacentNodes, BrokenSummaries, NodeContext, NodeMeta, SearchHit, Store, StoreStats};
use crate::error::StorageError;

/// Upper bound on substring search results.
const MAX_SEARCH_RESULTS: usize = 50;

/// SQLite store for chunks and summary nodes.
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// Creates parent directories as needed. Call [`SqliteStore::init`]
    /// before first use.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Migration {
                message: format!("failed to create database directory: {e}"),
            })?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens an in-memory database (tests).
    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: None,
        })
    }

    /// Path of the backing file, if on disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Creates tables if missing and applies schema migrations.
    pub fn init(&self) -> Result<(), StorageError> {
        self.conn
            .pragma_update(None, "journal_mode", "WAL")
            .or_else(|_| {
                // In-memory databases reject WAL; memory journal is fine there.
                self.conn.pragma_update(None, "journal_mode", "MEMORY")
            })?;

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                start_index INTEGER NOT NULL,
                end_index INTEGER NOT NULL,
                file_source TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                summary_text TEXT NOT NULL,
                level INTEGER NOT NULL,
                parent_id INTEGER REFERENCES summaries(id),
                sequence_index INTEGER NOT NULL DEFAULT 0,
                chunk_id INTEGER REFERENCES chunks(id)
            );",
        )?;

        self.migrate()?;

        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_summaries_parent_seq
                 ON summaries(parent_id, sequence_index);
             CREATE INDEX IF NOT EXISTS idx_summaries_level ON summaries(level);
             CREATE INDEX IF NOT EXISTS idx_summaries_chunk ON summaries(chunk_id);",
        )?;

        Ok(())
    }

    /// Brings pre-existing databases up to the current schema.
    fn migrate(&self) -> Result<(), StorageError> {
        if !self.column_exists("summaries", "chunk_id")? {
            self.conn.execute_batch(
                "ALTER TABLE summaries ADD COLUMN chunk_id INTEGER REFERENCES chunks(id);",
            )?;
        }

        // Legacy layout linked level-0 nodes through a many-to-many join
        // table; the linkage is one-to-one in practice, so it lives in a
        // column now.
        if self.table_exists("summary_chunks")? {
            info!("migrating legacy summary_chunks join table into summaries.chunk_id");
            self.conn.execute(
                "UPDATE summaries SET chunk_id = (
                     SELECT sc.chunk_id FROM summary_chunks sc
                     WHERE sc.summary_id = summaries.id
                 )
                 WHERE level = 0 AND chunk_id IS NULL",
                [],
            )?;
            self.conn.execute_batch("DROP TABLE summary_chunks;")?;
        }

        if !self.column_exists("summaries", "sequence_index")? {
            self.conn.execute_batch(
                "ALTER TABLE summaries ADD COLUMN sequence_index INTEGER NOT NULL DEFAULT 0;",
            )?;
            // Backfill sibling order from insertion order, which matched
            // document order in the legacy writer.
            self.conn.execute(
                "UPDATE summaries SET sequence_index = (
                     SELECT rn - 1 FROM (
                         SELECT id, ROW_NUMBER() OVER (
                             PARTITION BY level, parent_id ORDER BY id
                         ) AS rn
                         FROM summaries
                     ) ranked
                     WHERE ranked.id = summaries.id
                 )",
                [],
            )?;
        }

        Ok(())
    }

    fn table_exists(&self, name: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({table})"))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Classifies summaries matching one broken-text predicate.
    fn broken_matching(&self, predicate: &str) -> Result<Vec<(i64, String)>, StorageError> {
        let sql =
            format!("SELECT id, summary_text FROM summaries WHERE {predicate} ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Store for SqliteStore {
    fn add_chunk(
        &self,
        text: &str,
        start: usize,
        end: usize,
        source: &str,
    ) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO chunks (text, start_index, end_index, file_source)
             VALUES (?1, ?2, ?3, ?4)",
            params![text, start as i64, end as i64, source],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn add_summary(
        &self,
        text: &str,
        level: i64,
        parent_id: Option<i64>,
        sequence_index: i64,
    ) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO summaries (summary_text, level, parent_id, sequence_index)
             VALUES (?1, ?2, ?3, ?4)",
            params![text, level, parent_id, sequence_index],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn link_summary_to_chunk(&self, node_id: i64, chunk_id: i64) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE summaries SET chunk_id = ?2 WHERE id = ?1",
            params![node_id, chunk_id],
        )?;
        Ok(())
    }

    fn update_summary_parent(&self, node_id: i64, parent_id: i64) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE summaries SET parent_id = ?2 WHERE id = ?1 AND parent_id IS NULL",
            params![node_id, parent_id],
        )?;
        if changed == 0 {
            let current: Option<Option<i64>> = self
                .conn
                .query_row(
                    "SELECT parent_id FROM summaries WHERE id = ?1",
                    params![node_id],
                    |row| row.get(0),
                )
                .optional()?;
            match current {
                Some(Some(existing)) if existing == parent_id => {}
                _ => return Err(StorageError::ParentAlreadySet { id: node_id }),
            }
        }
        Ok(())
    }

    fn update_summary_text(&self, node_id: i64, text: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE summaries SET summary_text = ?2 WHERE id = ?1",
            params![node_id, text],
        )?;
        Ok(())
    }

    fn roots(&self) -> Result<Vec<(i64, String)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, summary_text FROM summaries
             WHERE level = (SELECT MAX(level) FROM summaries)
             ORDER BY sequence_index, id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn children(&self, parent_id: i64) -> Result<Vec<(i64, String)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, summary_text FROM summaries
             WHERE parent_id = ?1
             ORDER BY sequence_index, id",
        )?;
        let rows = stmt.query_map(params![parent_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn adjacent(&self, node_id: i64) -> Result<Option<AdjacentNodes>, StorageError> {
        let position: Option<(i64, Option<i64>, i64)> = self
            .conn
            .query_row(
                "SELECT level, parent_id, sequence_index FROM summaries WHERE id = ?1",
                params![node_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((level, parent, seq)) = position else {
            return Ok(None);
        };

        let sibling_at = |index: i64| -> Result<Option<i64>, StorageError> {
            self.conn
                .query_row(
                    "SELECT id FROM summaries
                     WHERE level = ?1 AND parent_id IS ?2 AND sequence_index = ?3",
                    params![level, parent, index],
                    |row| row.get(0),
                )
                .optional()
                .map_err(Into::into)
        };

        Ok(Some(AdjacentNodes {
            prev: if seq > 0 { sibling_at(seq - 1)? } else { None },
            next: sibling_at(seq + 1)?,
            parent,
        }))
    }

    fn node_metadata(&self, node_id: i64) -> Result<Option<NodeMeta>, StorageError> {
        self.conn
            .query_row(
                "SELECT level, summary_text FROM summaries WHERE id = ?1",
                params![node_id],
                |row| {
                    Ok(NodeMeta {
                        level: row.get(0)?,
                        text: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    fn chunk_id_of(&self, node_id: i64) -> Result<Option<i64>, StorageError> {
        let linked: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT chunk_id FROM summaries WHERE id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(linked.flatten())
    }

    fn chunk_text(&self, chunk_id: i64) -> Result<Option<String>, StorageError> {
        self.conn
            .query_row(
                "SELECT text FROM chunks WHERE id = ?1",
                params![chunk_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    fn chunk_texts(&self, chunk_ids: &[i64]) -> Result<Vec<Option<String>>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT text FROM chunks WHERE id = ?1")?;
        chunk_ids
            .iter()
            .map(|&id| {
                stmt.query_row(params![id], |row| row.get(0))
                    .optional()
                    .map_err(Into::into)
            })
            .collect()
    }

    fn summary_text(&self, node_id: i64) -> Result<Option<String>, StorageError> {
        self.conn
            .query_row(
                "SELECT summary_text FROM summaries WHERE id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    fn summaries_text(&self, node_ids: &[i64]) -> Result<Vec<Option<String>>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT summary_text FROM summaries WHERE id = ?1")?;
        node_ids
            .iter()
            .map(|&id| {
                stmt.query_row(params![id], |row| row.get(0))
                    .optional()
                    .map_err(Into::into)
            })
            .collect()
    }

    fn search(&self, needle: &str, limit: usize) -> Result<Vec<SearchHit>, StorageError> {
        // instr() keeps the match case-sensitive; LIKE folds ASCII case.
        let limit = limit.clamp(1, MAX_SEARCH_RESULTS);
        let mut stmt = self.conn.prepare(
            "SELECT id, level, summary_text FROM summaries
             WHERE instr(summary_text, ?1) > 0
             ORDER BY id
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![needle, limit as i64], |row| {
            Ok(SearchHit {
                id: row.get(0)?,
                level: row.get(1)?,
                text: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn max_level(&self) -> Result<Option<i64>, StorageError> {
        self.conn
            .query_row("SELECT MAX(level) FROM summaries", [], |row| row.get(0))
            .map_err(Into::into)
    }

    fn orphan_summaries(&self) -> Result<Vec<i64>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM summaries
             WHERE parent_id IS NULL
               AND level = (SELECT MAX(level) FROM summaries)
             ORDER BY sequence_index, id",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn chunks_without_summary(&self) -> Result<Vec<(i64, String)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.text FROM chunks c
             WHERE NOT EXISTS (SELECT 1 FROM summaries s WHERE s.chunk_id = c.id)
             ORDER BY c.id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn chunk_ordinal(&self, chunk_id: i64) -> Result<i64, StorageError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE id < ?1",
                params![chunk_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn broken_summaries(&self) -> Result<BrokenSummaries, StorageError> {
        Ok(BrokenSummaries {
            provider_error: self.broken_matching(
                "summary_text LIKE '%Provider returned error%'
                 OR summary_text LIKE '%No endpoints found%'
                 OR summary_text LIKE '%Error generating summary.%'",
            )?,
            control_tokens: self.broken_matching("lower(summary_text) LIKE '%<think>%'")?,
            code_fence: self.broken_matching("summary_text LIKE '```%'")?,
        })
    }

    fn summary_with_context(&self, node_id: i64) -> Result<Option<NodeContext>, StorageError> {
        let node: Option<(i64, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT level, chunk_id FROM summaries WHERE id = ?1",
                params![node_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((level, chunk_id)) = node else {
            return Ok(None);
        };

        if level == 0 {
            let chunk_text = match chunk_id {
                Some(id) => self.chunk_text(id)?,
                None => None,
            };
            return Ok(Some(NodeContext {
                level,
                chunk_text,
                child_texts: Vec::new(),
            }));
        }

        let mut stmt = self.conn.prepare(
            "SELECT summary_text FROM summaries
             WHERE parent_id = ?1
             ORDER BY sequence_index, id",
        )?;
        let rows = stmt.query_map(params![node_id], |row| row.get(0))?;
        let child_texts = rows.collect::<Result<Vec<String>, _>>()?;

        Ok(Some(NodeContext {
            level,
            chunk_text: None,
            child_texts,
        }))
    }

    fn stats(&self) -> Result<StoreStats, StorageError> {
        let chunks: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let summaries: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM summaries", [], |row| row.get(0))?;
        Ok(StoreStats {
            chunks: usize::try_from(chunks).unwrap_or(0),
            summaries: usize::try_from(summaries).unwrap_or(0),
            max_level: self.max_level()?,
        })
    }
}
