//! SQLite implementation of [`PositionStore`] built on sqlx.
//!
//! Disjointness of relation kinds and uniqueness of positions are enforced by the schema:
//! one `relations` table keyed by `(subject_id, collection_id)` and `UNIQUE` indexes on
//! `(subject_id, position)` and `(collection_id, position)`.
//!
//! SQLite checks unique indexes row by row during an `UPDATE`, so block shifts first park
//! the moved rows on distinct negative positions and then flip them back. A unique
//! violation that survives this is a real collision and is reported as such.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shelf_api::{
    Collection, CollectionId, ItemEntry, ItemKey, ItemMetadata, LibraryEntry, MediaType,
    Position, RelationEdge, RelationKind, SubjectId,
};
use sqlx::error::DatabaseError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::storage::backend::{PositionStore, StoreTransaction};
use crate::storage::types::{PositionSpan, Result, Shift, StorageError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS subjects (
        id TEXT PRIMARY KEY
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collections (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        is_public INTEGER NOT NULL,
        thumbnail_url TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS relations (
        subject_id TEXT NOT NULL,
        collection_id TEXT NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('owned', 'collaborator', 'saved')),
        PRIMARY KEY (subject_id, collection_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS relations_by_collection ON relations (collection_id)",
    r#"
    CREATE TABLE IF NOT EXISTS library_positions (
        subject_id TEXT NOT NULL,
        collection_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (subject_id, collection_id),
        UNIQUE (subject_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS item_positions (
        collection_id TEXT NOT NULL,
        item_key TEXT NOT NULL,
        title TEXT NOT NULL,
        media_type TEXT NOT NULL,
        poster_url TEXT,
        release_year INTEGER,
        position INTEGER NOT NULL,
        added_by TEXT NOT NULL,
        added_at TEXT NOT NULL,
        PRIMARY KEY (collection_id, item_key),
        UNIQUE (collection_id, position)
    )
    "#,
];

type CollectionRow = (
    String,
    String,
    String,
    Option<String>,
    bool,
    Option<String>,
    String,
);

type ItemRow = (
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    i64,
    String,
    String,
);

const ITEM_COLUMNS: &str =
    "item_key, title, media_type, poster_url, release_year, position, added_by, added_at";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub async fn open<P: AsRef<Path>>(path: P, config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_millis(config.busy_timeout_ms))
            .connect_with(options)
            .await
            .map_err(|e| db_err("open database", e))?;

        info!(
            "[SqliteStore] Database opened at: {}",
            path.as_ref().display()
        );
        Self::with_pool(pool).await
    }

    /// In-memory database. SQLite gives every connection its own memory database, so the
    /// pool is pinned to a single connection that is never recycled.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| db_err("parse connection string", e))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| db_err("open in-memory database", e))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&pool)
                .await
                .map_err(|e| db_err("apply schema", e))?;
        }
        debug!("[SqliteStore] Schema applied");
        Ok(Self { pool })
    }
}

#[async_trait]
impl PositionStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        // Take the write lock up front. A deferred BEGIN fails with SQLITE_BUSY when two
        // readers both try to upgrade, and the busy handler does not retry that case.
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| db_err("begin transaction", e))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

fn db_err(context: &str, err: sqlx::Error) -> StorageError {
    StorageError::DatabaseError(format!("{context}: {err}"))
}

/// Map a write error, treating unique-index violations as position collisions.
fn position_err(scope: &str, err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::PositionCollision {
                scope: scope.to_string(),
                detail: db.message().to_string(),
            }
        }
        _ => db_err(scope, err),
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| StorageError::SerializationError(format!("invalid id '{raw}': {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("invalid timestamp '{raw}': {e}")))
}

fn parse_kind(raw: &str) -> Result<RelationKind> {
    RelationKind::from_str(raw).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn position_from(raw: i64) -> Result<Position> {
    Ok(Position::from_stored(raw)?)
}

fn collection_from_row(row: CollectionRow) -> Result<Collection> {
    let (id, owner, name, description, is_public, thumbnail_url, created_at) = row;
    Ok(Collection {
        id: CollectionId(parse_uuid(&id)?),
        owner: SubjectId(parse_uuid(&owner)?),
        name,
        description,
        is_public,
        thumbnail_url,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn item_from_row(collection: CollectionId, row: ItemRow) -> Result<ItemEntry> {
    let (key, title, media_type, poster_url, release_year, position, added_by, added_at) = row;
    let media_type = MediaType::from_str(&media_type)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;
    let release_year = release_year
        .map(i32::try_from)
        .transpose()
        .map_err(|e| StorageError::SerializationError(format!("release year: {e}")))?;
    Ok(ItemEntry {
        collection,
        key: ItemKey::parse(&key)?,
        metadata: ItemMetadata {
            title,
            media_type,
            poster_url,
            release_year,
        },
        position: position_from(position)?,
        added_by: SubjectId(parse_uuid(&added_by)?),
        added_at: parse_timestamp(&added_at)?,
    })
}

impl SqliteTransaction {
    /// Shift rows of one ordering scope by parking them on negative positions first.
    ///
    /// Phase one writes `-(position + delta) - 1`, which is negative and distinct for every
    /// moved row; phase two maps those back to `position + delta`.
    async fn shift_rows(
        &mut self,
        table: &str,
        key_column: &str,
        key: String,
        span: PositionSpan,
        shift: Shift,
    ) -> Result<()> {
        if shift == Shift::Down && span.from == Position::HEAD {
            return Err(StorageError::PositionCollision {
                scope: table.to_string(),
                detail: "cannot shift position 0 down".to_string(),
            });
        }

        let park = format!(
            "UPDATE {table} SET position = -(position + ?) - 1 \
             WHERE {key_column} = ? AND position >= ? AND position < ?"
        );
        sqlx::query(&park)
            .bind(shift.delta())
            .bind(&key)
            .bind(i64::from(span.from))
            .bind(span.upper_bound())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| position_err(table, e))?;

        self.unpark(table, key_column, key).await
    }

    async fn unpark(&mut self, table: &str, key_column: &str, key: String) -> Result<()> {
        let restore = format!(
            "UPDATE {table} SET position = -position - 1 WHERE {key_column} = ? AND position < 0"
        );
        sqlx::query(&restore)
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| position_err(table, e))?;
        Ok(())
    }

    /// Assign explicit positions to a batch of rows without intermediate collisions.
    async fn set_rows(
        &mut self,
        table: &str,
        key_column: &str,
        row_column: &str,
        key: String,
        positions: Vec<(String, Position)>,
    ) -> Result<()> {
        let park = format!(
            "UPDATE {table} SET position = -? - 1 WHERE {key_column} = ? AND {row_column} = ?"
        );
        for (row, position) in positions {
            let result = sqlx::query(&park)
                .bind(i64::from(position))
                .bind(&key)
                .bind(&row)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| position_err(table, e))?;
            if result.rows_affected() == 0 {
                return Err(StorageError::NotFound {
                    entity: table.to_string(),
                    id: row,
                });
            }
        }
        self.unpark(table, key_column, key).await
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn register_subject(&mut self, subject: SubjectId) -> Result<()> {
        sqlx::query("INSERT INTO subjects (id) VALUES (?) ON CONFLICT(id) DO NOTHING")
            .bind(subject.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err("register subject", e))?;
        Ok(())
    }

    async fn subject_exists(&mut self, subject: SubjectId) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM subjects WHERE id = ?")
            .bind(subject.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_err("query subject", e))?;
        Ok(row.is_some())
    }

    async fn insert_collection(&mut self, collection: &Collection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO collections
                (id, owner_id, name, description, is_public, thumbnail_url, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(collection.id.to_string())
        .bind(collection.owner.to_string())
        .bind(&collection.name)
        .bind(&collection.description)
        .bind(collection.is_public)
        .bind(&collection.thumbnail_url)
        .bind(collection.created_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("insert collection", e))?;
        Ok(())
    }

    async fn get_collection(&mut self, id: CollectionId) -> Result<Option<Collection>> {
        let row: Option<CollectionRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, name, description, is_public, thumbnail_url, created_at
            FROM collections WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err("query collection", e))?;
        row.map(collection_from_row).transpose()
    }

    async fn delete_collection(&mut self, id: CollectionId) -> Result<bool> {
        sqlx::query("DELETE FROM item_positions WHERE collection_id = ?")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err("delete collection items", e))?;
        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err("delete collection", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_thumbnail(&mut self, id: CollectionId, url: Option<&str>) -> Result<bool> {
        let result = sqlx::query("UPDATE collections SET thumbnail_url = ? WHERE id = ?")
            .bind(url)
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err("update thumbnail", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn relation_kind(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<RelationKind>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT kind FROM relations WHERE subject_id = ? AND collection_id = ?",
        )
        .bind(subject.to_string())
        .bind(collection.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err("query relation", e))?;
        row.map(|(kind,)| parse_kind(&kind)).transpose()
    }

    async fn insert_relation(&mut self, edge: &RelationEdge) -> Result<()> {
        sqlx::query("INSERT INTO relations (subject_id, collection_id, kind) VALUES (?, ?, ?)")
            .bind(edge.subject.to_string())
            .bind(edge.collection.to_string())
            .bind(edge.kind.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StorageError::DuplicateRelation {
                        subject: edge.subject.to_string(),
                        collection: edge.collection.to_string(),
                    }
                }
                _ => db_err("insert relation", e),
            })?;
        Ok(())
    }

    async fn delete_relation(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM relations WHERE subject_id = ? AND collection_id = ?")
            .bind(subject.to_string())
            .bind(collection.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err("delete relation", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn relations_for_collection(
        &mut self,
        collection: CollectionId,
    ) -> Result<Vec<RelationEdge>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT subject_id, kind FROM relations WHERE collection_id = ? ORDER BY subject_id",
        )
        .bind(collection.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err("query relations", e))?;

        rows.into_iter()
            .map(|(subject, kind)| {
                Ok(RelationEdge {
                    subject: SubjectId(parse_uuid(&subject)?),
                    collection,
                    kind: parse_kind(&kind)?,
                })
            })
            .collect()
    }

    async fn library_entries(&mut self, subject: SubjectId) -> Result<Vec<LibraryEntry>> {
        let rows: Vec<(String, Option<String>, i64)> = sqlx::query_as(
            r#"
            SELECT l.collection_id, r.kind, l.position
            FROM library_positions l
            LEFT JOIN relations r
              ON r.subject_id = l.subject_id AND r.collection_id = l.collection_id
            WHERE l.subject_id = ?
            ORDER BY l.position
            "#,
        )
        .bind(subject.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err("query library", e))?;

        rows.into_iter()
            .map(|(collection, kind, position)| {
                let kind = kind.ok_or_else(|| StorageError::PositionCollision {
                    scope: "library".to_string(),
                    detail: format!("entry for {collection} has no relation edge"),
                })?;
                Ok(LibraryEntry {
                    subject,
                    collection: CollectionId(parse_uuid(&collection)?),
                    kind: parse_kind(&kind)?,
                    position: position_from(position)?,
                })
            })
            .collect()
    }

    async fn library_position(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<Position>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT position FROM library_positions WHERE subject_id = ? AND collection_id = ?",
        )
        .bind(subject.to_string())
        .bind(collection.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err("query library position", e))?;
        row.map(|(position,)| position_from(position)).transpose()
    }

    async fn insert_library_entry(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
        position: Position,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO library_positions (subject_id, collection_id, position) VALUES (?, ?, ?)",
        )
        .bind(subject.to_string())
        .bind(collection.to_string())
        .bind(i64::from(position))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| position_err("library_positions", e))?;
        Ok(())
    }

    async fn delete_library_entry(
        &mut self,
        subject: SubjectId,
        collection: CollectionId,
    ) -> Result<Option<Position>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            DELETE FROM library_positions
            WHERE subject_id = ? AND collection_id = ?
            RETURNING position
            "#,
        )
        .bind(subject.to_string())
        .bind(collection.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err("delete library entry", e))?;
        row.map(|(position,)| position_from(position)).transpose()
    }

    async fn shift_library(
        &mut self,
        subject: SubjectId,
        span: PositionSpan,
        shift: Shift,
    ) -> Result<()> {
        self.shift_rows(
            "library_positions",
            "subject_id",
            subject.to_string(),
            span,
            shift,
        )
        .await
    }

    async fn set_library_positions(
        &mut self,
        subject: SubjectId,
        positions: &[(CollectionId, Position)],
    ) -> Result<()> {
        let rows = positions
            .iter()
            .map(|(collection, position)| (collection.to_string(), *position))
            .collect();
        self.set_rows(
            "library_positions",
            "subject_id",
            "collection_id",
            subject.to_string(),
            rows,
        )
        .await
    }

    async fn item_entries(&mut self, collection: CollectionId) -> Result<Vec<ItemEntry>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM item_positions WHERE collection_id = ? ORDER BY position"
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(collection.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_err("query items", e))?;
        rows.into_iter()
            .map(|row| item_from_row(collection, row))
            .collect()
    }

    async fn item_position(
        &mut self,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<Option<Position>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT position FROM item_positions WHERE collection_id = ? AND item_key = ?",
        )
        .bind(collection.to_string())
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err("query item position", e))?;
        row.map(|(position,)| position_from(position)).transpose()
    }

    async fn max_item_position(&mut self, collection: CollectionId) -> Result<Option<Position>> {
        let (max,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(position) FROM item_positions WHERE collection_id = ?")
                .bind(collection.to_string())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|e| db_err("query max item position", e))?;
        max.map(position_from).transpose()
    }

    async fn item_count(&mut self, collection: CollectionId) -> Result<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM item_positions WHERE collection_id = ?")
                .bind(collection.to_string())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|e| db_err("count items", e))?;
        usize::try_from(count)
            .map_err(|e| StorageError::SerializationError(format!("item count: {e}")))
    }

    async fn insert_item(&mut self, item: &ItemEntry) -> Result<()> {
        if self.item_position(item.collection, &item.key).await?.is_some() {
            return Err(StorageError::DuplicateItem {
                collection: item.collection.to_string(),
                key: item.key.to_string(),
            });
        }

        let sql = format!(
            "INSERT INTO item_positions (collection_id, {ITEM_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(item.collection.to_string())
            .bind(item.key.as_str())
            .bind(&item.metadata.title)
            .bind(item.metadata.media_type.as_str())
            .bind(&item.metadata.poster_url)
            .bind(item.metadata.release_year.map(i64::from))
            .bind(i64::from(item.position))
            .bind(item.added_by.to_string())
            .bind(item.added_at.to_rfc3339())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| position_err("item_positions", e))?;
        Ok(())
    }

    async fn delete_item(
        &mut self,
        collection: CollectionId,
        key: &ItemKey,
    ) -> Result<Option<Position>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            DELETE FROM item_positions
            WHERE collection_id = ? AND item_key = ?
            RETURNING position
            "#,
        )
        .bind(collection.to_string())
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err("delete item", e))?;
        row.map(|(position,)| position_from(position)).transpose()
    }

    async fn shift_items(
        &mut self,
        collection: CollectionId,
        span: PositionSpan,
        shift: Shift,
    ) -> Result<()> {
        self.shift_rows(
            "item_positions",
            "collection_id",
            collection.to_string(),
            span,
            shift,
        )
        .await
    }

    async fn set_item_positions(
        &mut self,
        collection: CollectionId,
        positions: &[(ItemKey, Position)],
    ) -> Result<()> {
        let rows = positions
            .iter()
            .map(|(key, position)| (key.as_str().to_string(), *position))
            .collect();
        self.set_rows(
            "item_positions",
            "collection_id",
            "item_key",
            collection.to_string(),
            rows,
        )
        .await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_err("commit transaction", e))
    }
}
