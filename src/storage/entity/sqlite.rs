//! `SQLite` entity store.
//!
//! Durable storage for entities, relations, facts, plotlines, version
//! history, and summaries in a single database file.

// SQLite returns i64 for counts; they are non-negative and small.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
// Closures are needed to adapt rusqlite's error type.
#![allow(clippy::redundant_closure_for_method_calls)]

use crate::models::{
    CoveragePeriod, Entity, EntityAssociation, EntityId, EntityQuery, EntityType, EntityVersion,
    Fact, GeneratedBy, MemorySummary, Plotline, PlotlineStatus, Relation, RelationType,
    SummaryFormat,
};
use crate::storage::sqlite::{
    acquire_lock, escape_like_wildcards, from_json, open_connection, placeholders,
    record_operation_metrics, to_json, to_millis,
};
use crate::storage::traits::EntityStore;
use crate::{Error, Result, from_millis};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

const BACKEND: &str = "sqlite";

const ENTITY_COLUMNS: &str =
    "id, session_id, entity_type, content, created_at, updated_at, version, metadata";

const FACT_COLUMNS: &str = "id, session_id, fact_type, content, timestamp, source_entity_id, \
     target_entity_id, confidence, metadata";

const PLOTLINE_COLUMNS: &str =
    "id, session_id, title, description, status, priority, start_time, end_time, metadata";

const SUMMARY_COLUMNS: &str = "id, session_id, summary_text, original_entity_ids, coverage_start, \
     coverage_end, importance_scores, format, version, generated_by, created_at";

/// `SQLite`-based entity store.
///
/// # Concurrency Model
///
/// A single `Mutex<Connection>` is the bounded, shared connection pool for
/// the process. WAL mode and `busy_timeout` handle contention with other
/// processes.
///
/// # Schema
///
/// | Table | Purpose |
/// |-------|---------|
/// | `entities` | Entity rows with tombstone flag |
/// | `relations` | Directed edges, keyed by `(source, target, type)` |
/// | `facts` / `fact_entities` | Facts and their entity associations |
/// | `plotlines` / `plotline_entities` | Story arcs and participants |
/// | `entity_versions` | Append-only audit log, unique per `(entity_id, version)` |
/// | `summaries` | Persisted summaries |
pub struct SqliteEntityStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteEntityStore {
    /// Opens (or creates) a store at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_connection(Some(&db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = open_connection(None)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                metadata TEXT NOT NULL DEFAULT '{}',
                is_active INTEGER NOT NULL DEFAULT 1,
                keyword_text TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS relations (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                relation_type TEXT NOT NULL,
                strength REAL NOT NULL DEFAULT 1.0,
                metadata TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (source_id, target_id, relation_type)
            );
            CREATE TABLE IF NOT EXISTS facts (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                fact_type TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                source_entity_id TEXT,
                target_entity_id TEXT,
                confidence REAL NOT NULL DEFAULT 1.0,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            CREATE TABLE IF NOT EXISTS fact_entities (
                fact_id TEXT NOT NULL REFERENCES facts(id) ON DELETE CASCADE,
                entity_id TEXT NOT NULL,
                association_type TEXT NOT NULL,
                relevance REAL NOT NULL DEFAULT 1.0,
                PRIMARY KEY (fact_id, entity_id, association_type)
            );
            CREATE TABLE IF NOT EXISTS plotlines (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            CREATE TABLE IF NOT EXISTS plotline_entities (
                plotline_id TEXT NOT NULL REFERENCES plotlines(id) ON DELETE CASCADE,
                entity_id TEXT NOT NULL,
                association_type TEXT NOT NULL,
                relevance REAL NOT NULL DEFAULT 1.0,
                PRIMARY KEY (plotline_id, entity_id, association_type)
            );
            CREATE TABLE IF NOT EXISTS entity_versions (
                entity_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                content TEXT NOT NULL,
                changed_fields TEXT NOT NULL,
                changed_by TEXT,
                reason TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE (entity_id, version)
            );
            CREATE TABLE IF NOT EXISTS summaries (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                summary_text TEXT NOT NULL,
                original_entity_ids TEXT NOT NULL,
                coverage_start INTEGER NOT NULL,
                coverage_end INTEGER NOT NULL,
                importance_scores TEXT NOT NULL,
                format TEXT NOT NULL,
                version INTEGER NOT NULL,
                generated_by TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| Error::storage("create_schema", e))?;

        Self::create_indexes(&conn);
        Ok(())
    }

    fn create_indexes(conn: &Connection) {
        // Index creation failures only cost query speed.
        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_entities_session_type ON entities(session_id, entity_type)",
            "CREATE INDEX IF NOT EXISTS idx_entities_created ON entities(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target_id)",
            "CREATE INDEX IF NOT EXISTS idx_facts_session ON facts(session_id, timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_fact_entities_entity ON fact_entities(entity_id)",
            "CREATE INDEX IF NOT EXISTS idx_plotlines_session ON plotlines(session_id, status)",
            "CREATE INDEX IF NOT EXISTS idx_plotline_entities_entity ON plotline_entities(entity_id)",
            "CREATE INDEX IF NOT EXISTS idx_summaries_session ON summaries(session_id, created_at)",
        ];
        for sql in indexes {
            if let Err(e) = conn.execute(sql, []) {
                tracing::warn!(error = %e, "Failed to create index");
            }
        }
    }

    fn parse_entity_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
        let entity_type: String = row.get(2)?;
        let content: String = row.get(3)?;
        let metadata: String = row.get(7)?;
        Ok(Entity {
            id: EntityId::new(row.get::<_, String>(0)?),
            session_id: row.get(1)?,
            entity_type: parse_enum(2, &entity_type, EntityType::parse)?,
            content: from_json(3, &content)?,
            created_at: from_millis(row.get(4)?),
            updated_at: from_millis(row.get(5)?),
            version: row.get(6)?,
            metadata: from_json(7, &metadata)?,
        })
    }

    fn parse_relation_row(row: &Row<'_>) -> rusqlite::Result<Relation> {
        let relation_type: String = row.get(2)?;
        let metadata: String = row.get(4)?;
        Ok(Relation {
            source_id: EntityId::new(row.get::<_, String>(0)?),
            target_id: EntityId::new(row.get::<_, String>(1)?),
            relation_type: parse_enum(2, &relation_type, RelationType::parse)?,
            strength: row.get(3)?,
            metadata: from_json(4, &metadata)?,
        })
    }

    fn parse_fact_row(row: &Row<'_>) -> rusqlite::Result<Fact> {
        let content: String = row.get(3)?;
        let metadata: String = row.get(8)?;
        Ok(Fact {
            id: row.get(0)?,
            session_id: row.get(1)?,
            fact_type: row.get(2)?,
            content: from_json(3, &content)?,
            timestamp: from_millis(row.get(4)?),
            source_entity_id: row.get::<_, Option<String>>(5)?.map(EntityId::new),
            target_entity_id: row.get::<_, Option<String>>(6)?.map(EntityId::new),
            confidence: row.get(7)?,
            metadata: from_json(8, &metadata)?,
            entity_associations: Vec::new(),
        })
    }

    fn parse_plotline_row(row: &Row<'_>) -> rusqlite::Result<Plotline> {
        let status: String = row.get(4)?;
        let metadata: String = row.get(8)?;
        Ok(Plotline {
            id: row.get(0)?,
            session_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: parse_enum(4, &status, PlotlineStatus::parse)?,
            priority: row.get(5)?,
            start_time: from_millis(row.get(6)?),
            end_time: row.get::<_, Option<i64>>(7)?.map(from_millis),
            metadata: from_json(8, &metadata)?,
            entity_associations: Vec::new(),
        })
    }

    fn parse_version_row(row: &Row<'_>) -> rusqlite::Result<EntityVersion> {
        let content: String = row.get(2)?;
        let changed_fields: String = row.get(3)?;
        Ok(EntityVersion {
            entity_id: EntityId::new(row.get::<_, String>(0)?),
            version: row.get(1)?,
            content_snapshot: from_json(2, &content)?,
            changed_fields: from_json(3, &changed_fields)?,
            changed_by: row.get(4)?,
            reason: row.get(5)?,
            created_at: from_millis(row.get(6)?),
        })
    }

    fn parse_summary_row(row: &Row<'_>) -> rusqlite::Result<MemorySummary> {
        let ids: String = row.get(3)?;
        let scores: String = row.get(6)?;
        let format: String = row.get(7)?;
        let generated_by: String = row.get(9)?;
        Ok(MemorySummary {
            id: row.get(0)?,
            session_id: row.get(1)?,
            summary_text: row.get(2)?,
            original_entity_ids: from_json(3, &ids)?,
            coverage_period: CoveragePeriod {
                start: from_millis(row.get(4)?),
                end: from_millis(row.get(5)?),
            },
            importance_scores: from_json(6, &scores)?,
            format: parse_enum(7, &format, SummaryFormat::parse)?,
            version: row.get(8)?,
            generated_by: parse_enum(9, &generated_by, GeneratedBy::parse)?,
            created_at: from_millis(row.get(10)?),
        })
    }

    /// Builds the WHERE clause for an entity query.
    fn build_entity_where_clause(query: &EntityQuery) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if !query.include_inactive {
            conditions.push("is_active = 1".to_string());
        }
        if let Some(ref session_id) = query.session_id {
            conditions.push("session_id = ?".to_string());
            params.push(Box::new(session_id.clone()));
        }
        if !query.entity_types.is_empty() {
            conditions.push(format!(
                "entity_type IN ({})",
                placeholders(query.entity_types.len())
            ));
            for t in &query.entity_types {
                params.push(Box::new(t.as_str().to_string()));
            }
        }
        if let Some(after) = query.created_after {
            conditions.push("created_at >= ?".to_string());
            params.push(Box::new(to_millis(&after)));
        }
        if let Some(before) = query.created_before {
            conditions.push("created_at <= ?".to_string());
            params.push(Box::new(to_millis(&before)));
        }
        // keyword_text is already lowercased with the same Unicode rules.
        for keyword in &query.keywords {
            conditions.push("keyword_text LIKE ? ESCAPE '\\'".to_string());
            params.push(Box::new(format!(
                "%{}%",
                escape_like_wildcards(&keyword.to_lowercase())
            )));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (where_clause, params)
    }

    fn load_associations(
        conn: &Connection,
        table: &str,
        owner_column: &str,
        owner_id: &str,
    ) -> Result<Vec<EntityAssociation>> {
        let sql = format!(
            "SELECT entity_id, association_type, relevance FROM {table}
             WHERE {owner_column} = ?1 ORDER BY relevance DESC, entity_id"
        );
        let mut stmt = conn
            .prepare_cached(&sql)
            .map_err(|e| Error::storage("prepare_associations", e))?;
        stmt.query_map([owner_id], |row| {
            Ok(EntityAssociation {
                entity_id: EntityId::new(row.get::<_, String>(0)?),
                association_type: row.get(1)?,
                relevance: row.get(2)?,
            })
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| Error::storage("load_associations", e))
    }

    fn replace_associations(
        conn: &Connection,
        table: &str,
        owner_column: &str,
        owner_id: &str,
        associations: &[EntityAssociation],
    ) -> Result<()> {
        conn.execute(
            &format!("DELETE FROM {table} WHERE {owner_column} = ?1"),
            [owner_id],
        )
        .map_err(|e| Error::storage("clear_associations", e))?;
        let sql = format!(
            "INSERT OR REPLACE INTO {table} ({owner_column}, entity_id, association_type, relevance)
             VALUES (?1, ?2, ?3, ?4)"
        );
        for assoc in associations {
            conn.execute(
                &sql,
                params![
                    owner_id,
                    assoc.entity_id.as_str(),
                    assoc.association_type,
                    assoc.relevance
                ],
            )
            .map_err(|e| Error::storage("insert_association", e))?;
        }
        Ok(())
    }

    fn query_facts(
        conn: &Connection,
        sql: &str,
        params: &[&dyn ToSql],
        operation: &str,
    ) -> Result<Vec<Fact>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::storage(operation, e))?;
        let mut facts = stmt
            .query_map(params, Self::parse_fact_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage(operation, e))?;
        for fact in &mut facts {
            fact.entity_associations =
                Self::load_associations(conn, "fact_entities", "fact_id", &fact.id)?;
        }
        Ok(facts)
    }
}

/// Parses a stored enum discriminant, failing the row on unknown values.
fn parse_enum<T>(column: usize, raw: &str, parse: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Text,
            Box::new(Error::InvalidInput(format!("unknown stored value: {raw}"))),
        )
    })
}

impl EntityStore for SqliteEntityStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self, entity), fields(operation = "store", backend = BACKEND, entity_id = %entity.id))]
    fn store(&self, entity: &Entity) -> Result<EntityId> {
        let start = Instant::now();
        let result = (|| {
            let content = to_json("store_entity", &entity.content)?;
            let metadata = to_json("store_entity", &entity.metadata)?;
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO entities (
                    id, session_id, entity_type, content, created_at, updated_at, version, metadata,
                    is_active, keyword_text
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)
                ON CONFLICT(id) DO UPDATE SET
                    session_id = excluded.session_id,
                    entity_type = excluded.entity_type,
                    content = excluded.content,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    version = excluded.version,
                    metadata = excluded.metadata,
                    is_active = 1,
                    keyword_text = excluded.keyword_text",
                params![
                    entity.id.as_str(),
                    entity.session_id,
                    entity.entity_type.as_str(),
                    content,
                    to_millis(&entity.created_at),
                    to_millis(&entity.updated_at),
                    entity.version,
                    metadata,
                    entity.keyword_text(),
                ],
            )
            .map_err(|e| Error::storage("store_entity", e))?;
            Ok(entity.id.clone())
        })();

        record_operation_metrics(BACKEND, "store", start, result.is_ok());
        result
    }

    #[instrument(skip(self), fields(operation = "retrieve", backend = BACKEND, entity_id = %id))]
    fn retrieve(&self, id: &EntityId) -> Result<Option<Entity>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1 AND is_active = 1"),
                [id.as_str()],
                Self::parse_entity_row,
            )
            .optional()
            .map_err(|e| Error::storage("retrieve_entity", e))
        })();

        record_operation_metrics(BACKEND, "retrieve", start, result.is_ok());
        result
    }

    #[instrument(skip(self, query), fields(operation = "query", backend = BACKEND))]
    fn query(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
        let start = Instant::now();
        let result = (|| {
            let (where_clause, mut params) = Self::build_entity_where_clause(query);
            let limit = query.limit.map_or(-1, |l| l as i64);
            params.push(Box::new(limit));
            params.push(Box::new(query.offset as i64));
            let sql = format!(
                "SELECT {ENTITY_COLUMNS} FROM entities {where_clause}
                 ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?"
            );

            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("query_entities", e))?;
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            stmt.query_map(param_refs.as_slice(), Self::parse_entity_row)
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| Error::storage("query_entities", e))
        })();

        record_operation_metrics(BACKEND, "query", start, result.is_ok());
        result
    }

    #[instrument(skip(self), fields(operation = "delete", backend = BACKEND, entity_id = %id))]
    fn delete(&self, id: &EntityId) -> Result<bool> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| Error::storage("begin_delete", e))?;
            let removed = tx
                .execute("DELETE FROM entities WHERE id = ?1", [id.as_str()])
                .map_err(|e| Error::storage("delete_entity", e))?;
            let statements = [
                "DELETE FROM relations WHERE source_id = ?1 OR target_id = ?1",
                "DELETE FROM fact_entities WHERE entity_id = ?1",
                "DELETE FROM plotline_entities WHERE entity_id = ?1",
                "DELETE FROM entity_versions WHERE entity_id = ?1",
                "UPDATE facts SET source_entity_id = NULL WHERE source_entity_id = ?1",
                "UPDATE facts SET target_entity_id = NULL WHERE target_entity_id = ?1",
            ];
            for sql in statements {
                tx.execute(sql, [id.as_str()])
                    .map_err(|e| Error::storage("delete_entity_cascade", e))?;
            }
            tx.commit()
                .map_err(|e| Error::storage("commit_delete", e))?;
            Ok(removed > 0)
        })();

        record_operation_metrics(BACKEND, "delete", start, result.is_ok());
        result
    }

    #[instrument(skip(self), fields(operation = "set_active", backend = BACKEND, entity_id = %id))]
    fn set_active(&self, id: &EntityId, active: bool) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let changed = conn
            .execute(
                "UPDATE entities SET is_active = ?2 WHERE id = ?1",
                params![id.as_str(), i64::from(active)],
            )
            .map_err(|e| Error::storage("set_active", e))?;
        Ok(changed > 0)
    }

    fn count_by_type(&self, session_id: Option<&str>) -> Result<HashMap<EntityType, usize>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT entity_type, COUNT(*) FROM entities
                 WHERE is_active = 1 AND (?1 IS NULL OR session_id = ?1)
                 GROUP BY entity_type",
            )
            .map_err(|e| Error::storage("count_by_type", e))?;
        let rows = stmt
            .query_map([session_id], |row| {
                let raw: String = row.get(0)?;
                Ok((parse_enum(0, &raw, EntityType::parse)?, row.get::<_, i64>(1)?))
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage("count_by_type", e))?;
        Ok(rows.into_iter().map(|(t, n)| (t, n as usize)).collect())
    }

    #[instrument(skip(self, relation), fields(operation = "add_relation", backend = BACKEND, source = %relation.source_id, target = %relation.target_id))]
    fn add_relation(&self, relation: &Relation) -> Result<()> {
        let metadata = to_json("add_relation", &relation.metadata)?;
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO relations (source_id, target_id, relation_type, strength, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(source_id, target_id, relation_type) DO UPDATE SET
                strength = excluded.strength,
                metadata = excluded.metadata",
            params![
                relation.source_id.as_str(),
                relation.target_id.as_str(),
                relation.relation_type.as_str(),
                relation.strength,
                metadata,
            ],
        )
        .map_err(|e| Error::storage("add_relation", e))?;
        metrics::counter!("relations_stored_total").increment(1);
        Ok(())
    }

    fn remove_relation(
        &self,
        source_id: &EntityId,
        target_id: &EntityId,
        relation_type: RelationType,
    ) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let removed = conn
            .execute(
                "DELETE FROM relations WHERE source_id = ?1 AND target_id = ?2 AND relation_type = ?3",
                params![source_id.as_str(), target_id.as_str(), relation_type.as_str()],
            )
            .map_err(|e| Error::storage("remove_relation", e))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), fields(operation = "get_related", backend = BACKEND, entity_id = %id))]
    fn get_related(
        &self,
        id: &EntityId,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Relation>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare_cached(
                "SELECT source_id, target_id, relation_type, strength, metadata FROM relations
                 WHERE (source_id = ?1 OR target_id = ?1) AND (?2 IS NULL OR relation_type = ?2)
                 ORDER BY strength DESC, source_id, target_id",
            )
            .map_err(|e| Error::storage("get_related", e))?;
        stmt.query_map(
            params![id.as_str(), relation_type.map(|t| t.as_str())],
            Self::parse_relation_row,
        )
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| Error::storage("get_related", e))
    }

    fn list_relations(&self, session_id: Option<&str>) -> Result<Vec<Relation>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT r.source_id, r.target_id, r.relation_type, r.strength, r.metadata
                 FROM relations r
                 WHERE ?1 IS NULL OR EXISTS (
                    SELECT 1 FROM entities e
                    WHERE e.session_id = ?1 AND (e.id = r.source_id OR e.id = r.target_id)
                 )
                 ORDER BY r.source_id, r.target_id, r.relation_type",
            )
            .map_err(|e| Error::storage("list_relations", e))?;
        stmt.query_map([session_id], Self::parse_relation_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage("list_relations", e))
    }

    #[instrument(skip(self, fact), fields(operation = "store_fact", backend = BACKEND, fact_id = %fact.id))]
    fn store_fact(&self, fact: &Fact) -> Result<()> {
        let content = to_json("store_fact", &fact.content)?;
        let metadata = to_json("store_fact", &fact.metadata)?;
        let conn = acquire_lock(&self.conn);
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::storage("begin_store_fact", e))?;
        tx.execute(
            "INSERT INTO facts (
                id, session_id, fact_type, content, timestamp, source_entity_id,
                target_entity_id, confidence, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id,
                fact_type = excluded.fact_type,
                content = excluded.content,
                timestamp = excluded.timestamp,
                source_entity_id = excluded.source_entity_id,
                target_entity_id = excluded.target_entity_id,
                confidence = excluded.confidence,
                metadata = excluded.metadata",
            params![
                fact.id,
                fact.session_id,
                fact.fact_type,
                content,
                to_millis(&fact.timestamp),
                fact.source_entity_id.as_ref().map(EntityId::as_str),
                fact.target_entity_id.as_ref().map(EntityId::as_str),
                fact.confidence,
                metadata,
            ],
        )
        .map_err(|e| Error::storage("store_fact", e))?;
        Self::replace_associations(
            &tx,
            "fact_entities",
            "fact_id",
            &fact.id,
            &fact.entity_associations,
        )?;
        tx.commit()
            .map_err(|e| Error::storage("commit_store_fact", e))
    }

    fn get_facts(&self, session_id: &str, limit: usize) -> Result<Vec<Fact>> {
        let conn = acquire_lock(&self.conn);
        let limit = limit as i64;
        Self::query_facts(
            &conn,
            &format!(
                "SELECT {FACT_COLUMNS} FROM facts WHERE session_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT ?2"
            ),
            &[&session_id, &limit],
            "get_facts",
        )
    }

    fn get_facts_for_entity(&self, id: &EntityId) -> Result<Vec<Fact>> {
        let conn = acquire_lock(&self.conn);
        Self::query_facts(
            &conn,
            &format!(
                "SELECT {FACT_COLUMNS} FROM facts
                 WHERE source_entity_id = ?1 OR target_entity_id = ?1
                    OR id IN (SELECT fact_id FROM fact_entities WHERE entity_id = ?1)
                 ORDER BY timestamp DESC, id DESC"
            ),
            &[&id.as_str()],
            "get_facts_for_entity",
        )
    }

    #[instrument(skip(self, plotline), fields(operation = "create_plotline", backend = BACKEND, plotline_id = %plotline.id))]
    fn create_plotline(&self, plotline: &Plotline) -> Result<()> {
        let metadata = to_json("create_plotline", &plotline.metadata)?;
        let conn = acquire_lock(&self.conn);
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::storage("begin_create_plotline", e))?;
        tx.execute(
            "INSERT INTO plotlines (
                id, session_id, title, description, status, priority, start_time, end_time, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id,
                title = excluded.title,
                description = excluded.description,
                status = excluded.status,
                priority = excluded.priority,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                metadata = excluded.metadata",
            params![
                plotline.id,
                plotline.session_id,
                plotline.title,
                plotline.description,
                plotline.status.as_str(),
                plotline.priority,
                to_millis(&plotline.start_time),
                plotline.end_time.as_ref().map(to_millis),
                metadata,
            ],
        )
        .map_err(|e| Error::storage("create_plotline", e))?;
        Self::replace_associations(
            &tx,
            "plotline_entities",
            "plotline_id",
            &plotline.id,
            &plotline.entity_associations,
        )?;
        tx.commit()
            .map_err(|e| Error::storage("commit_create_plotline", e))
    }

    fn get_plotline(&self, id: &str) -> Result<Option<Plotline>> {
        let conn = acquire_lock(&self.conn);
        let plotline = conn
            .query_row(
                &format!("SELECT {PLOTLINE_COLUMNS} FROM plotlines WHERE id = ?1"),
                [id],
                Self::parse_plotline_row,
            )
            .optional()
            .map_err(|e| Error::storage("get_plotline", e))?;
        let Some(mut plotline) = plotline else {
            return Ok(None);
        };
        plotline.entity_associations =
            Self::load_associations(&conn, "plotline_entities", "plotline_id", &plotline.id)?;
        Ok(Some(plotline))
    }

    fn get_plotlines(
        &self,
        session_id: &str,
        status: Option<PlotlineStatus>,
    ) -> Result<Vec<Plotline>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PLOTLINE_COLUMNS} FROM plotlines
                 WHERE session_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY priority DESC, start_time ASC"
            ))
            .map_err(|e| Error::storage("get_plotlines", e))?;
        let mut plotlines = stmt
            .query_map(
                params![session_id, status.map(|s| s.as_str())],
                Self::parse_plotline_row,
            )
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage("get_plotlines", e))?;
        for p in &mut plotlines {
            p.entity_associations =
                Self::load_associations(&conn, "plotline_entities", "plotline_id", &p.id)?;
        }
        Ok(plotlines)
    }

    #[instrument(skip(self, version), fields(operation = "save_version", backend = BACKEND, entity_id = %version.entity_id, version = version.version))]
    fn save_version(&self, version: &EntityVersion) -> Result<bool> {
        let content = to_json("save_version", &version.content_snapshot)?;
        let changed = to_json("save_version", &version.changed_fields)?;
        let conn = acquire_lock(&self.conn);
        let inserted = conn
            .execute(
                "INSERT INTO entity_versions (
                    entity_id, version, content, changed_fields, changed_by, reason, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(entity_id, version) DO NOTHING",
                params![
                    version.entity_id.as_str(),
                    version.version,
                    content,
                    changed,
                    version.changed_by,
                    version.reason,
                    to_millis(&version.created_at),
                ],
            )
            .map_err(|e| Error::storage("save_version", e))?;
        Ok(inserted > 0)
    }

    fn get_versions(&self, id: &EntityId, limit: usize) -> Result<Vec<EntityVersion>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare_cached(
                "SELECT entity_id, version, content, changed_fields, changed_by, reason, created_at
                 FROM entity_versions WHERE entity_id = ?1
                 ORDER BY version DESC LIMIT ?2",
            )
            .map_err(|e| Error::storage("get_versions", e))?;
        stmt.query_map(params![id.as_str(), limit as i64], Self::parse_version_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage("get_versions", e))
    }

    #[instrument(skip(self, summary), fields(operation = "store_summary", backend = BACKEND, summary_id = %summary.id))]
    fn store_summary(&self, summary: &MemorySummary) -> Result<()> {
        let ids = to_json("store_summary", &summary.original_entity_ids)?;
        let scores = to_json("store_summary", &summary.importance_scores)?;
        let conn = acquire_lock(&self.conn);
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO summaries ({SUMMARY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                summary.id,
                summary.session_id,
                summary.summary_text,
                ids,
                to_millis(&summary.coverage_period.start),
                to_millis(&summary.coverage_period.end),
                scores,
                summary.format.as_str(),
                summary.version,
                summary.generated_by.as_str(),
                to_millis(&summary.created_at),
            ],
        )
        .map_err(|e| Error::storage("store_summary", e))?;
        Ok(())
    }

    fn get_summaries(&self, session_id: &str, limit: usize) -> Result<Vec<MemorySummary>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SUMMARY_COLUMNS} FROM summaries WHERE session_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))
            .map_err(|e| Error::storage("get_summaries", e))?;
        stmt.query_map(params![session_id, limit as i64], Self::parse_summary_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage("get_summaries", e))
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::models::{PlotlineUpdate, SummaryFormat};
    use serde_json::json;
    use test_case::test_case;

    fn character(session: &str, name: &str) -> Entity {
        Entity::new(session, EntityType::Character).with_field("name", json!(name))
    }

    #[test]
    fn test_store_and_retrieve() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let e = character("s1", "Mira").with_metadata("importance", json!(0.9));
        let id = store.store(&e).unwrap();
        let loaded = store.retrieve(&id).unwrap().unwrap();
        assert_eq!(loaded, e);
    }

    #[test]
    fn test_retrieve_missing_is_none() {
        let store = SqliteEntityStore::in_memory().unwrap();
        assert!(store.retrieve(&EntityId::new("nope")).unwrap().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.db");
        let e = character("s1", "Mira");
        {
            let store = SqliteEntityStore::new(&path).unwrap();
            store.store(&e).unwrap();
        }
        let store = SqliteEntityStore::new(&path).unwrap();
        assert_eq!(store.retrieve(&e.id).unwrap(), Some(e));
        assert_eq!(store.db_path(), Some(path.as_path()));
    }

    #[test]
    fn test_query_filters() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let base = crate::now();
        for (i, name) in ["Harbor", "Forest", "Harbor Gate"].iter().enumerate() {
            let e = Entity::new("s1", EntityType::Location)
                .with_field("name", json!(name))
                .with_created_at(base + chrono::Duration::minutes(i as i64));
            store.store(&e).unwrap();
        }
        store.store(&character("s1", "Mira")).unwrap();
        store.store(&character("s2", "Oren")).unwrap();

        let harbor = store
            .query(&EntityQuery::new().in_session("s1").with_keyword("HARBOR"))
            .unwrap();
        assert_eq!(harbor.len(), 2);
        assert_eq!(harbor[0].content["name"], json!("Harbor"));

        let locations = store
            .query_by_type("s1", EntityType::Location, 10)
            .unwrap();
        assert_eq!(locations.len(), 3);

        let page = store
            .query(
                &EntityQuery::new()
                    .of_type(EntityType::Location)
                    .with_limit(1)
                    .with_offset(1),
            )
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content["name"], json!("Forest"));

        let none = store
            .query(&EntityQuery::new().in_session("missing"))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test_case("ärnhold", 1 ; "unicode lowercase")]
    #[test_case("ÄRNHOLD KEEP", 1 ; "unicode uppercase")]
    #[test_case("garrison", 1 ; "nested value")]
    #[test_case("name", 0 ; "field names are not searched")]
    #[test_case("warden", 0 ; "nested key")]
    fn test_keyword_matching_agrees_across_stores(keyword: &str, expected: usize) {
        let sqlite = SqliteEntityStore::in_memory().unwrap();
        let memory = crate::storage::InMemoryEntityStore::new();
        let keep = Entity::new("s1", EntityType::Location)
            .with_field("name", json!("Ärnhold Keep"))
            .with_field("staff", json!({"warden": "Garrison of Ten"}));
        sqlite.store(&keep).unwrap();
        memory.store(&keep).unwrap();

        let query = EntityQuery::new().with_keyword(keyword);
        assert_eq!(sqlite.query(&query).unwrap().len(), expected, "sqlite");
        assert_eq!(memory.query(&query).unwrap().len(), expected, "memory");
    }

    #[test]
    fn test_keyword_wildcards_are_literal() {
        let store = SqliteEntityStore::in_memory().unwrap();
        store
            .store(&Entity::new("s1", EntityType::Fact).with_field("text", json!("100% sure")))
            .unwrap();
        store
            .store(&Entity::new("s1", EntityType::Fact).with_field("text", json!("1000 sure")))
            .unwrap();
        let hits = store
            .query(&EntityQuery::new().with_keyword("100%"))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_tombstone_hides_entity() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let e = character("s1", "Mira");
        store.store(&e).unwrap();
        assert!(store.set_active(&e.id, false).unwrap());
        assert!(store.retrieve(&e.id).unwrap().is_none());
        assert!(store.query(&EntityQuery::new()).unwrap().is_empty());
        assert_eq!(
            store
                .query(&EntityQuery::new().including_inactive())
                .unwrap()
                .len(),
            1
        );
        assert!(store.set_active(&e.id, true).unwrap());
        assert!(store.retrieve(&e.id).unwrap().is_some());
        assert!(!store.set_active(&EntityId::new("ghost"), false).unwrap());
    }

    #[test]
    fn test_delete_cascades_relations_and_history() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let a = character("s1", "A");
        let b = character("s1", "B");
        store.store(&a).unwrap();
        store.store(&b).unwrap();
        store
            .add_relation(&Relation::new(a.id.clone(), b.id.clone(), RelationType::Knows))
            .unwrap();
        store.save_version(&EntityVersion::initial(&a)).unwrap();

        assert!(store.delete(&a.id).unwrap());
        assert!(!store.delete(&a.id).unwrap());
        assert!(store.retrieve(&a.id).unwrap().is_none());
        assert!(store.get_related(&b.id, None).unwrap().is_empty());
        assert!(store.get_versions(&a.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_relation_upsert_and_directions() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let a = EntityId::new("a");
        let b = EntityId::new("b");
        let rel = Relation::new(a.clone(), b.clone(), RelationType::Owns).with_strength(0.4);
        store.add_relation(&rel).unwrap();
        store.add_relation(&rel.clone().with_strength(0.9)).unwrap();
        store
            .add_relation(&Relation::new(b.clone(), a.clone(), RelationType::Knows))
            .unwrap();

        let from_a = store.get_related(&a, None).unwrap();
        assert_eq!(from_a.len(), 2);
        let owns = store.get_related(&b, Some(RelationType::Owns)).unwrap();
        assert_eq!(owns.len(), 1);
        assert_eq!(owns[0].strength, 0.9);

        assert!(store.remove_relation(&a, &b, RelationType::Owns).unwrap());
        assert!(!store.remove_relation(&a, &b, RelationType::Owns).unwrap());
        assert_eq!(store.list_relations(None).unwrap().len(), 1);
    }

    #[test]
    fn test_list_relations_by_session() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let a = character("s1", "A");
        let b = character("s2", "B");
        store.store(&a).unwrap();
        store.store(&b).unwrap();
        store
            .add_relation(&Relation::new(a.id.clone(), EntityId::new("ghost"), RelationType::Knows))
            .unwrap();
        store
            .add_relation(&Relation::new(b.id.clone(), EntityId::new("ghost"), RelationType::Knows))
            .unwrap();
        let s1 = store.list_relations(Some("s1")).unwrap();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].source_id, a.id);
    }

    #[test]
    fn test_versions_are_append_only() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let mut e = character("s1", "Mira");
        assert!(store.save_version(&EntityVersion::initial(&e)).unwrap());

        let mut clobber = EntityVersion::initial(&e);
        clobber.reason = Some("overwrite attempt".to_string());
        assert!(!store.save_version(&clobber).unwrap());

        e.version = 2;
        e.content.insert("status".to_string(), json!("dead"));
        store
            .save_version(&EntityVersion::capture(&e, vec!["status".to_string()]))
            .unwrap();

        let versions = store.get_versions(&e.id, 10).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, 2);
        assert_eq!(versions[1].reason.as_deref(), Some("created"));
        assert_eq!(store.get_versions(&e.id, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_facts_with_associations() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let fact = Fact::new("s1", "event")
            .with_field("what", json!("the bridge fell"))
            .between("a".into(), "b".into())
            .with_association(EntityAssociation::new("c".into(), "witness", 0.5));
        store.store_fact(&fact).unwrap();
        store.store_fact(&fact).unwrap();

        let facts = store.get_facts("s1", 10).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0], fact);

        assert_eq!(store.get_facts_for_entity(&"b".into()).unwrap().len(), 1);
        assert_eq!(store.get_facts_for_entity(&"c".into()).unwrap().len(), 1);
        assert!(store.get_facts_for_entity(&"z".into()).unwrap().is_empty());
    }

    #[test]
    fn test_plotline_lifecycle() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let p = Plotline::new("s1", "The Heist")
            .with_priority(2)
            .with_association(EntityAssociation::new("mira".into(), "protagonist", 1.0));
        store.create_plotline(&p).unwrap();
        store
            .create_plotline(&Plotline::new("s1", "Side quest"))
            .unwrap();

        let all = store.get_plotlines("s1", None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "The Heist");
        assert_eq!(all[0].entity_associations.len(), 1);

        let updated = store
            .update_plotline(
                &p.id,
                PlotlineUpdate {
                    status: Some(PlotlineStatus::Resolved),
                    ..PlotlineUpdate::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!(updated.end_time.is_some());
        assert_eq!(
            store
                .get_plotlines("s1", Some(PlotlineStatus::Resolved))
                .unwrap()
                .len(),
            1
        );
        assert!(
            store
                .update_plotline("missing", PlotlineUpdate::default())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_summary_persistence() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let ts = crate::now();
        let summary = MemorySummary {
            id: "sum-1".to_string(),
            session_id: "s1".to_string(),
            summary_text: "Things happened.".to_string(),
            original_entity_ids: vec!["a".into(), "b".into()],
            coverage_period: CoveragePeriod { start: ts, end: ts },
            importance_scores: HashMap::from([(EntityId::new("a"), 0.5)]),
            format: SummaryFormat::BulletPoints,
            version: 1,
            generated_by: GeneratedBy::Template,
            created_at: ts,
        };
        store.store_summary(&summary).unwrap();
        let loaded = store.get_summaries("s1", 5).unwrap();
        assert_eq!(loaded, vec![summary]);
    }

    #[test]
    fn test_count_by_type() {
        let store = SqliteEntityStore::in_memory().unwrap();
        store.store(&character("s1", "A")).unwrap();
        store.store(&character("s1", "B")).unwrap();
        store
            .store(&Entity::new("s2", EntityType::Event))
            .unwrap();
        let all = store.count_by_type(None).unwrap();
        assert_eq!(all.get(&EntityType::Character), Some(&2));
        assert_eq!(all.get(&EntityType::Event), Some(&1));
        let s2 = store.count_by_type(Some("s2")).unwrap();
        assert_eq!(s2.len(), 1);
    }
}
