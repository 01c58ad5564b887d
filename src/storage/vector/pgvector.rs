//! pgvector-based vector backend.
//!
//! Stores one row per entity in PostgreSQL with the pgvector extension and
//! ranks by L2 distance (`<->`), converted to similarity as `1 / (1 + d)`.
//! The extension itself must already be installed
//! (`CREATE EXTENSION IF NOT EXISTS vector;`).

/// Returns true if `name` is safe to splice into SQL as a table name.
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}

#[cfg(feature = "postgres")]
mod implementation {
    use super::is_valid_table_name;
    use crate::models::EntityId;
    use crate::storage::traits::{
        VectorBackend, VectorFilter, VectorMetadata, distance_to_similarity,
    };
    use crate::{Error, Result};
    use deadpool_postgres::{Config, Pool, PoolConfig, Runtime};
    use tokio::runtime::{Handle, RuntimeFlavor};
    use tokio_postgres::NoTls;
    use tokio_postgres::types::ToSql;

    /// pgvector-based vector backend.
    pub struct PgvectorBackend {
        pool: Pool,
        table_name: String,
        dimensions: usize,
    }

    fn pool_error(e: impl std::fmt::Display) -> Error {
        Error::retrieval("pgvector_get_client", e)
    }

    impl PgvectorBackend {
        /// Connects, then creates the table and HNSW index if missing.
        ///
        /// `pool_size` bounds the number of concurrent connections.
        ///
        /// # Errors
        ///
        /// Returns [`Error::InvalidInput`] for a bad URL or table name and
        /// [`Error::Retrieval`] if the database cannot be reached or the
        /// schema cannot be created.
        pub fn new(
            connection_url: &str,
            table_name: impl Into<String>,
            dimensions: usize,
            pool_size: usize,
        ) -> Result<Self> {
            let table_name = table_name.into();
            if !is_valid_table_name(&table_name) {
                return Err(Error::InvalidInput(format!(
                    "invalid pgvector table name: {table_name}"
                )));
            }
            let parsed = connection_url
                .parse::<tokio_postgres::Config>()
                .map_err(|e| Error::InvalidInput(format!("pgvector url: {e}")))?;

            let mut cfg = Config::new();
            cfg.host = parsed.get_hosts().first().map(host_to_string);
            cfg.port = parsed.get_ports().first().copied();
            cfg.user = parsed.get_user().map(String::from);
            cfg.password = parsed
                .get_password()
                .map(|p| String::from_utf8_lossy(p).into_owned());
            cfg.dbname = parsed.get_dbname().map(String::from);
            cfg.pool = Some(PoolConfig::new(pool_size.max(1)));

            let pool = cfg
                .create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| Error::retrieval("pgvector_create_pool", e))?;

            let backend = Self {
                pool,
                table_name,
                dimensions,
            };
            backend.block_on(backend.create_schema())?;
            Ok(backend)
        }

        /// Runs a future to completion from synchronous code.
        fn block_on<T>(&self, f: impl std::future::Future<Output = Result<T>>) -> Result<T> {
            match Handle::try_current() {
                Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(|| handle.block_on(f))
                },
                Ok(_) => Err(Error::retrieval(
                    "pgvector_block_on",
                    "called from a current-thread runtime; use spawn_blocking",
                )),
                Err(_) => tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| Error::retrieval("pgvector_create_runtime", e))?
                    .block_on(f),
            }
        }

        async fn create_schema(&self) -> Result<()> {
            let client = self.pool.get().await.map_err(pool_error)?;
            let ddl = format!(
                r"CREATE TABLE IF NOT EXISTS {t} (
                    id TEXT PRIMARY KEY,
                    embedding vector({dims}) NOT NULL,
                    session_id TEXT NOT NULL,
                    entity_type TEXT NOT NULL,
                    created_at BIGINT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS {t}_embedding_idx
                    ON {t} USING hnsw (embedding vector_l2_ops);
                CREATE INDEX IF NOT EXISTS {t}_session_idx ON {t} (session_id, entity_type);",
                t = self.table_name,
                dims = self.dimensions,
            );
            client
                .batch_execute(&ddl)
                .await
                .map_err(|e| Error::retrieval("pgvector_create_schema", e))
        }

        fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
            if embedding.len() == self.dimensions {
                Ok(())
            } else {
                Err(Error::InvalidInput(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimensions,
                    embedding.len()
                )))
            }
        }

        async fn upsert_async(
            &self,
            id: &EntityId,
            embedding: &[f32],
            metadata: &VectorMetadata,
        ) -> Result<()> {
            let client = self.pool.get().await.map_err(pool_error)?;
            let sql = format!(
                r"INSERT INTO {} (id, embedding, session_id, entity_type, created_at)
                VALUES ($1, $2::text::vector, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE SET
                    embedding = EXCLUDED.embedding,
                    session_id = EXCLUDED.session_id,
                    entity_type = EXCLUDED.entity_type,
                    created_at = EXCLUDED.created_at",
                self.table_name
            );
            client
                .execute(
                    &sql,
                    &[
                        &id.as_str(),
                        &format_embedding(embedding),
                        &metadata.session_id,
                        &metadata.entity_type.as_str(),
                        &metadata.created_at.timestamp_millis(),
                    ],
                )
                .await
                .map_err(|e| Error::retrieval("pgvector_upsert", e))?;
            Ok(())
        }

        async fn remove_async(&self, id: &EntityId) -> Result<bool> {
            let client = self.pool.get().await.map_err(pool_error)?;
            let sql = format!("DELETE FROM {} WHERE id = $1", self.table_name);
            let rows = client
                .execute(&sql, &[&id.as_str()])
                .await
                .map_err(|e| Error::retrieval("pgvector_remove", e))?;
            Ok(rows > 0)
        }

        async fn search_async(
            &self,
            query_embedding: &[f32],
            filter: &VectorFilter,
            limit: usize,
        ) -> Result<Vec<(EntityId, f32)>> {
            let client = self.pool.get().await.map_err(pool_error)?;

            let embedding = format_embedding(query_embedding);
            let types: Vec<String> = filter
                .entity_types
                .iter()
                .map(|t| t.as_str().to_string())
                .collect();
            let mut params: Vec<&(dyn ToSql + Sync)> = vec![&embedding];
            let mut clauses = Vec::new();
            if let Some(session) = &filter.session_id {
                params.push(session);
                clauses.push(format!("session_id = ${}", params.len()));
            }
            if !types.is_empty() {
                params.push(&types);
                clauses.push(format!("entity_type = ANY(${})", params.len()));
            }
            let where_clause = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", clauses.join(" AND "))
            };

            let sql = format!(
                r"SELECT id, (embedding <-> $1::text::vector)::float8 AS distance
                FROM {} {where_clause}
                ORDER BY embedding <-> $1::text::vector
                LIMIT {limit}",
                self.table_name
            );
            let rows = client
                .query(&sql, &params)
                .await
                .map_err(|e| Error::retrieval("pgvector_search", e))?;

            Ok(rows
                .iter()
                .map(|row| {
                    let id: String = row.get(0);
                    let distance: f64 = row.get(1);
                    #[allow(clippy::cast_possible_truncation)]
                    let similarity = distance_to_similarity(distance as f32);
                    (EntityId::new(id), similarity)
                })
                .filter(|(_, score)| filter.accepts_score(*score))
                .collect())
        }

        async fn count_async(&self) -> Result<usize> {
            let client = self.pool.get().await.map_err(pool_error)?;
            let sql = format!("SELECT COUNT(*) FROM {}", self.table_name);
            let row = client
                .query_one(&sql, &[])
                .await
                .map_err(|e| Error::retrieval("pgvector_count", e))?;
            let count: i64 = row.get(0);
            Ok(usize::try_from(count).unwrap_or(0))
        }

        async fn clear_async(&self) -> Result<()> {
            let client = self.pool.get().await.map_err(pool_error)?;
            client
                .batch_execute(&format!("TRUNCATE TABLE {}", self.table_name))
                .await
                .map_err(|e| Error::retrieval("pgvector_clear", e))
        }
    }

    #[cfg(unix)]
    fn host_to_string(h: &tokio_postgres::config::Host) -> String {
        match h {
            tokio_postgres::config::Host::Tcp(s) => s.clone(),
            tokio_postgres::config::Host::Unix(p) => p.to_string_lossy().into_owned(),
        }
    }

    #[cfg(not(unix))]
    fn host_to_string(h: &tokio_postgres::config::Host) -> String {
        let tokio_postgres::config::Host::Tcp(s) = h;
        s.clone()
    }

    /// Formats an embedding as pgvector text input: `[1,2,3]`.
    pub(super) fn format_embedding(embedding: &[f32]) -> String {
        let values: Vec<String> = embedding.iter().map(ToString::to_string).collect();
        format!("[{}]", values.join(","))
    }

    impl VectorBackend for PgvectorBackend {
        fn name(&self) -> &'static str {
            "pgvector"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        #[tracing::instrument(skip(self, embedding, metadata), fields(backend = "pgvector", entity_id = %id))]
        fn upsert(
            &self,
            id: &EntityId,
            embedding: &[f32],
            metadata: &VectorMetadata,
        ) -> Result<()> {
            self.validate_embedding(embedding)?;
            self.block_on(self.upsert_async(id, embedding, metadata))
        }

        fn remove(&self, id: &EntityId) -> Result<bool> {
            self.block_on(self.remove_async(id))
        }

        #[tracing::instrument(skip(self, query_embedding, filter), fields(backend = "pgvector"))]
        fn search(
            &self,
            query_embedding: &[f32],
            filter: &VectorFilter,
            limit: usize,
        ) -> Result<Vec<(EntityId, f32)>> {
            self.validate_embedding(query_embedding)?;
            if limit == 0 {
                return Ok(Vec::new());
            }
            self.block_on(self.search_async(query_embedding, filter, limit))
        }

        fn count(&self) -> Result<usize> {
            self.block_on(self.count_async())
        }

        fn clear(&self) -> Result<()> {
            self.block_on(self.clear_async())
        }
    }
}

#[cfg(feature = "postgres")]
pub use implementation::PgvectorBackend;

#[cfg(not(feature = "postgres"))]
mod stub {
    use crate::models::EntityId;
    use crate::storage::traits::{VectorBackend, VectorFilter, VectorMetadata};
    use crate::{Error, Result};

    /// pgvector-based vector backend (not compiled in).
    pub struct PgvectorBackend {
        dimensions: usize,
    }

    impl PgvectorBackend {
        /// Creates a new pgvector backend.
        ///
        /// # Errors
        ///
        /// Always returns [`Error::FeatureNotEnabled`] because the `postgres`
        /// feature is not compiled in.
        pub fn new(
            _connection_url: &str,
            _table_name: impl Into<String>,
            _dimensions: usize,
            _pool_size: usize,
        ) -> Result<Self> {
            Err(Error::FeatureNotEnabled("postgres".to_string()))
        }
    }

    impl VectorBackend for PgvectorBackend {
        fn name(&self) -> &'static str {
            "pgvector"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn upsert(&self, _: &EntityId, _: &[f32], _: &VectorMetadata) -> Result<()> {
            Err(Error::FeatureNotEnabled("postgres".to_string()))
        }

        fn remove(&self, _: &EntityId) -> Result<bool> {
            Err(Error::FeatureNotEnabled("postgres".to_string()))
        }

        fn search(&self, _: &[f32], _: &VectorFilter, _: usize) -> Result<Vec<(EntityId, f32)>> {
            Err(Error::FeatureNotEnabled("postgres".to_string()))
        }

        fn count(&self) -> Result<usize> {
            Err(Error::FeatureNotEnabled("postgres".to_string()))
        }

        fn clear(&self) -> Result<()> {
            Err(Error::FeatureNotEnabled("postgres".to_string()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
pub use stub::PgvectorBackend;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("entity_vectors"));
        assert!(is_valid_table_name("_v2"));
        assert!(!is_valid_table_name("2vectors"));
        assert!(!is_valid_table_name("vectors; DROP TABLE x"));
        assert!(!is_valid_table_name(""));
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_format_embedding() {
        assert_eq!(implementation::format_embedding(&[1.0, 0.5, -2.0]), "[1,0.5,-2]");
    }

    #[cfg(not(feature = "postgres"))]
    #[test]
    fn test_requires_feature() {
        let result = PgvectorBackend::new("postgresql://localhost/w", "v", 4, 1);
        assert!(matches!(result, Err(crate::Error::FeatureNotEnabled(_))));
    }
}
