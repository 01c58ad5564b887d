//! Redis-based vector backend.
//!
//! Uses Redis Stack's vector similarity search. Requires Redis Stack 7.2+ or
//! `RediSearch` 2.4+.
//!
//! # Redis Commands Used
//!
//! | Operation | Redis Command | Description |
//! |-----------|---------------|-------------|
//! | Create Index | `FT.CREATE` | HNSW vector field plus session/type tags |
//! | Upsert | `HSET` | Vector blob and filter fields in one hash |
//! | Search | `FT.SEARCH ... KNN` | Pre-filtered K-nearest neighbor search |
//! | Remove | `DEL` | Deletes the hash |
//! | Count | `FT.INFO` | Reads `num_docs` |
//! | Clear | `FT.DROPINDEX DD` | Drops index and documents |
//!
//! # Index Schema
//!
//! - Key pattern: `{index_name}:{entity_id}`
//! - `embedding`: VECTOR, HNSW, FLOAT32, L2 distance
//! - `session_id`, `entity_type`: TAG
//! - `created_at`: NUMERIC (epoch millis)
//!
//! L2 is used so the reported distance can be turned into a similarity with
//! `1 / (1 + distance)`, the same as every other distance backend.

use crate::models::EntityId;
use crate::storage::traits::{VectorBackend, VectorFilter, VectorMetadata};
use crate::{Error, Result};

#[cfg(feature = "redis")]
use crate::storage::sqlite::acquire_lock;
#[cfg(feature = "redis")]
use crate::storage::traits::distance_to_similarity;
#[cfg(feature = "redis")]
use redis::{Client, Commands, Connection, RedisResult};
#[cfg(feature = "redis")]
use std::sync::Mutex;
#[cfg(feature = "redis")]
use std::time::Duration;

/// Redis-based vector backend using `RediSearch` vector similarity search.
///
/// One connection is cached and reused; a call that finds the slot empty
/// opens a fresh one.
pub struct RedisVectorBackend {
    connection_url: String,
    index_name: String,
    dimensions: usize,
    #[cfg(feature = "redis")]
    client: Client,
    #[cfg(feature = "redis")]
    connection: Mutex<Option<Connection>>,
    #[cfg(feature = "redis")]
    index_created: Mutex<bool>,
    #[cfg(feature = "redis")]
    timeout: Duration,
}

impl RedisVectorBackend {
    /// Default index name.
    pub const DEFAULT_INDEX: &'static str = "world_memory_vectors";

    /// Creates a new Redis vector backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Retrieval`] if the URL is not a valid Redis URL.
    #[cfg(feature = "redis")]
    pub fn new(
        connection_url: impl Into<String>,
        index_name: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self> {
        let connection_url = connection_url.into();
        let client = Client::open(connection_url.as_str())
            .map_err(|e| Error::retrieval("redis_connect", e))?;

        Ok(Self {
            connection_url,
            index_name: index_name.into(),
            dimensions,
            client,
            connection: Mutex::new(None),
            index_created: Mutex::new(false),
            timeout: Duration::from_secs(5),
        })
    }

    /// Creates a new Redis vector backend.
    ///
    /// # Errors
    ///
    /// Always returns [`Error::FeatureNotEnabled`] because the `redis`
    /// feature is not compiled in.
    #[cfg(not(feature = "redis"))]
    pub fn new(
        connection_url: impl Into<String>,
        index_name: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self> {
        let _ = (connection_url.into(), index_name.into(), dimensions);
        Err(Error::FeatureNotEnabled("redis".to_string()))
    }

    /// Sets the per-command read/write timeout for new connections.
    #[cfg(feature = "redis")]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the connection URL.
    #[must_use]
    pub fn connection_url(&self) -> &str {
        &self.connection_url
    }

    /// Returns the index name.
    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.index_name
    }
}

/// Escapes characters that are special inside a `RediSearch` TAG value.
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            escaped.push(c);
        } else {
            escaped.push('\\');
            escaped.push(c);
        }
    }
    escaped
}

/// Builds the pre-filter half of a KNN query.
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
fn filter_expression(filter: &VectorFilter) -> String {
    let mut clauses = Vec::new();
    if let Some(session) = &filter.session_id {
        clauses.push(format!("@session_id:{{{}}}", escape_tag(session)));
    }
    if !filter.entity_types.is_empty() {
        let types: Vec<&str> = filter.entity_types.iter().map(|t| t.as_str()).collect();
        clauses.push(format!("@entity_type:{{{}}}", types.join("|")));
    }
    if clauses.is_empty() {
        "*".to_string()
    } else {
        format!("({})", clauses.join(" "))
    }
}

#[cfg(feature = "redis")]
impl RedisVectorBackend {
    fn key_prefix(&self) -> String {
        format!("{}:", self.index_name)
    }

    fn entity_key(&self, id: &EntityId) -> String {
        format!("{}:{}", self.index_name, id.as_str())
    }

    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(Error::InvalidInput(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(())
    }

    fn vector_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Takes the cached connection or opens a new one.
    fn get_connection(&self) -> Result<Connection> {
        if let Some(conn) = acquire_lock(&self.connection).take() {
            return Ok(conn);
        }

        let conn = self
            .client
            .get_connection()
            .map_err(|e| Error::retrieval("redis_get_connection", e))?;
        conn.set_read_timeout(Some(self.timeout))
            .map_err(|e| Error::retrieval("redis_set_read_timeout", e))?;
        conn.set_write_timeout(Some(self.timeout))
            .map_err(|e| Error::retrieval("redis_set_write_timeout", e))?;
        Ok(conn)
    }

    fn return_connection(&self, conn: Connection) {
        *acquire_lock(&self.connection) = Some(conn);
    }

    /// Runs `op` on a pooled connection, returning it afterwards.
    ///
    /// A connection whose command failed at the I/O level is dropped rather
    /// than returned.
    fn with_connection<T>(
        &self,
        operation: &'static str,
        op: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> Result<T> {
        let mut conn = self.get_connection()?;
        match op(&mut conn) {
            Ok(value) => {
                self.return_connection(conn);
                Ok(value)
            },
            Err(e) => {
                if !e.is_io_error() {
                    self.return_connection(conn);
                }
                Err(Error::retrieval(format!("redis_{operation}"), e))
            },
        }
    }

    fn ensure_index(&self) -> Result<()> {
        if *acquire_lock(&self.index_created) {
            return Ok(());
        }

        let exists = self.with_connection("ft_info", |conn| {
            Ok(redis::cmd("FT.INFO")
                .arg(&self.index_name)
                .query::<redis::Value>(conn)
                .is_ok())
        })?;

        if !exists {
            let created: Result<()> = self.with_connection("ft_create", |conn| {
                redis::cmd("FT.CREATE")
                    .arg(&self.index_name)
                    .arg("ON")
                    .arg("HASH")
                    .arg("PREFIX")
                    .arg("1")
                    .arg(self.key_prefix())
                    .arg("SCHEMA")
                    .arg("embedding")
                    .arg("VECTOR")
                    .arg("HNSW")
                    .arg("6")
                    .arg("TYPE")
                    .arg("FLOAT32")
                    .arg("DIM")
                    .arg(self.dimensions)
                    .arg("DISTANCE_METRIC")
                    .arg("L2")
                    .arg("session_id")
                    .arg("TAG")
                    .arg("entity_type")
                    .arg("TAG")
                    .arg("created_at")
                    .arg("NUMERIC")
                    .query(conn)
            });
            match created {
                Ok(()) => {
                    tracing::info!(index = %self.index_name, "created redis vector index");
                },
                Err(e) if e.to_string().contains("Index already exists") => {},
                Err(e) => return Err(e),
            }
        }

        *acquire_lock(&self.index_created) = true;
        Ok(())
    }

    /// Parses an `FT.SEARCH` reply: `[total, key, [field, value, ...], ...]`.
    fn parse_search_results(&self, value: &redis::Value) -> Vec<(EntityId, f32)> {
        let redis::Value::Array(items) = value else {
            return Vec::new();
        };
        let prefix = self.key_prefix();

        items
            .get(1..)
            .unwrap_or_default()
            .chunks(2)
            .filter_map(|pair| {
                let [key, fields] = pair else {
                    return None;
                };
                let key = value_to_string(key)?;
                let id = key.strip_prefix(&prefix).unwrap_or(&key);
                let distance = field_value(fields, "__embedding_score")?
                    .parse::<f32>()
                    .ok()?;
                Some((EntityId::new(id), distance_to_similarity(distance)))
            })
            .collect()
    }
}

#[cfg(feature = "redis")]
fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(i) => Some(i.to_string()),
        redis::Value::Double(d) => Some(d.to_string()),
        _ => None,
    }
}

/// Looks up `name` in a flat `[k, v, k, v, ...]` reply.
#[cfg(feature = "redis")]
fn field_value(fields: &redis::Value, name: &str) -> Option<String> {
    let redis::Value::Array(fields) = fields else {
        return None;
    };
    fields
        .chunks(2)
        .find(|pair| pair.first().and_then(value_to_string).as_deref() == Some(name))
        .and_then(|pair| pair.get(1))
        .and_then(value_to_string)
}

#[cfg(feature = "redis")]
impl VectorBackend for RedisVectorBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[tracing::instrument(skip(self, embedding, metadata), fields(backend = "redis", entity_id = %id))]
    fn upsert(&self, id: &EntityId, embedding: &[f32], metadata: &VectorMetadata) -> Result<()> {
        self.validate_embedding(embedding)?;
        self.ensure_index()?;

        let key = self.entity_key(id);
        let vector_bytes = Self::vector_to_bytes(embedding);
        let created_at = metadata.created_at.timestamp_millis().to_string();

        self.with_connection("upsert", |conn| {
            conn.hset_multiple::<_, _, _, ()>(
                &key,
                &[
                    ("embedding", vector_bytes.as_slice()),
                    ("session_id", metadata.session_id.as_bytes()),
                    ("entity_type", metadata.entity_type.as_str().as_bytes()),
                    ("created_at", created_at.as_bytes()),
                ],
            )
        })
    }

    fn remove(&self, id: &EntityId) -> Result<bool> {
        let key = self.entity_key(id);
        let deleted: i64 = self.with_connection("remove", |conn| conn.del(&key))?;
        Ok(deleted > 0)
    }

    #[tracing::instrument(skip(self, query_embedding, filter), fields(backend = "redis"))]
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
        self.ensure_index()?;

        let vector_bytes = Self::vector_to_bytes(query_embedding);
        let query = format!(
            "{}=>[KNN {limit} @embedding $BLOB]",
            filter_expression(filter)
        );

        let reply: redis::Value = self.with_connection("search", |conn| {
            redis::cmd("FT.SEARCH")
                .arg(&self.index_name)
                .arg(&query)
                .arg("PARAMS")
                .arg("2")
                .arg("BLOB")
                .arg(vector_bytes.as_slice())
                .arg("SORTBY")
                .arg("__embedding_score")
                .arg("RETURN")
                .arg("1")
                .arg("__embedding_score")
                .arg("LIMIT")
                .arg("0")
                .arg(limit)
                .arg("DIALECT")
                .arg("2")
                .query(conn)
        })?;

        let mut results: Vec<(EntityId, f32)> = self
            .parse_search_results(&reply)
            .into_iter()
            .filter(|(_, score)| filter.accepts_score(*score))
            .collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(results)
    }

    fn count(&self) -> Result<usize> {
        let info = self.with_connection("count", |conn| {
            Ok(redis::cmd("FT.INFO")
                .arg(&self.index_name)
                .query::<redis::Value>(conn)
                .ok())
        })?;
        // A missing index holds nothing.
        let Some(info) = info else {
            return Ok(0);
        };
        let num_docs = match &info {
            redis::Value::Array(_) => field_value(&info, "num_docs"),
            redis::Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| value_to_string(k).as_deref() == Some("num_docs"))
                .and_then(|(_, v)| value_to_string(v)),
            _ => None,
        };
        Ok(num_docs.and_then(|s| s.parse().ok()).unwrap_or(0))
    }

    fn clear(&self) -> Result<()> {
        self.with_connection("clear", |conn| {
            // Dropping a missing index is not an error here.
            let _: RedisResult<()> = redis::cmd("FT.DROPINDEX")
                .arg(&self.index_name)
                .arg("DD")
                .query(conn);
            Ok(())
        })?;
        *acquire_lock(&self.index_created) = false;
        Ok(())
    }
}

#[cfg(not(feature = "redis"))]
impl VectorBackend for RedisVectorBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn upsert(&self, _id: &EntityId, _embedding: &[f32], _metadata: &VectorMetadata) -> Result<()> {
        Err(Error::FeatureNotEnabled("redis".to_string()))
    }

    fn remove(&self, _id: &EntityId) -> Result<bool> {
        Err(Error::FeatureNotEnabled("redis".to_string()))
    }

    fn search(
        &self,
        _query_embedding: &[f32],
        _filter: &VectorFilter,
        _limit: usize,
    ) -> Result<Vec<(EntityId, f32)>> {
        Err(Error::FeatureNotEnabled("redis".to_string()))
    }

    fn count(&self) -> Result<usize> {
        Err(Error::FeatureNotEnabled("redis".to_string()))
    }

    fn clear(&self) -> Result<()> {
        Err(Error::FeatureNotEnabled("redis".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;

    #[test]
    fn test_escape_tag() {
        assert_eq!(escape_tag("session_1"), "session_1");
        assert_eq!(escape_tag("a-b c"), "a\\-b\\ c");
        assert_eq!(escape_tag("x{y}"), "x\\{y\\}");
    }

    #[test]
    fn test_filter_expression() {
        assert_eq!(filter_expression(&VectorFilter::new()), "*");
        let filter = VectorFilter::new()
            .with_session("s-1")
            .with_type(EntityType::Character)
            .with_type(EntityType::Location);
        assert_eq!(
            filter_expression(&filter),
            "(@session_id:{s\\-1} @entity_type:{character|location})"
        );
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn test_requires_feature() {
        let result = RedisVectorBackend::new("redis://localhost:6379", "idx", 384);
        assert!(matches!(result, Err(Error::FeatureNotEnabled(_))));
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_key_generation() {
        let backend = RedisVectorBackend::new("redis://localhost", "idx", 4).unwrap();
        assert_eq!(backend.key_prefix(), "idx:");
        assert_eq!(backend.entity_key(&EntityId::new("e-1")), "idx:e-1");
        assert_eq!(backend.connection_url(), "redis://localhost");
        assert_eq!(backend.index_name(), "idx");
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_parse_search_results() {
        use redis::Value;
        let backend = RedisVectorBackend::new("redis://localhost", "idx", 4).unwrap();
        let reply = Value::Array(vec![
            Value::Int(2),
            Value::BulkString(b"idx:e-1".to_vec()),
            Value::Array(vec![
                Value::BulkString(b"__embedding_score".to_vec()),
                Value::BulkString(b"0".to_vec()),
            ]),
            Value::BulkString(b"idx:e-2".to_vec()),
            Value::Array(vec![
                Value::BulkString(b"__embedding_score".to_vec()),
                Value::BulkString(b"1".to_vec()),
            ]),
        ]);
        let results = backend.parse_search_results(&reply);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.as_str(), "e-1");
        assert!((results[0].1 - 1.0).abs() < f32::EPSILON);
        assert!((results[1].1 - 0.5).abs() < f32::EPSILON);
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_validate_embedding() {
        let backend = RedisVectorBackend::new("redis://localhost", "idx", 4).unwrap();
        assert!(backend.validate_embedding(&[0.0; 4]).is_ok());
        assert!(backend.validate_embedding(&[0.0; 3]).is_err());
    }
}
