//! Circuit breaking for external vector services.
//!
//! Redis and pgvector live across a network hop. When one of them goes away,
//! every write would otherwise pay a full connect timeout before failing.
//! [`ResilientVectorBackend`] fails fast with [`Error::Retrieval`] once a
//! backend has failed `failure_threshold` times in a row, then lets a single
//! probe through after `reset_timeout`.
//!
//! ```text
//!  Closed --(failures >= threshold)--> Open --(timeout)--> HalfOpen
//!    ^                                                        |
//!    +---------------------(probe succeeds)-------------------+
//! ```
//!
//! Idempotent reads (`search`, `count`) are additionally retried with a short
//! linear backoff before they count as a failure.

use super::traits::{VectorBackend, VectorFilter, VectorMetadata};
use crate::models::EntityId;
use crate::storage::sqlite::acquire_lock;
use crate::{Error, Result};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Breaker and retry tuning for an external backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed.
    pub reset_timeout_ms: u64,
    /// Extra attempts for idempotent reads.
    pub read_retries: u32,
    /// Backoff step between read retries.
    pub retry_backoff_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            read_retries: 2,
            retry_backoff_ms: 50,
        }
    }
}

impl ResilienceConfig {
    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the open-state timeout in milliseconds.
    #[must_use]
    pub const fn with_reset_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.reset_timeout_ms = timeout_ms;
        self
    }

    /// Sets the number of read retries.
    #[must_use]
    pub const fn with_read_retries(mut self, retries: u32) -> Self {
        self.read_retries = retries;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Circuit {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { probing: bool },
}

impl Circuit {
    const fn gauge(self) -> f64 {
        match self {
            Self::Closed { .. } => 0.0,
            Self::Open { .. } => 1.0,
            Self::HalfOpen { .. } => 2.0,
        }
    }
}

/// Vector backend decorator that stops calling a failing backend.
pub struct ResilientVectorBackend {
    inner: Box<dyn VectorBackend>,
    circuit: Mutex<Circuit>,
    config: ResilienceConfig,
}

impl ResilientVectorBackend {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Box<dyn VectorBackend>, config: ResilienceConfig) -> Self {
        Self {
            inner,
            circuit: Mutex::new(Circuit::Closed { failures: 0 }),
            config,
        }
    }

    /// Returns true while calls are being short-circuited.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(*acquire_lock(&self.circuit), Circuit::Open { .. })
    }

    fn admit(&self) -> bool {
        let mut circuit = acquire_lock(&self.circuit);
        let admitted = match *circuit {
            Circuit::Closed { .. } => true,
            Circuit::Open { since } => {
                if since.elapsed() >= Duration::from_millis(self.config.reset_timeout_ms) {
                    tracing::info!(backend = self.inner.name(), "vector circuit half-open");
                    *circuit = Circuit::HalfOpen { probing: true };
                    true
                } else {
                    false
                }
            },
            Circuit::HalfOpen { probing } => {
                if probing {
                    false
                } else {
                    *circuit = Circuit::HalfOpen { probing: true };
                    true
                }
            },
        };
        metrics::gauge!("vector_circuit_state", "backend" => self.inner.name())
            .set(circuit.gauge());
        admitted
    }

    fn settle(&self, ok: bool) {
        let mut circuit = acquire_lock(&self.circuit);
        let next = match (*circuit, ok) {
            (Circuit::Closed { .. } | Circuit::HalfOpen { .. }, true) => {
                Circuit::Closed { failures: 0 }
            },
            (Circuit::Closed { failures }, false)
                if failures + 1 < self.config.failure_threshold.max(1) =>
            {
                Circuit::Closed {
                    failures: failures + 1,
                }
            },
            (Circuit::Closed { .. } | Circuit::HalfOpen { .. }, false) => {
                tracing::warn!(backend = self.inner.name(), "vector circuit opened");
                metrics::counter!("vector_circuit_trips_total", "backend" => self.inner.name())
                    .increment(1);
                Circuit::Open {
                    since: Instant::now(),
                }
            },
            (open @ Circuit::Open { .. }, _) => open,
        };
        *circuit = next;
        metrics::gauge!("vector_circuit_state", "backend" => self.inner.name()).set(next.gauge());
    }

    fn guarded<T>(&self, operation: &'static str, call: impl Fn() -> Result<T>) -> Result<T> {
        self.run(operation, 0, call)
    }

    fn guarded_read<T>(&self, operation: &'static str, call: impl Fn() -> Result<T>) -> Result<T> {
        self.run(operation, self.config.read_retries, call)
    }

    fn run<T>(
        &self,
        operation: &'static str,
        retries: u32,
        call: impl Fn() -> Result<T>,
    ) -> Result<T> {
        if !self.admit() {
            return Err(Error::retrieval(
                format!("vector_{operation}"),
                format!("circuit open for backend '{}'", self.inner.name()),
            ));
        }

        let mut attempt = 0;
        let result = loop {
            match call() {
                // Only backend outages are worth retrying.
                Err(err) if err.is_retrieval() && attempt < retries => {
                    attempt += 1;
                    tracing::debug!(
                        backend = self.inner.name(),
                        operation,
                        attempt,
                        error = %err,
                        "retrying vector call"
                    );
                    std::thread::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * u64::from(attempt),
                    ));
                },
                other => break other,
            }
        };

        // Caller mistakes say nothing about backend health.
        let healthy = !matches!(&result, Err(err) if err.is_retrieval());
        self.settle(healthy);
        result
    }
}

impl VectorBackend for ResilientVectorBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn upsert(&self, id: &EntityId, embedding: &[f32], metadata: &VectorMetadata) -> Result<()> {
        self.guarded("upsert", || self.inner.upsert(id, embedding, metadata))
    }

    fn remove(&self, id: &EntityId) -> Result<bool> {
        self.guarded("remove", || self.inner.remove(id))
    }

    fn search(
        &self,
        query_embedding: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<(EntityId, f32)>> {
        self.guarded_read("search", || {
            self.inner.search(query_embedding, filter, limit)
        })
    }

    fn count(&self) -> Result<usize> {
        self.guarded_read("count", || self.inner.count())
    }

    fn clear(&self) -> Result<()> {
        self.guarded("clear", || self.inner.clear())
    }
}
