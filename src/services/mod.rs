//! Business logic services.
//!
//! Services orchestrate storage backends and provide high-level operations.
//! [`MemoryFacade`] is the entry point; the other services are usable on
//! their own over explicit snapshots.

mod backend_factory;
mod consistency;
mod facade;
mod summarizer;
mod vector_index;

pub use backend_factory::{BackendFactory, BackendSet};
pub use consistency::{
    ConsistencyCheck, ConsistencyChecker, DuplicateCheck, FactContradictionCheck, IssueRegistry,
    LogicalCheck, RelationshipCheck, TemporalCheck, ensure_consistent,
};
pub use facade::MemoryFacade;
pub use summarizer::{
    LlmTextGenerator, Summarizer, SummaryOptions, TemplateGenerator, TextGenerator,
    importance_score,
};
pub use vector_index::VectorIndex;
