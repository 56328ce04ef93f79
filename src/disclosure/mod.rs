//! Selective-disclosure core: JSON Pointer evaluation, skeleton-preserving
//! fragment selection, and the mandatory/non-mandatory partition of
//! canonicalized N-Quad statements that drives the ecdsa-sd proof flow.

pub mod partition;
pub mod pointer;
pub mod select;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use partition::{partition_statements, StatementPartition};
pub use pointer::JsonPointer;
pub use select::select_fragments;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("disclosure: pointer {0:?} is not valid")]
    InvalidPointer(String),
    #[error("disclosure: pointer {0:?} does not resolve in the document")]
    PointerNotEvaluable(String),
    #[error("disclosure: canonicalization failed")]
    CanonicalizationFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("disclosure: partition over {expected} statements applied to {actual}")]
    PartitionMismatch { expected: usize, actual: usize },
}

/// RDF dataset canonicalization contract (RDFC-1.0). The implementation
/// parses the document as JSON-LD 1.1 and returns the canonical N-Quads,
/// one `\n`-terminated line per statement. Network-backed context loading
/// makes this inherently asynchronous.
#[async_trait]
pub trait Canonicalizer: Send + Sync {
    async fn canonicalize(&self, doc: &Value) -> Result<String, anyhow::Error>;
}
