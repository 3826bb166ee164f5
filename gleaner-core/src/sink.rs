use crate::error::PersistenceError;
use crate::types::ExtractedItem;
use async_trait::async_trait;

/// Destination for flushed session results.
///
/// Implementations own upsert-by-`item_id` semantics: persisting the same
/// item twice must leave one record. The engine never reads back.
#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;

    /// Persists `items` in order and returns how many were written.
    async fn persist(&self, items: &[ExtractedItem]) -> Result<usize, PersistenceError>;
}
