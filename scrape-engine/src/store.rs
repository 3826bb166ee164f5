use gleaner_core::{ErrorExt, ExtractedItem, PersistenceError, ResultSink};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Attempts per sink when its errors are retryable (locked database,
/// unreachable endpoint, 5xx).
pub const SINK_ATTEMPTS: u32 = 3;
const MAX_SINK_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

#[derive(Debug, Default)]
struct StoreInner {
    items: Vec<ExtractedItem>,
    ids: HashSet<String>,
}

/// Append-only, insertion-ordered result buffer.
///
/// Cloning gives another handle to the same buffer, so a caller can keep
/// one and flush whatever was collected even if the session is dropped.
#[derive(Debug, Clone, Default)]
pub struct PartialResultStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkFlush {
    pub sink: String,
    pub persisted: usize,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    pub item_count: usize,
    pub sinks: Vec<SinkFlush>,
}

impl FlushReport {
    pub fn errors(&self) -> Vec<String> {
        self.sinks
            .iter()
            .filter_map(|s| s.error.as_ref().map(|e| format!("{}: {}", s.sink, e)))
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.sinks.iter().all(|s| s.error.is_none())
    }
}

impl PartialResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// First-seen wins; a repeated item id is rejected.
    pub async fn append(&self, item: ExtractedItem) -> AppendOutcome {
        let mut inner = self.inner.write().await;
        if !inner.ids.insert(item.item_id.clone()) {
            debug!("Ignoring duplicate item {}", item.item_id);
            return AppendOutcome::Duplicate;
        }
        inner.items.push(item);
        AppendOutcome::Appended
    }

    pub async fn contains(&self, item_id: &str) -> bool {
        self.inner.read().await.ids.contains(item_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<ExtractedItem> {
        self.inner.read().await.items.clone()
    }

    pub async fn to_json(&self) -> Result<String, PersistenceError> {
        let inner = self.inner.read().await;
        Ok(serde_json::to_string_pretty(&inner.items)?)
    }

    /// Hands the current contents to a single sink. Contents are untouched.
    pub async fn flush_to(&self, sink: &dyn ResultSink) -> Result<usize, PersistenceError> {
        let items = self.snapshot().await;
        sink.persist(&items).await
    }

    /// Hands the same snapshot to every sink. A failing sink is recorded and
    /// the remaining sinks still run.
    pub async fn flush(&self, sinks: &[Arc<dyn ResultSink>]) -> FlushReport {
        let items = self.snapshot().await;
        let mut report = FlushReport {
            item_count: items.len(),
            sinks: Vec::with_capacity(sinks.len()),
        };

        for sink in sinks {
            let (result, attempts) = persist_with_retry(sink.as_ref(), &items).await;
            match result {
                Ok(persisted) => {
                    info!("Flushed {} items to {}", persisted, sink.name());
                    report.sinks.push(SinkFlush {
                        sink: sink.name().to_string(),
                        persisted,
                        attempts,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Flush to {} failed after {} attempts", sink.name(), attempts);
                    e.log_warn();
                    report.sinks.push(SinkFlush {
                        sink: sink.name().to_string(),
                        persisted: 0,
                        attempts,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        report
    }
}

async fn persist_with_retry(
    sink: &dyn ResultSink,
    items: &[ExtractedItem],
) -> (Result<usize, PersistenceError>, u32) {
    let mut attempt = 1;
    loop {
        match sink.persist(items).await {
            Err(e) if e.is_retryable() && attempt < SINK_ATTEMPTS => {
                let delay = e
                    .retry_after()
                    .unwrap_or(MAX_SINK_RETRY_DELAY)
                    .min(MAX_SINK_RETRY_DELAY);
                debug!(
                    "Sink {} attempt {} failed ({}), retrying in {:?}",
                    sink.name(),
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return (result, attempt),
        }
    }
}
