use crate::backoff::RetryMetrics;
use gleaner_core::{ExtractedItem, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Timing for one kind of driver operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_response_time: Duration,
    pub min_response_time: Duration,
    pub max_response_time: Duration,
}

impl OperationMetrics {
    fn new() -> Self {
        Self {
            request_count: 0,
            success_count: 0,
            error_count: 0,
            total_response_time: Duration::from_millis(0),
            min_response_time: Duration::from_secs(u64::MAX),
            max_response_time: Duration::from_millis(0),
        }
    }

    fn update(&mut self, response_time: Duration, success: bool) {
        self.request_count += 1;
        self.total_response_time += response_time;

        if response_time < self.min_response_time {
            self.min_response_time = response_time;
        }
        if response_time > self.max_response_time {
            self.max_response_time = response_time;
        }

        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
    }

    pub fn average_response_time(&self) -> Duration {
        if self.request_count == 0 {
            Duration::ZERO
        } else {
            self.total_response_time / self.request_count as u32
        }
    }
}

/// What the caller gets told about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub item_count: usize,
    pub items_per_kind: BTreeMap<String, usize>,
    pub strategy_successes: BTreeMap<String, u64>,
    pub items_failed: u64,
    pub duplicates_skipped: u64,
    pub requests_issued: u64,
    pub retries: u64,
    pub rate_limit_wait: Duration,
    pub elapsed: Duration,
    pub terminal_state: SessionState,
    pub operations: BTreeMap<String, OperationMetrics>,
}

/// Session-local counters. Nothing here is shared between sessions.
#[derive(Debug, Default)]
pub struct SummaryRecorder {
    strategy_successes: BTreeMap<String, u64>,
    operations: BTreeMap<String, OperationMetrics>,
    items_failed: u64,
    duplicates_skipped: u64,
}

impl SummaryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_operation(&mut self, operation: &str, response_time: Duration, success: bool) {
        self.operations
            .entry(operation.to_string())
            .or_insert_with(OperationMetrics::new)
            .update(response_time, success);
    }

    pub fn record_strategy_success(&mut self, strategy: &str) {
        *self
            .strategy_successes
            .entry(strategy.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_failed_item(&mut self) {
        self.items_failed += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates_skipped += 1;
    }

    pub fn items_failed(&self) -> u64 {
        self.items_failed
    }

    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped
    }

    pub fn finish(
        self,
        items: &[ExtractedItem],
        retry: &RetryMetrics,
        requests_issued: u64,
        rate_limit_wait: Duration,
        elapsed: Duration,
        terminal_state: SessionState,
    ) -> ExecutionSummary {
        let mut items_per_kind = BTreeMap::new();
        for item in items {
            *items_per_kind.entry(item.kind.to_string()).or_insert(0) += 1;
        }

        ExecutionSummary {
            item_count: items.len(),
            items_per_kind,
            strategy_successes: self.strategy_successes,
            items_failed: self.items_failed,
            duplicates_skipped: self.duplicates_skipped,
            requests_issued,
            retries: retry.total_retries,
            rate_limit_wait,
            elapsed,
            terminal_state,
            operations: self.operations,
        }
    }
}
