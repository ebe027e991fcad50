//! In-memory test doubles that record every call
//!
//! These stand in for the SQLite deferred queue, the filesystem blob store,
//! the HTTP webhook notifier and the Prometheus metrics sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use broker_core::models::{DeferredEntry, DeferredJob};
use broker_core::traits::{BlobStore, BrokerMetric, DeferredQueue, MetricsSink, WebhookNotifier};
use broker_core::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};

/// In-memory [`DeferredQueue`] with the same lease semantics as the SQLite queue
#[derive(Debug, Default)]
pub struct RecordingDeferredQueue {
    entries: Mutex<Vec<DeferredEntry>>,
    next_id: AtomicUsize,
    acked: Mutex<Vec<i64>>,
    fail_enqueue: AtomicBool,
}

impl RecordingDeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `enqueue` fail with a queue error
    pub fn fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Entries not yet acknowledged
    pub fn pending(&self) -> Vec<DeferredEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn pending_jobs(&self) -> Vec<DeferredJob> {
        self.pending().into_iter().map(|e| e.job).collect()
    }

    pub fn acked(&self) -> Vec<i64> {
        self.acked.lock().unwrap().clone()
    }

    /// Moves every pending entry's due time to `due_at`
    pub fn make_all_due(&self, due_at: DateTime<Utc>) {
        for entry in self.entries.lock().unwrap().iter_mut() {
            entry.due_at = due_at;
        }
    }
}

#[async_trait]
impl DeferredQueue for RecordingDeferredQueue {
    async fn enqueue(&self, job: &DeferredJob, due_at: DateTime<Utc>) -> BrokerResult<i64> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(BrokerError::Queue("enqueue disabled by test".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        self.entries.lock().unwrap().push(DeferredEntry {
            id,
            job: job.clone(),
            due_at,
            deliveries: 0,
        });
        Ok(id)
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> BrokerResult<Vec<DeferredEntry>> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| BrokerError::Queue(e.to_string()))?;
        let mut entries = self.entries.lock().unwrap();
        let mut due: Vec<&mut DeferredEntry> =
            entries.iter_mut().filter(|e| e.due_at <= now).collect();
        due.sort_by_key(|e| (e.due_at, e.id));

        let mut fetched = Vec::new();
        for entry in due.into_iter().take(limit.max(0) as usize) {
            let snapshot = DeferredEntry {
                deliveries: entry.deliveries + 1,
                ..entry.clone()
            };
            entry.due_at = now + lease;
            entry.deliveries += 1;
            fetched.push(snapshot);
        }
        Ok(fetched)
    }

    async fn ack(&self, id: i64) -> BrokerResult<()> {
        self.entries.lock().unwrap().retain(|e| e.id != id);
        self.acked.lock().unwrap().push(id);
        Ok(())
    }

    async fn reschedule(&self, id: i64, due_at: DateTime<Utc>) -> BrokerResult<()> {
        if let Some(entry) = self.entries.lock().unwrap().iter_mut().find(|e| e.id == id) {
            entry.due_at = due_at;
        }
        Ok(())
    }

    async fn pending_count(&self) -> BrokerResult<i64> {
        Ok(self.entries.lock().unwrap().len() as i64)
    }
}

/// [`WebhookNotifier`] that records deliveries and can fail the first N calls
#[derive(Debug, Default)]
pub struct RecordingWebhookNotifier {
    calls: Mutex<Vec<(String, i64)>>,
    failures_remaining: AtomicUsize,
}

impl RecordingWebhookNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures_remaining: AtomicUsize::new(times),
        }
    }

    /// Every attempted delivery, successful or not
    pub fn calls(&self) -> Vec<(String, i64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookNotifier for RecordingWebhookNotifier {
    async fn notify(&self, url: &str, task_id: i64) -> BrokerResult<()> {
        self.calls.lock().unwrap().push((url.to_string(), task_id));
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(BrokerError::Network(format!("{url} unreachable")));
        }
        Ok(())
    }
}

/// In-memory [`BlobStore`]
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicUsize,
    fail_puts: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, content: Vec<u8>) -> BrokerResult<String> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BrokerError::BlobStore("put disabled by test".to_string()));
        }
        let key = format!("blob{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.blobs.lock().unwrap().insert(key.clone(), content);
        Ok(key)
    }

    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>> {
        Ok(self.blobs.lock().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> BrokerResult<()> {
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }
}

/// [`MetricsSink`] that keeps every recorded metric
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    recorded: Mutex<Vec<BrokerMetric>>,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<BrokerMetric> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn count(&self, metric: &BrokerMetric) -> usize {
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .filter(|m| *m == metric)
            .count()
    }

    /// Counts by metric name, ignoring labels
    pub fn count_named(&self, name: &str) -> usize {
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.name() == name)
            .count()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn record(&self, metric: BrokerMetric) {
        self.recorded.lock().unwrap().push(metric);
    }
}
