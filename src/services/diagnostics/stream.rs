//! Real-Time Diagnostics Stream
//!
//! Pushes diagnostic updates from live server subscriptions to registered
//! listeners. Every listener owns a bounded queue drained by its own
//! dispatcher task, so ingestion never waits on a listener. When a queue is
//! full the oldest notification is dropped and counted.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cascade_resolver_core::{ErrorCategory, ServerStatus, Severity, UnifiedError};

use super::normalize::unify;
use crate::services::lsp::backend::published_to_raw;

// ============================================================================
// Filter / Stats
// ============================================================================

/// Which diagnostics reach listeners. `None` accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticFilter {
    pub severities: Option<BTreeSet<Severity>>,
    pub categories: Option<BTreeSet<ErrorCategory>>,
}

impl DiagnosticFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_severities(mut self, severities: &[Severity]) -> Self {
        self.severities = Some(severities.iter().copied().collect());
        self
    }

    pub fn with_categories(mut self, categories: &[ErrorCategory]) -> Self {
        self.categories = Some(categories.iter().copied().collect());
        self
    }

    pub fn matches(&self, error: &UnifiedError) -> bool {
        self.severities
            .as_ref()
            .map_or(true, |set| set.contains(&error.severity))
            && self
                .categories
                .as_ref()
                .map_or(true, |set| set.contains(&error.category))
    }
}

/// Running statistics over the diagnostics currently published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticStats {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub files_affected: usize,
    /// Diagnostics received since the stream started
    pub received: u64,
    /// Diagnostics rejected by the filter
    pub filtered_out: u64,
    /// Notifications dropped from saturated listener queues
    pub dropped: u64,
}

/// Diagnostics published by one server for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBatch {
    pub server: String,
    pub file_path: String,
    /// Errors passing the filter; empty when the file became clean
    pub errors: Vec<UnifiedError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub server: String,
    pub status: ServerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Listener queues
// ============================================================================

struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking, evicting the oldest item when full.
    fn push(&self, item: T) {
        {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            if items.len() >= self.capacity {
                items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Wait for queued items. `None` once closed.
    async fn pop_all(&self) -> Option<Vec<T>> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            {
                let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
                if !items.is_empty() {
                    return Some(items.drain(..).collect());
                }
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct Listener<T> {
    id: u64,
    queue: Arc<BoundedQueue<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Listener<T> {
    /// Callbacks run on the blocking pool, one drained batch at a time, so
    /// a slow listener never occupies a runtime worker.
    fn spawn<F>(id: u64, capacity: usize, callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let queue = Arc::new(BoundedQueue::new(capacity));
        let dispatch = Arc::clone(&queue);
        let callback = Arc::new(callback);
        let task = tokio::spawn(async move {
            while let Some(items) = dispatch.pop_all().await {
                let callback = Arc::clone(&callback);
                let delivered = tokio::task::spawn_blocking(move || {
                    for item in items {
                        callback(item);
                    }
                })
                .await;
                if let Err(e) = delivered {
                    warn!(listener = id, error = %e, "Stream listener failed");
                }
            }
        });
        Self { id, queue, task }
    }
}

impl<T> Listener<T> {
    fn stop(&self) {
        self.queue.close();
        self.task.abort();
    }
}

/// Handle returned when registering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// ============================================================================
// Stream
// ============================================================================

type Counts = Vec<(Severity, ErrorCategory)>;

pub struct DiagnosticStream {
    capacity: usize,
    filter: RwLock<DiagnosticFilter>,
    /// (server, file) -> severity/category of published errors that passed the filter
    current: Mutex<BTreeMap<(String, String), Counts>>,
    received: AtomicU64,
    filtered_out: AtomicU64,
    /// Broadcast lag on server subscriptions
    lagged: AtomicU64,
    next_id: AtomicU64,
    error_listeners: RwLock<Vec<Listener<ErrorBatch>>>,
    stats_listeners: RwLock<Vec<Listener<DiagnosticStats>>>,
    connection_listeners: RwLock<Vec<Listener<ConnectionEvent>>>,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl DiagnosticStream {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            capacity: queue_capacity.max(1),
            filter: RwLock::new(DiagnosticFilter::default()),
            current: Mutex::new(BTreeMap::new()),
            received: AtomicU64::new(0),
            filtered_out: AtomicU64::new(0),
            lagged: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            error_listeners: RwLock::new(Vec::new()),
            stats_listeners: RwLock::new(Vec::new()),
            connection_listeners: RwLock::new(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_filter(&self, filter: DiagnosticFilter) {
        *self.filter.write().unwrap_or_else(|e| e.into_inner()) = filter;
    }

    pub fn filter(&self) -> DiagnosticFilter {
        self.filter.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // ── Listener registration ───────────────────────────────────────────

    fn next_listener_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Must be called from within a tokio runtime.
    pub fn add_error_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ErrorBatch) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        let listener = Listener::spawn(id, self.capacity, callback);
        self.error_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
        ListenerId(id)
    }

    pub fn add_stats_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(DiagnosticStats) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        let listener = Listener::spawn(id, self.capacity, callback);
        self.stats_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
        ListenerId(id)
    }

    pub fn add_connection_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        let listener = Listener::spawn(id, self.capacity, callback);
        self.connection_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
        ListenerId(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        fn remove<T>(listeners: &RwLock<Vec<Listener<T>>>, id: u64) -> bool {
            let mut listeners = listeners.write().unwrap_or_else(|e| e.into_inner());
            match listeners.iter().position(|l| l.id == id) {
                Some(index) => {
                    listeners.remove(index).stop();
                    true
                }
                None => false,
            }
        }
        remove(&self.error_listeners, id.0)
            || remove(&self.stats_listeners, id.0)
            || remove(&self.connection_listeners, id.0)
    }

    // ── Ingestion ───────────────────────────────────────────────────────

    /// Accept the full, current set of errors one server reports for one
    /// file. Never blocks on listeners.
    pub fn ingest(&self, server: &str, file_path: &str, errors: Vec<UnifiedError>) {
        let received = errors.len();
        let filter = self.filter();
        let kept: Vec<UnifiedError> = errors.into_iter().filter(|e| filter.matches(e)).collect();

        self.received.fetch_add(received as u64, Ordering::Relaxed);
        self.filtered_out
            .fetch_add((received - kept.len()) as u64, Ordering::Relaxed);

        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            let key = (server.to_string(), file_path.to_string());
            if kept.is_empty() {
                current.remove(&key);
            } else {
                current.insert(key, kept.iter().map(|e| (e.severity, e.category)).collect());
            }
        }

        if kept.is_empty() && received > 0 {
            debug!(server = %server, file = %file_path, received, "All diagnostics filtered out");
        } else {
            let batch = ErrorBatch {
                server: server.to_string(),
                file_path: file_path.to_string(),
                errors: kept,
            };
            for listener in self.error_listeners.read().unwrap_or_else(|e| e.into_inner()).iter() {
                listener.queue.push(batch.clone());
            }
        }

        let stats = self.stats();
        for listener in self.stats_listeners.read().unwrap_or_else(|e| e.into_inner()).iter() {
            listener.queue.push(stats.clone());
        }
    }

    pub fn publish_connection(&self, event: ConnectionEvent) {
        for listener in self
            .connection_listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            listener.queue.push(event.clone());
        }
    }

    /// Snapshot of the running statistics.
    pub fn stats(&self) -> DiagnosticStats {
        let mut stats = DiagnosticStats {
            received: self.received.load(Ordering::Relaxed),
            filtered_out: self.filtered_out.load(Ordering::Relaxed),
            dropped: self.dropped_notifications(),
            ..Default::default()
        };

        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let mut files = BTreeSet::new();
        for ((_, file), counts) in current.iter() {
            files.insert(file.as_str());
            for (severity, category) in counts {
                stats.total += 1;
                *stats.by_severity.entry(*severity).or_insert(0) += 1;
                *stats.by_category.entry(*category).or_insert(0) += 1;
            }
        }
        stats.files_affected = files.len();
        stats
    }

    /// Notifications dropped across all listener queues and subscriptions.
    pub fn dropped_notifications(&self) -> u64 {
        fn sum<T>(listeners: &RwLock<Vec<Listener<T>>>) -> u64 {
            listeners
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .map(|l| l.queue.dropped.load(Ordering::Relaxed))
                .sum()
        }
        sum(&self.error_listeners)
            + sum(&self.stats_listeners)
            + sum(&self.connection_listeners)
            + self.lagged.load(Ordering::Relaxed)
    }

    // ── Server subscriptions ────────────────────────────────────────────

    /// Forward a server's pushed diagnostics into the stream on a
    /// background task. Replaces any previous subscription for `server`.
    pub fn attach_server(
        self: &Arc<Self>,
        server: impl Into<String>,
        root: PathBuf,
        mut updates: broadcast::Receiver<lsp_types::PublishDiagnosticsParams>,
    ) {
        let server = server.into();
        let stream = Arc::clone(self);
        let name = server.clone();

        let task = tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(params) => {
                        if let Some((file_path, raw)) = published_to_raw(&name, &root, &params) {
                            let errors = unify(raw, |_, _| None);
                            stream.ingest(&name, &file_path, errors);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(server = %name, skipped, "Diagnostic subscription lagged");
                        stream.lagged.fetch_add(skipped, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(server = %name, "Diagnostic subscription closed");
                        break;
                    }
                }
            }
        });

        let previous = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(server, task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn detach_server(&self, server: &str) -> bool {
        let task = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(server);
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Stop every listener and subscription.
    pub fn shutdown(&self) {
        for (_, task) in self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
        {
            task.abort();
        }
        fn stop_all<T>(listeners: &RwLock<Vec<Listener<T>>>) {
            for listener in listeners.write().unwrap_or_else(|e| e.into_inner()).drain(..) {
                listener.stop();
            }
        }
        stop_all(&self.error_listeners);
        stop_all(&self.stats_listeners);
        stop_all(&self.connection_listeners);
    }
}

impl Drop for DiagnosticStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_resolver_core::ErrorLocation;
    use std::time::Duration;

    fn error(id: &str, severity: Severity, category: ErrorCategory) -> UnifiedError {
        UnifiedError {
            id: id.to_string(),
            message: "m".to_string(),
            severity,
            category,
            location: ErrorLocation::new("a.py", 1, 1),
            source: "ruff".to_string(),
            code: None,
            fixes: Vec::new(),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_filter_matches() {
        let filter = DiagnosticFilter::all()
            .with_severities(&[Severity::Error])
            .with_categories(&[ErrorCategory::Syntax, ErrorCategory::Undefined]);
        assert!(filter.matches(&error("1", Severity::Error, ErrorCategory::Syntax)));
        assert!(!filter.matches(&error("2", Severity::Warning, ErrorCategory::Syntax)));
        assert!(!filter.matches(&error("3", Severity::Error, ErrorCategory::Style)));
        assert!(DiagnosticFilter::all().matches(&error("4", Severity::Hint, ErrorCategory::Other)));
    }

    #[test]
    fn test_queue_drops_oldest() {
        let queue = BoundedQueue::new(2);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.dropped.load(Ordering::Relaxed), 1);
        let items: Vec<i32> = queue.items.lock().unwrap().iter().copied().collect();
        assert_eq!(items, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_ingest_updates_stats_and_listeners() {
        let stream = DiagnosticStream::new(16);
        stream.set_filter(DiagnosticFilter::all().with_severities(&[Severity::Error, Severity::Warning]));

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        stream.add_error_listener(move |batch| sink.lock().unwrap().push(batch));

        stream.ingest(
            "ruff",
            "a.py",
            vec![
                error("1", Severity::Error, ErrorCategory::Syntax),
                error("2", Severity::Hint, ErrorCategory::Style),
            ],
        );
        settle().await;

        let batches = received.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].errors.len(), 1);

        let stats = stream.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.filtered_out, 1);
        assert_eq!(stats.files_affected, 1);
        assert_eq!(stats.by_severity.get(&Severity::Error), Some(&1));
    }

    #[tokio::test]
    async fn test_republish_replaces_file_state() {
        let stream = DiagnosticStream::new(16);
        stream.ingest("ruff", "a.py", vec![error("1", Severity::Error, ErrorCategory::Syntax)]);
        stream.ingest("ruff", "a.py", Vec::new());
        let stats = stream.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.files_affected, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_listener_does_not_block_ingestion() {
        let stream = DiagnosticStream::new(2);
        stream.add_error_listener(|_| std::thread::sleep(Duration::from_millis(200)));

        let start = std::time::Instant::now();
        for i in 0..20 {
            stream.ingest("ruff", "a.py", vec![error(&i.to_string(), Severity::Error, ErrorCategory::Logic)]);
        }
        assert!(start.elapsed() < Duration::from_millis(150));
        assert!(stream.dropped_notifications() > 0);
    }

    #[tokio::test]
    async fn test_slow_listener_does_not_stall_current_thread_runtime() {
        let stream = DiagnosticStream::new(4);
        let delivered = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&delivered);
        stream.add_error_listener(move |_| {
            std::thread::sleep(Duration::from_millis(400));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        stream.ingest("ruff", "a.py", vec![error("1", Severity::Error, ErrorCategory::Logic)]);

        // The dispatcher picks the batch up during these sleeps
        let start = std::time::Instant::now();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(start.elapsed() < Duration::from_millis(200), "{:?}", start.elapsed());
        assert_eq!(delivered.load(Ordering::SeqCst), 0);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while delivered.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_connection_events_and_removal() {
        let stream = DiagnosticStream::new(8);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let id = stream.add_connection_listener(move |event| sink.lock().unwrap().push(event));

        stream.publish_connection(ConnectionEvent {
            server: "pyright".into(),
            status: ServerStatus::Running,
            message: None,
        });
        settle().await;
        assert_eq!(events.lock().unwrap().len(), 1);

        assert!(stream.remove_listener(id));
        assert!(!stream.remove_listener(id));
        stream.publish_connection(ConnectionEvent {
            server: "pyright".into(),
            status: ServerStatus::Crashed,
            message: Some("exit".into()),
        });
        settle().await;
        assert_eq!(events.lock().unwrap().len(), 1);
    }
}
