//! Change logging.
//!
//! Every successful write generates a [`LogEntry`] through the entity
//! type's [`DocLogger`]. Direct writes save the entry immediately; batched
//! writes defer it until the batch commits. Saving is fire-and-forget: a
//! failed save is traced and never fails the write.
//!
//! Two loggers are provided:
//!
//! - [`TracingLogger`] emits one `tracing` event per entry.
//! - [`ChangeFeedLogger`] publishes entries on a [`ChangeFeed`] that
//!   subscribers can follow or poll.
//!
//! # Usage
//!
//! ```rust,ignore
//! let feed = Arc::new(ChangeFeed::new());
//! let receiver = feed.subscribe();
//! let binding = Binding::new().logger(Arc::new(ChangeFeedLogger::new(feed.clone())));
//! store.register_with(order_schema, binding)?;
//!
//! // Entries arrive after each direct write or batch commit
//! while let Ok(record) = receiver.recv() {
//!     println!("{} {} {:?}", record.op, record.entity_type, record.doc_id);
//! }
//! ```

use crate::document::Document;
use crate::error::DocResult;
use docstore_codec::Content;
use docstore_engine::{now_millis, OpKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::info;

/// What a log entry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Feed sequence number, assigned when published (0 before).
    pub sequence: u64,
    /// Entity type name.
    pub entity_type: String,
    /// Document id, if known.
    pub doc_id: Option<String>,
    /// Kind of write.
    pub op: OpKind,
    /// When the entry was generated (Unix timestamp in milliseconds).
    pub time: u64,
    /// Document content, when the type logs content.
    pub data: Option<Content>,
}

impl LogRecord {
    /// Builds a record for a document.
    pub fn of(doc: &Document, op: OpKind, with_data: bool) -> Self {
        Self {
            sequence: 0,
            entity_type: doc.entity_type().to_string(),
            doc_id: doc.id().map(str::to_string),
            op,
            time: now_millis(),
            data: with_data.then(|| doc.data().clone()),
        }
    }
}

/// A generated, not yet saved log entry.
pub trait LogEntry: Send + Sync + fmt::Debug {
    /// The recorded change.
    fn record(&self) -> &LogRecord;

    /// Persists or publishes the entry.
    fn save(&self) -> DocResult<()>;
}

/// Produces log entries for an entity type.
pub trait DocLogger: Send + Sync {
    /// Generates an entry for a write of `doc`.
    fn generate_log(&self, doc: &Document, op: OpKind, with_data: bool) -> Box<dyn LogEntry>;
}

/// Logger emitting `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

#[derive(Debug)]
struct TracingEntry {
    record: LogRecord,
}

impl LogEntry for TracingEntry {
    fn record(&self) -> &LogRecord {
        &self.record
    }

    fn save(&self) -> DocResult<()> {
        let r = &self.record;
        info!(
            entity_type = %r.entity_type,
            id = r.doc_id.as_deref().unwrap_or("-"),
            op = %r.op,
            time = r.time,
            with_data = r.data.is_some(),
            "document change"
        );
        Ok(())
    }
}

impl DocLogger for TracingLogger {
    fn generate_log(&self, doc: &Document, op: OpKind, with_data: bool) -> Box<dyn LogEntry> {
        Box::new(TracingEntry {
            record: LogRecord::of(doc, op, with_data),
        })
    }
}

/// Distributes saved log records to subscribers.
///
/// The feed:
/// - Preserves save order
/// - Supports multiple subscribers
/// - Keeps a bounded history for polling
pub struct ChangeFeed {
    /// Subscribers (senders).
    subscribers: RwLock<Vec<Sender<LogRecord>>>,
    /// History of recent records for polling.
    history: RwLock<Vec<LogRecord>>,
    /// Maximum history size.
    max_history: usize,
    /// Last assigned sequence number.
    sequence: AtomicU64,
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history_len())
            .field("max_history", &self.max_history)
            .finish()
    }
}

impl ChangeFeed {
    /// Creates a feed keeping the last 10 000 records.
    pub fn new() -> Self {
        Self::with_max_history(10_000)
    }

    /// Creates a feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes to future records.
    ///
    /// The receiver should be drained regularly to avoid unbounded memory growth.
    pub fn subscribe(&self) -> Receiver<LogRecord> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Assigns the next sequence number and publishes the record.
    pub fn emit(&self, mut record: LogRecord) -> u64 {
        let mut history = self.history.write();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        record.sequence = sequence;
        history.push(record.clone());
        if history.len() > self.max_history {
            let excess = history.len() - self.max_history;
            history.drain(0..excess);
        }
        drop(history);

        // Disconnected subscribers are dropped
        self.subscribers
            .write()
            .retain(|tx| tx.send(record.clone()).is_ok());
        sequence
    }

    /// Records with a sequence greater than `cursor`, at most `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<LogRecord> {
        self.history
            .read()
            .iter()
            .filter(|r| r.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Latest sequence number in history (0 when empty).
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().last().map_or(0, |r| r.sequence)
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Number of records in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Logger publishing on a [`ChangeFeed`].
#[derive(Debug, Clone)]
pub struct ChangeFeedLogger {
    feed: Arc<ChangeFeed>,
}

impl ChangeFeedLogger {
    /// Creates a logger publishing on `feed`.
    pub fn new(feed: Arc<ChangeFeed>) -> Self {
        Self { feed }
    }

    /// The feed entries are published on.
    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }
}

#[derive(Debug)]
struct FeedEntry {
    record: LogRecord,
    feed: Arc<ChangeFeed>,
}

impl LogEntry for FeedEntry {
    fn record(&self) -> &LogRecord {
        &self.record
    }

    fn save(&self) -> DocResult<()> {
        self.feed.emit(self.record.clone());
        Ok(())
    }
}

impl DocLogger for ChangeFeedLogger {
    fn generate_log(&self, doc: &Document, op: OpKind, with_data: bool) -> Box<dyn LogEntry> {
        Box::new(FeedEntry {
            record: LogRecord::of(doc, op, with_data),
            feed: Arc::clone(&self.feed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn doc(id: &str) -> Document {
        let mut doc = Document::new("Order").with("orderId", id);
        doc.set_id(Some(id.to_string()));
        doc
    }

    #[test]
    fn generated_entry_is_published_on_save() {
        let feed = Arc::new(ChangeFeed::new());
        let logger = ChangeFeedLogger::new(feed.clone());
        let rx = feed.subscribe();

        let entry = logger.generate_log(&doc("A1"), OpKind::Insert, false);
        assert_eq!(feed.history_len(), 0);
        entry.save().unwrap();

        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received.sequence, 1);
        assert_eq!(received.doc_id.as_deref(), Some("A1"));
        assert_eq!(received.op, OpKind::Insert);
        assert!(received.data.is_none());
    }

    #[test]
    fn content_is_logged_on_request() {
        let record = LogRecord::of(&doc("A1"), OpKind::Update, true);
        assert_eq!(record.data.as_ref().unwrap().len(), 1);

        let json = serde_json::to_string(&record).unwrap();
        let back: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn subscriber_cleanup() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.emit(LogRecord::of(&doc("A1"), OpKind::Delete, false));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn poll_from_cursor_with_limit() {
        let feed = ChangeFeed::new();
        for i in 1..=5 {
            feed.emit(LogRecord::of(&doc(&format!("A{i}")), OpKind::Insert, false));
        }

        let records = feed.poll(2, 10);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence, 3);
        assert_eq!(feed.poll(0, 2).len(), 2);
        assert_eq!(feed.latest_sequence(), 5);
    }

    #[test]
    fn history_truncation() {
        let feed = ChangeFeed::with_max_history(3);
        for i in 1..=10 {
            feed.emit(LogRecord::of(&doc(&format!("A{i}")), OpKind::Insert, false));
        }
        assert_eq!(feed.history_len(), 3);
        assert_eq!(feed.poll(0, 100)[0].sequence, 8);
    }

    #[test]
    fn threaded_subscribe() {
        let feed = Arc::new(ChangeFeed::new());
        let rx = feed.subscribe();

        let feed_clone = Arc::clone(&feed);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            feed_clone.emit(LogRecord::of(&doc("A9"), OpKind::Set, false));
        });

        let received = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(received.doc_id.as_deref(), Some("A9"));
        handle.join().unwrap();
    }

    #[test]
    fn tracing_logger_saves() {
        let entry = TracingLogger.generate_log(&doc("A1"), OpKind::Delete, false);
        assert_eq!(entry.record().op, OpKind::Delete);
        entry.save().unwrap();
    }
}
