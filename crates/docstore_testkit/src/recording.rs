//! A logger that remembers what it saved.

use docstore_core::{DocLogger, DocResult, Document, LogEntry, LogRecord};
use docstore_engine::OpKind;
use parking_lot::Mutex;
use std::sync::Arc;

/// Logger keeping every saved record in memory.
///
/// Generated but never saved entries (failed writes, abandoned batches)
/// do not show up.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    saved: Arc<Mutex<Vec<LogRecord>>>,
}

impl RecordingLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved records, in save order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.saved.lock().clone()
    }

    /// `(op, id)` of every saved record.
    pub fn ops(&self) -> Vec<(OpKind, Option<String>)> {
        self.saved
            .lock()
            .iter()
            .map(|r| (r.op, r.doc_id.clone()))
            .collect()
    }

    /// Number of saved records.
    pub fn len(&self) -> usize {
        self.saved.lock().len()
    }

    /// Returns true if nothing was saved.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every record.
    pub fn clear(&self) {
        self.saved.lock().clear();
    }
}

#[derive(Debug)]
struct RecordedEntry {
    record: LogRecord,
    saved: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogEntry for RecordedEntry {
    fn record(&self) -> &LogRecord {
        &self.record
    }

    fn save(&self) -> DocResult<()> {
        self.saved.lock().push(self.record.clone());
        Ok(())
    }
}

impl DocLogger for RecordingLogger {
    fn generate_log(&self, doc: &Document, op: OpKind, with_data: bool) -> Box<dyn LogEntry> {
        Box::new(RecordedEntry {
            record: LogRecord::of(doc, op, with_data),
            saved: Arc::clone(&self.saved),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_saved_entries_are_recorded() {
        let logger = RecordingLogger::new();
        let doc = Document::new("Order").with("orderId", "A1");
        let _dropped = logger.generate_log(&doc, OpKind::Insert, false);
        assert!(logger.is_empty());

        logger.generate_log(&doc, OpKind::Delete, true).save().unwrap();
        assert_eq!(logger.ops(), vec![(OpKind::Delete, None)]);
        assert!(logger.records()[0].data.is_some());
    }
}
