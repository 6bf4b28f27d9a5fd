//! # Audit Sink
//!
//! Append-only, buffered persistence for risk reports. Reports are buffered
//! in memory and flushed to a sled tree on a timer and at request DONE; the
//! key is the request id, so replays of the same request overwrite rather
//! than duplicate.
//!
//! ## Security Notes
//!
//! - Reports carry summaries and placeholders, never original user text or
//!   data cells; the sink stores what the report contains, nothing more.
//! - The sink is shared across requests; the buffer lock is held only for
//!   push/drain, never across I/O.

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::report::RiskReport;
use crate::Result;

const REPORT_TREE: &str = "reports";

/// Buffered audit log over sled.
pub struct AuditLog {
    db: sled::Db,
    reports: sled::Tree,
    buffer: Mutex<Vec<RiskReport>>,
}

impl AuditLog {
    /// Opens or creates an audit log at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Creates an in-memory audit log for the test harness.
    pub fn temporary() -> Result<Self> {
        let config = sled::Config::new().temporary(true);
        Self::from_db(config.open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let reports = db.open_tree(REPORT_TREE)?;
        Ok(Self {
            db,
            reports,
            buffer: Mutex::new(Vec::new()),
        })
    }

    /// Appends a report to the buffer.
    pub fn record(&self, report: RiskReport) {
        debug!(request_id = %report.request_id, action = %report.action, "audit report buffered");
        self.buffer
            .lock()
            .expect("audit buffer lock poisoned")
            .push(report);
    }

    /// Drains the buffer to storage. Returns the number flushed.
    pub fn flush(&self) -> Result<usize> {
        let drained: Vec<RiskReport> = {
            let mut buffer = self.buffer.lock().expect("audit buffer lock poisoned");
            buffer.drain(..).collect()
        };
        let count = drained.len();
        for report in drained {
            let bytes = serde_json::to_vec(&report)?;
            self.reports.insert(report.request_id.as_bytes(), bytes)?;
        }
        if count > 0 {
            self.db.flush()?;
            debug!(count, "audit reports flushed");
        }
        Ok(count)
    }

    /// Loads a report by request id (flushed entries only).
    pub fn get(&self, request_id: &str) -> Result<Option<RiskReport>> {
        match self.reports.get(request_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The most recent `n` flushed reports, newest first by timestamp.
    pub fn list_recent(&self, n: usize) -> Result<Vec<RiskReport>> {
        let mut reports = Vec::new();
        for entry in self.reports.iter() {
            let (_, bytes) = entry.map_err(GatewayError::from)?;
            match serde_json::from_slice::<RiskReport>(&bytes) {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "skipping unreadable audit entry"),
            }
        }
        reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        reports.truncate(n);
        Ok(reports)
    }

    /// Number of flushed reports.
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// True if nothing has been flushed.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Number of buffered (unflushed) reports.
    pub fn pending(&self) -> usize {
        self.buffer.lock().expect("audit buffer lock poisoned").len()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("flushed", &self.len())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineContext;
    use crate::provider::ChatMessage;
    use airlock_agent::ProcessingMode;
    use std::time::Duration;

    fn report(request_id: &str) -> RiskReport {
        let context = PipelineContext::new(
            request_id.to_string(),
            ProcessingMode::Balanced,
            None,
            Duration::from_secs(30),
            4,
            vec![ChatMessage::user("hello")],
        );
        RiskReport::assemble(&context, "model-x", false)
    }

    #[test]
    fn test_record_buffers_until_flush() {
        let log = AuditLog::temporary().unwrap();
        log.record(report("req-1"));
        assert_eq!(log.pending(), 1);
        assert_eq!(log.len(), 0);

        assert_eq!(log.flush().unwrap(), 1);
        assert_eq!(log.pending(), 0);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_get_by_request_id() {
        let log = AuditLog::temporary().unwrap();
        log.record(report("req-7"));
        log.flush().unwrap();
        let loaded = log.get("req-7").unwrap().unwrap();
        assert_eq!(loaded.request_id, "req-7");
        assert!(log.get("req-8").unwrap().is_none());
    }

    #[test]
    fn test_list_recent_caps_and_orders() {
        let log = AuditLog::temporary().unwrap();
        for i in 0..5 {
            log.record(report(&format!("req-{}", i)));
        }
        log.flush().unwrap();
        let recent = log.list_recent(3).unwrap();
        assert_eq!(recent.len(), 3);
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let log = AuditLog::temporary().unwrap();
        assert_eq!(log.flush().unwrap(), 0);
    }
}
