//! Call detail records for proxied HTTP requests.
use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one proxied request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallDetailRecord {
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// `None` when the backend answered
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CallDetailRecord {
    pub fn success(duration: Duration) -> Self {
        Self {
            duration,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(duration: Duration, error: impl Into<String>) -> Self {
        Self {
            duration,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only log drained by an external consumer.
#[derive(Debug, Default)]
pub struct CallDetailLog {
    records: Mutex<Vec<CallDetailRecord>>,
}

impl CallDetailLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: CallDetailRecord) {
        tracing::trace!(
            duration_ms = record.duration.as_millis() as u64,
            error = record.error.as_deref(),
            "Call detail recorded"
        );
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Take every record collected so far
    pub fn drain(&self) -> Vec<CallDetailRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_drain() {
        let log = CallDetailLog::new();
        log.record(CallDetailRecord::success(Duration::from_millis(12)));
        log.record(CallDetailRecord::failure(
            Duration::from_millis(30),
            "connect timeout",
        ));
        assert_eq!(log.len(), 2);

        let records = log.drain();
        assert!(log.is_empty());
        assert_eq!(records[0].error, None);
        assert_eq!(records[1].error.as_deref(), Some("connect timeout"));
        assert!(records[0].timestamp <= records[1].timestamp);
    }

    #[test]
    fn test_serializes_duration_as_millis() {
        let record = CallDetailRecord::success(Duration::from_millis(250));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["duration"], 250);
        assert!(json["error"].is_null());
    }
}
