//! Presentation events and the channel they are posted on.
//!
//! The worker never calls into the presentation layer. Everything it wants
//! to show is wrapped in an [`Event`] and posted through an [`EventSink`],
//! which the presentation layer drains from its own loop.

use crate::batch::BatchSummary;
use crate::job::JobStatus;
use crate::progress::ProgressSnapshot;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Severity of a user-facing log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Update posted from the worker to the presentation layer.
///
/// `job` is the index of the item inside the current batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Progress {
        job: usize,
        snapshot: ProgressSnapshot,
    },
    StatusChanged {
        job: usize,
        status: JobStatus,
    },
    CurrentFile {
        job: usize,
        input: PathBuf,
    },
    /// File-level batch progress.
    BatchProgress {
        completed: usize,
        total: usize,
        percent: f64,
    },
    Log {
        level: LogLevel,
        line: String,
    },
    BatchDone(BatchSummary),
}

/// Receiving end, owned by the presentation layer.
pub type EventStream = mpsc::UnboundedReceiver<Event>;

/// Create a connected sink/stream pair.
pub fn channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

/// FIFO posting handle shared by the worker and its supervisors.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    /// Sink whose receiver is already gone; every post is dropped.
    pub fn disconnected() -> Self {
        let (sink, _) = channel();
        sink
    }

    /// Post an event. Returns `false` if the receiver has been dropped,
    /// in which case the event is discarded.
    pub fn post(&self, event: Event) -> bool {
        if self.tx.is_closed() {
            return false;
        }
        self.tx.send(event).is_ok()
    }

    pub fn log(&self, level: LogLevel, line: impl Into<String>) -> bool {
        self.post(Event::Log {
            level,
            line: line.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (sink, mut stream) = channel();
        for job in 0..3 {
            assert!(sink.post(Event::StatusChanged {
                job,
                status: JobStatus::Processing,
            }));
        }

        for expected in 0..3 {
            match stream.try_recv() {
                Ok(Event::StatusChanged { job, .. }) => assert_eq!(job, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_post_after_receiver_dropped_is_discarded() {
        let (sink, stream) = channel();
        drop(stream);
        assert!(!sink.log(LogLevel::Info, "nobody is listening"));
        assert!(!EventSink::disconnected().log(LogLevel::Info, "nor here"));
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::StatusChanged {
            job: 2,
            status: JobStatus::Cancelled,
        };
        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["event"], "status_changed");
        assert_eq!(json["job"], 2);
        assert_eq!(json["status"], "cancelled");

        let event = Event::BatchDone(BatchSummary {
            total: 3,
            completed: 1,
            failed: 0,
            pending: 2,
            cancelled: true,
        });
        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["event"], "batch_done");
        assert_eq!(json["pending"], 2);
        assert_eq!(json["cancelled"], true);
    }
}
