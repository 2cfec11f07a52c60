//! Event Bus
//!
//! Immutable lifecycle events emitted by the pipeline and the query engine.
//! Delivery is synchronous, in-order, at-most-once; every event carries a
//! monotonically increasing sequence number. A consumer that exceeds the
//! configured threshold is detached with a warning so it cannot stall the
//! producer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default budget for one consumer callback.
pub const DEFAULT_SLOW_CONSUMER_THRESHOLD: Duration = Duration::from_millis(50);

// ============================================================================
// Events
// ============================================================================

/// Lifecycle event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventKind {
    DocumentDetected {
        source_path: String,
        source_hash: String,
    },
    DocumentParsed {
        source_path: String,
        document_id: String,
    },
    DocumentIndexed {
        source_path: String,
        node_id: String,
        duration_ms: u64,
    },
    DocumentStale {
        source_path: String,
        node_id: String,
    },
    DocumentDeleted {
        source_path: String,
        node_id: String,
    },
    IndexMergeRequested {
        sources: usize,
    },
    IndexMergeCompleted {
        conflicts_resolved: usize,
    },
    QueryReceived {
        query: String,
    },
    QueryCompleted {
        query: String,
        results: usize,
        duration_ms: u64,
    },
    QueryFailed {
        query: String,
        code: String,
    },
}

/// A frozen, sequenced event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonically increasing per bus.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

// ============================================================================
// Consumers
// ============================================================================

/// Synchronous event consumer. Must return promptly; a consumer exceeding the
/// bus threshold is detached.
pub trait EventConsumer: Send + Sync {
    /// Consumer name for diagnostics.
    fn name(&self) -> &str;

    fn on_event(&self, event: &Event);
}

/// Default consumer: surfaces events as structured logs.
pub struct LogConsumer;

impl EventConsumer for LogConsumer {
    fn name(&self) -> &str {
        "log"
    }

    fn on_event(&self, event: &Event) {
        debug!(sequence = event.sequence, event = ?event.kind, "kdd event");
    }
}

struct ConsumerSlot {
    consumer: Box<dyn EventConsumer>,
}

// ============================================================================
// Bus
// ============================================================================

/// The process-wide event bus, instantiated explicitly at engine
/// construction. Exclusive writer for registration, shared readers for
/// delivery.
pub struct EventBus {
    consumers: RwLock<Vec<ConsumerSlot>>,
    sequence: AtomicU64,
    slow_threshold: Duration,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_CONSUMER_THRESHOLD)
    }
}

impl EventBus {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            consumers: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            slow_threshold,
        }
    }

    /// Register a consumer. Delivery order follows registration order.
    pub fn register(&self, consumer: Box<dyn EventConsumer>) {
        self.consumers.write().push(ConsumerSlot { consumer });
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }

    /// Sequence number of the next event.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Emit an event to every registered consumer, in order. Returns the
    /// frozen event for callers that need the sequence number.
    pub fn emit(&self, kind: EventKind) -> Event {
        let event = Event {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            kind,
        };

        let mut slow: Vec<usize> = Vec::new();
        {
            let consumers = self.consumers.read();
            for (i, slot) in consumers.iter().enumerate() {
                let start = std::time::Instant::now();
                slot.consumer.on_event(&event);
                if start.elapsed() > self.slow_threshold {
                    warn!(
                        consumer = slot.consumer.name(),
                        threshold_ms = self.slow_threshold.as_millis() as u64,
                        "slow event consumer detached"
                    );
                    slow.push(i);
                }
            }
        }
        if !slow.is_empty() {
            let mut consumers = self.consumers.write();
            for i in slow.into_iter().rev() {
                if i < consumers.len() {
                    consumers.remove(i);
                }
            }
        }
        event
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl EventConsumer for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn on_event(&self, event: &Event) {
            self.seen.lock().unwrap().push(event.sequence);
        }
    }

    struct Sleeper;

    impl EventConsumer for Sleeper {
        fn name(&self) -> &str {
            "sleeper"
        }
        fn on_event(&self, _event: &Event) {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn detected(path: &str) -> EventKind {
        EventKind::DocumentDetected {
            source_path: path.to_string(),
            source_hash: "h".to_string(),
        }
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let bus = EventBus::default();
        let a = bus.emit(detected("a.md"));
        let b = bus.emit(detected("b.md"));
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
    }

    #[test]
    fn test_in_order_delivery() {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.register(Box::new(Recorder { seen: seen.clone() }));

        for path in ["a.md", "b.md", "c.md"] {
            bus.emit(detected(path));
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_slow_consumer_detached() {
        let bus = EventBus::new(Duration::from_millis(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.register(Box::new(Sleeper));
        bus.register(Box::new(Recorder { seen: seen.clone() }));
        assert_eq!(bus.consumer_count(), 2);

        bus.emit(detected("a.md"));
        // The sleeper got the first event, then was detached.
        assert_eq!(bus.consumer_count(), 1);

        bus.emit(detected("b.md"));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = Event {
            sequence: 7,
            timestamp: Utc::now(),
            kind: EventKind::QueryFailed {
                query: "x".to_string(),
                code: "NODE_NOT_FOUND".to_string(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "query-failed");
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["code"], "NODE_NOT_FOUND");
    }
}
