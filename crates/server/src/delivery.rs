//! Real-time delivery.
//!
//! Publish/subscribe rooms keyed by session id. Events within one room are
//! delivered in emission order and carry a monotonic per-session sequence
//! number so consumers can deduplicate under at-least-once delivery. Across
//! sessions no ordering is promised.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

const ROOM_BUFFER: usize = 256;

/// Advisory progress phases for one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingPhase {
    /// Context assembly started.
    Analyzing,
    /// Model fan-out is running.
    Processing,
    /// The judge is synthesizing.
    Consensus,
    /// Persisting and delivering the answer.
    Finalizing,
}

/// Event vocabulary published to session rooms.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Advisory progress tick; consumers may coalesce.
    ProcessingStatus {
        /// Owning session.
        session_id: i64,
        /// Generation phase.
        phase: ProcessingPhase,
        /// Human-readable progress note.
        message: String,
    },
    /// Terminal event for one user turn.
    NewMessage {
        /// Owning session.
        session_id: i64,
        /// Message role, `assistant` for generated answers.
        role: String,
        /// Message content.
        content: String,
        /// Model tag for single-model answers.
        #[serde(skip_serializing_if = "Option::is_none")]
        model_used: Option<String>,
        /// Consensus payload for assistant messages.
        #[serde(skip_serializing_if = "Option::is_none")]
        consensus_data: Option<Value>,
    },
    /// A session was created for a null session id.
    SessionCreated {
        /// The new session.
        session_id: i64,
        /// Derived title.
        title: String,
    },
    /// Developer-facing failure signal.
    Error {
        /// Owning session, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<i64>,
        /// Stable error kind.
        kind: String,
        /// Developer message; never shown to end users.
        message: String,
    },
}

/// An event stamped with its per-session sequence number.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    /// Monotonic per-session counter for deduplication.
    pub event_seq: u64,
    /// The payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

struct Room {
    tx: broadcast::Sender<SessionEvent>,
    seq: AtomicU64,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(ROOM_BUFFER);
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }
}

/// The pub/sub hub over session rooms.
#[derive(Default)]
pub struct DeliveryHub {
    rooms: DashMap<i64, Room>,
}

impl DeliveryHub {
    /// An empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a session room.
    pub fn subscribe(&self, session_id: i64) -> broadcast::Receiver<SessionEvent> {
        self.rooms.entry(session_id).or_insert_with(Room::new).tx.subscribe()
    }

    /// Publish an event to a session room.
    ///
    /// Publishing without subscribers still advances the sequence counter so
    /// late joiners observe gaps rather than duplicates.
    pub fn publish(&self, session_id: i64, payload: EventPayload) {
        let room = self.rooms.entry(session_id).or_insert_with(Room::new);
        let event_seq = room.seq.fetch_add(1, Ordering::SeqCst);

        let event = SessionEvent { event_seq, payload };

        // A send error only means nobody is subscribed right now.
        let _ = room.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(session_id: i64, phase: ProcessingPhase) -> EventPayload {
        EventPayload::ProcessingStatus {
            session_id,
            phase,
            message: "tick".into(),
        }
    }

    #[tokio::test]
    async fn events_arrive_in_emission_order_with_monotonic_seq() {
        let hub = DeliveryHub::new();
        let mut rx = hub.subscribe(1);

        hub.publish(1, status(1, ProcessingPhase::Analyzing));
        hub.publish(1, status(1, ProcessingPhase::Processing));
        hub.publish(1, status(1, ProcessingPhase::Consensus));

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        let c = rx.recv().await.unwrap();

        assert!(a.event_seq < b.event_seq && b.event_seq < c.event_seq);
        assert!(matches!(a.payload, EventPayload::ProcessingStatus { phase: ProcessingPhase::Analyzing, .. }));
        assert!(matches!(c.payload, EventPayload::ProcessingStatus { phase: ProcessingPhase::Consensus, .. }));
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let hub = DeliveryHub::new();
        let mut room_a = hub.subscribe(1);
        let mut room_b = hub.subscribe(2);

        hub.publish(1, status(1, ProcessingPhase::Processing));

        let received = room_a.recv().await.unwrap();
        assert!(matches!(received.payload, EventPayload::ProcessingStatus { session_id: 1, .. }));

        // Room B sees nothing.
        assert!(matches!(
            room_b.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn event_json_shape_is_stable() {
        let event = SessionEvent {
            event_seq: 7,
            payload: EventPayload::SessionCreated {
                session_id: 3,
                title: "Hello".into(),
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_created");
        assert_eq!(json["event_seq"], 7);
        assert_eq!(json["session_id"], 3);
        assert_eq!(json["title"], "Hello");
    }
}
