//! Fire-and-forget lifecycle notifications.
//!
//! The orchestrator never waits on delivery: [`EventSink::publish`] returns nothing and every
//! implementation swallows its own failures.

use std::{fmt, sync::Mutex};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Lifecycle events published by competitions and tournaments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CompetitionStart,
    EventStart,
    EventEnd,
    LeaderboardUpdate,
    CompetitionEnd,
    CompetitionCancelled,
    TournamentStart,
    RoundStart,
    MatchEnd,
    RoundEnd,
    TournamentEnd,
    TournamentCancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CompetitionStart => "competition:start",
            EventKind::EventStart => "event:start",
            EventKind::EventEnd => "event:end",
            EventKind::LeaderboardUpdate => "leaderboard:update",
            EventKind::CompetitionEnd => "competition:end",
            EventKind::CompetitionCancelled => "competition:cancelled",
            EventKind::TournamentStart => "tournament:start",
            EventKind::RoundStart => "tournament:round_start",
            EventKind::MatchEnd => "tournament:match_end",
            EventKind::RoundEnd => "tournament:round_end",
            EventKind::TournamentEnd => "tournament:end",
            EventKind::TournamentCancelled => "tournament:cancelled",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: EventKind,
    /// Id of the competition or tournament the event belongs to.
    pub subject_id: String,
    pub payload: Value,
}

/// Outbound notification port.
pub trait EventSink: Send + Sync {
    fn publish(&self, kind: EventKind, subject_id: &str, payload: Value);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _kind: EventKind, _subject_id: &str, _payload: Value) {}
}

/// Mirrors notifications into the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, kind: EventKind, subject_id: &str, payload: Value) {
        info!(event = %kind, subject = subject_id, %payload);
    }
}

/// Forwards notifications to a tokio broadcast channel.
///
/// Having no subscriber is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        BroadcastSink { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, kind: EventKind, subject_id: &str, payload: Value) {
        let notification = Notification {
            kind,
            subject_id: subject_id.to_string(),
            payload,
        };
        if self.tx.send(notification).is_err() {
            debug!(event = %kind, "no subscriber for notification");
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("poisoned").clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events
            .lock()
            .expect("poisoned")
            .iter()
            .map(|n| n.kind)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, kind: EventKind, subject_id: &str, payload: Value) {
        self.events.lock().expect("poisoned").push(Notification {
            kind,
            subject_id: subject_id.to_string(),
            payload,
        });
    }
}
