//! Event Pipeline
//!
//! Everything that drives the simulation is an `EventInstance`: local input
//! and UI signals, the gameplay intents a client sends to the server, and
//! the gameplay signals the server broadcasts back.
//!
//! Local kinds never leave the process. The server keeps broadcastable
//! events in `ServerEvents`, a short-lived log that each session reads
//! through its own `SessionCursor`.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::{Duration, Instant};

use serde::{Serialize, Deserialize};

use crate::game::entity::{EntityId, Team};
use crate::game::mode::MatchPhase;

/// Closed set of event kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Frame boundary
    Tick,

    // Raw directional input, folded into `Move` by `input::enhance`
    /// Forward held
    MoveForward,
    /// Backward held
    MoveBackward,
    /// Strafe left held
    MoveLeft,
    /// Strafe right held
    MoveRight,

    /// Move at `angle` degrees relative to facing.
    Move {
        /// Relative bearing
        angle: f64,
        /// Fraction of full speed, `[0, 1]`
        magnitude: f64,
    },
    /// Turn by `delta` degrees.
    Rotate {
        /// Rotation delta
        delta: f64,
    },
    /// Fire a projectile.
    Shoot,
    /// Fire a laser beam.
    ShootLaser,
    /// Join a team.
    SelectTeam {
        /// Requested team
        team: Team,
    },
    /// Change display name.
    Rename {
        /// New name
        name: String,
    },

    /// Leave the game
    Quit,
    /// Pause menu
    Pause,
    /// Scoreboard overlay
    ToggleScoreboard,
    /// Window resized
    Resize {
        /// New width
        width: u32,
        /// New height
        height: u32,
    },

    /// An entity took damage.
    EntityHit {
        /// Victim
        target: EntityId,
        /// Projectile or beam that hit
        attacker: EntityId,
        /// Damage dealt
        damage: u32,
    },
    /// An entity died.
    EntityKilled {
        /// Victim
        target: EntityId,
        /// Shooter credited with the kill
        killer: Option<EntityId>,
    },
    /// A player joined.
    PlayerJoined {
        /// New player
        id: EntityId,
        /// Player name
        name: String,
    },
    /// A player left.
    PlayerLeft {
        /// Departed player
        id: EntityId,
    },
    /// Match phase changed.
    MatchPhaseChanged {
        /// New phase
        phase: MatchPhase,
    },
}

impl EventKind {
    /// Input/UI signals that stay on the local machine.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            EventKind::Tick
                | EventKind::MoveForward
                | EventKind::MoveBackward
                | EventKind::MoveLeft
                | EventKind::MoveRight
                | EventKind::Quit
                | EventKind::Pause
                | EventKind::ToggleScoreboard
                | EventKind::Resize { .. }
        )
    }

    /// Gameplay intents a client may send.
    pub fn is_intent(&self) -> bool {
        matches!(
            self,
            EventKind::Move { .. }
                | EventKind::Rotate { .. }
                | EventKind::Shoot
                | EventKind::ShootLaser
                | EventKind::SelectTeam { .. }
                | EventKind::Rename { .. }
        )
    }
}

/// A timestamped event.
///
/// On the wire the kind is flattened next to the timestamp:
/// `{"timestamp":1.5,"type":"rotate","delta":15.0}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventInstance {
    /// Seconds on the producer's clock
    pub timestamp: f64,
    /// Kind and payload
    #[serde(flatten)]
    pub kind: EventKind,
}

impl EventInstance {
    /// Create an event.
    pub fn new(timestamp: f64, kind: EventKind) -> Self {
        Self { timestamp, kind }
    }

    /// Never transmitted to the remote peer.
    #[inline]
    pub fn is_local(&self) -> bool {
        self.kind.is_local()
    }
}

/// Events collected during one frame.
#[derive(Clone, Debug, Default)]
pub struct EventList {
    events: Vec<EventInstance>,
}

impl EventList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&mut self, event: EventInstance) {
        self.events.push(event);
    }

    /// Append many events.
    pub fn extend<I: IntoIterator<Item = EventInstance>>(&mut self, events: I) {
        self.events.extend(events);
    }

    /// Events in arrival order.
    pub fn as_slice(&self) -> &[EventInstance] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Non-local events, ready to send.
    pub fn transmittable(&self) -> Vec<EventInstance> {
        self.events.iter().filter(|e| !e.is_local()).cloned().collect()
    }

    /// Take all events, leaving the list empty for the next frame.
    pub fn take(&mut self) -> Vec<EventInstance> {
        std::mem::take(&mut self.events)
    }
}

// =============================================================================
// SERVER EVENT LOG
// =============================================================================

/// Per-session read position in `ServerEvents`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionCursor {
    last_seen: u64,
}

impl SessionCursor {
    /// Id of the newest event already delivered.
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }
}

#[derive(Clone, Debug)]
struct LoggedEvent {
    logged_at: Instant,
    event: EventInstance,
}

/// Append-only server event log with expiry.
///
/// Ids are strictly increasing. Entries older than the lifespan are purged
/// on every access, so delivery is only guaranteed to sessions that poll
/// within the lifespan.
#[derive(Debug)]
pub struct ServerEvents {
    entries: BTreeMap<u64, LoggedEvent>,
    next_id: u64,
    lifespan: Duration,
}

impl ServerEvents {
    /// Create a log.
    pub fn new(lifespan: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            lifespan,
        }
    }

    /// Log an event now.
    pub fn push(&mut self, event: EventInstance) -> Option<u64> {
        self.push_at(event, Instant::now())
    }

    /// Log an event at `now`. Local events are refused.
    pub fn push_at(&mut self, event: EventInstance, now: Instant) -> Option<u64> {
        self.purge(now);
        if event.is_local() {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, LoggedEvent { logged_at: now, event });
        Some(id)
    }

    /// Events the session has not seen yet.
    pub fn events_to_send(&mut self, cursor: &mut SessionCursor) -> Vec<EventInstance> {
        self.events_to_send_at(cursor, Instant::now())
    }

    /// Events the session has not seen yet, as of `now`.
    ///
    /// Advances the cursor past everything returned.
    pub fn events_to_send_at(&mut self, cursor: &mut SessionCursor, now: Instant) -> Vec<EventInstance> {
        self.purge(now);
        let mut out = Vec::new();
        for (&id, logged) in self.entries.range((Bound::Excluded(cursor.last_seen), Bound::Unbounded)) {
            out.push(logged.event.clone());
            cursor.last_seen = id;
        }
        out
    }

    /// Cursor that skips everything logged so far.
    pub fn cursor_at_end(&self) -> SessionCursor {
        SessionCursor { last_seen: self.next_id - 1 }
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no live entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge(&mut self, now: Instant) {
        let lifespan = self.lifespan;
        self.entries
            .retain(|_, logged| now.saturating_duration_since(logged.logged_at) <= lifespan);
    }
}
