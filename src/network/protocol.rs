//! Protocol Messages
//!
//! Steady-state wire format. The handshake that precedes it is one raw
//! text frame each way carrying a version string; after that every frame
//! is a versioned record from `core::codec`.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use crate::core::codec::{decode, encode, CodecError, MAX_MESSAGE_SIZE};
use crate::game::entity::{Entity, EntityId};
use crate::game::events::EventInstance;
use crate::game::mode::{GameMode, LeaderboardEntry};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The client's outbound events since its last frame.
    ///
    /// Events travel as raw records so one malformed event does not cost
    /// the rest of the batch.
    Batch {
        /// Encoded `EventInstance`s
        events: Vec<Value>,
    },
}

impl ClientMessage {
    /// Build a batch, dropping local-only events.
    pub fn batch(events: &[EventInstance]) -> Self {
        let events = events
            .iter()
            .filter(|e| !e.is_local())
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect();
        ClientMessage::Batch { events }
    }

    /// Decode the carried events. Malformed and local events are skipped.
    pub fn into_events(self) -> Vec<EventInstance> {
        let ClientMessage::Batch { events } = self;
        events
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<EventInstance>(raw) {
                Ok(event) if !event.is_local() => Some(event),
                Ok(event) => {
                    debug!("Dropping local event from peer: {:?}", event.kind);
                    None
                }
                Err(e) => {
                    debug!("Dropping malformed event: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<String, CodecError> {
        encode(self)
    }

    /// Decode from the wire.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        decode(text)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Authoritative world state sent after every client batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// World clock (seconds)
    pub time: f64,
    /// Every entity, in id order
    pub entities: Vec<Entity>,
    /// Game mode and phase
    pub mode: GameMode,
    /// Logged events this client has not seen yet
    pub events: Vec<EventInstance>,
    /// Hex SHA-256 of the entity registry
    pub state_hash: String,
    /// The receiving client's player
    pub controlled: Option<EntityId>,
    /// Current standings
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Set when content was shed to fit the frame limit; `entities` then
    /// lists only the entities nearest the controlled player
    #[serde(default)]
    pub partial: bool,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// World snapshot.
    Snapshot(WorldSnapshot),
}

impl ServerMessage {
    /// Encode for the wire.
    pub fn encode(&self) -> Result<String, CodecError> {
        encode(self)
    }

    /// Encode a snapshot, shedding content until it fits one frame.
    ///
    /// Unseen events go first, then entities farthest from the controlled
    /// player. The controlled player itself is always kept and
    /// `state_hash` still describes the full registry.
    pub fn encode_snapshot(snapshot: WorldSnapshot) -> Result<String, CodecError> {
        let (mut snapshot, first) = try_encode(snapshot);
        match first {
            Err(CodecError::Oversized { .. }) => {}
            done => return done,
        }

        snapshot.partial = true;
        snapshot.events.clear();
        let (mut snapshot, result) = try_encode(snapshot);
        match result {
            Err(CodecError::Oversized { .. }) => {}
            done => return done,
        }

        let ranked = rank_by_proximity(std::mem::take(&mut snapshot.entities), snapshot.controlled);

        // Largest prefix of `ranked` that fits
        let (mut lo, mut hi) = (0usize, ranked.len());
        let mut best = None;
        while lo <= hi {
            let keep = lo + (hi - lo) / 2;
            snapshot.entities = in_id_order(&ranked[..keep]);
            let (back, result) = try_encode(snapshot);
            snapshot = back;
            match result {
                Ok(text) => {
                    best = Some(text);
                    lo = keep + 1;
                }
                Err(CodecError::Oversized { .. }) => {
                    if keep == 0 {
                        break;
                    }
                    hi = keep - 1;
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(text) = best {
            debug!("Snapshot trimmed to fit {} byte frame", MAX_MESSAGE_SIZE);
            return Ok(text);
        }

        // Nothing fits alongside the standings; drop them too
        snapshot.leaderboard.clear();
        snapshot.entities = in_id_order(&ranked[..ranked.len().min(1)]);
        try_encode(snapshot).1
    }

    /// Decode from the wire.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        decode(text)
    }
}

fn try_encode(snapshot: WorldSnapshot) -> (WorldSnapshot, Result<String, CodecError>) {
    let message = ServerMessage::Snapshot(snapshot);
    let result = message.encode();
    let ServerMessage::Snapshot(snapshot) = message;
    (snapshot, result)
}

/// Controlled player first, then everyone else nearest first.
fn rank_by_proximity(entities: Vec<Entity>, controlled: Option<EntityId>) -> Vec<Entity> {
    let anchor = controlled
        .and_then(|id| entities.iter().find(|e| e.id == id))
        .map(|e| e.position);
    let mut ranked = entities;
    ranked.sort_by(|a, b| {
        let own = |e: &Entity| Some(e.id) != controlled;
        let dist = |e: &Entity| anchor.map_or(0.0, |p| p.distance(e.position));
        own(a)
            .cmp(&own(b))
            .then(dist(a).total_cmp(&dist(b)))
            .then(a.id.cmp(&b.id))
    });
    ranked
}

fn in_id_order(entities: &[Entity]) -> Vec<Entity> {
    let mut kept = entities.to_vec();
    kept.sort_by_key(|e| e.id);
    kept
}

// =============================================================================
// FRAMING
// =============================================================================

/// Outcome of waiting for the next text frame.
#[derive(Debug)]
pub enum Inbound {
    /// A text frame
    Text(String),
    /// Peer closed the connection
    Closed,
    /// Nothing arrived in time
    TimedOut,
    /// Transport failure
    Failed(tungstenite::Error),
}

/// Wait up to `limit` for the next text frame, skipping control and
/// binary frames.
pub async fn read_text<S>(ws: &mut S, limit: Duration) -> Inbound
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return Inbound::TimedOut,
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Inbound::Closed,
            Ok(Some(Err(e))) => return Inbound::Failed(e),
            Ok(Some(Ok(Message::Text(text)))) => return Inbound::Text(text),
            Ok(Some(Ok(other))) => debug!("Skipping non-text frame ({} bytes)", other.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::Point;
    use crate::game::events::EventKind;

    #[test]
    fn test_batch_drops_local_events() {
        let events = vec![
            EventInstance::new(0.5, EventKind::Pause),
            EventInstance::new(0.5, EventKind::Rotate { delta: 15.0 }),
            EventInstance::new(0.5, EventKind::MoveForward),
        ];
        let msg = ClientMessage::batch(&events);
        let text = msg.encode().unwrap();
        assert!(text.contains("\"v\":1"));

        let back = ClientMessage::decode(&text).unwrap().into_events();
        assert_eq!(back, vec![EventInstance::new(0.5, EventKind::Rotate { delta: 15.0 })]);
    }

    #[test]
    fn test_malformed_event_is_skipped_alone() {
        let text = r#"{"v":1,"type":"batch","events":[
            {"timestamp":1.0,"type":"shoot"},
            {"timestamp":1.0,"type":"rotate"},
            {"timestamp":1.0,"type":"teleport","x":5},
            {"timestamp":1.0,"type":"quit"},
            {"timestamp":2.0,"type":"move","angle":90.0,"magnitude":1.0}
        ]}"#;
        let events = ClientMessage::decode(text).unwrap().into_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Shoot);
        assert_eq!(events[1].kind, EventKind::Move { angle: 90.0, magnitude: 1.0 });
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let text = r#"{"v":7,"type":"batch","events":[]}"#;
        assert!(matches!(
            ClientMessage::decode(text),
            Err(CodecError::VersionMismatch { found: 7, .. })
        ));
    }

    #[test]
    fn test_expression_payloads_are_just_bad_json() {
        for text in ["__import__('os')", "a = 1; b = 2", "print(1)"] {
            assert!(ClientMessage::decode(text).is_err());
        }
    }

    #[test]
    fn test_snapshot_survives_the_wire() {
        let mut player = Entity::player("ann", Point::new(10.0, 20.0), None);
        player.id = 4;
        let snapshot = WorldSnapshot {
            time: 3.5,
            entities: vec![player],
            mode: GameMode::default(),
            events: vec![EventInstance::new(3.0, EventKind::PlayerLeft { id: 2 })],
            state_hash: "ab".repeat(32),
            controlled: Some(4),
            leaderboard: Vec::new(),
            partial: false,
        };
        let msg = ServerMessage::Snapshot(snapshot);
        let back = ServerMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_crowded_snapshot_is_trimmed_to_fit() {
        let mut entities: Vec<Entity> = (1..=400u64)
            .map(|i| {
                let mut barrel = Entity::barrel_short(Point::new(
                    (i % 20) as f64 * 40.0 + 20.0,
                    (i / 20) as f64 * 40.0 + 20.0,
                ));
                barrel.id = i;
                barrel
            })
            .collect();
        let mut me = Entity::player("me", Point::new(0.0, 0.0), None);
        me.id = 401;
        entities.push(me.clone());

        let snapshot = WorldSnapshot {
            time: 1.0,
            entities: entities.clone(),
            mode: GameMode::default(),
            events: vec![EventInstance::new(1.0, EventKind::PlayerLeft { id: 7 }); 50],
            state_hash: "00".repeat(32),
            controlled: Some(401),
            leaderboard: Vec::new(),
            partial: false,
        };
        assert!(matches!(
            ServerMessage::Snapshot(snapshot.clone()).encode(),
            Err(CodecError::Oversized { .. })
        ));

        let text = ServerMessage::encode_snapshot(snapshot).unwrap();
        assert!(text.len() <= MAX_MESSAGE_SIZE);

        let ServerMessage::Snapshot(back) = ServerMessage::decode(&text).unwrap();
        assert!(back.partial);
        assert!(back.events.is_empty());
        assert!(back.entities.len() > 1 && back.entities.len() < entities.len());
        assert!(back.entities.iter().any(|e| e.id == 401));
        assert!(back.entities.windows(2).all(|w| w[0].id < w[1].id));

        // Everything kept is at least as close as anything dropped
        let kept: Vec<u64> = back.entities.iter().map(|e| e.id).collect();
        let dist = |e: &Entity| e.position.distance(me.position);
        let farthest_kept = entities.iter().filter(|e| kept.contains(&e.id)).map(dist).fold(0.0, f64::max);
        let nearest_dropped = entities
            .iter()
            .filter(|e| !kept.contains(&e.id))
            .map(dist)
            .fold(f64::INFINITY, f64::min);
        assert!(farthest_kept <= nearest_dropped);
    }

    #[test]
    fn test_small_snapshot_is_sent_whole() {
        let mut player = Entity::player("ann", Point::new(10.0, 20.0), None);
        player.id = 1;
        let snapshot = WorldSnapshot {
            time: 0.0,
            entities: vec![player],
            mode: GameMode::default(),
            events: Vec::new(),
            state_hash: String::new(),
            controlled: Some(1),
            leaderboard: Vec::new(),
            partial: false,
        };
        let text = ServerMessage::encode_snapshot(snapshot.clone()).unwrap();
        assert_eq!(ServerMessage::decode(&text).unwrap(), ServerMessage::Snapshot(snapshot));
    }
}
