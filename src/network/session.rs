//! Simulation Sessions
//!
//! The world, the server event log, the per-player delta-time trackers and
//! the per-session log cursors are owned by a single simulation task.
//! Connection tasks never touch them; they send `SimCommand`s over a
//! channel and wait for the reply. Commands are applied one at a time, in
//! arrival order, between the server's own fixed-rate ticks.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::timing::{DeltaTimeRegistry, TrackerId};
use crate::game::entity::EntityId;
use crate::game::events::{EventInstance, EventKind, ServerEvents, SessionCursor};
use crate::game::world::{TickReport, World};
use crate::network::protocol::WorldSnapshot;

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Player is not in the world.
    #[error("Player {0} not found")]
    PlayerNotFound(EntityId),

    /// Simulation task has stopped.
    #[error("Simulation is not running")]
    SimulationClosed,
}

/// Authoritative server state.
#[derive(Debug)]
pub struct Simulation {
    world: World,
    log: ServerEvents,
    trackers: DeltaTimeRegistry,
    cursors: BTreeMap<EntityId, SessionCursor>,
}

impl Simulation {
    /// Wrap a world.
    pub fn new(world: World, tick_rate: u32, event_lifespan: Duration) -> Self {
        Self {
            world,
            log: ServerEvents::new(event_lifespan),
            trackers: DeltaTimeRegistry::new(tick_rate),
            cursors: BTreeMap::new(),
        }
    }

    /// The world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Spawn a player for a new connection.
    pub fn join(&mut self, name: &str) -> EntityId {
        let id = self.world.spawn_player(name);
        self.cursors.insert(id, self.log.cursor_at_end());

        let name = self.world.entity(id).and_then(|e| e.name()).unwrap_or(name).to_string();
        info!("Player {} ({}) joined", id, name);
        self.log.push(EventInstance::new(self.world.time(), EventKind::PlayerJoined { id, name }));
        id
    }

    /// Replay a player's batch on that player's tracker and build its reply.
    pub fn apply(&mut self, player: EntityId, events: &[EventInstance]) -> Result<WorldSnapshot, SessionError> {
        if self.world.entity(player).is_none() {
            return Err(SessionError::PlayerNotFound(player));
        }
        if !events.is_empty() {
            let tracker = self.trackers.get_mut(TrackerId::Player(player));
            let report = self.world.update_async(events, player, tracker);
            self.record(report);
        }
        Ok(self.snapshot_for(Some(player)))
    }

    /// Remove a departed player.
    pub fn leave(&mut self, player: EntityId) {
        self.trackers.remove(TrackerId::Player(player));
        self.cursors.remove(&player);
        if self.world.remove(player).is_some() {
            info!("Player {} left", player);
            self.log.push(EventInstance::new(self.world.time(), EventKind::PlayerLeft { id: player }));
        }
    }

    /// Run the server's own tick from the wall clock.
    pub fn tick(&mut self) -> usize {
        self.tick_at(Instant::now())
    }

    /// Run the server's own tick as of `now`. Returns the number of events
    /// logged.
    pub fn tick_at(&mut self, now: Instant) -> usize {
        let dt = self.trackers.get_mut(TrackerId::Server);
        dt.update_at(now);
        let report = self.world.update(&[], None, dt);
        self.record(report)
    }

    /// Snapshot for one session, advancing its log cursor.
    pub fn snapshot_for(&mut self, player: Option<EntityId>) -> WorldSnapshot {
        let events = match player.and_then(|id| self.cursors.get_mut(&id)) {
            Some(cursor) => self.log.events_to_send(cursor),
            None => Vec::new(),
        };
        WorldSnapshot {
            time: self.world.time(),
            entities: self.world.snapshot_entities(),
            mode: self.world.mode().clone(),
            events,
            state_hash: self.world.state_hash(),
            controlled: player,
            leaderboard: self.world.leaderboard(),
            partial: false,
        }
    }

    fn record(&mut self, report: TickReport) -> usize {
        if !report.removed.is_empty() {
            debug!("Reaped {} entities", report.removed.len());
        }
        let count = report.events.len();
        for event in report.events {
            self.log.push(event);
        }
        count
    }

    fn handle(&mut self, command: SimCommand) {
        match command {
            SimCommand::Join { name, reply } => {
                let _ = reply.send(self.join(&name));
            }
            SimCommand::Apply { player, events, reply } => {
                let _ = reply.send(self.apply(player, &events));
            }
            SimCommand::Leave { player } => self.leave(player),
            SimCommand::Snapshot { player, reply } => {
                let _ = reply.send(self.snapshot_for(player));
            }
        }
    }
}

// =============================================================================
// SIMULATION TASK
// =============================================================================

/// Requests handled by the simulation task.
#[derive(Debug)]
pub enum SimCommand {
    /// Spawn a player.
    Join {
        /// Requested name
        name: String,
        /// New player id
        reply: oneshot::Sender<EntityId>,
    },
    /// Apply a player's batch.
    Apply {
        /// Controlled entity
        player: EntityId,
        /// Decoded events
        events: Vec<EventInstance>,
        /// Snapshot for the player
        reply: oneshot::Sender<Result<WorldSnapshot, SessionError>>,
    },
    /// Remove a player.
    Leave {
        /// Departing player
        player: EntityId,
    },
    /// Read a snapshot.
    Snapshot {
        /// Session whose cursor advances, if any
        player: Option<EntityId>,
        /// Snapshot
        reply: oneshot::Sender<WorldSnapshot>,
    },
}

/// Cloneable handle to the simulation task.
#[derive(Debug, Clone)]
pub struct SimHandle {
    tx: mpsc::Sender<SimCommand>,
}

impl SimHandle {
    /// Spawn a player.
    pub async fn join(&self, name: &str) -> Result<EntityId, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SimCommand::Join { name: name.to_string(), reply }).await?;
        rx.await.map_err(|_| SessionError::SimulationClosed)
    }

    /// Apply a batch and get the player's snapshot.
    pub async fn apply(&self, player: EntityId, events: Vec<EventInstance>) -> Result<WorldSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SimCommand::Apply { player, events, reply }).await?;
        rx.await.map_err(|_| SessionError::SimulationClosed)?
    }

    /// Remove a player.
    pub async fn leave(&self, player: EntityId) -> Result<(), SessionError> {
        self.send(SimCommand::Leave { player }).await
    }

    /// Read a snapshot.
    pub async fn snapshot(&self, player: Option<EntityId>) -> Result<WorldSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SimCommand::Snapshot { player, reply }).await?;
        rx.await.map_err(|_| SessionError::SimulationClosed)
    }

    async fn send(&self, command: SimCommand) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::SimulationClosed)
    }
}

/// Start the simulation task.
///
/// The task serves commands and runs the server tick at `tick_rate` until
/// shutdown is signalled or every handle is dropped.
pub fn spawn_simulation(
    mut sim: Simulation,
    tick_rate: u32,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> (SimHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<SimCommand>(256);
    let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));

    let task = tokio::spawn(async move {
        let mut ticker = interval(tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => sim.handle(command),
                    None => {
                        debug!("All simulation handles dropped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    sim.tick();
                }
                _ = shutdown_rx.recv() => {
                    info!("Simulation stopping");
                    break;
                }
            }
        }

        if !sim.cursors.is_empty() {
            warn!("Simulation stopped with {} players connected", sim.cursors.len());
        }
    });

    (SimHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::Point;
    use crate::game::map::Map;
    use crate::game::mode::GameMode;

    fn sim() -> Simulation {
        let mut world = World::new(Map::new(10, 10, 32.0), GameMode::default(), 5);
        world.set_spawn_points(vec![Point::new(80.0, 80.0)]);
        Simulation::new(world, 60, Duration::from_secs(5))
    }

    fn joined(events: &[EventInstance]) -> Vec<EntityId> {
        events
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::PlayerJoined { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_join_is_announced_once() {
        let mut s = sim();
        let a = s.join("ann");
        let b = s.join("ben");

        let first = s.snapshot_for(Some(a));
        assert_eq!(joined(&first.events), vec![a, b]);
        assert_eq!(first.controlled, Some(a));
        assert!(s.snapshot_for(Some(a)).events.is_empty());

        // A later joiner does not see earlier joins
        assert_eq!(joined(&s.snapshot_for(Some(b)).events), vec![b]);
    }

    #[test]
    fn test_apply_moves_the_player() {
        let mut s = sim();
        let id = s.join("ann");
        let mv = EventInstance::new(0.0, EventKind::Move { angle: 0.0, magnitude: 1.0 });

        let snapshot = s.apply(id, &[mv]).unwrap();
        let me = snapshot.entities.iter().find(|e| e.id == id).unwrap();
        assert!((me.position.x - 84.0).abs() < 1e-9);
        assert_eq!(snapshot.state_hash, s.world().state_hash());
    }

    #[test]
    fn test_apply_for_unknown_player() {
        let mut s = sim();
        assert_eq!(s.apply(42, &[]), Err(SessionError::PlayerNotFound(42)));
    }

    #[test]
    fn test_leave_is_announced() {
        let mut s = sim();
        let a = s.join("ann");
        let b = s.join("ben");
        s.snapshot_for(Some(a));

        s.leave(b);
        assert!(s.world().entity(b).is_none());
        let events = s.snapshot_for(Some(a)).events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::PlayerLeft { id: b });
    }

    #[test]
    fn test_server_tick_logs_phase_change() {
        let mut s = sim();
        let a = s.join("ann");
        s.snapshot_for(Some(a));
        assert_eq!(s.tick(), 1);
        let events = s.snapshot_for(Some(a)).events;
        assert!(matches!(events[0].kind, EventKind::MatchPhaseChanged { .. }));
    }

    #[tokio::test]
    async fn test_simulation_task() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (handle, task) = spawn_simulation(sim(), 60, shutdown_rx);

        let id = handle.join("ann").await.unwrap();
        let snapshot = handle
            .apply(id, vec![EventInstance::new(0.0, EventKind::Rotate { delta: 90.0 })])
            .await
            .unwrap();
        let me = snapshot.entities.iter().find(|e| e.id == id).unwrap();
        assert!((me.rotation - 90.0).abs() < 1e-9);

        handle.leave(id).await.unwrap();
        let after = handle.snapshot(None).await.unwrap();
        assert!(after.entities.is_empty());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(handle.join("late").await, Err(SessionError::SimulationClosed));
    }
}
