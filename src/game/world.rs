//! World
//!
//! Owns the map, the entity registry and the match state. All mutation of
//! entities goes through `update`/`update_async` (see `tick`), which run on
//! a single simulation thread; network sessions hand their decoded events
//! to that thread instead of touching the registry themselves.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::core::constants::KILL_SCORE;
use crate::core::geometry::Point;
use crate::core::hash::StateHasher;
use crate::core::rng::DeterministicRng;
use crate::core::timing::DeltaTime;
use crate::game::entity::{Entity, EntityId, Team};
use crate::game::events::EventInstance;
use crate::game::input::enhance;
use crate::game::layout::MapLayout;
use crate::game::map::Map;
use crate::game::mode::{GameMode, LeaderboardEntry};
use crate::game::tick::{run_catch_up, run_tick};

/// Monotonic entity id source.
///
/// Ids start at 1 and are never reused. Allocation is a single atomic
/// increment, so ids stay unique even if several threads allocate.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Allocator whose first id is 1.
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Take the next id.
    #[inline]
    pub fn next_id(&self) -> EntityId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Make sure future ids are greater than `id`.
    pub fn bump_past(&self, id: EntityId) {
        self.next.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }
}

/// What happened during one update.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Gameplay signals to broadcast
    pub events: Vec<EventInstance>,
    /// Entities created
    pub spawned: Vec<EntityId>,
    /// Entities removed from the registry
    pub removed: Vec<EntityId>,
}

/// The simulated world.
#[derive(Debug)]
pub struct World {
    pub(crate) map: Map,
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    ids: IdAllocator,
    spawn_points: Vec<Point>,
    rng: DeterministicRng,
    pub(crate) time: f64,
    pub(crate) mode: GameMode,
    /// victim -> owner; settled once per tick
    pub(crate) pending_transfers: BTreeMap<EntityId, EntityId>,
}

impl World {
    /// Empty world on a map.
    pub fn new(map: Map, mode: GameMode, seed: u64) -> Self {
        Self {
            map,
            entities: BTreeMap::new(),
            ids: IdAllocator::new(),
            spawn_points: Vec::new(),
            rng: DeterministicRng::new(seed),
            time: 0.0,
            mode,
            pending_transfers: BTreeMap::new(),
        }
    }

    /// World built from a map file's layout.
    pub fn from_layout(layout: &MapLayout, mode: GameMode, seed: u64) -> Self {
        let mut world = Self::new(layout.build_map(), mode, seed);
        world.spawn_points = layout.spawns.clone();
        for entity in layout.build_entities() {
            world.spawn(entity);
        }
        world
    }

    /// Replace the spawn points.
    pub fn set_spawn_points(&mut self, points: Vec<Point>) {
        self.spawn_points = points;
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// The tile map.
    pub fn map(&self) -> &Map {
        &self.map
    }

    /// World clock (seconds).
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Game mode.
    pub fn mode(&self) -> &GameMode {
        &self.mode
    }

    /// Entity registry in id order.
    pub fn entities(&self) -> &BTreeMap<EntityId, Entity> {
        &self.entities
    }

    /// Look up an entity.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Look up an entity mutably.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Id allocator.
    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    // =========================================================================
    // REGISTRY
    // =========================================================================

    /// Insert an entity under a fresh id.
    pub fn spawn(&mut self, mut entity: Entity) -> EntityId {
        let id = self.ids.next_id();
        entity.id = id;
        self.entities.insert(id, entity);
        id
    }

    /// Remove an entity.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Pick a spawn point, or the map center if the map has none.
    pub fn next_spawn_point(&mut self) -> Point {
        match self.rng.choose(&self.spawn_points) {
            Some(p) => *p,
            None => self.map.center(),
        }
    }

    /// Team with fewer players (red on ties); `None` outside team modes.
    pub fn balanced_team(&self) -> Option<Team> {
        if !self.mode.kind.is_team() {
            return None;
        }
        let count = |team: Team| {
            self.entities.values().filter(|e| e.is_player() && e.team == Some(team)).count()
        };
        if count(Team::Blue) < count(Team::Red) {
            Some(Team::Blue)
        } else {
            Some(Team::Red)
        }
    }

    /// Spawn a player at a spawn point.
    pub fn spawn_player(&mut self, name: &str) -> EntityId {
        let position = self.next_spawn_point();
        let team = self.balanced_team();
        self.spawn(Entity::player(name, position, team))
    }

    /// Replace the registry with an authoritative snapshot.
    pub fn apply_snapshot(&mut self, entities: Vec<Entity>, time: f64, mode: GameMode) {
        self.entities = entities.into_iter().map(|e| (e.id, e)).collect();
        if let Some(max) = self.entities.keys().next_back() {
            self.ids.bump_past(*max);
        }
        self.time = time;
        self.mode = mode;
        self.pending_transfers.clear();
    }

    /// Copy of every entity, in id order.
    pub fn snapshot_entities(&self) -> Vec<Entity> {
        self.entities.values().cloned().collect()
    }

    /// Hex SHA-256 of the registry.
    pub fn state_hash(&self) -> String {
        let mut hasher = StateHasher::for_world();
        hasher.field(&(self.entities.len() as u64));
        for entity in self.entities.values() {
            entity.hash_into(&mut hasher);
        }
        hasher.finish_hex()
    }

    /// Current leaderboard.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.mode.leaderboard(&self.entities)
    }

    // =========================================================================
    // SIMULATION
    // =========================================================================

    /// Fold held directional intents into composite `Move` events.
    pub fn enhance(&self, events: &[EventInstance]) -> Vec<EventInstance> {
        enhance(events)
    }

    /// Run one full tick.
    ///
    /// `controlled` names the entity whose intents `events` carries; `None`
    /// advances projectiles, combat, timers and reaping only. Raw directional
    /// intents are folded first.
    pub fn update(
        &mut self,
        events: &[EventInstance],
        controlled: Option<EntityId>,
        dt: &DeltaTime,
    ) -> TickReport {
        let events = self.enhance(events);
        run_tick(self, &events, controlled, dt)
    }

    /// Replay a client's timestamped events on its own tracker.
    ///
    /// Only the controlled entity's intents and movement are applied; the
    /// rest of the world advances on the server's own tick.
    pub fn update_async(
        &mut self,
        events: &[EventInstance],
        controlled: EntityId,
        tracker: &mut DeltaTime,
    ) -> TickReport {
        run_catch_up(self, events, controlled, tracker)
    }

    /// Record that `owner` killed `victim`. Repeated calls for the same
    /// victim are ignored.
    pub(crate) fn queue_transfer(&mut self, victim: EntityId, owner: EntityId) {
        self.pending_transfers.entry(victim).or_insert(owner);
    }

    /// Credit queued kills to their owners.
    pub(crate) fn settle_transfers(&mut self) {
        for (victim, owner) in std::mem::take(&mut self.pending_transfers) {
            match self.entities.get_mut(&owner) {
                Some(credited) => {
                    credited.eliminations += 1;
                    credited.score += KILL_SCORE;
                    debug!("Entity {} credited with killing {}", owner, victim);
                }
                None => warn!("Kill of {} credited to missing entity {}", victim, owner),
            }
        }
    }
}
