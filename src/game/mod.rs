//! Game Logic Module
//!
//! Everything that runs on the simulation thread.
//!
//! ## Module Structure
//!
//! - `entity`: Closed entity type, capabilities, lifecycle
//! - `map`: Tile grid, box collision, DDA raycasting
//! - `layout`: Map file parsing
//! - `events`: Event kinds, per-frame lists, server event log
//! - `input`: Directional input folding
//! - `mode`: Match phases and leaderboard
//! - `world`: Entity registry and id allocation
//! - `tick`: Per-tick pipeline and client catch-up

pub mod entity;
pub mod events;
pub mod input;
pub mod layout;
pub mod map;
pub mod mode;
pub mod tick;
pub mod world;

// Re-export key types
pub use entity::{Entity, EntityId, EntityKind, Team};
pub use events::{EventInstance, EventKind, EventList, ServerEvents};
pub use layout::{load_map, MapLayout};
pub use map::{Map, Ray, RayHit};
pub use mode::{GameMode, MatchPhase, ModeKind};
pub use world::{TickReport, World};
