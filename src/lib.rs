//! # Gridfire
//!
//! Authoritative simulation core for a tick-based multiplayer arena shooter.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         GRIDFIRE                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure primitives                           │
//! │  ├── geometry.rs - Points, segments, boxes, circles          │
//! │  ├── collision.rs- Intersection and overlap tests            │
//! │  ├── timing.rs   - Delta-time trackers                       │
//! │  ├── codec.rs    - Versioned structural wire codec           │
//! │  ├── hash.rs     - Snapshot state hashing                    │
//! │  └── rng.rs      - Seeded Xorshift128+ for spawn selection   │
//! │                                                              │
//! │  game/           - Simulation                                │
//! │  ├── entity.rs   - Tagged entity type and lifecycle          │
//! │  ├── map.rs      - Tile grid and DDA raycasting              │
//! │  ├── layout.rs   - Map files                                 │
//! │  ├── events.rs   - Events and the server event log           │
//! │  ├── input.rs    - Directional input folding                 │
//! │  ├── mode.rs     - Match phases and leaderboard              │
//! │  ├── world.rs    - Entity registry                           │
//! │  └── tick.rs     - Tick pipeline and client catch-up         │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── session.rs  - Simulation task and commands              │
//! │  ├── server.rs   - WebSocket server                          │
//! │  └── client.rs   - Background client session                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! The entity registry is owned by exactly one task. Server connections and
//! client sessions exchange messages with it; nothing else mutates it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::geometry::{Aabb, Circle, Line, Point};
pub use core::timing::DeltaTime;
pub use game::entity::{Entity, EntityId, Team};
pub use game::events::{EventInstance, EventKind};
pub use game::world::World;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;
