//! Core primitives.
//!
//! Pure types and functions with no shared mutable state: geometry and
//! collision tests, delta-time tracking, the wire codec, state hashing and
//! the spawn RNG.

pub mod codec;
pub mod collision;
pub mod constants;
pub mod geometry;
pub mod hash;
pub mod rng;
pub mod timing;

// Re-export core types
pub use geometry::{Aabb, Axis, Circle, Line, Point};
pub use hash::StateHasher;
pub use rng::DeterministicRng;
pub use timing::{DeltaTime, DeltaTimeRegistry, TrackerId};
