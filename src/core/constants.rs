//! Gameplay Tuning Constants
//!
//! Speeds and cooldowns are expressed per frame-equivalent: they are
//! multiplied by the normalized delta-time scalar (`DeltaTime::target`)
//! so the simulation behaves the same at any wall-clock tick rate.

/// Largest raw delta accepted by a tracker (seconds).
pub const MAX_DELTA: f64 = 0.25;

/// Maximum distance a ray travels before giving up (world units).
pub const MAX_RAY_DISTANCE: f64 = 1024.0;

/// Nominal receive-buffer size for one steady-state message (bytes).
pub const RECV_BUFFER_SIZE: usize = 32_768;

/// How long server events stay replayable (seconds).
pub const EVENT_LIFESPAN_SECS: f64 = 5.0;

/// Edge length of one map cell (world units).
pub const TILE_SIZE: f64 = 32.0;

/// Default map dimensions in cells.
pub const DEFAULT_MAP_WIDTH: usize = 32;
/// Default map dimensions in cells.
pub const DEFAULT_MAP_HEIGHT: usize = 32;

/// Largest accepted map side (cells).
pub const MAX_MAP_DIM: usize = 1024;

// =============================================================================
// PLAYERS
// =============================================================================

/// Player movement speed (units per frame-equivalent).
pub const PLAYER_SPEED: f64 = 4.0;

/// Player collider radius.
pub const PLAYER_RADIUS: f64 = 8.0;

/// Player starting hit points.
pub const PLAYER_HP: u32 = 3;

/// Frames between two shots.
pub const ATTACK_COOLDOWN: f64 = 20.0;

/// Frames a downed player stays inactive before respawning.
pub const DEACTIVATION_FRAMES: f64 = 180.0;

/// Longest accepted player name.
pub const MAX_NAME_LEN: usize = 24;

/// Score credited to the owner of a killing shot.
pub const KILL_SCORE: u32 = 10;

// =============================================================================
// PROJECTILES
// =============================================================================

/// Projectile speed (units per frame-equivalent).
pub const PROJECTILE_SPEED: f64 = 12.0;

/// Projectile collider radius.
pub const PROJECTILE_RADIUS: f64 = 2.0;

/// Damage dealt by a player's shots.
pub const PLAYER_DAMAGE: u32 = 1;

/// Frames a laser beam stays visible.
pub const LASER_TTL: f64 = 6.0;

/// Laser damage multiplier over the shooter's base damage.
pub const LASER_DAMAGE_FACTOR: u32 = 2;

/// Laser cooldown multiplier over `ATTACK_COOLDOWN`.
pub const LASER_COOLDOWN_FACTOR: f64 = 3.0;

// =============================================================================
// OBSTACLES
// =============================================================================

/// Collider radius of a barrel.
pub const BARREL_RADIUS: f64 = 10.0;

/// Height of a short barrel.
pub const BARREL_SHORT_HEIGHT: f64 = 16.0;

/// Height of a tall barrel.
pub const BARREL_TALL_HEIGHT: f64 = 40.0;
