//! Entity Model
//!
//! A single closed entity type. Behavior that used to hang off a class
//! hierarchy is expressed by the `EntityKind` tag plus the capability
//! flags (`can_move`, `can_attack`, `can_be_attacked`), so the systems in
//! `tick` dispatch on data instead of virtual calls.
//!
//! Entities never reference each other directly. A projectile remembers
//! its owner's id; crediting the owner is done by the world in a separate
//! pass (see `World::settle_transfers`).

use serde::{Serialize, Deserialize};

use crate::core::constants::{
    BARREL_RADIUS, BARREL_SHORT_HEIGHT, BARREL_TALL_HEIGHT, DEACTIVATION_FRAMES,
    LASER_DAMAGE_FACTOR, LASER_TTL, MAX_NAME_LEN, PLAYER_DAMAGE, PLAYER_HP, PLAYER_RADIUS,
    PLAYER_SPEED, PROJECTILE_RADIUS, PROJECTILE_SPEED,
};
use crate::core::geometry::{Aabb, Circle, Line, Point};
use crate::core::hash::StateHasher;

/// Unique entity identifier, allocated by the world.
pub type EntityId = u64;

/// Team affiliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    /// Red side
    Red,
    /// Blue side
    Blue,
}

impl Team {
    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            Team::Red => "red",
            Team::Blue => "blue",
        }
    }
}

/// True if both sides are set and equal. Team-less entities are hostile
/// to everyone.
#[inline]
pub fn same_team(a: Option<Team>, b: Option<Team>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

/// Behavior flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Entity may be displaced.
    pub can_move: bool,
    /// Entity may fire, or deals damage on contact.
    pub can_attack: bool,
    /// Entity can take damage.
    pub can_be_attacked: bool,
    /// Entity stays in the registry after death.
    pub no_deletion: bool,
}

impl Capabilities {
    const MOVE: u8 = 1;
    const ATTACK: u8 = 1 << 1;
    const ATTACKED: u8 = 1 << 2;
    const NO_DELETION: u8 = 1 << 3;

    /// Pack into a bit set.
    pub fn bits(self) -> u8 {
        let mut bits = 0;
        if self.can_move {
            bits |= Self::MOVE;
        }
        if self.can_attack {
            bits |= Self::ATTACK;
        }
        if self.can_be_attacked {
            bits |= Self::ATTACKED;
        }
        if self.no_deletion {
            bits |= Self::NO_DELETION;
        }
        bits
    }

    /// Unpack from a bit set.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            can_move: bits & Self::MOVE != 0,
            can_attack: bits & Self::ATTACK != 0,
            can_be_attacked: bits & Self::ATTACKED != 0,
            no_deletion: bits & Self::NO_DELETION != 0,
        }
    }
}

/// Variant-specific data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKind {
    /// Plain entity with no extra behavior.
    Generic,
    /// Controllable player.
    Player {
        /// Display name
        name: String,
        /// Frames left before a downed player respawns
        deactivated_for: f64,
    },
    /// Travelling shot.
    Projectile {
        /// Shooter
        owner: EntityId,
        /// Position before the last move; the hit test sweeps from here
        previous: Point,
    },
    /// Instantaneous beam.
    LaserRay {
        /// Shooter
        owner: EntityId,
        /// Beam length up to the first obstacle
        length: f64,
        /// Frames left before the beam disappears
        ttl: f64,
    },
    /// Short destructible barrel.
    BarrelShort,
    /// Tall destructible barrel.
    BarrelTall,
}

/// Entity error.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// hp above max_hp.
    #[error("hp {hp} exceeds max_hp {max_hp}")]
    HpOutOfRange {
        /// Current hp
        hp: u32,
        /// Max hp
        max_hp: u32,
    },
    /// NaN or infinite coordinate, angle, size or speed.
    #[error("entity {0} has a non-finite or negative measurement")]
    NonFinite(EntityId),
}

/// A simulated entity.
///
/// On the wire an entity is a fixed-order tuple (`EntityRecord`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "EntityRecord", try_from = "EntityRecord")]
pub struct Entity {
    /// Registry id (0 until spawned)
    pub id: EntityId,
    /// Variant data
    pub kind: EntityKind,
    /// Center position
    pub position: Point,
    /// Facing in degrees
    pub rotation: f64,
    /// Collider radius
    pub radius: f64,
    /// Current hit points
    pub hp: u32,
    /// Maximum hit points
    pub max_hp: u32,
    /// Team, if any
    pub team: Option<Team>,
    /// Score
    pub score: u32,
    /// Kills credited
    pub eliminations: u32,
    /// Alive flag
    pub alive: bool,
    /// Behavior flags
    pub capabilities: Capabilities,
    /// Units per frame-equivalent
    pub move_speed: f64,
    /// Damage dealt by this entity or the shots it fires
    pub damage: u32,
    /// Frames until the next shot is allowed
    pub attack_cooldown: f64,
    /// Per-frame velocity (projectiles)
    pub velocity: Point,
}

impl Entity {
    fn base(kind: EntityKind, position: Point, radius: f64, hp: u32) -> Self {
        Self {
            id: 0,
            kind,
            position,
            rotation: 0.0,
            radius,
            hp,
            max_hp: hp,
            team: None,
            score: 0,
            eliminations: 0,
            alive: true,
            capabilities: Capabilities::default(),
            move_speed: 0.0,
            damage: 0,
            attack_cooldown: 0.0,
            velocity: Point::ZERO,
        }
    }

    /// Generic inert entity.
    pub fn generic(position: Point) -> Self {
        Self::base(EntityKind::Generic, position, PLAYER_RADIUS, 1)
    }

    /// New player.
    pub fn player(name: &str, position: Point, team: Option<Team>) -> Self {
        let mut e = Self::base(
            EntityKind::Player { name: clean_name(name), deactivated_for: 0.0 },
            position,
            PLAYER_RADIUS,
            PLAYER_HP,
        );
        e.team = team;
        e.move_speed = PLAYER_SPEED;
        e.damage = PLAYER_DAMAGE;
        e.capabilities = Capabilities {
            can_move: true,
            can_attack: true,
            can_be_attacked: true,
            no_deletion: true,
        };
        e
    }

    /// Projectile fired by `owner` along its facing.
    ///
    /// Team and damage are inherited from the owner at spawn time.
    pub fn projectile(owner: &Entity) -> Self {
        let mut e = Self::base(
            EntityKind::Projectile { owner: owner.id, previous: owner.position },
            owner.position,
            PROJECTILE_RADIUS,
            1,
        );
        e.rotation = owner.rotation;
        e.team = owner.team;
        e.damage = owner.damage;
        e.move_speed = PROJECTILE_SPEED;
        e.velocity = Point::from_angle(owner.rotation) * PROJECTILE_SPEED;
        e.capabilities = Capabilities {
            can_move: true,
            can_attack: true,
            can_be_attacked: false,
            no_deletion: false,
        };
        e
    }

    /// Laser beam fired by `owner`, `length` long.
    pub fn laser(owner: &Entity, length: f64) -> Self {
        let mut e = Self::base(
            EntityKind::LaserRay { owner: owner.id, length, ttl: LASER_TTL },
            owner.position,
            0.0,
            1,
        );
        e.rotation = owner.rotation;
        e.team = owner.team;
        e.damage = owner.damage * LASER_DAMAGE_FACTOR;
        e.capabilities = Capabilities {
            can_move: false,
            can_attack: true,
            can_be_attacked: false,
            no_deletion: false,
        };
        e
    }

    /// Short barrel.
    pub fn barrel_short(position: Point) -> Self {
        Self::barrel(EntityKind::BarrelShort, position)
    }

    /// Tall barrel.
    pub fn barrel_tall(position: Point) -> Self {
        Self::barrel(EntityKind::BarrelTall, position)
    }

    fn barrel(kind: EntityKind, position: Point) -> Self {
        let mut e = Self::base(kind, position, BARREL_RADIUS, 1);
        e.capabilities = Capabilities {
            can_move: false,
            can_attack: false,
            can_be_attacked: true,
            no_deletion: true,
        };
        e
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Player check.
    #[inline]
    pub fn is_player(&self) -> bool {
        matches!(self.kind, EntityKind::Player { .. })
    }

    /// Barrel check.
    #[inline]
    pub fn is_barrel(&self) -> bool {
        matches!(self.kind, EntityKind::BarrelShort | EntityKind::BarrelTall)
    }

    /// Player name, if a player.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::Player { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Shooter of a projectile or beam.
    pub fn owner(&self) -> Option<EntityId> {
        match self.kind {
            EntityKind::Projectile { owner, .. } | EntityKind::LaserRay { owner, .. } => Some(owner),
            _ => None,
        }
    }

    /// True while a downed player waits to respawn.
    pub fn is_deactivated(&self) -> bool {
        match self.kind {
            EntityKind::Player { deactivated_for, .. } => deactivated_for > 0.0,
            _ => false,
        }
    }

    /// Hit-test circle.
    #[inline]
    pub fn hit_circle(&self) -> Circle {
        Circle::new(self.position, self.radius)
    }

    /// Movement collider. Barrels have a height, everything else is planar.
    pub fn collider(&self) -> Aabb {
        let flat = Aabb::centered(self.position, self.radius);
        match self.kind {
            EntityKind::BarrelShort => Aabb { height: Some(BARREL_SHORT_HEIGHT), ..flat },
            EntityKind::BarrelTall => Aabb { height: Some(BARREL_TALL_HEIGHT), ..flat },
            _ => flat,
        }
    }

    /// Segment swept by an attacker this tick.
    pub fn attack_segment(&self) -> Option<Line> {
        match self.kind {
            EntityKind::Projectile { previous, .. } => Some(Line::new(previous, self.position)),
            EntityKind::LaserRay { length, .. } => {
                Some(Line::from_bearing(self.position, self.rotation, length))
            }
            _ => None,
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Subtract hp. Returns true if this hit killed the entity.
    pub fn apply_damage(&mut self, amount: u32) -> bool {
        if !self.alive || !self.capabilities.can_be_attacked {
            return false;
        }
        self.hp = self.hp.saturating_sub(amount);
        self.hp == 0 && self.death()
    }

    /// Kill the entity. Returns true only on the first call.
    ///
    /// The entity becomes inert; a player starts its deactivation timer.
    pub fn death(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        self.alive = false;
        self.hp = 0;
        self.velocity = Point::ZERO;
        self.capabilities.can_move = false;
        self.capabilities.can_attack = false;
        self.capabilities.can_be_attacked = false;
        if let EntityKind::Player { deactivated_for, .. } = &mut self.kind {
            *deactivated_for = DEACTIVATION_FRAMES;
        }
        true
    }

    /// Bring a downed player back at `position`.
    pub fn respawn(&mut self, position: Point) {
        if let EntityKind::Player { deactivated_for, .. } = &mut self.kind {
            *deactivated_for = 0.0;
            self.alive = true;
            self.hp = self.max_hp;
            self.position = position;
            self.attack_cooldown = 0.0;
            self.capabilities.can_move = true;
            self.capabilities.can_attack = true;
            self.capabilities.can_be_attacked = true;
        }
    }

    /// Set a player's display name.
    pub fn rename(&mut self, new_name: &str) {
        if let EntityKind::Player { name, .. } = &mut self.kind {
            *name = clean_name(new_name);
        }
    }

    /// Feed this entity into a state hash.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.field(&self.id).field(kind_tag(&self.kind));
        for c in self.position.to_array() {
            hasher.field(&c);
        }
        hasher
            .field(&self.rotation)
            .field(&self.hp)
            .field(&self.max_hp)
            .field(&self.team.map_or(0u32, |t| t as u32 + 1))
            .field(&self.score)
            .field(&self.eliminations)
            .field(&self.alive)
            .field(&u32::from(self.capabilities.bits()));
        if let Some(name) = self.name() {
            hasher.field(name);
        }
    }
}

fn kind_tag(kind: &EntityKind) -> &'static str {
    match kind {
        EntityKind::Generic => "generic",
        EntityKind::Player { .. } => "player",
        EntityKind::Projectile { .. } => "projectile",
        EntityKind::LaserRay { .. } => "laser_ray",
        EntityKind::BarrelShort => "barrel_short",
        EntityKind::BarrelTall => "barrel_tall",
    }
}

fn clean_name(name: &str) -> String {
    let trimmed: String = name.trim().chars().filter(|c| !c.is_control()).take(MAX_NAME_LEN).collect();
    if trimmed.is_empty() {
        "player".to_string()
    } else {
        trimmed
    }
}

// =============================================================================
// COMPACT TUPLE FORM
// =============================================================================

/// Fixed-order tuple form of an entity.
///
/// `(id, kind, [x, y, z], rotation, radius, hp, max_hp, team, score,
/// eliminations, alive, capability bits, move_speed, damage,
/// attack_cooldown, [vx, vy, vz])`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityRecord(
    EntityId,
    EntityKind,
    [f64; 3],
    f64,
    f64,
    u32,
    u32,
    Option<Team>,
    u32,
    u32,
    bool,
    u8,
    f64,
    u32,
    f64,
    [f64; 3],
);

impl From<Entity> for EntityRecord {
    fn from(e: Entity) -> Self {
        EntityRecord(
            e.id,
            e.kind,
            e.position.to_array(),
            e.rotation,
            e.radius,
            e.hp,
            e.max_hp,
            e.team,
            e.score,
            e.eliminations,
            e.alive,
            e.capabilities.bits(),
            e.move_speed,
            e.damage,
            e.attack_cooldown,
            e.velocity.to_array(),
        )
    }
}

impl TryFrom<EntityRecord> for Entity {
    type Error = EntityError;

    fn try_from(r: EntityRecord) -> Result<Self, Self::Error> {
        let EntityRecord(
            id, kind, position, rotation, radius, hp, max_hp, team, score,
            eliminations, alive, bits, move_speed, damage, attack_cooldown, velocity,
        ) = r;

        if hp > max_hp {
            return Err(EntityError::HpOutOfRange { hp, max_hp });
        }
        let position = Point::from_array(position);
        let velocity = Point::from_array(velocity);
        let kind_finite = match &kind {
            EntityKind::Player { deactivated_for, .. } => deactivated_for.is_finite(),
            EntityKind::Projectile { previous, .. } => previous.is_finite(),
            EntityKind::LaserRay { length, ttl, .. } => length.is_finite() && ttl.is_finite(),
            _ => true,
        };
        let finite = position.is_finite()
            && velocity.is_finite()
            && rotation.is_finite()
            && radius.is_finite()
            && radius >= 0.0
            && move_speed.is_finite()
            && attack_cooldown.is_finite()
            && kind_finite;
        if !finite {
            return Err(EntityError::NonFinite(id));
        }

        Ok(Entity {
            id,
            kind,
            position,
            rotation,
            radius,
            hp,
            max_hp,
            team,
            score,
            eliminations,
            alive,
            capabilities: Capabilities::from_bits(bits),
            move_speed,
            damage,
            attack_cooldown,
            velocity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_death_fires_once() {
        let mut p = Entity::player("alice", Point::new(10.0, 10.0), Some(Team::Blue));
        p.hp = 1;
        assert!(p.apply_damage(1));
        assert!(!p.alive);
        assert!(!p.death());
        assert!(!p.apply_damage(1));
        assert!(p.is_deactivated());
        assert!(p.capabilities.no_deletion);
        assert!(!p.capabilities.can_be_attacked);
    }

    #[test]
    fn test_damage_saturates() {
        let mut p = Entity::player("bob", Point::ZERO, None);
        assert!(!p.apply_damage(1));
        assert_eq!(p.hp, PLAYER_HP - 1);
        assert!(p.apply_damage(100));
        assert_eq!(p.hp, 0);
    }

    #[test]
    fn test_projectile_inherits_owner() {
        let mut owner = Entity::player("carol", Point::new(5.0, 5.0), Some(Team::Red));
        owner.id = 9;
        owner.rotation = 90.0;
        owner.damage = 4;

        let shot = Entity::projectile(&owner);
        assert_eq!(shot.owner(), Some(9));
        assert_eq!(shot.team, Some(Team::Red));
        assert_eq!(shot.damage, 4);
        assert!(shot.velocity.y > 0.0 && shot.velocity.x.abs() < 1e-9);
        assert!(shot.capabilities.can_attack);
        assert!(!shot.capabilities.no_deletion);
    }

    #[test]
    fn test_barrels_are_static_and_destructible() {
        let mut b = Entity::barrel_tall(Point::new(50.0, 50.0));
        assert!(!b.capabilities.can_move);
        assert_eq!(b.collider().height, Some(BARREL_TALL_HEIGHT));
        assert!(b.apply_damage(1));
        assert!(b.capabilities.no_deletion);
    }

    #[test]
    fn test_respawn_restores_player() {
        let mut p = Entity::player("dave", Point::ZERO, None);
        p.death();
        p.respawn(Point::new(40.0, 40.0));
        assert!(p.alive);
        assert_eq!(p.hp, p.max_hp);
        assert!(!p.is_deactivated());
        assert!(p.capabilities.can_move && p.capabilities.can_attack);
        assert_eq!(p.position, Point::new(40.0, 40.0));
    }

    #[test]
    fn test_record_form_is_a_tuple() {
        let mut p = Entity::player("eve", Point::new(1.0, 2.0), Some(Team::Red));
        p.id = 3;
        let json = serde_json::to_value(&p).unwrap();
        let items = json.as_array().expect("tuple form");
        assert_eq!(items.len(), 16);
        assert_eq!(items[0], 3);

        let back: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_record_rejects_bad_hp() {
        let mut p = Entity::generic(Point::ZERO);
        p.hp = 5;
        let json = serde_json::to_value(&p).unwrap();
        assert!(serde_json::from_value::<Entity>(json).is_err());
    }

    #[test]
    fn test_record_rejects_non_finite_measurements() {
        let p = Entity::player("fay", Point::new(1.0, 2.0), None);
        let record = || EntityRecord::from(p.clone());
        assert!(Entity::try_from(record()).is_ok());

        let mut r = record();
        r.3 = f64::NAN;
        assert!(matches!(Entity::try_from(r), Err(EntityError::NonFinite(_))));

        let mut r = record();
        r.4 = -1.0;
        assert!(Entity::try_from(r).is_err());

        let mut r = record();
        r.12 = f64::INFINITY;
        assert!(Entity::try_from(r).is_err());

        let mut r = record();
        r.15 = [f64::INFINITY, 0.0, 0.0];
        assert!(Entity::try_from(r).is_err());

        let mut r = record();
        r.1 = EntityKind::Player { name: "fay".into(), deactivated_for: f64::NAN };
        assert!(Entity::try_from(r).is_err());
    }

    #[test]
    fn test_names_are_cleaned() {
        let p = Entity::player("   ", Point::ZERO, None);
        assert_eq!(p.name(), Some("player"));
        let long = "x".repeat(100);
        let p = Entity::player(&long, Point::ZERO, None);
        assert_eq!(p.name().map(str::len), Some(MAX_NAME_LEN));
    }

    #[test]
    fn test_same_team() {
        assert!(same_team(Some(Team::Red), Some(Team::Red)));
        assert!(!same_team(Some(Team::Red), Some(Team::Blue)));
        assert!(!same_team(None, None));
    }
}
