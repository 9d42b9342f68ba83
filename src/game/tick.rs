//! Simulation Tick
//!
//! One full tick runs its phases in a fixed order:
//!
//! 0. Advance the world clock and the match phase
//! 1. Apply the controlled entity's intents (move, rotate, shoot, team, name)
//! 2. Resolve combat: projectiles and beams against pre-move positions
//! 3. Resolve movement with swept, per-axis sliding collision; a shot that
//!    strikes a wall is hit-tested on its last sweep and spent
//! 4. Credit kills to their owners
//! 5. Advance timers (cooldowns, beams, respawns)
//! 6. Reap dead entities that are not kept as inert bodies
//!
//! Entities are visited in id order (`BTreeMap`), so two worlds fed the same
//! events and deltas end in the same state.

use tracing::{debug, info, warn};

use crate::core::collision::{box_vs_box, circle_vs_segment};
use crate::core::constants::{ATTACK_COOLDOWN, LASER_COOLDOWN_FACTOR};
use crate::core::geometry::{normalize_angle, Aabb, Axis, Point};
use crate::core::timing::DeltaTime;
use crate::game::entity::{same_team, Entity, EntityId, EntityKind, Team};
use crate::game::events::{EventInstance, EventKind};
use crate::game::world::{TickReport, World};

/// Run one full tick.
pub fn run_tick(
    world: &mut World,
    events: &[EventInstance],
    controlled: Option<EntityId>,
    dt: &DeltaTime,
) -> TickReport {
    let mut report = TickReport::default();
    let frames = dt.target();

    // 0. Clock and match phase
    world.time += dt.raw();
    if let Some(phase) = world.mode.update(world.time, &world.entities) {
        info!("Match phase changed to {:?} at {:.2}s", phase, world.time);
        report.events.push(EventInstance::new(world.time, EventKind::MatchPhaseChanged { phase }));
    }

    // 1. Intents
    let displacement = controlled.and_then(|id| {
        apply_intents(world, id, events, frames, &mut report).map(|d| (id, d))
    });

    // 2. Combat
    resolve_combat(world, &mut report);

    // 3. Movement
    if let Some((id, delta)) = displacement {
        move_entity(world, id, delta);
    }
    advance_projectiles(world, frames, &mut report);

    // 4. Kill credit
    world.settle_transfers();

    // 5. Timers
    advance_timers(world, frames);

    // 6. Reap
    reap(world, &mut report);

    report
}

/// Replay one client's timestamped events against its own tracker.
///
/// Events are applied in timestamp order; events sharing a timestamp form
/// one step. Only the controlled entity's intents and movement run here.
pub fn run_catch_up(
    world: &mut World,
    events: &[EventInstance],
    controlled: EntityId,
    tracker: &mut DeltaTime,
) -> TickReport {
    let mut report = TickReport::default();
    if !world.entities.contains_key(&controlled) {
        warn!("Catch-up for unknown entity {}", controlled);
        return report;
    }

    let mut ordered: Vec<&EventInstance> = events
        .iter()
        .filter(|e| {
            let ok = e.timestamp.is_finite();
            if !ok {
                debug!("Dropping event with non-finite timestamp: {:?}", e.kind);
            }
            ok
        })
        .collect();
    ordered.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut start = 0;
    while start < ordered.len() {
        let stamp = ordered[start].timestamp;
        let end = ordered[start..]
            .iter()
            .position(|e| e.timestamp != stamp)
            .map_or(ordered.len(), |n| start + n);

        let group: Vec<EventInstance> = ordered[start..end].iter().map(|e| (*e).clone()).collect();
        let frames = tracker.advance_to(stamp);
        if let Some(delta) = apply_intents(world, controlled, &group, frames, &mut report) {
            move_entity(world, controlled, delta);
        }
        start = end;
    }

    report
}

// =============================================================================
// INTENTS
// =============================================================================

/// Apply intents for one entity. Returns the requested displacement.
fn apply_intents(
    world: &mut World,
    id: EntityId,
    events: &[EventInstance],
    frames: f64,
    report: &mut TickReport,
) -> Option<Point> {
    if !world.entities.contains_key(&id) {
        warn!("Update addressed to unknown entity {}", id);
        return None;
    }

    let mut displacement = Point::ZERO;
    for event in events {
        match &event.kind {
            EventKind::Move { angle, magnitude } => {
                if !angle.is_finite() || !magnitude.is_finite() {
                    debug!("Ignoring malformed move for {}", id);
                    continue;
                }
                let Some(e) = world.entities.get(&id) else { continue };
                if !e.alive || !e.capabilities.can_move {
                    continue;
                }
                let step = e.move_speed * magnitude.clamp(0.0, 1.0) * frames;
                displacement = displacement + Point::from_angle(e.rotation + angle) * step;
            }
            EventKind::Rotate { delta } => {
                if !delta.is_finite() {
                    debug!("Ignoring malformed rotation for {}", id);
                    continue;
                }
                if let Some(e) = world.entities.get_mut(&id) {
                    if e.alive {
                        e.rotation = normalize_angle(e.rotation + delta);
                    }
                }
            }
            EventKind::Shoot => shoot(world, id, false, report),
            EventKind::ShootLaser => shoot(world, id, true, report),
            EventKind::SelectTeam { team } => {
                if !world.mode.kind.is_team() {
                    debug!("Team selection ignored outside team modes");
                    continue;
                }
                if let Some(e) = world.entities.get_mut(&id) {
                    e.team = Some(*team);
                }
            }
            EventKind::Rename { name } => {
                if let Some(e) = world.entities.get_mut(&id) {
                    e.rename(name);
                }
            }
            other => debug!("Skipping non-intent event {:?} for {}", other, id),
        }
    }

    (displacement != Point::ZERO).then_some(displacement)
}

/// Fire a projectile or a beam if the shooter is ready.
fn shoot(world: &mut World, id: EntityId, laser: bool, report: &mut TickReport) {
    let shooter = match world.entities.get(&id) {
        Some(e) if e.alive && e.capabilities.can_attack && !e.is_deactivated() => e.clone(),
        _ => return,
    };
    if shooter.attack_cooldown > 0.0 {
        return;
    }

    let (shot, cooldown) = if laser {
        let ray = world.map.cast_ray(shooter.position, shooter.rotation);
        (Entity::laser(&shooter, ray.distance), ATTACK_COOLDOWN * LASER_COOLDOWN_FACTOR)
    } else {
        (Entity::projectile(&shooter), ATTACK_COOLDOWN)
    };

    let shot_id = world.spawn(shot);
    report.spawned.push(shot_id);
    if let Some(e) = world.entities.get_mut(&id) {
        e.attack_cooldown = cooldown;
    }
    debug!("Entity {} fired {} (laser: {})", id, shot_id, laser);
}

// =============================================================================
// COMBAT
// =============================================================================

struct Attack {
    id: EntityId,
    owner: Option<EntityId>,
    team: Option<Team>,
    damage: u32,
    piercing: bool,
}

/// Resolve projectile and beam hits.
///
/// A projectile stops at the nearest target along the segment it swept
/// last move; a beam hits every target on it once and then goes inert.
fn resolve_combat(world: &mut World, report: &mut TickReport) {
    if !world.mode.combat_enabled() {
        return;
    }

    let attacker_ids: Vec<EntityId> = world
        .entities
        .values()
        .filter(|e| e.alive && e.capabilities.can_attack && e.attack_segment().is_some())
        .map(|e| e.id)
        .collect();

    for attacker_id in attacker_ids {
        resolve_attack(world, attacker_id, report);
    }
}

/// Test one attacker's segment and apply its hits.
fn resolve_attack(world: &mut World, attacker_id: EntityId, report: &mut TickReport) {
    let Some(attacker) = world.entities.get(&attacker_id) else { return };
    if !attacker.alive || !attacker.capabilities.can_attack {
        return;
    }
    let Some(segment) = attacker.attack_segment() else { return };
    let attack = Attack {
        id: attacker.id,
        owner: attacker.owner(),
        team: attacker.team,
        damage: attacker.damage,
        piercing: matches!(attacker.kind, EntityKind::LaserRay { .. }),
    };

    let mut targets: Vec<(f64, EntityId)> = world
        .entities
        .values()
        .filter(|t| {
            t.id != attack.id
                && Some(t.id) != attack.owner
                && t.alive
                && t.capabilities.can_be_attacked
                && !same_team(t.team, attack.team)
                && circle_vs_segment(&t.hit_circle(), &segment)
        })
        .map(|t| (segment.start.distance(t.position), t.id))
        .collect();
    targets.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    if !attack.piercing {
        targets.truncate(1);
    }
    let hit_any = !targets.is_empty();

    for (_, target_id) in targets {
        hit(world, &attack, target_id, report);
    }

    if let Some(a) = world.entities.get_mut(&attack.id) {
        if attack.piercing {
            a.capabilities.can_attack = false;
        } else if hit_any {
            a.death();
        }
    }
}

fn hit(world: &mut World, attack: &Attack, target_id: EntityId, report: &mut TickReport) {
    let time = world.time;
    let Some(target) = world.entities.get_mut(&target_id) else { return };
    let killed = target.apply_damage(attack.damage);
    let credit = killed && target.is_player();

    report.events.push(EventInstance::new(
        time,
        EventKind::EntityHit { target: target_id, attacker: attack.id, damage: attack.damage },
    ));
    if killed {
        debug!("Entity {} killed by {:?}", target_id, attack.owner);
        report.events.push(EventInstance::new(
            time,
            EventKind::EntityKilled { target: target_id, killer: attack.owner },
        ));
    }
    if let (true, Some(owner)) = (credit, attack.owner) {
        world.queue_transfer(target_id, owner);
    }
}

// =============================================================================
// MOVEMENT
// =============================================================================

/// Upper bound on sub-steps for one sweep.
const MAX_SWEEP_STEPS: usize = 1024;

/// Number of equal sub-steps needed to cover `distance` in strides no
/// longer than `stride`.
fn sweep_steps(distance: f64, stride: f64) -> usize {
    if distance.is_nan() || stride.is_nan() || distance <= 0.0 || stride <= 0.0 {
        return 1;
    }
    let steps = (distance / stride).ceil();
    if steps >= MAX_SWEEP_STEPS as f64 {
        MAX_SWEEP_STEPS
    } else {
        (steps as usize).max(1)
    }
}

/// Longest step that cannot skip a tile or the collider's own width.
fn sweep_stride(world: &World, radius: f64) -> f64 {
    let tile = world.map.tile_size();
    if radius > 0.0 {
        tile.min(radius * 2.0)
    } else {
        tile
    }
}

/// Move one entity with sliding collision.
///
/// Each axis is swept in sub-steps so a long step cannot cross a wall; an
/// axis stops at its last free sub-step while the others carry on.
fn move_entity(world: &mut World, id: EntityId, delta: Point) {
    let Some(entity) = world.entities.get(&id) else { return };
    if !entity.alive || !entity.capabilities.can_move {
        return;
    }
    let mut candidate = entity.clone();
    let stride = sweep_stride(world, candidate.radius);

    for axis in Axis::ALL {
        let d = delta.axis(axis);
        if d == 0.0 || !d.is_finite() {
            continue;
        }
        let steps = sweep_steps(d.abs(), stride);
        let step = d / steps as f64;
        for _ in 0..steps {
            let before = candidate.position;
            candidate.position = before.with_axis(axis, before.axis(axis) + step);
            if blocked(world, &candidate) {
                candidate.position = before;
                break;
            }
        }
    }

    if let Some(e) = world.entities.get_mut(&id) {
        e.position = candidate.position;
    }
}

/// True if `candidate` overlaps the map or a standing barrel.
fn blocked(world: &World, candidate: &Entity) -> bool {
    let collider = candidate.collider();
    if world.map.collides_with(&collider) {
        return true;
    }
    world
        .entities
        .values()
        .filter(|e| e.id != candidate.id && e.alive && e.is_barrel())
        .any(|e| box_vs_box(&collider, &e.collider()))
}

/// Advance every live projectile along its velocity.
///
/// The sweep stops at the last free position before a wall. A projectile
/// that struck a wall gets one hit test on the segment it just swept and is
/// then spent.
fn advance_projectiles(world: &mut World, frames: f64, report: &mut TickReport) {
    let ids: Vec<EntityId> = world
        .entities
        .values()
        .filter(|e| e.alive && matches!(e.kind, EntityKind::Projectile { .. }))
        .map(|e| e.id)
        .collect();

    let mut struck = Vec::new();
    for id in ids {
        let Some(e) = world.entities.get(&id) else { continue };
        let from = e.position;
        let travel = e.velocity * frames;
        let mut at = from;
        let mut stopped = !travel.is_finite();

        if !stopped {
            let steps = sweep_steps(travel.length(), sweep_stride(world, e.radius));
            let step = travel * (1.0 / steps as f64);
            for _ in 0..steps {
                let next = at + step;
                if world.map.collides_with(&Aabb::centered(next, e.radius)) {
                    stopped = true;
                    break;
                }
                at = next;
            }
        }

        let Some(e) = world.entities.get_mut(&id) else { continue };
        e.position = at;
        if let EntityKind::Projectile { previous, .. } = &mut e.kind {
            *previous = from;
        }
        if stopped {
            struck.push(id);
        }
    }

    for id in struck {
        if world.mode.combat_enabled() {
            resolve_attack(world, id, report);
        }
        if let Some(e) = world.entities.get_mut(&id) {
            e.death();
        }
    }
}

// =============================================================================
// TIMERS AND REAPING
// =============================================================================

fn advance_timers(world: &mut World, frames: f64) {
    let respawns = !world.mode.kind.is_elimination();
    let mut ready = Vec::new();

    for e in world.entities.values_mut() {
        if e.attack_cooldown > 0.0 {
            e.attack_cooldown = (e.attack_cooldown - frames).max(0.0);
        }
        match &mut e.kind {
            EntityKind::LaserRay { ttl, .. } => {
                *ttl -= frames;
                if *ttl <= 0.0 {
                    e.death();
                }
            }
            EntityKind::Player { deactivated_for, .. } if *deactivated_for > 0.0 && respawns => {
                *deactivated_for -= frames;
                if *deactivated_for <= 0.0 {
                    ready.push(e.id);
                }
            }
            _ => {}
        }
    }

    for id in ready {
        let spot = world.next_spawn_point();
        if let Some(e) = world.entities.get_mut(&id) {
            e.respawn(spot);
            info!("Player {} respawned at ({:.1}, {:.1})", id, spot.x, spot.y);
        }
    }
}

fn reap(world: &mut World, report: &mut TickReport) {
    let dead: Vec<EntityId> = world
        .entities
        .values()
        .filter(|e| !e.alive && !e.capabilities.no_deletion)
        .map(|e| e.id)
        .collect();
    for id in dead {
        world.entities.remove(&id);
        report.removed.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{DEACTIVATION_FRAMES, KILL_SCORE, PLAYER_HP, PLAYER_RADIUS, PLAYER_SPEED};
    use crate::game::entity::Team;
    use crate::game::map::{Map, WallKind};
    use crate::game::mode::{GameMode, MatchPhase, ModeKind};

    fn world_with(mode: GameMode) -> World {
        World::new(Map::new(10, 10, 32.0), mode, 11)
    }

    fn one_frame() -> DeltaTime {
        DeltaTime::fixed(60, 1.0)
    }

    fn ev(kind: EventKind) -> EventInstance {
        EventInstance::new(0.0, kind)
    }

    fn shot_at(world: &mut World, owner: EntityId, from: Point, to: Point) -> EntityId {
        let owner = world.entity(owner).unwrap().clone();
        let mut shot = Entity::projectile(&owner);
        shot.position = to;
        shot.velocity = Point::ZERO;
        if let EntityKind::Projectile { previous, .. } = &mut shot.kind {
            *previous = from;
        }
        world.spawn(shot)
    }

    fn count_kills(report: &TickReport) -> usize {
        report
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::EntityKilled { .. }))
            .count()
    }

    #[test]
    fn test_projectile_kill_credited_once() {
        let mut w = world_with(GameMode::default());
        let red = w.spawn(Entity::player("red", Point::new(40.0, 80.0), Some(Team::Red)));
        let blue = w.spawn(Entity::player("blue", Point::new(120.0, 80.0), Some(Team::Blue)));
        w.entity_mut(blue).unwrap().hp = 1;

        let a = shot_at(&mut w, red, Point::new(100.0, 80.0), Point::new(130.0, 80.0));
        let b = shot_at(&mut w, red, Point::new(105.0, 80.0), Point::new(125.0, 80.0));

        let report = w.update(&[], None, &one_frame());

        let target = w.entity(blue).unwrap();
        assert_eq!(target.hp, 0);
        assert!(!target.alive);
        assert!(target.is_deactivated());
        assert_eq!(count_kills(&report), 1);

        let owner = w.entity(red).unwrap();
        assert_eq!(owner.eliminations, 1);
        assert_eq!(owner.score, KILL_SCORE);

        // The first shot is spent; the second found nothing left to hit
        assert!(report.removed.contains(&a));
        assert!(w.entity(b).is_some());
    }

    #[test]
    fn test_friendly_fire_is_ignored() {
        let mut w = world_with(GameMode::default());
        let red = w.spawn(Entity::player("red", Point::new(40.0, 80.0), Some(Team::Red)));
        let mate = w.spawn(Entity::player("mate", Point::new(120.0, 80.0), Some(Team::Red)));
        shot_at(&mut w, red, Point::new(100.0, 80.0), Point::new(130.0, 80.0));

        let report = w.update(&[], None, &one_frame());
        assert!(!report.events.iter().any(|e| matches!(e.kind, EventKind::EntityHit { .. })));
        assert_eq!(w.entity(mate).unwrap().hp, w.entity(mate).unwrap().max_hp);
    }

    #[test]
    fn test_grace_period_disables_combat() {
        let mut w = world_with(GameMode::new(ModeKind::Solo, 100.0, None));
        let red = w.spawn(Entity::player("red", Point::new(40.0, 80.0), None));
        let blue = w.spawn(Entity::player("blue", Point::new(120.0, 80.0), None));
        shot_at(&mut w, red, Point::new(100.0, 80.0), Point::new(130.0, 80.0));

        w.update(&[], None, &one_frame());
        assert_eq!(w.mode().phase, MatchPhase::Grace);
        assert_eq!(w.entity(blue).unwrap().hp, w.entity(blue).unwrap().max_hp);
    }

    #[test]
    fn test_phase_change_is_reported() {
        let mut w = world_with(GameMode::default());
        let report = w.update(&[], None, &one_frame());
        assert!(report
            .events
            .iter()
            .any(|e| e.kind == EventKind::MatchPhaseChanged { phase: MatchPhase::Active }));
    }

    #[test]
    fn test_move_scales_with_delta() {
        let mut w = world_with(GameMode::default());
        let id = w.spawn(Entity::player("p", Point::new(48.0, 48.0), None));

        let mv = ev(EventKind::Move { angle: 0.0, magnitude: 1.0 });
        w.update(&[mv], Some(id), &DeltaTime::fixed(60, 2.0));
        let p = w.entity(id).unwrap().position;
        assert!((p.x - (48.0 + PLAYER_SPEED * 2.0)).abs() < 1e-9);
        assert!((p.y - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_sliding_collision() {
        let mut map = Map::new(10, 10, 32.0);
        for cy in 0..10 {
            map.set_wall(5, cy, WallKind::Brick);
        }
        let mut w = World::new(map, GameMode::default(), 1);
        let id = w.spawn(Entity::player("p", Point::new(150.0, 80.0), None));
        w.entity_mut(id).unwrap().rotation = 45.0;

        let mv = ev(EventKind::Move { angle: 0.0, magnitude: 1.0 });
        w.update(&[mv], Some(id), &DeltaTime::fixed(60, 2.0));

        // x is blocked by the wall column, y still slides
        let p = w.entity(id).unwrap().position;
        assert_eq!(p.x, 150.0);
        assert!(p.y > 80.0);
    }

    fn walled() -> World {
        let mut map = Map::new(10, 10, 32.0);
        for cy in 0..10 {
            map.set_wall(5, cy, WallKind::Brick);
        }
        World::new(map, GameMode::default(), 1)
    }

    fn flying_shot(world: &mut World, owner: EntityId, at: Point) -> EntityId {
        let owner = world.entity(owner).unwrap().clone();
        let mut shot = Entity::projectile(&owner);
        shot.position = at;
        if let EntityKind::Projectile { previous, .. } = &mut shot.kind {
            *previous = at;
        }
        world.spawn(shot)
    }

    #[test]
    fn test_long_move_cannot_cross_a_wall() {
        let mut w = walled();
        let id = w.spawn(Entity::player("p", Point::new(100.0, 80.0), None));

        // 15 frames is 60 units, far enough to clear the whole column
        let mv = ev(EventKind::Move { angle: 0.0, magnitude: 1.0 });
        w.update(&[mv], Some(id), &DeltaTime::fixed(60, 15.0));

        let p = w.entity(id).unwrap().position;
        assert_eq!(p.x, 145.0);
        assert!(p.x + PLAYER_RADIUS <= 160.0);
    }

    #[test]
    fn test_catch_up_is_clipped_at_wall() {
        let mut w = walled();
        let id = w.spawn(Entity::player("p", Point::new(144.0, 80.0), None));
        let mut tracker = DeltaTime::new(60);

        let east = |t: f64| EventInstance::new(t, EventKind::Move { angle: 0.0, magnitude: 1.0 });
        w.update_async(&[east(0.0)], id, &mut tracker);
        assert_eq!(w.entity(id).unwrap().position.x, 148.0);

        w.update_async(&[east(0.25)], id, &mut tracker);
        assert_eq!(w.entity(id).unwrap().position.x, 148.0);
    }

    #[test]
    fn test_fast_projectile_stops_at_wall() {
        let mut w = walled();
        let red = w.spawn(Entity::player("red", Point::new(40.0, 80.0), Some(Team::Red)));
        let shot = flying_shot(&mut w, red, Point::new(150.0, 80.0));

        let report = w.update(&[], None, &DeltaTime::fixed(60, 4.0));
        assert!(report.removed.contains(&shot));
        assert!(w.entity(shot).is_none());
    }

    #[test]
    fn test_projectile_hits_target_in_front_of_wall() {
        let mut w = walled();
        let red = w.spawn(Entity::player("red", Point::new(40.0, 80.0), Some(Team::Red)));
        let blue = w.spawn(Entity::player("blue", Point::new(148.0, 80.0), Some(Team::Blue)));
        let shot = flying_shot(&mut w, red, Point::new(136.0, 80.0));

        let report = w.update(&[], None, &DeltaTime::fixed(60, 2.0));
        assert_eq!(w.entity(blue).unwrap().hp, PLAYER_HP - 1);
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e.kind, EventKind::EntityHit { target, .. } if target == blue)));
        assert!(w.entity(shot).is_none());
    }

    #[test]
    fn test_barrels_block_movement() {
        let mut w = world_with(GameMode::default());
        w.spawn(Entity::barrel_tall(Point::new(80.0, 48.0)));
        let id = w.spawn(Entity::player("p", Point::new(60.0, 48.0), None));

        let mv = ev(EventKind::Move { angle: 0.0, magnitude: 1.0 });
        w.update(&[mv], Some(id), &one_frame());
        assert_eq!(w.entity(id).unwrap().position.x, 60.0);
    }

    #[test]
    fn test_unknown_controlled_entity_is_noop() {
        let mut w = world_with(GameMode::default());
        let mv = ev(EventKind::Move { angle: 0.0, magnitude: 1.0 });
        let report = w.update(&[mv], Some(99), &one_frame());
        assert!(report.spawned.is_empty());
        assert!(w.is_empty());
    }

    #[test]
    fn test_shoot_respects_cooldown() {
        let mut w = world_with(GameMode::default());
        let id = w.spawn(Entity::player("p", Point::new(48.0, 48.0), None));

        let first = w.update(&[ev(EventKind::Shoot)], Some(id), &one_frame());
        assert_eq!(first.spawned.len(), 1);
        let second = w.update(&[ev(EventKind::Shoot)], Some(id), &one_frame());
        assert!(second.spawned.is_empty());

        w.update(&[], None, &DeltaTime::fixed(60, ATTACK_COOLDOWN));
        let third = w.update(&[ev(EventKind::Shoot)], Some(id), &one_frame());
        assert_eq!(third.spawned.len(), 1);
    }

    #[test]
    fn test_projectile_dies_at_wall_and_is_reaped() {
        let mut map = Map::new(10, 10, 32.0);
        map.set_wall(3, 1, WallKind::Metal);
        let mut w = World::new(map, GameMode::default(), 1);
        let id = w.spawn(Entity::player("p", Point::new(48.0, 48.0), None));

        let report = w.update(&[ev(EventKind::Shoot)], Some(id), &one_frame());
        let shot = report.spawned[0];

        let mut removed = Vec::new();
        for _ in 0..10 {
            removed.extend(w.update(&[], None, &one_frame()).removed);
        }
        assert!(removed.contains(&shot));
        assert!(w.entity(shot).is_none());
    }

    #[test]
    fn test_laser_hits_everything_on_the_beam() {
        let mut w = world_with(GameMode::default());
        let shooter = w.spawn(Entity::player("s", Point::new(20.0, 48.0), None));
        let a = w.spawn(Entity::player("a", Point::new(100.0, 48.0), None));
        let b = w.spawn(Entity::player("b", Point::new(200.0, 48.0), None));
        let off = w.spawn(Entity::player("c", Point::new(200.0, 150.0), None));

        let report = w.update(&[ev(EventKind::ShootLaser)], Some(shooter), &one_frame());
        let hits: Vec<EntityId> = report
            .events
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::EntityHit { target, .. } => Some(target),
                _ => None,
            })
            .collect();
        assert_eq!(hits, vec![a, b]);
        assert!(w.entity(off).unwrap().hp == w.entity(off).unwrap().max_hp);

        // Beam is spent and expires
        let beam = report.spawned[0];
        assert!(!w.entity(beam).unwrap().capabilities.can_attack);
        for _ in 0..10 {
            w.update(&[], None, &one_frame());
        }
        assert!(w.entity(beam).is_none());
    }

    #[test]
    fn test_dead_player_respawns() {
        let mut w = world_with(GameMode::default());
        w.set_spawn_points(vec![Point::new(200.0, 200.0)]);
        let id = w.spawn(Entity::player("p", Point::new(48.0, 48.0), None));
        w.entity_mut(id).unwrap().death();

        w.update(&[], None, &DeltaTime::fixed(60, DEACTIVATION_FRAMES - 1.0));
        assert!(!w.entity(id).unwrap().alive);
        w.update(&[], None, &DeltaTime::fixed(60, 2.0));

        let p = w.entity(id).unwrap();
        assert!(p.alive);
        assert_eq!(p.position, Point::new(200.0, 200.0));
    }

    #[test]
    fn test_no_respawn_in_elimination() {
        let mut w = world_with(GameMode::new(ModeKind::SoloElimination, 0.0, None));
        let id = w.spawn(Entity::player("p", Point::new(48.0, 48.0), None));
        w.entity_mut(id).unwrap().death();
        w.update(&[], None, &DeltaTime::fixed(60, DEACTIVATION_FRAMES * 2.0));
        assert!(!w.entity(id).unwrap().alive);
        assert!(w.entity(id).is_some());
    }

    #[test]
    fn test_rotate_and_rename() {
        let mut w = world_with(GameMode::default());
        let id = w.spawn(Entity::player("p", Point::new(48.0, 48.0), None));
        let events = [
            ev(EventKind::Rotate { delta: -30.0 }),
            ev(EventKind::Rename { name: "zed".into() }),
            ev(EventKind::SelectTeam { team: Team::Blue }),
        ];
        w.update(&events, Some(id), &one_frame());

        let p = w.entity(id).unwrap();
        assert!((p.rotation - 330.0).abs() < 1e-9);
        assert_eq!(p.name(), Some("zed"));
        // Solo mode ignores team selection
        assert_eq!(p.team, None);
    }

    #[test]
    fn test_catch_up_uses_event_timestamps() {
        let mut w = world_with(GameMode::default());
        let id = w.spawn(Entity::player("p", Point::new(48.0, 48.0), None));
        let mut tracker = DeltaTime::new(60);

        let mv = |t: f64| EventInstance::new(t, EventKind::Move { angle: 90.0, magnitude: 1.0 });
        // Out of order on purpose; the 0.05s gap is three frames
        w.update_async(&[mv(0.05), mv(0.0)], id, &mut tracker);

        let p = w.entity(id).unwrap().position;
        assert!((p.y - (48.0 + PLAYER_SPEED * 4.0)).abs() < 1e-6);
        assert!((w.time() - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_catch_up_skips_non_finite_stamps() {
        let mut w = world_with(GameMode::default());
        let id = w.spawn(Entity::player("p", Point::new(48.0, 48.0), None));
        let mut tracker = DeltaTime::new(60);
        let bad = EventInstance::new(f64::NAN, EventKind::Move { angle: 0.0, magnitude: 1.0 });
        w.update_async(&[bad], id, &mut tracker);
        assert_eq!(w.entity(id).unwrap().position, Point::new(48.0, 48.0));
    }
}
