//! Input Enhancement
//!
//! Held directional keys arrive as raw local events (`MoveForward`,
//! `MoveLeft`, ...). Before a frame's events reach the world they are folded
//! into one composite `Move { angle, magnitude }` relative to the entity's
//! facing, so diagonal input is not faster than straight input and the
//! remote peer only ever sees the composite intent.
//!
//! Relative bearings: forward 0°, right 90°, backward 180°, left 270°.

use crate::core::geometry::normalize_angle;
use crate::game::events::{EventInstance, EventKind};

/// Fold directional intents into a single `Move`.
///
/// Non-directional events keep their order. The `Move` takes the place
/// (and timestamp) of the first directional event; opposing keys cancel.
pub fn enhance(events: &[EventInstance]) -> Vec<EventInstance> {
    let mut out = Vec::with_capacity(events.len());
    let (mut fx, mut fy) = (0.0f64, 0.0f64);
    let mut slot: Option<(usize, f64)> = None;

    for event in events {
        let step = match event.kind {
            EventKind::MoveForward => Some((1.0, 0.0)),
            EventKind::MoveBackward => Some((-1.0, 0.0)),
            EventKind::MoveRight => Some((0.0, 1.0)),
            EventKind::MoveLeft => Some((0.0, -1.0)),
            _ => None,
        };
        match step {
            Some((x, y)) => {
                fx += x;
                fy += y;
                slot.get_or_insert((out.len(), event.timestamp));
            }
            None => out.push(event.clone()),
        }
    }

    if let Some((index, timestamp)) = slot {
        let length = fx.hypot(fy);
        if length > f64::EPSILON {
            let angle = normalize_angle(fy.atan2(fx).to_degrees());
            let magnitude = length.min(1.0);
            out.insert(index, EventInstance::new(timestamp, EventKind::Move { angle, magnitude }));
        }
    }
    out
}
