//! Tile Map and Raycasting
//!
//! A fixed grid of open and blocked cells. The map answers two questions
//! for the simulation: where does a ray first hit something (`cast_ray`),
//! and does a box overlap anything solid (`collides_with`). It holds no
//! entities and does not change after construction.

use serde::{Serialize, Deserialize};

use crate::core::constants::{DEFAULT_MAP_HEIGHT, DEFAULT_MAP_WIDTH, MAX_MAP_DIM, MAX_RAY_DISTANCE, TILE_SIZE};
use crate::core::geometry::{direction, normalize_angle, Aabb, Line, Point};

/// Wall material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WallKind {
    /// Brick wall
    Brick,
    /// Stone wall
    Stone,
    /// Metal wall
    Metal,
}

/// One grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tile {
    /// Traversable
    #[default]
    Open,
    /// Blocked
    Wall(WallKind),
}

/// What stopped a ray.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RayHit {
    /// A wall cell
    Wall {
        /// Cell column
        cell_x: i64,
        /// Cell row
        cell_y: i64,
        /// Material
        kind: WallKind,
    },
    /// The edge of the grid
    Boundary,
}

/// Result of one raycast.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// Start point
    pub origin: Point,
    /// Bearing in degrees
    pub direction: f64,
    /// Hit point, or the max-range point on a miss
    pub point: Point,
    /// Euclidean distance from origin to `point`
    pub distance: f64,
    /// Hit metadata; `None` when the ray ran out of range
    pub hit: Option<RayHit>,
}

/// Tile grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Map {
    width: usize,
    height: usize,
    tile_size: f64,
    max_ray_distance: f64,
    tiles: Vec<Tile>,
}

impl Default for Map {
    fn default() -> Self {
        Self::new(DEFAULT_MAP_WIDTH, DEFAULT_MAP_HEIGHT, TILE_SIZE)
    }
}

impl Map {
    /// All-open map of `width x height` cells. Each side is capped at
    /// `MAX_MAP_DIM`.
    pub fn new(width: usize, height: usize, tile_size: f64) -> Self {
        let (width, height) = (width.min(MAX_MAP_DIM), height.min(MAX_MAP_DIM));
        Self {
            width,
            height,
            tile_size,
            max_ray_distance: MAX_RAY_DISTANCE,
            tiles: vec![Tile::Open; width * height],
        }
    }

    /// Override the ray range.
    pub fn with_max_ray_distance(mut self, distance: f64) -> Self {
        self.max_ray_distance = distance;
        self
    }

    /// Width in cells.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in cells.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Cell edge length.
    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// Ray range.
    pub fn max_ray_distance(&self) -> f64 {
        self.max_ray_distance
    }

    /// Center of the map in world units.
    pub fn center(&self) -> Point {
        Point::new(
            self.width as f64 * self.tile_size / 2.0,
            self.height as f64 * self.tile_size / 2.0,
        )
    }

    /// Number of wall cells.
    pub fn wall_count(&self) -> usize {
        self.tiles.iter().filter(|t| matches!(t, Tile::Wall(_))).count()
    }

    fn index(&self, cx: i64, cy: i64) -> Option<usize> {
        if cx < 0 || cy < 0 || cx >= self.width as i64 || cy >= self.height as i64 {
            return None;
        }
        Some(cy as usize * self.width + cx as usize)
    }

    /// Cell contents; `None` outside the grid.
    pub fn tile(&self, cx: i64, cy: i64) -> Option<Tile> {
        self.index(cx, cy).map(|i| self.tiles[i])
    }

    /// Place a wall. Out-of-range cells are ignored.
    pub fn set_wall(&mut self, cx: i64, cy: i64, kind: WallKind) {
        if let Some(i) = self.index(cx, cy) {
            self.tiles[i] = Tile::Wall(kind);
        }
    }

    /// Rasterize a wall segment given in world units.
    pub fn add_wall_segment(&mut self, segment: &Line, kind: WallKind) {
        let cell_space = Line::new(
            segment.start * (1.0 / self.tile_size),
            segment.end * (1.0 / self.tile_size),
        );
        let bounds = (self.width as i64, self.height as i64);
        for (cx, cy) in cell_space.cells(Some(bounds)) {
            self.set_wall(cx, cy, kind);
        }
    }

    /// Blocked or outside the grid.
    pub fn is_blocked(&self, cx: i64, cy: i64) -> bool {
        !matches!(self.tile(cx, cy), Some(Tile::Open))
    }

    /// Cell containing a world point.
    pub fn cell_of(&self, p: Point) -> (i64, i64) {
        (
            (p.x / self.tile_size).floor() as i64,
            (p.y / self.tile_size).floor() as i64,
        )
    }

    /// True if any cell under the box footprint is blocked or off-grid.
    ///
    /// A box edge lying exactly on a cell boundary does not reach into the
    /// next cell.
    pub fn collides_with(&self, b: &Aabb) -> bool {
        let ts = self.tile_size;
        let min_cx = (b.min_x() / ts).floor() as i64;
        let min_cy = (b.min_y() / ts).floor() as i64;
        let max_cx = ((b.max_x() / ts).ceil() as i64 - 1).max(min_cx);
        let max_cy = ((b.max_y() / ts).ceil() as i64 - 1).max(min_cy);

        (min_cy..=max_cy).any(|cy| (min_cx..=max_cx).any(|cx| self.is_blocked(cx, cy)))
    }

    /// Cast a ray using grid traversal (DDA).
    ///
    /// Walks cell boundaries in increasing distance order and stops at the
    /// first blocked cell, at the grid edge, or at the max range. Step signs
    /// come from the bearing: x steps left for `90 < θ < 270`, y steps up
    /// for `θ > 180`.
    pub fn cast_ray(&self, origin: Point, direction_degrees: f64) -> Ray {
        let theta = normalize_angle(direction_degrees);
        let (dx, dy) = direction(theta);
        let ts = self.tile_size;
        let max = self.max_ray_distance;

        let finish = |distance: f64, hit: Option<RayHit>| {
            let point = Point::new3(origin.x + dx * distance, origin.y + dy * distance, origin.z);
            Ray {
                origin,
                direction: theta,
                point,
                distance: origin.distance(point),
                hit,
            }
        };

        let (mut cx, mut cy) = self.cell_of(origin);
        if let Some(hit) = self.hit_at(cx, cy) {
            return finish(0.0, Some(hit));
        }

        let step_x: i64 = if theta > 90.0 && theta < 270.0 { -1 } else { 1 };
        let step_y: i64 = if theta > 180.0 { -1 } else { 1 };

        let delta_x = if dx.abs() > f64::EPSILON { (ts / dx).abs() } else { f64::INFINITY };
        let delta_y = if dy.abs() > f64::EPSILON { (ts / dy).abs() } else { f64::INFINITY };

        let mut side_x = if delta_x.is_infinite() {
            f64::INFINITY
        } else if step_x > 0 {
            ((cx + 1) as f64 * ts - origin.x) / dx.abs()
        } else {
            (origin.x - cx as f64 * ts) / dx.abs()
        };
        let mut side_y = if delta_y.is_infinite() {
            f64::INFINITY
        } else if step_y > 0 {
            ((cy + 1) as f64 * ts - origin.y) / dy.abs()
        } else {
            (origin.y - cy as f64 * ts) / dy.abs()
        };

        loop {
            let distance = if side_x < side_y {
                let d = side_x;
                side_x += delta_x;
                cx += step_x;
                d
            } else {
                let d = side_y;
                side_y += delta_y;
                cy += step_y;
                d
            };

            if distance > max || !distance.is_finite() {
                return finish(max, None);
            }
            if let Some(hit) = self.hit_at(cx, cy) {
                return finish(distance, Some(hit));
            }
        }
    }

    fn hit_at(&self, cx: i64, cy: i64) -> Option<RayHit> {
        match self.tile(cx, cy) {
            None => Some(RayHit::Boundary),
            Some(Tile::Wall(kind)) => Some(RayHit::Wall { cell_x: cx, cell_y: cy, kind }),
            Some(Tile::Open) => None,
        }
    }
}
