//! Persisted Map Layout
//!
//! A map file is a JSON record with three lists. Each list element is
//! itself a literal string decoded on its own, so one bad element is
//! skipped without losing the rest of the map:
//!
//! ```text
//! {
//!   "width": 20, "height": 15, "tile_size": 32.0,
//!   "walls":    ["[\"brick\", [0, 0], [640, 0]]"],
//!   "entities": ["[\"barrel_short\", [96, 96]]"],
//!   "spawns":   ["[48, 48]"]
//! }
//! ```

use std::path::Path;

use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::core::codec::decode_literal;
use crate::core::constants::{DEFAULT_MAP_HEIGHT, DEFAULT_MAP_WIDTH, MAX_MAP_DIM, TILE_SIZE};
use crate::core::geometry::{Line, Point};
use crate::game::entity::Entity;
use crate::game::map::{Map, WallKind};

/// Map loading errors.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// File could not be read.
    #[error("failed to read map: {0}")]
    Io(#[from] std::io::Error),

    /// Top-level record is malformed.
    #[error("failed to parse map: {0}")]
    Parse(#[from] serde_json::Error),

    /// Grid is empty or larger than the supported size.
    #[error("map of {width}x{height} cells is outside 1..={max} per side")]
    Dimensions {
        /// Width in cells
        width: usize,
        /// Height in cells
        height: usize,
        /// Largest side
        max: usize,
    },

    /// Cell size is not a positive finite number.
    #[error("tile size {0} is not usable")]
    TileSize(f64),
}

/// Entity type tags allowed in map files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTag {
    /// Inert generic entity
    Generic,
    /// Short barrel
    BarrelShort,
    /// Tall barrel
    BarrelTall,
}

/// A wall: material plus segment in world units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WallSpec {
    /// Material
    pub kind: WallKind,
    /// Segment rasterized into the grid
    pub segment: Line,
}

/// A placed entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntitySpec {
    /// Type tag
    pub tag: EntityTag,
    /// Position
    pub position: Point,
}

impl EntitySpec {
    /// Construct the entity.
    pub fn build(&self) -> Entity {
        match self.tag {
            EntityTag::Generic => Entity::generic(self.position),
            EntityTag::BarrelShort => Entity::barrel_short(self.position),
            EntityTag::BarrelTall => Entity::barrel_tall(self.position),
        }
    }
}

#[derive(Deserialize)]
struct RawLayout {
    #[serde(default = "default_width")]
    width: usize,
    #[serde(default = "default_height")]
    height: usize,
    #[serde(default = "default_tile_size")]
    tile_size: f64,
    #[serde(default)]
    walls: Vec<String>,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    spawns: Vec<String>,
}

fn default_width() -> usize {
    DEFAULT_MAP_WIDTH
}

fn default_height() -> usize {
    DEFAULT_MAP_HEIGHT
}

fn default_tile_size() -> f64 {
    TILE_SIZE
}

/// Parsed map file.
#[derive(Clone, Debug, PartialEq)]
pub struct MapLayout {
    /// Width in cells
    pub width: usize,
    /// Height in cells
    pub height: usize,
    /// Cell edge length
    pub tile_size: f64,
    /// Walls
    pub walls: Vec<WallSpec>,
    /// Placed entities
    pub entities: Vec<EntitySpec>,
    /// Player spawn points
    pub spawns: Vec<Point>,
}

impl Default for MapLayout {
    fn default() -> Self {
        Self::empty()
    }
}

impl MapLayout {
    /// Default-sized map with nothing in it.
    pub fn empty() -> Self {
        Self {
            width: DEFAULT_MAP_WIDTH,
            height: DEFAULT_MAP_HEIGHT,
            tile_size: TILE_SIZE,
            walls: Vec::new(),
            entities: Vec::new(),
            spawns: Vec::new(),
        }
    }

    /// Parse a map file. Unparseable elements and elements with non-finite
    /// coordinates are skipped; a bad grid size is an error.
    pub fn parse(text: &str) -> Result<Self, MapError> {
        let raw: RawLayout = serde_json::from_str(text)?;

        let sides = 1..=MAX_MAP_DIM;
        if !sides.contains(&raw.width) || !sides.contains(&raw.height) {
            return Err(MapError::Dimensions { width: raw.width, height: raw.height, max: MAX_MAP_DIM });
        }
        if !(raw.tile_size.is_finite() && raw.tile_size > 0.0) {
            return Err(MapError::TileSize(raw.tile_size));
        }

        let walls = decode_each(&raw.walls, "wall", |(kind, a, b): (WallKind, [f64; 2], [f64; 2])| {
            let segment = Line::new(Point::new(a[0], a[1]), Point::new(b[0], b[1]));
            (segment.start.is_finite() && segment.end.is_finite()).then_some(WallSpec { kind, segment })
        });
        let entities = decode_each(&raw.entities, "entity", |(tag, p): (EntityTag, [f64; 2])| {
            let position = Point::new(p[0], p[1]);
            position.is_finite().then_some(EntitySpec { tag, position })
        });
        let spawns = decode_each(&raw.spawns, "spawn", |p: [f64; 2]| {
            let spawn = Point::new(p[0], p[1]);
            spawn.is_finite().then_some(spawn)
        });

        Ok(Self {
            width: raw.width,
            height: raw.height,
            tile_size: raw.tile_size,
            walls,
            entities,
            spawns,
        })
    }

    /// Build the tile grid.
    pub fn build_map(&self) -> Map {
        let mut map = Map::new(self.width, self.height, self.tile_size);
        for wall in &self.walls {
            map.add_wall_segment(&wall.segment, wall.kind);
        }
        map
    }

    /// Build the placed entities (ids unassigned).
    pub fn build_entities(&self) -> Vec<Entity> {
        self.entities.iter().map(EntitySpec::build).collect()
    }
}

fn decode_each<T, U, F>(items: &[String], what: &str, build: F) -> Vec<U>
where
    T: serde::de::DeserializeOwned,
    F: Fn(T) -> Option<U>,
{
    items
        .iter()
        .filter_map(|item| match decode_literal::<T>(item) {
            Ok(value) => {
                let built = build(value);
                if built.is_none() {
                    debug!("Skipping out-of-range {} {:?}", what, item);
                }
                built
            }
            Err(e) => {
                debug!("Skipping unparseable {} {:?}: {}", what, item, e);
                None
            }
        })
        .collect()
}

/// Load a map file, falling back to an empty map on any error.
pub fn load_map(path: &Path) -> MapLayout {
    let result = std::fs::read_to_string(path)
        .map_err(MapError::from)
        .and_then(|text| MapLayout::parse(&text));

    match result {
        Ok(layout) => {
            info!(
                "Loaded map {} ({}x{}, {} walls, {} entities, {} spawns)",
                path.display(),
                layout.width,
                layout.height,
                layout.walls.len(),
                layout.entities.len(),
                layout.spawns.len()
            );
            layout
        }
        Err(e) => {
            warn!("Failed to load map {}: {}; using an empty map", path.display(), e);
            MapLayout::empty()
        }
    }
}
