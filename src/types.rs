//! Core value types shared across all modules.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable identity of a player (the host's account UUID).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A namespaced block type identifier such as `minecraft:stone`.
///
/// Construction normalises case and adds the `minecraft:` namespace when it
/// is missing, so `STONE`, `stone` and `minecraft:stone` compare equal.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockType(String);

impl BlockType {
    pub fn new(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }
        let (namespace, path) = match name.split_once(':') {
            Some((ns, path)) => (ns.to_string(), path.to_string()),
            None => ("minecraft".to_string(), name),
        };
        let valid = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
        };
        if !valid(&namespace) || !valid(&path) {
            return None;
        }
        Some(Self(format!("{namespace}:{path}")))
    }

    pub fn air() -> Self {
        Self("minecraft:air".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_air(&self) -> bool {
        matches!(
            self.0.as_str(),
            "minecraft:air" | "minecraft:cave_air" | "minecraft:void_air"
        )
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BlockType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BlockType::new(&value).ok_or_else(|| format!("invalid block type '{value}'"))
    }
}

impl From<BlockType> for String {
    fn from(value: BlockType) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// A raw position as the host reports it: fractional coordinates plus the
/// looking direction of whoever produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockPos {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl BlockPos {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_orientation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:.2}, {:.2}, {:.2})", self.world, self.x, self.y, self.z)
    }
}

/// Canonical block address: world plus integer block coordinates.
///
/// This is the key for every cooldown entry. It carries no orientation, so
/// two raw positions inside the same block always produce the same key.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PositionKey {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl PositionKey {
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// The 16×16 chunk column holding this block.
    pub fn chunk(&self) -> ChunkCoord {
        ChunkCoord::new(self.x >> 4, self.z >> 4)
    }

    pub fn in_chunk(&self, world: &str, chunk: ChunkCoord) -> bool {
        self.world == world && self.chunk() == chunk
    }
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{},{},{}]", self.world, self.x, self.y, self.z)
    }
}

impl From<&BlockPos> for PositionKey {
    fn from(pos: &BlockPos) -> Self {
        normalize(pos)
    }
}

/// Strip orientation and fractional parts from a raw position.
///
/// Coordinates are floored (not truncated) so `-0.5` lands in block `-1`,
/// matching how the host assigns positions to blocks.
pub fn normalize(pos: &BlockPos) -> PositionKey {
    PositionKey {
        world: pos.world.clone(),
        x: pos.x.floor() as i32,
        y: pos.y.floor() as i32,
        z: pos.z.floor() as i32,
    }
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.x, self.z)
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// An inclusive axis-aligned box of blocks in a single world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cuboid {
    pub world: String,
    pub min: [i32; 3],
    pub max: [i32; 3],
}

impl Cuboid {
    /// Build from two arbitrary corners; min/max are sorted per axis.
    pub fn from_corners(world: impl Into<String>, a: [i32; 3], b: [i32; 3]) -> Self {
        Self {
            world: world.into(),
            min: [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])],
            max: [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])],
        }
    }

    pub fn contains(&self, key: &PositionKey) -> bool {
        self.world == key.world
            && key.x >= self.min[0]
            && key.x <= self.max[0]
            && key.y >= self.min[1]
            && key.y <= self.max[1]
            && key.z >= self.min[2]
            && key.z <= self.max[2]
    }

    pub fn intersects(&self, other: &Cuboid) -> bool {
        self.world == other.world
            && (0..3).all(|axis| self.min[axis] <= other.max[axis] && other.min[axis] <= self.max[axis])
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStats {
    pub enabled: bool,
    pub zones: usize,
    pub nodes: usize,
    pub tracked_players: usize,
    pub active_cooldowns: usize,
    pub total_ticks: u64,
}
