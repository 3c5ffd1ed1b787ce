//! Zone Registry.
//!
//! Holds every configured zone and node as an immutable [`ZoneSet`] behind
//! `RwLock<Arc<_>>`. A reload builds a complete new set off to the side and
//! swaps the pointer, so a lookup sees either the old set or the new one,
//! never a half-filled one. Player cooldowns are keyed by position and do
//! not reference zones, so they survive a swap untouched.

use crate::error::ConfigError;
use crate::types::{BlockType, Cuboid, PositionKey};
use log::{info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Zone types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    /// Interaction is gated on the player's access-time balance.
    Timed,
    /// Interaction is gated on the player's unlocked block types.
    Unlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRule {
    pub replacement: BlockType,
    pub cooldown_seconds: u64,
}

/// A child region of a zone carrying per-block rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Area {
    pub region: String,
    pub bounds: Cuboid,
    pub rules: HashMap<BlockType, BlockRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BossBarText {
    pub time_text: String,
    pub no_time_text: String,
}

impl Default for BossBarText {
    fn default() -> Self {
        Self {
            time_text: "Mine time: {time}".into(),
            no_time_text: "No mine time left".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub world: String,
    pub region: String,
    pub bounds: Cuboid,
    pub kind: ZoneKind,
    pub boss_bar: BossBarText,
    pub areas: Vec<Area>,
    /// Block type → price, for display by the host's shop.
    pub unlockable: BTreeMap<BlockType, f64>,
    pub free: BTreeSet<BlockType>,
}

impl Zone {
    pub fn contains(&self, key: &PositionKey) -> bool {
        self.bounds.contains(key)
    }

    pub fn is_timed(&self) -> bool {
        self.kind == ZoneKind::Timed
    }

    /// Rule for `block` at `key`: the first area, in configuration order,
    /// that contains the position and lists the block type.
    pub fn rule_for(&self, key: &PositionKey, block: &BlockType) -> Option<&BlockRule> {
        self.areas
            .iter()
            .filter(|area| area.bounds.contains(key))
            .find_map(|area| area.rules.get(block))
    }

    pub fn is_free(&self, block: &BlockType) -> bool {
        self.free.contains(block)
    }

    pub fn price(&self, block: &BlockType) -> Option<f64> {
        self.unlockable.get(block).copied()
    }
}

// ---------------------------------------------------------------------------
// Node types
// ---------------------------------------------------------------------------

/// A periodically re-armed resource node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub task: String,
    pub world: String,
    pub bounds: Cuboid,
    /// Anchors a schematic may be pasted at.
    pub locations: Vec<PositionKey>,
    pub schematics: Vec<String>,
    pub safe_location: PositionKey,
    pub blocks_allowed: BTreeSet<BlockType>,
}

impl Node {
    pub fn allows(&self, block: &BlockType) -> bool {
        self.blocks_allowed.contains(block)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTask {
    pub id: String,
    pub delay_seconds: u64,
    pub nodes: Vec<Arc<Node>>,
}

// ---------------------------------------------------------------------------
// Zone set
// ---------------------------------------------------------------------------

/// One immutable generation of the registry.
#[derive(Debug, Default)]
pub struct ZoneSet {
    zones: Vec<Arc<Zone>>,
    by_id: HashMap<String, usize>,
    tasks: Vec<Arc<NodeTask>>,
}

impl ZoneSet {
    /// Build a set from validated zones and node tasks.
    ///
    /// Entries are taken in order. A zone or node whose parent region
    /// overlaps one already accepted, or whose id repeats, is rejected and
    /// reported; the rest still load.
    pub fn build(zones: Vec<Zone>, tasks: Vec<NodeTask>) -> (Self, Vec<ConfigError>) {
        let mut set = ZoneSet::default();
        let mut errors = Vec::new();

        for zone in zones {
            if set.by_id.contains_key(&zone.id) {
                errors.push(ConfigError::InvalidZone {
                    zone: zone.id.clone(),
                    reason: "duplicate zone id".into(),
                });
                continue;
            }
            if let Some(other) = set.zones.iter().find(|z| z.bounds.intersects(&zone.bounds)) {
                errors.push(ConfigError::Overlap {
                    zone: zone.id.clone(),
                    other: other.id.clone(),
                });
                continue;
            }
            set.by_id.insert(zone.id.clone(), set.zones.len());
            set.zones.push(Arc::new(zone));
        }

        for mut task in tasks {
            let mut accepted: Vec<Arc<Node>> = Vec::new();
            for node in std::mem::take(&mut task.nodes) {
                let clash = set
                    .zones
                    .iter()
                    .find(|z| z.bounds.intersects(&node.bounds))
                    .map(|z| z.id.clone())
                    .or_else(|| {
                        set.nodes()
                            .chain(accepted.iter())
                            .find(|n| n.bounds.intersects(&node.bounds))
                            .map(|n| n.id.clone())
                    });
                match clash {
                    Some(other) => errors.push(ConfigError::Overlap {
                        zone: node.id.clone(),
                        other,
                    }),
                    None => accepted.push(node),
                }
            }
            task.nodes = accepted;
            set.tasks.push(Arc::new(task));
        }

        (set, errors)
    }

    pub fn zones(&self) -> &[Arc<Zone>] {
        &self.zones
    }

    pub fn tasks(&self) -> &[Arc<NodeTask>] {
        &self.tasks
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.tasks.iter().flat_map(|t| t.nodes.iter())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Zone>> {
        self.by_id.get(id).map(|&i| &self.zones[i])
    }

    pub fn find_zone_containing(&self, key: &PositionKey) -> Option<&Arc<Zone>> {
        self.zones.iter().find(|z| z.contains(key))
    }

    pub fn find_node_containing(&self, key: &PositionKey) -> Option<&Arc<Node>> {
        self.nodes().find(|n| n.bounds.contains(key))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ZoneRegistry {
    current: RwLock<Arc<ZoneSet>>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole registry. Returns the entries that were rejected.
    pub fn reload(&self, zones: Vec<Zone>, tasks: Vec<NodeTask>) -> Vec<ConfigError> {
        let (set, errors) = ZoneSet::build(zones, tasks);
        for e in &errors {
            warn!("Skipping configuration entry: {}", e);
        }
        info!(
            "Zone registry loaded: {} zones, {} node tasks",
            set.zones.len(),
            set.tasks.len()
        );
        *self.current.write() = Arc::new(set);
        errors
    }

    /// Drop every zone and node.
    pub fn clear(&self) {
        *self.current.write() = Arc::new(ZoneSet::default());
    }

    /// The current generation. Hold on to it to get a consistent view across
    /// several lookups.
    pub fn snapshot(&self) -> Arc<ZoneSet> {
        self.current.read().clone()
    }

    pub fn find_zone_containing(&self, key: &PositionKey) -> Option<Arc<Zone>> {
        self.snapshot().find_zone_containing(key).cloned()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Zone>> {
        self.snapshot().get(id).cloned()
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.snapshot().zones.iter().map(|z| z.id.clone()).collect()
    }

    pub fn find_node_containing(&self, key: &PositionKey) -> Option<Arc<Node>> {
        self.snapshot().find_node_containing(key).cloned()
    }

    pub fn zone_count(&self) -> usize {
        self.snapshot().zones.len()
    }

    pub fn node_count(&self) -> usize {
        self.snapshot().nodes().count()
    }
}
