//! Configuration loading and validation.
//!
//! The file is TOML, read through the `config` crate with `SKYMINES__*`
//! environment overrides layered on top (`SKYMINES__SETTINGS__DEBUG=true`).
//! It is deserialized into `Raw*` structs whose fields are all optional and
//! then validated into the immutable registry types. An invalid zone or node
//! is skipped with its reason; the rest of the file still loads.

use crate::error::ConfigError;
use crate::registry::{Area, BlockRule, BossBarText, Node, NodeTask, Zone, ZoneKind};
use crate::types::{BlockType, Cuboid, PositionKey};
use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub debug: bool,
    /// Cadence of the tick driver. Every tick decays exactly one unit.
    pub tick_interval_ms: u64,
    pub save_interval_secs: u64,
    pub storage_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            tick_interval_ms: 1000,
            save_interval_secs: 900,
            storage_path: PathBuf::from("data/skymines.json"),
        }
    }
}

/// User-facing message templates.
///
/// Placeholders are written `{name}` and filled by [`Locale::render`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Locale {
    pub time_balance: String,
    pub time_changed: String,
    pub block_unlocked: String,
    pub block_locked: String,
    pub reloaded: String,
    pub reload_failed: String,
    pub saved: String,
    pub save_failed: String,
    pub unknown_zone: String,
    pub not_timed: String,
    pub player_offline: String,
    pub invalid_time: String,
    pub invalid_block: String,
    pub usage: String,
    pub disabled: String,
}

impl Default for Locale {
    fn default() -> Self {
        Self {
            time_balance: "{player} has {time} left in {zone}".into(),
            time_changed: "{player} now has {time} in {zone}".into(),
            block_unlocked: "Unlocked {block} for {player} in {zone}".into(),
            block_locked: "Locked {block} for {player} in {zone}".into(),
            reloaded: "Configuration reloaded".into(),
            reload_failed: "Reload failed: {reason}".into(),
            saved: "Player data saved".into(),
            save_failed: "Saving player data failed, see the server log".into(),
            unknown_zone: "Unknown zone '{zone}'".into(),
            not_timed: "Zone '{zone}' does not use mine time".into(),
            player_offline: "{player} is not online".into(),
            invalid_time: "Invalid time: {reason}".into(),
            invalid_block: "Unknown block '{block}'".into(),
            usage: "Usage: {reason}".into(),
            disabled: "SkyMines is disabled: {reason}".into(),
        }
    }
}

impl Locale {
    pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
        vars.iter().fold(template.to_string(), |text, (name, value)| {
            text.replace(&format!("{{{name}}}"), value)
        })
    }
}

/// Everything one read of the configuration produced.
#[derive(Debug, Default)]
pub struct LoadedConfig {
    /// `None` when the `[settings]` section is missing; the engine then
    /// stays soft-disabled.
    pub settings: Option<Settings>,
    pub locale: Locale,
    pub zones: Vec<Zone>,
    pub node_tasks: Vec<NodeTask>,
    /// Entries that failed validation and were skipped.
    pub skipped: Vec<ConfigError>,
}

// ---------------------------------------------------------------------------
// Raw file layout
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    settings: Option<RawSettings>,
    locale: Option<Locale>,
    regions: Vec<RawRegion>,
    zones: Vec<RawZone>,
    node_tasks: Vec<RawNodeTask>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    debug: Option<bool>,
    tick_interval_ms: Option<i64>,
    save_interval_secs: Option<i64>,
    storage_path: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
struct RawPoint {
    x: Option<i32>,
    y: Option<i32>,
    z: Option<i32>,
}

impl RawPoint {
    fn get(&self) -> Option<[i32; 3]> {
        Some([self.x?, self.y?, self.z?])
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRegion {
    name: Option<String>,
    world: Option<String>,
    min: Option<RawPoint>,
    max: Option<RawPoint>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBossBar {
    time_text: Option<String>,
    no_time_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBlockRule {
    block: Option<String>,
    replacement: Option<String>,
    cooldown_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawArea {
    region: Option<String>,
    blocks: Vec<RawBlockRule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawUnlockable {
    block: Option<String>,
    price: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawZone {
    id: Option<String>,
    world: Option<String>,
    region: Option<String>,
    kind: Option<String>,
    boss_bar: Option<RawBossBar>,
    areas: Vec<RawArea>,
    unlockable: Vec<RawUnlockable>,
    free: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNode {
    id: Option<String>,
    world: Option<String>,
    region: Option<String>,
    locations: Vec<RawPoint>,
    schematics: Vec<String>,
    safe_location: Option<RawPoint>,
    blocks_allowed: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNodeTask {
    id: Option<String>,
    delay_seconds: Option<i64>,
    nodes: Vec<RawNode>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read and validate a configuration file.
///
/// Only an unreadable or unparsable file is an error. Invalid entries end up
/// in [`LoadedConfig::skipped`].
pub fn load_from_path(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let raw: RawConfig = Config::builder()
        .add_source(File::from(path).format(FileFormat::Toml))
        .add_source(Environment::with_prefix("SKYMINES").separator("__"))
        .build()?
        .try_deserialize()?;
    validate(raw)
}

/// Same as [`load_from_path`] for in-memory TOML, without environment
/// overrides.
pub fn load_from_str(toml: &str) -> Result<LoadedConfig, ConfigError> {
    let raw: RawConfig = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()?
        .try_deserialize()?;
    validate(raw)
}

fn validate(raw: RawConfig) -> Result<LoadedConfig, ConfigError> {
    let settings = raw.settings.map(validate_settings).transpose()?;
    let mut skipped = Vec::new();

    let mut regions: HashMap<String, Cuboid> = HashMap::new();
    for region in raw.regions {
        match validate_region(region) {
            Ok((name, cuboid)) => {
                regions.insert(name, cuboid);
            }
            Err(e) => skipped.push(e),
        }
    }

    let mut zones = Vec::new();
    let mut seen = HashSet::new();
    for (index, zone) in raw.zones.into_iter().enumerate() {
        match validate_zone(index, zone, &regions) {
            Ok(zone) if !seen.insert(zone.id.clone()) => skipped.push(ConfigError::InvalidZone {
                zone: zone.id,
                reason: "duplicate zone id".into(),
            }),
            Ok(zone) => zones.push(zone),
            Err(e) => skipped.push(e),
        }
    }

    let mut node_tasks = Vec::new();
    for (index, task) in raw.node_tasks.into_iter().enumerate() {
        match validate_task(index, task, &regions, &mut skipped) {
            Ok(task) => node_tasks.push(task),
            Err(e) => skipped.push(e),
        }
    }

    Ok(LoadedConfig {
        settings,
        locale: raw.locale.unwrap_or_default(),
        zones,
        node_tasks,
        skipped,
    })
}

fn validate_settings(raw: RawSettings) -> Result<Settings, ConfigError> {
    let defaults = Settings::default();
    let positive = |key: &'static str, value: Option<i64>, default: u64| match value {
        None => Ok(default),
        Some(v) if v > 0 => Ok(v as u64),
        Some(v) => Err(ConfigError::InvalidSetting {
            key,
            reason: format!("must be positive, got {v}"),
        }),
    };
    Ok(Settings {
        debug: raw.debug.unwrap_or(defaults.debug),
        tick_interval_ms: positive(
            "tick_interval_ms",
            raw.tick_interval_ms,
            defaults.tick_interval_ms,
        )?,
        save_interval_secs: positive(
            "save_interval_secs",
            raw.save_interval_secs,
            defaults.save_interval_secs,
        )?,
        storage_path: raw
            .storage_path
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_path),
    })
}

fn validate_region(raw: RawRegion) -> Result<(String, Cuboid), ConfigError> {
    let name = non_empty(raw.name).ok_or_else(|| ConfigError::InvalidRegion {
        name: "<unnamed>".into(),
        reason: "missing name".into(),
    })?;
    let fail = |reason: &str| ConfigError::InvalidRegion {
        name: name.clone(),
        reason: reason.into(),
    };
    let world = non_empty(raw.world).ok_or_else(|| fail("missing world"))?;
    let min = raw.min.and_then(|p| p.get()).ok_or_else(|| fail("missing or partial min corner"))?;
    let max = raw.max.and_then(|p| p.get()).ok_or_else(|| fail("missing or partial max corner"))?;
    let cuboid = Cuboid::from_corners(world, min, max);
    Ok((name, cuboid))
}

fn validate_zone(
    index: usize,
    raw: RawZone,
    regions: &HashMap<String, Cuboid>,
) -> Result<Zone, ConfigError> {
    let id = non_empty(raw.id).ok_or_else(|| ConfigError::InvalidZone {
        zone: format!("#{index}"),
        reason: "missing id".into(),
    })?;
    let fail = |reason: String| ConfigError::InvalidZone {
        zone: id.clone(),
        reason,
    };

    let world = non_empty(raw.world).ok_or_else(|| fail("missing world".into()))?;
    let region = non_empty(raw.region).ok_or_else(|| fail("missing region".into()))?;
    let bounds = lookup_region(regions, &region, &world).map_err(fail)?;

    let kind = match raw.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("timed") => ZoneKind::Timed,
        Some("unlock") => ZoneKind::Unlock,
        Some(other) => return Err(fail(format!("unknown kind '{other}'"))),
        None => return Err(fail("missing kind".into())),
    };

    let defaults = BossBarText::default();
    let boss_bar = match raw.boss_bar {
        Some(bar) => BossBarText {
            time_text: bar.time_text.unwrap_or(defaults.time_text),
            no_time_text: bar.no_time_text.unwrap_or(defaults.no_time_text),
        },
        None => defaults,
    };

    if raw.areas.is_empty() {
        return Err(fail("no areas".into()));
    }
    let mut areas = Vec::with_capacity(raw.areas.len());
    for area in raw.areas {
        let name = non_empty(area.region).ok_or_else(|| fail("area without region".into()))?;
        let area_bounds = lookup_region(regions, &name, &world).map_err(fail)?;
        let mut rules = HashMap::new();
        for rule in area.blocks {
            let block = parse_block(rule.block.as_deref()).map_err(fail)?;
            let replacement = parse_block(rule.replacement.as_deref()).map_err(fail)?;
            let cooldown_seconds = match rule.cooldown_seconds {
                Some(s) if s > 0 => s as u64,
                Some(s) => return Err(fail(format!("cooldown for {block} must be positive, got {s}"))),
                None => return Err(fail(format!("missing cooldown for {block}"))),
            };
            let rule = BlockRule {
                replacement,
                cooldown_seconds,
            };
            if rules.insert(block.clone(), rule).is_some() {
                return Err(fail(format!("{block} listed twice in area '{name}'")));
            }
        }
        areas.push(Area {
            region: name,
            bounds: area_bounds,
            rules,
        });
    }

    let mut unlockable = BTreeMap::new();
    for entry in raw.unlockable {
        let block = parse_block(entry.block.as_deref()).map_err(fail)?;
        match entry.price {
            Some(price) if price >= 0.0 && price.is_finite() => {
                unlockable.insert(block, price);
            }
            _ => return Err(fail(format!("invalid price for {block}"))),
        }
    }

    let free = raw
        .free
        .iter()
        .map(|b| parse_block(Some(b)))
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(fail)?;

    Ok(Zone {
        id,
        world,
        region,
        bounds,
        kind,
        boss_bar,
        areas,
        unlockable,
        free,
    })
}

fn validate_task(
    index: usize,
    raw: RawNodeTask,
    regions: &HashMap<String, Cuboid>,
    skipped: &mut Vec<ConfigError>,
) -> Result<NodeTask, ConfigError> {
    let id = non_empty(raw.id).unwrap_or_else(|| format!("#{index}"));
    let delay_seconds = match raw.delay_seconds {
        Some(d) if d > 0 => d as u64,
        _ => {
            return Err(ConfigError::InvalidNode {
                task: id,
                node: "*".into(),
                reason: "delay_seconds must be positive".into(),
            })
        }
    };

    let mut nodes = Vec::new();
    for (node_index, node) in raw.nodes.into_iter().enumerate() {
        match validate_node(&id, node_index, node, regions) {
            Ok(node) => nodes.push(Arc::new(node)),
            Err(e) => skipped.push(e),
        }
    }

    Ok(NodeTask {
        id,
        delay_seconds,
        nodes,
    })
}

fn validate_node(
    task: &str,
    index: usize,
    raw: RawNode,
    regions: &HashMap<String, Cuboid>,
) -> Result<Node, ConfigError> {
    let id = non_empty(raw.id).unwrap_or_else(|| format!("#{index}"));
    let fail = |reason: String| ConfigError::InvalidNode {
        task: task.to_string(),
        node: id.clone(),
        reason,
    };

    let world = non_empty(raw.world).ok_or_else(|| fail("missing world".into()))?;
    let region = non_empty(raw.region).ok_or_else(|| fail("missing region".into()))?;
    let bounds = lookup_region(regions, &region, &world).map_err(fail)?;

    let point = |p: &RawPoint| {
        p.get()
            .map(|[x, y, z]| PositionKey::new(world.clone(), x, y, z))
            .ok_or_else(|| fail("partial location".into()))
    };
    let locations = raw
        .locations
        .iter()
        .map(point)
        .collect::<Result<Vec<_>, _>>()?;
    if locations.is_empty() {
        return Err(fail("no paste locations".into()));
    }
    let schematics: Vec<String> = raw
        .schematics
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect();
    if schematics.is_empty() {
        return Err(fail("no schematics".into()));
    }
    let safe_location = raw
        .safe_location
        .as_ref()
        .ok_or_else(|| fail("missing safe_location".into()))
        .and_then(point)?;
    let blocks_allowed = raw
        .blocks_allowed
        .iter()
        .map(|b| parse_block(Some(b)))
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(fail)?;

    Ok(Node {
        id,
        task: task.to_string(),
        world,
        bounds,
        locations,
        schematics,
        safe_location,
        blocks_allowed,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_block(value: Option<&str>) -> Result<BlockType, String> {
    let value = value.ok_or_else(|| "missing block type".to_string())?;
    BlockType::new(value).ok_or_else(|| format!("invalid block type '{value}'"))
}

fn lookup_region(
    regions: &HashMap<String, Cuboid>,
    name: &str,
    world: &str,
) -> Result<Cuboid, String> {
    let cuboid = regions
        .get(name)
        .ok_or_else(|| format!("unknown region '{name}'"))?;
    if cuboid.world != world {
        return Err(format!(
            "region '{name}' is in world '{}', not '{world}'",
            cuboid.world
        ));
    }
    Ok(cuboid.clone())
}
