//! Persistence Bridge and storage backends.
//!
//! Access balances and unlocked blocks are stored as rows of
//! `(table, player, zone) → JSON value`. [`PersistenceBridge`] moves every
//! read and write onto tokio's blocking pool so the tick never waits on
//! storage. Failures are logged and reported as `false`; memory is never
//! touched by a save, and a failed load yields an empty state.

use crate::error::PersistenceError;
use crate::store::DurableState;
use crate::types::{BlockType, PlayerId};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SCHEMA_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Storage interface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Times,
    UnlockedBlocks,
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Table::Times => "times",
            Table::UnlockedBlocks => "unlocked_blocks",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub player: PlayerId,
    pub zone: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Upsert {
        table: Table,
        player: PlayerId,
        zone: String,
        value: Value,
    },
    Delete {
        table: Table,
        player: PlayerId,
        zone: String,
    },
}

pub trait Storage: Send + Sync {
    fn upsert(
        &self,
        table: Table,
        player: PlayerId,
        zone: &str,
        value: Value,
    ) -> Result<(), PersistenceError>;

    fn delete(&self, table: Table, player: PlayerId, zone: &str) -> Result<(), PersistenceError>;

    fn scan_by_zone(&self, table: Table, zone: &str) -> Result<Vec<Row>, PersistenceError>;

    fn scan_by_player(&self, table: Table, player: PlayerId) -> Result<Vec<Row>, PersistenceError>;

    /// Apply several mutations. Backends that can write them in one go
    /// should override this.
    fn apply(&self, batch: Vec<Mutation>) -> Result<(), PersistenceError> {
        for m in batch {
            match m {
                Mutation::Upsert {
                    table,
                    player,
                    zone,
                    value,
                } => self.upsert(table, player, &zone, value)?,
                Mutation::Delete {
                    table,
                    player,
                    zone,
                } => self.delete(table, player, &zone)?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage document
// ---------------------------------------------------------------------------

type TableRows = BTreeMap<PlayerId, BTreeMap<String, Value>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    schema_version: u32,
    #[serde(default)]
    times: TableRows,
    #[serde(default)]
    unlocked_blocks: TableRows,
}

impl Document {
    fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            ..Default::default()
        }
    }

    fn table(&self, table: Table) -> &TableRows {
        match table {
            Table::Times => &self.times,
            Table::UnlockedBlocks => &self.unlocked_blocks,
        }
    }

    fn table_mut(&mut self, table: Table) -> &mut TableRows {
        match table {
            Table::Times => &mut self.times,
            Table::UnlockedBlocks => &mut self.unlocked_blocks,
        }
    }

    fn apply(&mut self, m: Mutation) {
        match m {
            Mutation::Upsert {
                table,
                player,
                zone,
                value,
            } => {
                self.table_mut(table)
                    .entry(player)
                    .or_default()
                    .insert(zone, value);
            }
            Mutation::Delete {
                table,
                player,
                zone,
            } => {
                let rows = self.table_mut(table);
                if let Some(zones) = rows.get_mut(&player) {
                    zones.remove(&zone);
                    if zones.is_empty() {
                        rows.remove(&player);
                    }
                }
            }
        }
    }

    fn scan_by_zone(&self, table: Table, zone: &str) -> Vec<Row> {
        self.table(table)
            .iter()
            .filter_map(|(player, zones)| {
                zones.get(zone).map(|value| Row {
                    player: *player,
                    zone: zone.to_string(),
                    value: value.clone(),
                })
            })
            .collect()
    }

    fn scan_by_player(&self, table: Table, player: PlayerId) -> Vec<Row> {
        self.table(table)
            .get(&player)
            .map(|zones| {
                zones
                    .iter()
                    .map(|(zone, value)| Row {
                        player,
                        zone: zone.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// Storage that lives only as long as the process.
pub struct MemoryStorage {
    doc: Mutex<Document>,
    fail_writes: AtomicBool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            doc: Mutex::new(Document::empty()),
            fail_writes: AtomicBool::new(false),
        }
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io(std::io::Error::other(
                "storage is read-only",
            )));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn upsert(
        &self,
        table: Table,
        player: PlayerId,
        zone: &str,
        value: Value,
    ) -> Result<(), PersistenceError> {
        self.apply(vec![Mutation::Upsert {
            table,
            player,
            zone: zone.to_string(),
            value,
        }])
    }

    fn delete(&self, table: Table, player: PlayerId, zone: &str) -> Result<(), PersistenceError> {
        self.apply(vec![Mutation::Delete {
            table,
            player,
            zone: zone.to_string(),
        }])
    }

    fn scan_by_zone(&self, table: Table, zone: &str) -> Result<Vec<Row>, PersistenceError> {
        Ok(self.doc.lock().scan_by_zone(table, zone))
    }

    fn scan_by_player(&self, table: Table, player: PlayerId) -> Result<Vec<Row>, PersistenceError> {
        Ok(self.doc.lock().scan_by_player(table, player))
    }

    fn apply(&self, batch: Vec<Mutation>) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let mut doc = self.doc.lock();
        for m in batch {
            doc.apply(m);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonFileStorage
// ---------------------------------------------------------------------------

/// One JSON document on disk, rewritten through a temp file and a rename
/// so a crash mid-write leaves the previous version intact.
pub struct JsonFileStorage {
    path: PathBuf,
    doc: Mutex<Document>,
}

/// Row of the old single-table layout.
#[derive(Debug, Deserialize)]
struct LegacyTimeRow {
    mine_id: String,
    player_uuid: String,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct LegacyDocument {
    #[serde(default)]
    skymines_times: Vec<LegacyTimeRow>,
}

impl JsonFileStorage {
    /// Open (or start) the document at `path`, migrating the old layout if
    /// it is found. Run once at startup, never from the tick.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let storage = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let raw: Value = serde_json::from_str(&text)?;
                if raw.get("schema_version").is_some() {
                    Self {
                        doc: Mutex::new(serde_json::from_value(raw)?),
                        path,
                    }
                } else {
                    let doc = migrate_legacy(raw)?;
                    let storage = Self {
                        path,
                        doc: Mutex::new(doc),
                    };
                    storage.recreate()?;
                    storage
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self {
                path,
                doc: Mutex::new(Document::empty()),
            },
            Err(e) => return Err(e.into()),
        };
        Ok(storage)
    }

    /// Drop the old document and write the migrated one in its place.
    fn recreate(&self) -> Result<(), PersistenceError> {
        let backup = self.path.with_extension("legacy.json");
        std::fs::rename(&self.path, &backup)?;
        write_atomic(&self.path, &self.doc.lock())?;
        std::fs::remove_file(&backup)?;
        Ok(())
    }
}

impl Storage for JsonFileStorage {
    fn upsert(
        &self,
        table: Table,
        player: PlayerId,
        zone: &str,
        value: Value,
    ) -> Result<(), PersistenceError> {
        self.apply(vec![Mutation::Upsert {
            table,
            player,
            zone: zone.to_string(),
            value,
        }])
    }

    fn delete(&self, table: Table, player: PlayerId, zone: &str) -> Result<(), PersistenceError> {
        self.apply(vec![Mutation::Delete {
            table,
            player,
            zone: zone.to_string(),
        }])
    }

    fn scan_by_zone(&self, table: Table, zone: &str) -> Result<Vec<Row>, PersistenceError> {
        Ok(self.doc.lock().scan_by_zone(table, zone))
    }

    fn scan_by_player(&self, table: Table, player: PlayerId) -> Result<Vec<Row>, PersistenceError> {
        Ok(self.doc.lock().scan_by_player(table, player))
    }

    /// Write the batch to disk before it becomes visible in memory, so a
    /// failed write leaves both unchanged.
    fn apply(&self, batch: Vec<Mutation>) -> Result<(), PersistenceError> {
        let mut doc = self.doc.lock();
        let mut next = doc.clone();
        for m in batch {
            next.apply(m);
        }
        write_atomic(&self.path, &next)?;
        *doc = next;
        Ok(())
    }
}

fn write_atomic(path: &Path, doc: &Document) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn migrate_legacy(raw: Value) -> Result<Document, PersistenceError> {
    let legacy: LegacyDocument = serde_json::from_value(raw)?;
    let mut doc = Document::empty();
    let mut migrated = 0usize;
    for row in legacy.skymines_times {
        let Ok(player) = row.player_uuid.parse::<PlayerId>() else {
            warn!("Dropping legacy row with bad player id '{}'", row.player_uuid);
            continue;
        };
        if row.time <= 0 {
            continue;
        }
        doc.times
            .entry(player)
            .or_default()
            .insert(row.mine_id, Value::from(row.time));
        migrated += 1;
    }
    info!("Migrated {} legacy access-time rows to schema {}", migrated, SCHEMA_VERSION);
    Ok(doc)
}

// ---------------------------------------------------------------------------
// Player rows
// ---------------------------------------------------------------------------

/// Mutations that make storage match `state` for one player, including
/// deletes for zones the player no longer has rows for.
///
/// An incomplete state only upserts: rows it never saw are left alone.
pub fn player_mutations(
    storage: &dyn Storage,
    player: PlayerId,
    state: &DurableState,
) -> Result<Vec<Mutation>, PersistenceError> {
    let mut batch = Vec::new();

    for (zone, seconds) in &state.access {
        batch.push(Mutation::Upsert {
            table: Table::Times,
            player,
            zone: zone.clone(),
            value: Value::from(*seconds),
        });
    }
    for (zone, blocks) in state.unlocked.iter().filter(|(_, b)| !b.is_empty()) {
        batch.push(Mutation::Upsert {
            table: Table::UnlockedBlocks,
            player,
            zone: zone.clone(),
            value: Value::from(blocks.iter().map(|b| b.as_str()).collect::<Vec<_>>()),
        });
    }
    if state.incomplete {
        return Ok(batch);
    }

    for row in storage.scan_by_player(Table::Times, player)? {
        if !state.access.contains_key(&row.zone) {
            batch.push(Mutation::Delete {
                table: Table::Times,
                player,
                zone: row.zone,
            });
        }
    }
    for row in storage.scan_by_player(Table::UnlockedBlocks, player)? {
        if state.unlocked.get(&row.zone).map_or(true, BTreeSet::is_empty) {
            batch.push(Mutation::Delete {
                table: Table::UnlockedBlocks,
                player,
                zone: row.zone,
            });
        }
    }

    Ok(batch)
}

pub fn write_player(
    storage: &dyn Storage,
    player: PlayerId,
    state: &DurableState,
) -> Result<(), PersistenceError> {
    let batch = player_mutations(storage, player, state)?;
    storage.apply(batch)
}

/// Read one player's rows.
///
/// Only a storage failure is an error. A row that cannot be decoded is
/// logged and skipped, and the result is marked incomplete so a later save
/// does not delete the row.
pub fn read_player(storage: &dyn Storage, player: PlayerId) -> Result<DurableState, PersistenceError> {
    let mut state = DurableState::default();

    for row in storage.scan_by_player(Table::Times, player)? {
        match row.value.as_u64() {
            Some(0) => {}
            Some(seconds) => {
                state.access.insert(row.zone, seconds);
            }
            None => {
                skip_row(Table::Times, &row, "access time is not a non-negative integer");
                state.incomplete = true;
            }
        }
    }

    for row in storage.scan_by_player(Table::UnlockedBlocks, player)? {
        match decode_unlocked(&row.value) {
            Ok(blocks) if blocks.is_empty() => {}
            Ok(blocks) => {
                state.unlocked.insert(row.zone, blocks);
            }
            Err(reason) => {
                skip_row(Table::UnlockedBlocks, &row, &reason);
                state.incomplete = true;
            }
        }
    }

    Ok(state)
}

fn decode_unlocked(value: &Value) -> Result<BTreeSet<BlockType>, String> {
    let names: Vec<String> = serde_json::from_value(value.clone())
        .map_err(|e| format!("unlocked blocks are not a string list: {e}"))?;
    names
        .iter()
        .map(|n| BlockType::new(n).ok_or_else(|| format!("invalid block type '{n}'")))
        .collect()
}

fn skip_row(table: Table, row: &Row, reason: &str) {
    let e = PersistenceError::Corrupt {
        player: row.player,
        zone: row.zone.clone(),
        reason: format!("{reason} (got {})", row.value),
    };
    warn!("Skipping unreadable {} row: {}", table, e);
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Runs storage work on the blocking pool and reports plain success flags.
#[derive(Clone)]
pub struct PersistenceBridge {
    storage: Arc<dyn Storage>,
}

impl PersistenceBridge {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Persist one player's snapshot.
    pub async fn save(&self, player: PlayerId, state: DurableState) -> bool {
        let storage = self.storage.clone();
        let result =
            tokio::task::spawn_blocking(move || write_player(storage.as_ref(), player, &state))
                .await
                .map_err(|e| PersistenceError::Worker(e.to_string()))
                .and_then(|r| r);
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save player {}: {}", player, e);
                false
            }
        }
    }

    /// Persist every snapshot concurrently. `true` only if all succeeded.
    pub async fn save_all(&self, states: Vec<(PlayerId, DurableState)>) -> bool {
        let handles: Vec<_> = states
            .into_iter()
            .map(|(player, state)| {
                let bridge = self.clone();
                tokio::spawn(async move { bridge.save(player, state).await })
            })
            .collect();

        let mut all_saved = true;
        for handle in handles {
            match handle.await {
                Ok(saved) => all_saved &= saved,
                Err(e) => {
                    error!("Save task failed: {}", e);
                    all_saved = false;
                }
            }
        }
        all_saved
    }

    /// Read one player's durable state; empty (and incomplete) on any
    /// storage error.
    pub async fn load(&self, player: PlayerId) -> DurableState {
        let storage = self.storage.clone();
        let result = tokio::task::spawn_blocking(move || read_player(storage.as_ref(), player))
            .await
            .map_err(|e| PersistenceError::Worker(e.to_string()))
            .and_then(|r| r);
        match result {
            Ok(state) => state,
            Err(e) => {
                error!("Failed to load player {}: {}", player, e);
                DurableState {
                    incomplete: true,
                    ..DurableState::default()
                }
            }
        }
    }
}
