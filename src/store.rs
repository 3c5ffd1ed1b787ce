//! Player State Store.
//!
//! Everything the engine knows about a player lives here: access time per
//! zone, unlocked block types per zone, which zone's boss bar is showing and
//! every cooldown overlay the player currently sees.
//!
//! Cooldowns are kept in one flat map keyed by `(player, position)`, so a
//! position can carry at most one overlay per player and chunk queries are a
//! filter over that map. The whole store sits behind a single lock; event
//! handlers and the tick both go through it and contention is low.
//!
//! The store performs no I/O and never talks to clients. Callers (the
//! synchronizer and the scheduler) act on the values it returns.

use crate::types::{BlockType, ChunkCoord, PlayerId, PositionKey};
use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

/// Per-player state, minus cooldowns (those live in the flat map).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerState {
    /// Remaining access seconds per zone. Absent means no access; a value is
    /// never stored at zero.
    pub access: HashMap<String, u64>,
    pub unlocked: HashMap<String, BTreeSet<BlockType>>,
    /// Zone whose boss bar the player is currently shown.
    pub boss_bar: Option<String>,
    pub online: bool,
    /// Storage may hold rows this state never saw (created without a load,
    /// or loaded with unreadable rows). Saves of it must not delete rows.
    pub incomplete: bool,
}

impl PlayerState {
    pub fn durable(&self) -> DurableState {
        DurableState {
            access: self.access.clone(),
            unlocked: self.unlocked.clone(),
            incomplete: self.incomplete,
        }
    }
}

/// The part of a player's state that is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableState {
    #[serde(default)]
    pub access: HashMap<String, u64>,
    #[serde(default)]
    pub unlocked: HashMap<String, BTreeSet<BlockType>>,
    /// Not a complete picture of what storage holds for the player.
    #[serde(skip)]
    pub incomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownEntry {
    /// What the player sees at the position while the entry exists.
    pub replacement: BlockType,
    pub remaining: u64,
}

/// Result of [`PlayerStateStore::decrement_cooldown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CooldownStatus {
    Remaining(u64),
    /// The entry hit zero and was removed. The caller owns the revert.
    Expired(CooldownEntry),
    Untracked,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    players: HashMap<PlayerId, PlayerState>,
    cooldowns: HashMap<(PlayerId, PositionKey), CooldownEntry>,
}

impl Inner {
    fn player_mut(&mut self, player: PlayerId) -> &mut PlayerState {
        self.players.entry(player).or_insert_with(|| {
            warn!("No state for player {}, creating an empty one", player);
            PlayerState {
                incomplete: true,
                ..PlayerState::default()
            }
        })
    }
}

#[derive(Default)]
pub struct PlayerStateStore {
    inner: Mutex<Inner>,
}

impl PlayerStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Player lifecycle
    // -----------------------------------------------------------------------

    /// Copy of the player's state, creating an empty one if none exists.
    pub fn get_or_create(&self, player: PlayerId) -> PlayerState {
        self.inner.lock().player_mut(player).clone()
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.inner.lock().players.contains_key(&player)
    }

    /// Install durable state for a player that has none in memory yet.
    ///
    /// Returns `false` and leaves memory untouched when the player is
    /// already tracked; in-memory state wins over storage.
    pub fn insert_if_absent(&self, player: PlayerId, durable: DurableState) -> bool {
        let mut inner = self.inner.lock();
        if inner.players.contains_key(&player) {
            return false;
        }
        inner.players.insert(
            player,
            PlayerState {
                access: durable.access.into_iter().filter(|(_, v)| *v > 0).collect(),
                unlocked: durable.unlocked,
                boss_bar: None,
                online: false,
                incomplete: durable.incomplete,
            },
        );
        true
    }

    pub fn set_online(&self, player: PlayerId, online: bool) {
        self.inner.lock().player_mut(player).online = online;
    }

    /// Snapshot of every tracked player id.
    pub fn players(&self) -> Vec<PlayerId> {
        self.inner.lock().players.keys().copied().collect()
    }

    pub fn durable(&self, player: PlayerId) -> Option<DurableState> {
        self.inner.lock().players.get(&player).map(PlayerState::durable)
    }

    /// Drop a player and every cooldown they own.
    pub fn evict(&self, player: PlayerId) -> Option<PlayerState> {
        let mut inner = self.inner.lock();
        inner.cooldowns.retain(|(owner, _), _| *owner != player);
        inner.players.remove(&player)
    }

    /// Drop the player only if they are offline with no cooldowns left.
    pub fn evict_if_idle(&self, player: PlayerId) -> bool {
        let mut inner = self.inner.lock();
        let Some(state) = inner.players.get(&player) else {
            return false;
        };
        let idle = !state.online && !inner.cooldowns.keys().any(|(owner, _)| *owner == player);
        if idle {
            inner.players.remove(&player);
        }
        idle
    }

    pub fn len(&self) -> usize {
        self.inner.lock().players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().players.is_empty()
    }

    // -----------------------------------------------------------------------
    // Access time
    // -----------------------------------------------------------------------

    pub fn has_zone_access(&self, player: PlayerId, zone: &str) -> bool {
        self.inner
            .lock()
            .players
            .get(&player)
            .is_some_and(|s| s.access.contains_key(zone))
    }

    pub fn zone_access(&self, player: PlayerId, zone: &str) -> u64 {
        self.inner
            .lock()
            .players
            .get(&player)
            .and_then(|s| s.access.get(zone).copied())
            .unwrap_or(0)
    }

    /// Add seconds to a balance; a missing entry behaves like a set.
    pub fn increment_zone_access(&self, player: PlayerId, zone: &str, seconds: u64) -> u64 {
        let mut inner = self.inner.lock();
        let state = inner.player_mut(player);
        let value = state.access.get(zone).copied().unwrap_or(0).saturating_add(seconds);
        store_balance(state, zone, value)
    }

    /// Subtract seconds; a result at or below zero removes the entry.
    pub fn decrement_zone_access(&self, player: PlayerId, zone: &str, seconds: u64) -> u64 {
        let mut inner = self.inner.lock();
        let state = inner.player_mut(player);
        let value = state.access.get(zone).copied().unwrap_or(0).saturating_sub(seconds);
        store_balance(state, zone, value)
    }

    pub fn set_zone_access(&self, player: PlayerId, zone: &str, seconds: u64) -> u64 {
        let mut inner = self.inner.lock();
        store_balance(inner.player_mut(player), zone, seconds)
    }

    // -----------------------------------------------------------------------
    // Cooldowns
    // -----------------------------------------------------------------------

    pub fn is_on_cooldown(&self, player: PlayerId, key: &PositionKey) -> bool {
        self.inner.lock().cooldowns.contains_key(&(player, key.clone()))
    }

    pub fn cooldown(&self, player: PlayerId, key: &PositionKey) -> Option<CooldownEntry> {
        self.inner.lock().cooldowns.get(&(player, key.clone())).cloned()
    }

    /// Start (or restart) a cooldown. A zero duration records nothing.
    pub fn add_cooldown(
        &self,
        player: PlayerId,
        key: PositionKey,
        replacement: BlockType,
        seconds: u64,
    ) -> bool {
        if seconds == 0 {
            return false;
        }
        let mut inner = self.inner.lock();
        inner.player_mut(player);
        inner.cooldowns.insert(
            (player, key),
            CooldownEntry {
                replacement,
                remaining: seconds,
            },
        );
        true
    }

    pub fn decrement_cooldown(
        &self,
        player: PlayerId,
        key: &PositionKey,
        seconds: u64,
    ) -> CooldownStatus {
        let mut inner = self.inner.lock();
        let map_key = (player, key.clone());
        let Some(entry) = inner.cooldowns.get_mut(&map_key) else {
            return CooldownStatus::Untracked;
        };
        entry.remaining = entry.remaining.saturating_sub(seconds);
        if entry.remaining > 0 {
            return CooldownStatus::Remaining(entry.remaining);
        }
        match inner.cooldowns.remove(&map_key) {
            Some(entry) => CooldownStatus::Expired(entry),
            None => CooldownStatus::Untracked,
        }
    }

    pub fn remove_cooldown(&self, player: PlayerId, key: &PositionKey) -> Option<CooldownEntry> {
        self.inner.lock().cooldowns.remove(&(player, key.clone()))
    }

    /// Snapshot of every `(player, position)` pair with a live cooldown.
    pub fn cooldown_keys(&self) -> Vec<(PlayerId, PositionKey)> {
        self.inner.lock().cooldowns.keys().cloned().collect()
    }

    pub fn cooldowns_of(&self, player: PlayerId) -> Vec<(PositionKey, CooldownEntry)> {
        let mut entries: Vec<_> = self
            .inner
            .lock()
            .cooldowns
            .iter()
            .filter(|((owner, _), _)| *owner == player)
            .map(|((_, key), entry)| (key.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// The player's overlays whose position lies in the given chunk.
    pub fn entries_in_chunk(
        &self,
        player: PlayerId,
        world: &str,
        chunk: ChunkCoord,
    ) -> Vec<(PositionKey, BlockType)> {
        let mut entries: Vec<_> = self
            .inner
            .lock()
            .cooldowns
            .iter()
            .filter(|((owner, key), _)| *owner == player && key.in_chunk(world, chunk))
            .map(|((_, key), entry)| (key.clone(), entry.replacement.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn cooldown_count(&self, player: PlayerId) -> usize {
        self.inner
            .lock()
            .cooldowns
            .keys()
            .filter(|(owner, _)| *owner == player)
            .count()
    }

    pub fn active_cooldowns(&self) -> usize {
        self.inner.lock().cooldowns.len()
    }

    // -----------------------------------------------------------------------
    // Unlocked blocks
    // -----------------------------------------------------------------------

    /// Returns `false` if the block was already unlocked.
    pub fn unlock_block(&self, player: PlayerId, zone: &str, block: BlockType) -> bool {
        let mut inner = self.inner.lock();
        inner
            .player_mut(player)
            .unlocked
            .entry(zone.to_string())
            .or_default()
            .insert(block)
    }

    /// Returns `false` if the block was not unlocked.
    pub fn lock_block(&self, player: PlayerId, zone: &str, block: &BlockType) -> bool {
        let mut inner = self.inner.lock();
        let state = inner.player_mut(player);
        let Some(set) = state.unlocked.get_mut(zone) else {
            return false;
        };
        let removed = set.remove(block);
        if set.is_empty() {
            state.unlocked.remove(zone);
        }
        removed
    }

    pub fn is_unlocked(&self, player: PlayerId, zone: &str, block: &BlockType) -> bool {
        self.inner
            .lock()
            .players
            .get(&player)
            .and_then(|s| s.unlocked.get(zone))
            .is_some_and(|set| set.contains(block))
    }

    // -----------------------------------------------------------------------
    // Boss bar indicator
    // -----------------------------------------------------------------------

    pub fn boss_bar(&self, player: PlayerId) -> Option<String> {
        self.inner
            .lock()
            .players
            .get(&player)
            .and_then(|s| s.boss_bar.clone())
    }

    /// Record which zone's bar is showing; returns the previous one.
    pub fn set_boss_bar(&self, player: PlayerId, zone: Option<String>) -> Option<String> {
        let mut inner = self.inner.lock();
        if zone.is_none() && !inner.players.contains_key(&player) {
            return None;
        }
        std::mem::replace(&mut inner.player_mut(player).boss_bar, zone)
    }
}

fn store_balance(state: &mut PlayerState, zone: &str, value: u64) -> u64 {
    if value == 0 {
        state.access.remove(zone);
    } else {
        state.access.insert(zone.to_string(), value);
    }
    value
}
