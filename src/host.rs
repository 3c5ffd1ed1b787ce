//! Host boundary.
//!
//! [`Host`] is the only way the engine observes or affects the game server:
//! player presence and position, chunk residency, the true block at a
//! position, and the per-player client updates it may send. The engine never
//! writes world blocks directly; a structure paste is an opaque request.
//!
//! [`MemoryHost`] is a mirror of host state. The bridge feeds it from the
//! inbound event stream and drains the outbound events it queues; tests use
//! it directly to assert what each client sees.

use crate::error::HostError;
use crate::protocol::{
    subjects, BlockChange, BlockChanges, BossBarHide, BossBarShow, HostEvent, StructurePaste,
    Teleport,
};
use crate::types::{BlockPos, BlockType, ChunkCoord, PlayerId, PositionKey};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub trait Host: Send + Sync {
    fn is_online(&self, player: PlayerId) -> bool;

    /// Live position with orientation, `None` when offline.
    fn player_position(&self, player: PlayerId) -> Option<BlockPos>;

    /// Creative mode or bypass permission.
    fn can_bypass(&self, player: PlayerId) -> bool;

    fn is_chunk_loaded(&self, world: &str, chunk: ChunkCoord) -> bool;

    /// The true world block. Unknown positions read as air.
    fn block_at(&self, key: &PositionKey) -> BlockType;

    /// Update what one player's client shows. Nobody else sees the change.
    fn send_block_changes(&self, player: PlayerId, changes: &[BlockChange])
        -> Result<(), HostError>;

    fn show_boss_bar(&self, player: PlayerId, text: &str);

    fn hide_boss_bar(&self, player: PlayerId);

    fn online_players(&self) -> Vec<PlayerId>;

    fn teleport(&self, player: PlayerId, to: &PositionKey) -> Result<(), HostError>;

    fn paste_structure(
        &self,
        node_id: &str,
        origin: &PositionKey,
        schematic: &str,
    ) -> Result<(), HostError>;
}

// ---------------------------------------------------------------------------
// Outbound events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    BlockChanges(BlockChanges),
    BossBarShow(BossBarShow),
    BossBarHide(BossBarHide),
    Teleport(Teleport),
    StructurePaste(StructurePaste),
}

impl Outbound {
    pub fn subject(&self) -> &'static str {
        match self {
            Outbound::BlockChanges(_) => subjects::BLOCK_CHANGES,
            Outbound::BossBarShow(_) => subjects::BOSS_BAR_SHOW,
            Outbound::BossBarHide(_) => subjects::BOSS_BAR_HIDE,
            Outbound::Teleport(_) => subjects::TELEPORT,
            Outbound::StructurePaste(_) => subjects::STRUCTURE_PASTE,
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryHost
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct OnlinePlayer {
    position: BlockPos,
    bypass: bool,
}

#[derive(Default)]
struct Mirror {
    blocks: HashMap<PositionKey, BlockType>,
    loaded: HashSet<(String, ChunkCoord)>,
    players: HashMap<PlayerId, OnlinePlayer>,
    /// Per-client deviations from the true world.
    views: HashMap<PlayerId, HashMap<PositionKey, BlockType>>,
    boss_bars: HashMap<PlayerId, String>,
    rejected_schematics: HashSet<String>,
    outbox: Vec<HostEvent<Outbound>>,
    frame: u64,
}

impl Mirror {
    fn push(&mut self, event: Outbound) {
        self.frame += 1;
        let subject = event.subject();
        self.outbox.push(HostEvent::new(self.frame, subject, event));
    }

    fn true_block(&self, key: &PositionKey) -> BlockType {
        self.blocks.get(key).cloned().unwrap_or_else(BlockType::air)
    }
}

#[derive(Default)]
pub struct MemoryHost {
    mirror: Mutex<Mirror>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Mirror updates (fed by the bridge)
    // -----------------------------------------------------------------------

    pub fn join_player(&self, player: PlayerId, position: BlockPos, bypass: bool) {
        let mut m = self.mirror.lock();
        m.views.remove(&player);
        m.players.insert(player, OnlinePlayer { position, bypass });
    }

    /// The client disconnects and forgets everything it was shown.
    pub fn quit_player(&self, player: PlayerId) {
        let mut m = self.mirror.lock();
        m.players.remove(&player);
        m.views.remove(&player);
        m.boss_bars.remove(&player);
    }

    pub fn move_player(&self, player: PlayerId, position: BlockPos) -> bool {
        match self.mirror.lock().players.get_mut(&player) {
            Some(p) => {
                p.position = position;
                true
            }
            None => false,
        }
    }

    pub fn set_bypass(&self, player: PlayerId, bypass: bool) {
        if let Some(p) = self.mirror.lock().players.get_mut(&player) {
            p.bypass = bypass;
        }
    }

    pub fn load_chunk(&self, world: &str, chunk: ChunkCoord) {
        self.mirror.lock().loaded.insert((world.to_string(), chunk));
    }

    /// Unloading a chunk makes every client drop its view of it; the next
    /// load shows the true world until overlays are reconciled.
    pub fn unload_chunk(&self, world: &str, chunk: ChunkCoord) {
        let mut m = self.mirror.lock();
        m.loaded.remove(&(world.to_string(), chunk));
        for view in m.views.values_mut() {
            view.retain(|key, _| !key.in_chunk(world, chunk));
        }
    }

    pub fn set_block(&self, key: PositionKey, block: BlockType) {
        let mut m = self.mirror.lock();
        if block.is_air() {
            m.blocks.remove(&key);
        } else {
            m.blocks.insert(key, block);
        }
    }

    /// Make every later paste of `schematic` fail.
    pub fn reject_schematic(&self, schematic: &str) {
        self.mirror
            .lock()
            .rejected_schematics
            .insert(schematic.to_string());
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// What `player`'s client currently shows at `key`.
    pub fn client_view(&self, player: PlayerId, key: &PositionKey) -> BlockType {
        let m = self.mirror.lock();
        m.views
            .get(&player)
            .and_then(|view| view.get(key).cloned())
            .unwrap_or_else(|| m.true_block(key))
    }

    /// Positions where the player's client differs from the world.
    pub fn overlay_count(&self, player: PlayerId) -> usize {
        self.mirror.lock().views.get(&player).map_or(0, HashMap::len)
    }

    pub fn boss_bar(&self, player: PlayerId) -> Option<String> {
        self.mirror.lock().boss_bars.get(&player).cloned()
    }

    pub fn events(&self) -> Vec<HostEvent<Outbound>> {
        self.mirror.lock().outbox.clone()
    }

    pub fn drain_events(&self) -> Vec<HostEvent<Outbound>> {
        std::mem::take(&mut self.mirror.lock().outbox)
    }
}

impl Host for MemoryHost {
    fn is_online(&self, player: PlayerId) -> bool {
        self.mirror.lock().players.contains_key(&player)
    }

    fn player_position(&self, player: PlayerId) -> Option<BlockPos> {
        self.mirror
            .lock()
            .players
            .get(&player)
            .map(|p| p.position.clone())
    }

    fn can_bypass(&self, player: PlayerId) -> bool {
        self.mirror
            .lock()
            .players
            .get(&player)
            .is_some_and(|p| p.bypass)
    }

    fn is_chunk_loaded(&self, world: &str, chunk: ChunkCoord) -> bool {
        self.mirror
            .lock()
            .loaded
            .contains(&(world.to_string(), chunk))
    }

    fn block_at(&self, key: &PositionKey) -> BlockType {
        self.mirror.lock().true_block(key)
    }

    fn send_block_changes(
        &self,
        player: PlayerId,
        changes: &[BlockChange],
    ) -> Result<(), HostError> {
        let mut m = self.mirror.lock();
        if !m.players.contains_key(&player) {
            return Err(HostError::Offline(player));
        }
        for change in changes {
            let truth = m.true_block(&change.position);
            let view = m.views.entry(player).or_default();
            if change.block == truth {
                view.remove(&change.position);
            } else {
                view.insert(change.position.clone(), change.block.clone());
            }
        }
        m.push(Outbound::BlockChanges(BlockChanges {
            player,
            changes: changes.to_vec(),
        }));
        Ok(())
    }

    fn show_boss_bar(&self, player: PlayerId, text: &str) {
        let mut m = self.mirror.lock();
        if !m.players.contains_key(&player) {
            return;
        }
        if m.boss_bars.get(&player).map(String::as_str) == Some(text) {
            return;
        }
        m.boss_bars.insert(player, text.to_string());
        m.push(Outbound::BossBarShow(BossBarShow {
            player,
            text: text.to_string(),
        }));
    }

    fn hide_boss_bar(&self, player: PlayerId) {
        let mut m = self.mirror.lock();
        if m.boss_bars.remove(&player).is_some() {
            m.push(Outbound::BossBarHide(BossBarHide { player }));
        }
    }

    fn online_players(&self) -> Vec<PlayerId> {
        let mut players: Vec<_> = self.mirror.lock().players.keys().copied().collect();
        players.sort();
        players
    }

    fn teleport(&self, player: PlayerId, to: &PositionKey) -> Result<(), HostError> {
        let mut m = self.mirror.lock();
        let Some(online) = m.players.get_mut(&player) else {
            return Err(HostError::Offline(player));
        };
        let (x, y, z) = (to.x as f64 + 0.5, to.y as f64, to.z as f64 + 0.5);
        online.position = BlockPos::new(to.world.clone(), x, y, z);
        m.push(Outbound::Teleport(Teleport {
            player,
            world: to.world.clone(),
            x,
            y,
            z,
        }));
        Ok(())
    }

    fn paste_structure(
        &self,
        node_id: &str,
        origin: &PositionKey,
        schematic: &str,
    ) -> Result<(), HostError> {
        let mut m = self.mirror.lock();
        if m.rejected_schematics.contains(schematic) {
            return Err(HostError::Rejected(format!(
                "schematic '{schematic}' could not be pasted"
            )));
        }
        m.push(Outbound::StructurePaste(StructurePaste {
            node_id: node_id.to_string(),
            origin: origin.clone(),
            schematic: schematic.to_string(),
        }));
        Ok(())
    }
}
