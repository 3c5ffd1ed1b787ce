//! Block Illusion Synchronizer and Reconciliation-on-Rejoin.
//!
//! Pairs every store mutation that changes an overlay with the matching
//! client update, and only ever addresses the one player who owns the
//! overlay. A client update that cannot be delivered (player offline, chunk
//! not loaded) is not retried. The logical state is already correct, and
//! [`IllusionSync::reconcile_chunk`] / [`IllusionSync::reconcile_player`]
//! repair the client the next time it can see the chunk.

use crate::host::Host;
use crate::protocol::BlockChange;
use crate::registry::Zone;
use crate::store::PlayerStateStore;
use crate::types::{BlockType, ChunkCoord, PlayerId, PositionKey};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The block type has no usable rule at this position.
    NotMineable,
    Overlaid {
        replacement: BlockType,
        seconds: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    /// The player's client was sent the true block.
    Reverted,
    /// Cleared logically; the client is corrected on its next load/join.
    Deferred,
    NotTracked,
}

pub struct IllusionSync {
    store: Arc<PlayerStateStore>,
    host: Arc<dyn Host>,
}

impl IllusionSync {
    pub fn new(store: Arc<PlayerStateStore>, host: Arc<dyn Host>) -> Self {
        Self { store, host }
    }

    // -----------------------------------------------------------------------
    // Overlay lifecycle
    // -----------------------------------------------------------------------

    /// Put `key` on cooldown for `player` using the zone's rule for the true
    /// block there, and show the replacement to that player only.
    pub fn trigger_cooldown(&self, player: PlayerId, key: &PositionKey, zone: &Zone) -> TriggerOutcome {
        let block = self.host.block_at(key);
        let Some(rule) = zone.rule_for(key, &block) else {
            return TriggerOutcome::NotMineable;
        };

        // No entry, no overlay.
        if !self.store.add_cooldown(
            player,
            key.clone(),
            rule.replacement.clone(),
            rule.cooldown_seconds,
        ) {
            return TriggerOutcome::NotMineable;
        }
        self.send(
            player,
            vec![BlockChange {
                position: key.clone(),
                block: rule.replacement.clone(),
            }],
        );

        TriggerOutcome::Overlaid {
            replacement: rule.replacement.clone(),
            seconds: rule.cooldown_seconds,
        }
    }

    /// Drop the cooldown at `key` and show the player the true block again.
    pub fn revert(&self, player: PlayerId, key: &PositionKey) -> RevertOutcome {
        match self.store.remove_cooldown(player, key) {
            Some(_) => self.restore_view(player, key),
            None => RevertOutcome::NotTracked,
        }
    }

    /// Push the true world block at `key` to `player`, if they can see it.
    ///
    /// Used after the store already dropped the entry (expiry in the tick).
    pub fn restore_view(&self, player: PlayerId, key: &PositionKey) -> RevertOutcome {
        if !self.reachable(player, key) {
            debug!("Deferring revert of {} for {}", key, player);
            return RevertOutcome::Deferred;
        }
        let change = BlockChange {
            position: key.clone(),
            block: self.host.block_at(key),
        };
        if self.send(player, vec![change]) {
            RevertOutcome::Reverted
        } else {
            RevertOutcome::Deferred
        }
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Re-send the player's overlays inside one freshly loaded chunk.
    ///
    /// Returns how many overlays were sent. Replaying is harmless.
    pub fn reconcile_chunk(&self, player: PlayerId, world: &str, chunk: ChunkCoord) -> usize {
        if !self.host.is_online(player) {
            return 0;
        }
        let changes: Vec<_> = self
            .store
            .entries_in_chunk(player, world, chunk)
            .into_iter()
            .map(|(position, block)| BlockChange { position, block })
            .collect();
        let count = changes.len();
        if count > 0 && self.send(player, changes) {
            count
        } else {
            0
        }
    }

    /// Re-send every overlay of the player that lies in a loaded chunk.
    pub fn reconcile_player(&self, player: PlayerId) -> usize {
        if !self.host.is_online(player) {
            return 0;
        }
        let changes: Vec<_> = self
            .store
            .cooldowns_of(player)
            .into_iter()
            .filter(|(key, _)| self.host.is_chunk_loaded(&key.world, key.chunk()))
            .map(|(position, entry)| BlockChange {
                position,
                block: entry.replacement,
            })
            .collect();
        let count = changes.len();
        if count > 0 && self.send(player, changes) {
            count
        } else {
            0
        }
    }

    /// Show every online player the true world at each of their overlays.
    /// Store entries are left in place.
    pub fn restore_all(&self) -> usize {
        let mut by_player: BTreeMap<PlayerId, Vec<BlockChange>> = BTreeMap::new();
        for (player, key) in self.store.cooldown_keys() {
            if self.reachable(player, &key) {
                let block = self.host.block_at(&key);
                by_player.entry(player).or_default().push(BlockChange {
                    position: key,
                    block,
                });
            }
        }
        by_player
            .into_iter()
            .map(|(player, changes)| {
                let count = changes.len();
                if self.send(player, changes) {
                    count
                } else {
                    0
                }
            })
            .sum()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn reachable(&self, player: PlayerId, key: &PositionKey) -> bool {
        self.host.is_online(player) && self.host.is_chunk_loaded(&key.world, key.chunk())
    }

    fn send(&self, player: PlayerId, mut changes: Vec<BlockChange>) -> bool {
        changes.sort_by(|a, b| a.position.cmp(&b.position));
        match self.host.send_block_changes(player, &changes) {
            Ok(()) => true,
            Err(e) => {
                debug!("Client update for {} not delivered: {}", player, e);
                false
            }
        }
    }
}
