//! Cooldown/Decay Scheduler.
//!
//! [`DecayScheduler::tick`] is the body of the once-a-second tick. It walks
//! snapshots of the store, never the live maps, so joins and quits that land
//! mid-walk cannot disturb it:
//!
//! 1. every online player standing in a timed zone with a balance loses one
//!    second of access there, and their boss bar is refreshed;
//! 2. every cooldown loses one second; an expired entry is removed and the
//!    owner's view of the true block is restored (or deferred);
//! 3. node tasks count down and re-arm their nodes at zero;
//! 4. offline players with no cooldowns left are evicted.
//!
//! [`TickDriver`] runs a closure on a tokio interval and can be stopped any
//! number of times.

use crate::bossbar;
use crate::host::Host;
use crate::registry::{NodeTask, ZoneRegistry, ZoneSet};
use crate::store::{CooldownStatus, PlayerStateStore};
use crate::sync::{IllusionSync, RevertOutcome};
use crate::types::normalize;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ---------------------------------------------------------------------------
// Tick result
// ---------------------------------------------------------------------------

/// What a single [`DecayScheduler::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Players whose access balance was decremented.
    pub access_decremented: usize,
    pub cooldowns_expired: usize,
    /// Expired cooldowns whose true block reached the client.
    pub reverted: usize,
    /// Expired cooldowns whose client update waits for reconciliation.
    pub deferred: usize,
    pub nodes_rearmed: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, Copy)]
struct NodeCountdown {
    remaining: u64,
    cursor: usize,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct DecayScheduler {
    store: Arc<PlayerStateStore>,
    registry: Arc<ZoneRegistry>,
    host: Arc<dyn Host>,
    sync: Arc<IllusionSync>,
    countdowns: Mutex<HashMap<String, NodeCountdown>>,
    ticks: AtomicU64,
}

impl DecayScheduler {
    pub fn new(
        store: Arc<PlayerStateStore>,
        registry: Arc<ZoneRegistry>,
        host: Arc<dyn Host>,
        sync: Arc<IllusionSync>,
    ) -> Self {
        Self {
            store,
            registry,
            host,
            sync,
            countdowns: Mutex::new(HashMap::new()),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn total_ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Forget node countdowns; every task starts its full delay again.
    pub fn reset_nodes(&self) {
        self.countdowns.lock().clear();
    }

    /// Seconds until `task` re-arms, if it has started counting.
    pub fn node_countdown(&self, task: &str) -> Option<u64> {
        self.countdowns.lock().get(task).map(|c| c.remaining)
    }

    // -----------------------------------------------------------------------
    // Main tick
    // -----------------------------------------------------------------------

    pub fn tick(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let zones = self.registry.snapshot();
        let mut report = TickReport {
            tick,
            ..Default::default()
        };

        self.decay_access(&zones, &mut report);
        self.decay_cooldowns(&mut report);
        self.count_down_nodes(&zones, &mut report);

        for player in self.store.players() {
            if self.store.evict_if_idle(player) {
                debug!("Evicted idle offline player {}", player);
                report.evicted += 1;
            }
        }

        report
    }

    fn decay_access(&self, zones: &ZoneSet, report: &mut TickReport) {
        for player in self.store.players() {
            // Left the server or the zone since the snapshot: skip this tick.
            let Some(pos) = self.host.player_position(player) else {
                continue;
            };
            let key = normalize(&pos);
            let Some(zone) = zones.find_zone_containing(&key).filter(|z| z.is_timed()) else {
                continue;
            };
            if self.store.has_zone_access(player, &zone.id) {
                self.store.decrement_zone_access(player, &zone.id, 1);
                report.access_decremented += 1;
            }
            bossbar::refresh(&self.store, self.host.as_ref(), zones, player);
        }
    }

    fn decay_cooldowns(&self, report: &mut TickReport) {
        for (player, key) in self.store.cooldown_keys() {
            if let CooldownStatus::Expired(_) = self.store.decrement_cooldown(player, &key, 1) {
                report.cooldowns_expired += 1;
                match self.sync.restore_view(player, &key) {
                    RevertOutcome::Reverted => report.reverted += 1,
                    RevertOutcome::Deferred => report.deferred += 1,
                    RevertOutcome::NotTracked => {}
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    fn count_down_nodes(&self, zones: &ZoneSet, report: &mut TickReport) {
        let mut due = Vec::new();
        {
            let mut countdowns = self.countdowns.lock();
            for task in zones.tasks() {
                let countdown = countdowns.entry(task.id.clone()).or_insert(NodeCountdown {
                    remaining: task.delay_seconds,
                    cursor: 0,
                });
                countdown.remaining = countdown.remaining.saturating_sub(1);
                if countdown.remaining == 0 {
                    due.push((task.clone(), countdown.cursor));
                    countdown.remaining = task.delay_seconds;
                    countdown.cursor = countdown.cursor.wrapping_add(1);
                }
            }
        }

        for (task, cursor) in due {
            report.nodes_rearmed += self.rearm(&task, cursor);
        }
    }

    /// Clear players out of each node and paste a fresh structure. A node
    /// that fails to paste is logged and the rest still run.
    fn rearm(&self, task: &NodeTask, cursor: usize) -> usize {
        let online = self.host.online_players();
        let mut rearmed = 0;

        for node in &task.nodes {
            for &player in &online {
                let inside = self
                    .host
                    .player_position(player)
                    .is_some_and(|pos| node.bounds.contains(&normalize(&pos)));
                if inside {
                    if let Err(e) = self.host.teleport(player, &node.safe_location) {
                        warn!("Could not move {} out of node {}: {}", player, node.id, e);
                    }
                }
            }

            let origin = &node.locations[cursor % node.locations.len()];
            let schematic = &node.schematics[cursor % node.schematics.len()];
            match self.host.paste_structure(&node.id, origin, schematic) {
                Ok(()) => {
                    info!("Re-armed node {} with '{}' at {}", node.id, schematic, origin);
                    rearmed += 1;
                }
                Err(e) => warn!("Failed to re-arm node {} in task {}: {}", node.id, task.id, e),
            }
        }

        rearmed
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// A recurring task on the tokio runtime.
#[derive(Default)]
pub struct TickDriver {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TickDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `f` every `period`, first after one full period. Replaces any
    /// task already running. Must be called inside a tokio runtime.
    pub fn start(&self, period: Duration, mut f: impl FnMut() + Send + 'static) {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                f();
            }
        });
        if let Some(old) = self.handle.lock().replace(task) {
            old.abort();
        }
    }

    /// Cancel the task. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
