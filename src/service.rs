//! MineService – composition root for the engine.
//!
//! Owns the store, registry, synchronizer, scheduler and persistence bridge
//! and exposes the operations the host glue calls: interaction checks,
//! chunk/join/quit/move hooks, admin time and unlock changes, reload, save
//! and shutdown.

use crate::bossbar;
use crate::commands::{self, Command, CommandResponse, TimeChange};
use crate::config::{self, LoadedConfig, Locale, Settings};
use crate::error::ConfigError;
use crate::host::Host;
use crate::persistence::{PersistenceBridge, Storage};
use crate::protocol::{DenyReason, InteractOutcome};
use crate::registry::{ZoneKind, ZoneRegistry};
use crate::scheduler::{DecayScheduler, TickDriver, TickReport};
use crate::store::PlayerStateStore;
use crate::sync::{IllusionSync, TriggerOutcome};
use crate::types::{normalize, BlockPos, BlockType, ChunkCoord, EngineStats, PlayerId};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Runtime {
    /// `None` while soft-disabled.
    settings: Option<Settings>,
    locale: Locale,
}

pub struct MineService {
    host: Arc<dyn Host>,
    store: Arc<PlayerStateStore>,
    registry: Arc<ZoneRegistry>,
    sync: Arc<IllusionSync>,
    scheduler: Arc<DecayScheduler>,
    persistence: PersistenceBridge,
    config_path: Option<PathBuf>,
    runtime: RwLock<Runtime>,
    ticker: TickDriver,
    saver: TickDriver,
    /// Held by the tick and by every handler that reads or changes player
    /// state, so they run one at a time like on the host's main thread.
    world: Mutex<()>,
}

impl MineService {
    /// Build a soft-disabled service. Call [`MineService::reload`] or
    /// [`MineService::reload_with`] to load zones and start ticking.
    pub fn new(
        host: Arc<dyn Host>,
        storage: Arc<dyn Storage>,
        config_path: Option<PathBuf>,
    ) -> Arc<Self> {
        let store = Arc::new(PlayerStateStore::new());
        let registry = Arc::new(ZoneRegistry::new());
        let sync = Arc::new(IllusionSync::new(store.clone(), host.clone()));
        let scheduler = Arc::new(DecayScheduler::new(
            store.clone(),
            registry.clone(),
            host.clone(),
            sync.clone(),
        ));
        Arc::new(Self {
            host,
            store,
            registry,
            sync,
            scheduler,
            persistence: PersistenceBridge::new(storage),
            config_path,
            runtime: RwLock::new(Runtime::default()),
            ticker: TickDriver::new(),
            saver: TickDriver::new(),
            world: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Arc<PlayerStateStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ZoneRegistry> {
        &self.registry
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn is_enabled(&self) -> bool {
        self.runtime.read().settings.is_some()
    }

    pub fn settings(&self) -> Option<Settings> {
        self.runtime.read().settings.clone()
    }

    // -----------------------------------------------------------------------
    // Configuration lifecycle
    // -----------------------------------------------------------------------

    /// Re-read the configuration file and swap it in.
    ///
    /// If the file cannot be read the previous configuration stays active.
    /// Player state is never touched.
    pub fn reload(self: &Arc<Self>) -> Result<Vec<ConfigError>, ConfigError> {
        let Some(path) = self.config_path.clone() else {
            return Err(ConfigError::MissingSettings);
        };
        match config::load_from_path(&path) {
            Ok(loaded) => Ok(self.reload_with(loaded)),
            Err(e) => {
                error!("Could not read {}: {}", path.display(), e);
                Err(e)
            }
        }
    }

    /// Stop the tasks, apply `loaded`, and restart them if the result is
    /// enabled. Returns the entries that were skipped.
    pub fn reload_with(self: &Arc<Self>, loaded: LoadedConfig) -> Vec<ConfigError> {
        self.stop_tasks();

        let mut skipped = loaded.skipped;
        for e in &skipped {
            warn!("Skipping configuration entry: {}", e);
        }

        {
            let mut runtime = self.runtime.write();
            runtime.locale = loaded.locale;
            runtime.settings = loaded.settings;
        }

        if self.is_enabled() {
            {
                let _world = self.world.lock();
                skipped.extend(self.registry.reload(loaded.zones, loaded.node_tasks));
                self.scheduler.reset_nodes();
            }
            self.start_tasks();
        } else {
            error!("Missing [settings] section, SkyMines is disabled until it is fixed");
            self.registry.clear();
        }

        skipped
    }

    /// Start the decay tick and the periodic save. No-op while disabled.
    ///
    /// The tasks hold only a weak reference, so dropping the last `Arc`
    /// ends them.
    pub fn start_tasks(self: &Arc<Self>) {
        let Some(settings) = self.settings() else {
            return;
        };

        let weak = Arc::downgrade(self);
        self.ticker
            .start(Duration::from_millis(settings.tick_interval_ms), move || {
                if let Some(svc) = weak.upgrade() {
                    svc.tick();
                }
            });

        let weak = Arc::downgrade(self);
        self.saver
            .start(Duration::from_secs(settings.save_interval_secs), move || {
                if let Some(svc) = weak.upgrade() {
                    tokio::spawn(async move {
                        svc.save_all().await;
                    });
                }
            });

        info!(
            "Tasks started (tick every {}ms, save every {}s)",
            settings.tick_interval_ms, settings.save_interval_secs
        );
    }

    /// Cancel both tasks. Safe to call any number of times.
    pub fn stop_tasks(&self) {
        let stopped = self.ticker.stop() | self.saver.stop();
        if stopped {
            info!("Tasks stopped");
        }
    }

    pub fn tasks_running(&self) -> bool {
        self.ticker.is_running()
    }

    pub fn tick(&self) -> TickReport {
        let _world = self.world.lock();
        self.scheduler.tick()
    }

    // -----------------------------------------------------------------------
    // Interaction
    // -----------------------------------------------------------------------

    pub fn on_block_interact(&self, player: PlayerId, pos: &BlockPos) -> InteractOutcome {
        let _world = self.world.lock();
        let key = normalize(pos);
        let zones = self.registry.snapshot();

        if let Some(zone) = zones.find_zone_containing(&key) {
            if self.host.can_bypass(player) {
                return InteractOutcome::Allowed { overlay: false };
            }
            if self.store.is_on_cooldown(player, &key) {
                self.sync.reconcile_player(player);
                return InteractOutcome::Denied(DenyReason::OnCooldown);
            }

            return match zone.kind {
                ZoneKind::Timed => {
                    if !self.store.has_zone_access(player, &zone.id) {
                        return InteractOutcome::Denied(DenyReason::NoAccessTime);
                    }
                    match self.sync.trigger_cooldown(player, &key, zone) {
                        TriggerOutcome::Overlaid { .. } => InteractOutcome::Allowed { overlay: true },
                        TriggerOutcome::NotMineable => {
                            InteractOutcome::Denied(DenyReason::NotMineable)
                        }
                    }
                }
                ZoneKind::Unlock => {
                    let block = self.host.block_at(&key);
                    if !zone.is_free(&block) && !self.store.is_unlocked(player, &zone.id, &block) {
                        let reason = if zone.price(&block).is_some() {
                            DenyReason::Locked
                        } else {
                            DenyReason::NotMineable
                        };
                        return InteractOutcome::Denied(reason);
                    }
                    let overlay = matches!(
                        self.sync.trigger_cooldown(player, &key, zone),
                        TriggerOutcome::Overlaid { .. }
                    );
                    InteractOutcome::Allowed { overlay }
                }
            };
        }

        if let Some(node) = zones.find_node_containing(&key) {
            if self.host.can_bypass(player) || node.allows(&self.host.block_at(&key)) {
                return InteractOutcome::Allowed { overlay: false };
            }
            return InteractOutcome::Denied(DenyReason::NotMineable);
        }

        InteractOutcome::NotInZone
    }

    /// Placing a block inside a zone or node region is denied unless the
    /// player can bypass. Nothing is tracked.
    pub fn on_block_place(&self, player: PlayerId, pos: &BlockPos) -> InteractOutcome {
        let key = normalize(pos);
        let zones = self.registry.snapshot();
        if zones.find_zone_containing(&key).is_none() && zones.find_node_containing(&key).is_none() {
            return InteractOutcome::NotInZone;
        }
        if self.host.can_bypass(player) {
            InteractOutcome::Allowed { overlay: false }
        } else {
            InteractOutcome::Denied(DenyReason::PlaceNotAllowed)
        }
    }

    // -----------------------------------------------------------------------
    // Player and chunk lifecycle
    // -----------------------------------------------------------------------

    /// A chunk became visible. With `player` set only that player is
    /// reconciled, otherwise every online player in the chunk's world.
    pub fn on_chunk_load(&self, world: &str, chunk: ChunkCoord, player: Option<PlayerId>) -> usize {
        let _world = self.world.lock();
        let players = match player {
            Some(p) => vec![p],
            None => self
                .host
                .online_players()
                .into_iter()
                .filter(|p| {
                    self.host
                        .player_position(*p)
                        .is_some_and(|pos| pos.world == world)
                })
                .collect(),
        };
        players
            .into_iter()
            .map(|p| self.sync.reconcile_chunk(p, world, chunk))
            .sum()
    }

    /// Load state if it is not in memory, then repair the client.
    ///
    /// Returns how many overlays were re-sent.
    pub async fn on_player_join(&self, player: PlayerId) -> usize {
        self.ensure_loaded(player).await;
        let _world = self.world.lock();
        self.store.set_online(player, true);
        let resent = self.sync.reconcile_player(player);
        bossbar::refresh(&self.store, self.host.as_ref(), &self.registry.snapshot(), player);
        resent
    }

    /// Mark the player offline and save their durable state in the
    /// background. State with live cooldowns stays in memory so it keeps
    /// decaying; the rest is dropped now.
    pub fn on_player_quit(&self, player: PlayerId) -> JoinHandle<bool> {
        let durable = {
            let _world = self.world.lock();
            let durable = self.store.get_or_create(player).durable();
            self.store.set_online(player, false);
            if self.store.set_boss_bar(player, None).is_some() {
                self.host.hide_boss_bar(player);
            }
            if self.store.evict_if_idle(player) {
                debug!("Dropped state for {} on quit", player);
            }
            durable
        };
        let persistence = self.persistence.clone();
        tokio::spawn(async move { persistence.save(player, durable).await })
    }

    /// The player moved or teleported.
    pub fn on_player_move(&self, player: PlayerId) -> Option<String> {
        let _world = self.world.lock();
        if !self.store.contains(player) {
            return None;
        }
        bossbar::refresh(&self.store, self.host.as_ref(), &self.registry.snapshot(), player)
    }

    // -----------------------------------------------------------------------
    // Admin operations
    // -----------------------------------------------------------------------

    pub async fn grant_access(&self, player: PlayerId, zone: &str, seconds: u64) -> u64 {
        self.change_player(player, |store| store.increment_zone_access(player, zone, seconds))
            .await
    }

    pub async fn revoke_access(&self, player: PlayerId, zone: &str, seconds: u64) -> u64 {
        self.change_player(player, |store| store.decrement_zone_access(player, zone, seconds))
            .await
    }

    pub async fn set_access(&self, player: PlayerId, zone: &str, seconds: u64) -> u64 {
        self.change_player(player, |store| store.set_zone_access(player, zone, seconds))
            .await
    }

    pub fn query_access(&self, player: PlayerId, zone: &str) -> u64 {
        self.store.zone_access(player, zone)
    }

    pub async fn unlock(&self, player: PlayerId, zone: &str, block: BlockType) -> bool {
        self.change_player(player, |store| store.unlock_block(player, zone, block))
            .await
    }

    pub async fn lock(&self, player: PlayerId, zone: &str, block: &BlockType) -> bool {
        self.change_player(player, |store| store.lock_block(player, zone, block))
            .await
    }

    /// Load the player from storage unless they are already in memory.
    async fn ensure_loaded(&self, player: PlayerId) {
        if self.store.contains(player) {
            return;
        }
        let durable = self.persistence.load(player).await;
        if !self.store.insert_if_absent(player, durable) {
            debug!("State for {} appeared while loading, keeping it", player);
        }
    }

    /// Apply an out-of-band change to a player's durable state.
    ///
    /// Untracked players are loaded first. Changes to offline players are
    /// saved right away, since the tick may drop their state at any time.
    async fn change_player<R>(&self, player: PlayerId, f: impl FnOnce(&PlayerStateStore) -> R) -> R {
        self.ensure_loaded(player).await;
        let (result, offline) = {
            let _world = self.world.lock();
            let result = f(self.store.as_ref());
            if self.host.is_online(player) {
                bossbar::refresh(&self.store, self.host.as_ref(), &self.registry.snapshot(), player);
                (result, None)
            } else {
                (result, self.store.durable(player))
            }
        };
        if let Some(durable) = offline {
            self.persistence.save(player, durable).await;
        }
        result
    }

    // -----------------------------------------------------------------------
    // Command surface
    // -----------------------------------------------------------------------

    /// Parse and run one operator command line.
    pub async fn execute(self: &Arc<Self>, line: &str) -> CommandResponse {
        let locale = self.runtime.read().locale.clone();

        let command = match commands::parse(line) {
            Ok(command) => command,
            Err(commands::CommandError::Time(e)) => {
                return CommandResponse::fail(Locale::render(
                    &locale.invalid_time,
                    &[("reason", e.to_string().as_str())],
                ))
            }
            Err(commands::CommandError::Block(block)) => {
                return CommandResponse::fail(Locale::render(
                    &locale.invalid_block,
                    &[("block", block.as_str())],
                ))
            }
            Err(e) => {
                return CommandResponse::fail(Locale::render(
                    &locale.usage,
                    &[("reason", e.to_string().as_str())],
                ))
            }
        };

        match command {
            Command::Reload => match self.reload() {
                Ok(skipped) if self.is_enabled() => {
                    let mut message = locale.reloaded.clone();
                    if !skipped.is_empty() {
                        message.push_str(&format!(" ({} entries skipped)", skipped.len()));
                    }
                    CommandResponse::ok(message)
                }
                Ok(_) => CommandResponse::fail(Locale::render(
                    &locale.disabled,
                    &[("reason", "missing [settings] section")],
                )),
                Err(e) => CommandResponse::fail(Locale::render(
                    &locale.reload_failed,
                    &[("reason", e.to_string().as_str())],
                )),
            },
            Command::Save => {
                if self.save_all().await {
                    CommandResponse::ok(locale.saved.clone())
                } else {
                    CommandResponse::fail(locale.save_failed.clone())
                }
            }
            Command::Stats => match serde_json::to_string(&self.stats()) {
                Ok(text) => CommandResponse::ok(text),
                Err(e) => CommandResponse::fail(e.to_string()),
            },
            Command::Time { zone, player } => {
                if let Err(response) = self.check_time_target(&locale, player, &zone) {
                    return response;
                }
                let balance = self.query_access(player, &zone);
                CommandResponse::ok(time_message(&locale.time_balance, player, &zone, balance))
            }
            Command::ChangeTime {
                change,
                player,
                zone,
                seconds,
            } => {
                if let Err(response) = self.check_time_target(&locale, player, &zone) {
                    return response;
                }
                let balance = match change {
                    TimeChange::Add => self.grant_access(player, &zone, seconds).await,
                    TimeChange::Remove => self.revoke_access(player, &zone, seconds).await,
                    TimeChange::Set => self.set_access(player, &zone, seconds).await,
                };
                CommandResponse::ok(time_message(&locale.time_changed, player, &zone, balance))
            }
            Command::Unlock {
                player,
                zone,
                block,
            } => {
                if let Err(response) = self.check_target(&locale, player, &zone) {
                    return response;
                }
                let text = block.to_string();
                self.unlock(player, &zone, block).await;
                CommandResponse::ok(block_message(&locale.block_unlocked, player, &zone, &text))
            }
            Command::Lock {
                player,
                zone,
                block,
            } => {
                if let Err(response) = self.check_target(&locale, player, &zone) {
                    return response;
                }
                self.lock(player, &zone, &block).await;
                CommandResponse::ok(block_message(
                    &locale.block_locked,
                    player,
                    &zone,
                    block.as_str(),
                ))
            }
        }
    }

    fn check_target(
        &self,
        locale: &Locale,
        player: PlayerId,
        zone: &str,
    ) -> Result<(), CommandResponse> {
        if self.registry.get(zone).is_none() {
            return Err(CommandResponse::fail(Locale::render(
                &locale.unknown_zone,
                &[("zone", zone)],
            )));
        }
        if !self.host.is_online(player) {
            return Err(CommandResponse::fail(Locale::render(
                &locale.player_offline,
                &[("player", player.to_string().as_str())],
            )));
        }
        Ok(())
    }

    fn check_time_target(
        &self,
        locale: &Locale,
        player: PlayerId,
        zone: &str,
    ) -> Result<(), CommandResponse> {
        self.check_target(locale, player, zone)?;
        match self.registry.get(zone) {
            Some(z) if z.is_timed() => Ok(()),
            _ => Err(CommandResponse::fail(Locale::render(
                &locale.not_timed,
                &[("zone", zone)],
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence and shutdown
    // -----------------------------------------------------------------------

    /// Save every tracked player. `true` only if every save succeeded.
    pub async fn save_all(&self) -> bool {
        let states: Vec<_> = self
            .store
            .players()
            .into_iter()
            .filter_map(|p| self.store.durable(p).map(|d| (p, d)))
            .collect();
        let count = states.len();
        let saved = self.persistence.save_all(states).await;
        if saved {
            debug!("Saved {} players", count);
        } else {
            warn!("Saving {} players did not fully succeed", count);
        }
        saved
    }

    /// Stop the tasks, show every client the true world again, hide boss
    /// bars and save everyone.
    pub async fn shutdown(&self) -> bool {
        self.stop_tasks();
        let restored = {
            let _world = self.world.lock();
            let restored = self.sync.restore_all();
            for player in self.host.online_players() {
                if self.store.set_boss_bar(player, None).is_some() {
                    self.host.hide_boss_bar(player);
                }
            }
            restored
        };
        let saved = self.save_all().await;
        info!(
            "Shut down: {} overlays restored, save {}",
            restored,
            if saved { "complete" } else { "incomplete" }
        );
        saved
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            enabled: self.is_enabled(),
            zones: self.registry.zone_count(),
            nodes: self.registry.node_count(),
            tracked_players: self.store.len(),
            active_cooldowns: self.store.active_cooldowns(),
            total_ticks: self.scheduler.total_ticks(),
        }
    }
}

fn time_message(template: &str, player: PlayerId, zone: &str, balance: u64) -> String {
    Locale::render(
        template,
        &[
            ("player", player.to_string().as_str()),
            ("zone", zone),
            ("time", bossbar::format_duration(balance).as_str()),
        ],
    )
}

fn block_message(template: &str, player: PlayerId, zone: &str, block: &str) -> String {
    Locale::render(
        template,
        &[("player", player.to_string().as_str()), ("zone", zone), ("block", block)],
    )
}
