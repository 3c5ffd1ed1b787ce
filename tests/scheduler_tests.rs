//! DecayScheduler and TickDriver tests

#[cfg(test)]
mod tests {
    use skymines::config;
    use skymines::host::{Host, MemoryHost, Outbound};
    use skymines::registry::ZoneRegistry;
    use skymines::scheduler::{DecayScheduler, TickDriver};
    use skymines::store::PlayerStateStore;
    use skymines::sync::IllusionSync;
    use skymines::types::{normalize, BlockPos, BlockType, ChunkCoord, PlayerId, PositionKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const CONFIG: &str = r#"
[settings]

[[regions]]
name = "stone1"
world = "world"
min = { x = 0, y = 0, z = 0 }
max = { x = 31, y = 63, z = 15 }

[[regions]]
name = "vein2"
world = "world"
min = { x = 32, y = 0, z = 0 }
max = { x = 47, y = 63, z = 15 }

[[regions]]
name = "node_a"
world = "world"
min = { x = 100, y = 0, z = 0 }
max = { x = 110, y = 20, z = 10 }

[[zones]]
id = "stone1"
world = "world"
region = "stone1"
kind = "timed"
boss_bar = { time_text = "Stone: {time}", no_time_text = "Stone: out of time" }
areas = [ { region = "stone1", blocks = [ { block = "stone", replacement = "bedrock", cooldown_seconds = 5 } ] } ]

[[zones]]
id = "vein2"
world = "world"
region = "vein2"
kind = "timed"
areas = [ { region = "vein2", blocks = [ { block = "iron_ore", replacement = "stone", cooldown_seconds = 3 } ] } ]

[[node_tasks]]
id = "forest"
delay_seconds = 3
nodes = [ { id = "node_a", world = "world", region = "node_a", locations = [ { x = 100, y = 5, z = 0 }, { x = 105, y = 5, z = 5 } ], schematics = [ "tree_a", "tree_b" ], safe_location = { x = 99, y = 5, z = 0 } } ]
"#;

    struct Fixture {
        host: Arc<MemoryHost>,
        store: Arc<PlayerStateStore>,
        registry: Arc<ZoneRegistry>,
        sync: Arc<IllusionSync>,
        scheduler: DecayScheduler,
    }

    fn fixture() -> Fixture {
        let host = Arc::new(MemoryHost::new());
        let store = Arc::new(PlayerStateStore::new());
        let registry = Arc::new(ZoneRegistry::new());
        let loaded = config::load_from_str(CONFIG).unwrap();
        assert!(registry.reload(loaded.zones, loaded.node_tasks).is_empty());

        let sync = Arc::new(IllusionSync::new(store.clone(), host.clone()));
        let scheduler =
            DecayScheduler::new(store.clone(), registry.clone(), host.clone(), sync.clone());

        host.load_chunk("world", ChunkCoord::new(0, 0));
        host.load_chunk("world", ChunkCoord::new(1, 0));
        for x in 0..32 {
            host.set_block(key(x, 5, 5), block("stone"));
        }
        Fixture {
            host,
            store,
            registry,
            sync,
            scheduler,
        }
    }

    fn join_at(f: &Fixture, x: f64, y: f64, z: f64) -> PlayerId {
        let player = PlayerId::random();
        f.host
            .join_player(player, BlockPos::new("world", x, y, z), false);
        f.store.set_online(player, true);
        player
    }

    fn key(x: i32, y: i32, z: i32) -> PositionKey {
        PositionKey::new("world", x, y, z)
    }

    fn block(name: &str) -> BlockType {
        BlockType::new(name).unwrap()
    }

    fn changes_for(host: &MemoryHost, player: PlayerId) -> Vec<(PositionKey, BlockType)> {
        host.events()
            .into_iter()
            .filter_map(|e| match e.payload {
                Outbound::BlockChanges(c) if c.player == player => Some(c.changes),
                _ => None,
            })
            .flatten()
            .map(|c| (c.position, c.block))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Access time decay
    // -----------------------------------------------------------------------

    #[test]
    fn access_runs_out_after_ten_ticks_and_stays_gone() {
        let f = fixture();
        let player = join_at(&f, 5.5, 6.0, 5.5);
        f.store.set_zone_access(player, "stone1", 10);

        let mut balances = Vec::new();
        for _ in 0..12 {
            let report = f.scheduler.tick();
            balances.push(f.store.zone_access(player, "stone1"));
            if report.tick > 10 {
                assert_eq!(report.access_decremented, 0);
            }
        }

        assert_eq!(balances[9], 0);
        assert!(!f.store.has_zone_access(player, "stone1"));
        assert!(!f.store.get_or_create(player).access.contains_key("stone1"));
        assert_eq!(&balances[10..], &[0, 0]);
        assert_eq!(f.host.boss_bar(player).as_deref(), Some("Stone: out of time"));
    }

    #[test]
    fn only_the_zone_the_player_stands_in_decays() {
        let f = fixture();
        let player = join_at(&f, 5.5, 6.0, 5.5);
        f.store.set_zone_access(player, "stone1", 30);
        f.store.set_zone_access(player, "vein2", 30);

        f.scheduler.tick();
        assert_eq!(f.store.zone_access(player, "stone1"), 29);
        assert_eq!(f.store.zone_access(player, "vein2"), 30);
        assert_eq!(f.host.boss_bar(player).as_deref(), Some("Stone: 29s"));
    }

    #[test]
    fn players_outside_zones_or_offline_do_not_decay() {
        let f = fixture();
        let outside = join_at(&f, 500.0, 6.0, 500.0);
        f.store.set_zone_access(outside, "stone1", 30);

        let gone = join_at(&f, 5.5, 6.0, 5.5);
        f.store.set_zone_access(gone, "stone1", 30);
        f.host.quit_player(gone);
        f.store.set_online(gone, false);

        let report = f.scheduler.tick();
        assert_eq!(report.access_decremented, 0);
        assert_eq!(f.store.zone_access(outside, "stone1"), 30);
        assert_eq!(f.host.boss_bar(outside), None);
    }

    #[test]
    fn leaving_the_zone_hides_the_bar() {
        let f = fixture();
        let player = join_at(&f, 5.5, 6.0, 5.5);
        f.store.set_zone_access(player, "stone1", 30);
        f.scheduler.tick();
        assert!(f.host.boss_bar(player).is_some());

        f.host
            .move_player(player, BlockPos::new("world", 500.0, 6.0, 500.0));
        f.scheduler.tick();
        assert_eq!(f.host.boss_bar(player), None);
        assert_eq!(f.store.boss_bar(player), None);
    }

    // -----------------------------------------------------------------------
    // Cooldown decay
    // -----------------------------------------------------------------------

    #[test]
    fn cooldown_expires_on_fifth_tick_and_reverts_for_miner_only() {
        let f = fixture();
        let miner = join_at(&f, 5.5, 6.0, 5.5);
        let watcher = join_at(&f, 6.5, 6.0, 5.5);
        let k = key(3, 5, 5);
        let zone = f.registry.get("stone1").unwrap();
        f.sync.trigger_cooldown(miner, &k, &zone);

        for _ in 0..4 {
            f.scheduler.tick();
        }
        assert!(f.store.is_on_cooldown(miner, &k));
        assert_eq!(f.host.client_view(miner, &k), block("bedrock"));

        let report = f.scheduler.tick();
        assert_eq!(report.cooldowns_expired, 1);
        assert_eq!(report.reverted, 1);
        assert!(!f.store.is_on_cooldown(miner, &k));
        assert_eq!(f.host.client_view(miner, &k), block("stone"));
        assert_eq!(
            changes_for(&f.host, miner),
            vec![(k.clone(), block("bedrock")), (k.clone(), block("stone"))]
        );
        assert!(changes_for(&f.host, watcher).is_empty());
    }

    #[test]
    fn expiry_while_offline_is_deferred_and_rejoin_sends_nothing_stale() {
        let f = fixture();
        let player = join_at(&f, 20.5, 6.0, 5.5);
        let k = key(20, 5, 5);
        let zone = f.registry.get("stone1").unwrap();
        f.sync.trigger_cooldown(player, &k, &zone);

        f.host.quit_player(player);
        f.store.set_online(player, false);
        f.host.unload_chunk("world", ChunkCoord::new(1, 0));
        let sent_before = changes_for(&f.host, player).len();

        let mut deferred = 0;
        let mut evicted = 0;
        for _ in 0..5 {
            let report = f.scheduler.tick();
            deferred += report.deferred;
            evicted += report.evicted;
        }
        assert_eq!(deferred, 1);
        assert_eq!(evicted, 1);
        assert_eq!(f.store.active_cooldowns(), 0);
        assert_eq!(changes_for(&f.host, player).len(), sent_before);

        // Rejoin: nothing is left to reconcile, the host shows the true world.
        f.host
            .join_player(player, BlockPos::new("world", 20.5, 6.0, 5.5), false);
        f.host.load_chunk("world", ChunkCoord::new(1, 0));
        f.store.set_online(player, true);
        assert_eq!(f.sync.reconcile_player(player), 0);
        assert_eq!(f.sync.reconcile_chunk(player, "world", ChunkCoord::new(1, 0)), 0);
        assert_eq!(f.host.client_view(player, &k), block("stone"));
    }

    #[test]
    fn offline_player_with_cooldowns_is_kept_until_they_expire() {
        let f = fixture();
        let player = join_at(&f, 5.5, 6.0, 5.5);
        let zone = f.registry.get("stone1").unwrap();
        f.sync.trigger_cooldown(player, &key(1, 5, 5), &zone);
        f.host.quit_player(player);
        f.store.set_online(player, false);

        for _ in 0..4 {
            assert_eq!(f.scheduler.tick().evicted, 0);
            assert!(f.store.contains(player));
        }
        assert_eq!(f.scheduler.tick().evicted, 1);
        assert!(!f.store.contains(player));
    }

    #[test]
    fn many_players_decay_independently() {
        let f = fixture();
        let zone = f.registry.get("stone1").unwrap();
        let players: Vec<_> = (0..5).map(|_| join_at(&f, 5.5, 6.0, 5.5)).collect();
        for (i, player) in players.iter().enumerate() {
            f.sync.trigger_cooldown(*player, &key(i as i32, 5, 5), &zone);
        }
        assert_eq!(f.store.active_cooldowns(), 5);

        f.scheduler.tick();
        f.scheduler.tick();
        for (i, player) in players.iter().enumerate() {
            let entry = f.store.cooldown(*player, &key(i as i32, 5, 5)).unwrap();
            assert_eq!(entry.remaining, 3);
        }
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    fn pastes(host: &MemoryHost) -> Vec<(PositionKey, String)> {
        host.events()
            .into_iter()
            .filter_map(|e| match e.payload {
                Outbound::StructurePaste(p) => Some((p.origin, p.schematic)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn node_rearms_after_delay_and_rotates() {
        let f = fixture();
        let inside = join_at(&f, 104.5, 5.0, 4.5);

        assert_eq!(f.scheduler.tick().nodes_rearmed, 0);
        assert_eq!(f.scheduler.node_countdown("forest"), Some(2));
        f.scheduler.tick();
        assert_eq!(f.scheduler.tick().nodes_rearmed, 1);

        assert_eq!(
            pastes(&f.host),
            vec![(key(100, 5, 0), "tree_a".to_string())]
        );
        // The player was moved out before the paste.
        let teleported = f
            .host
            .events()
            .iter()
            .position(|e| matches!(&e.payload, Outbound::Teleport(t) if t.player == inside));
        let pasted = f
            .host
            .events()
            .iter()
            .position(|e| matches!(e.payload, Outbound::StructurePaste(_)));
        assert!(teleported.unwrap() < pasted.unwrap());
        let moved_to = f.host.player_position(inside).unwrap();
        assert_eq!(normalize(&moved_to), key(99, 5, 0));

        for _ in 0..3 {
            f.scheduler.tick();
        }
        assert_eq!(pastes(&f.host)[1], (key(105, 5, 5), "tree_b".to_string()));
    }

    #[test]
    fn failed_paste_is_logged_and_the_tick_continues() {
        let f = fixture();
        f.host.reject_schematic("tree_a");
        let player = join_at(&f, 5.5, 6.0, 5.5);
        let zone = f.registry.get("stone1").unwrap();
        f.sync.trigger_cooldown(player, &key(1, 5, 5), &zone);

        f.scheduler.tick();
        f.scheduler.tick();
        let report = f.scheduler.tick();
        assert_eq!(report.nodes_rearmed, 0);
        assert!(pastes(&f.host).is_empty());
        assert_eq!(f.store.cooldown(player, &key(1, 5, 5)).unwrap().remaining, 2);

        // The next round uses the other schematic and succeeds.
        for _ in 0..3 {
            f.scheduler.tick();
        }
        assert_eq!(pastes(&f.host), vec![(key(105, 5, 5), "tree_b".to_string())]);
    }

    #[test]
    fn reset_nodes_restarts_the_countdown() {
        let f = fixture();
        f.scheduler.tick();
        f.scheduler.tick();
        f.scheduler.reset_nodes();
        assert_eq!(f.scheduler.node_countdown("forest"), None);
        assert_eq!(f.scheduler.tick().nodes_rearmed, 0);
        assert_eq!(f.scheduler.node_countdown("forest"), Some(2));
    }

    // -----------------------------------------------------------------------
    // TickDriver
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn driver_runs_until_stopped() {
        let driver = TickDriver::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        driver.start(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(driver.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);

        assert!(driver.stop());
        assert!(!driver.is_running());
        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn driver_stop_is_idempotent() {
        let driver = TickDriver::new();
        assert!(!driver.stop());
        driver.start(Duration::from_secs(3600), || {});
        assert!(driver.stop());
        assert!(!driver.stop());
        assert!(!driver.stop());
    }

    #[tokio::test]
    async fn driver_skips_the_immediate_first_tick() {
        let driver = TickDriver::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        driver.start(Duration::from_secs(3600), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
