//! Storage backends and PersistenceBridge tests

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use skymines::persistence::{
        read_player, write_player, JsonFileStorage, MemoryStorage, PersistenceBridge, Storage,
        Table,
    };
    use skymines::store::DurableState;
    use skymines::types::{BlockType, PlayerId};
    use std::path::PathBuf;
    use std::sync::Arc;
    use uuid::Uuid;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("skymines-test-{}", Uuid::new_v4()))
            .join(name)
    }

    fn block(name: &str) -> BlockType {
        BlockType::new(name).unwrap()
    }

    fn sample_state() -> DurableState {
        let mut state = DurableState::default();
        state.access.insert("stone1".into(), 120);
        state.access.insert("vein2".into(), 5);
        state
            .unlocked
            .entry("shop".into())
            .or_default()
            .insert(block("diamond_ore"));
        state
    }

    // -----------------------------------------------------------------------
    // Row mapping
    // -----------------------------------------------------------------------

    #[test]
    fn write_then_read_player() {
        let storage = MemoryStorage::new();
        let player = PlayerId::random();
        write_player(&storage, player, &sample_state()).unwrap();

        assert_eq!(read_player(&storage, player).unwrap(), sample_state());
        let rows = storage.scan_by_zone(Table::Times, "stone1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!(120));
    }

    #[test]
    fn rows_for_dropped_zones_are_deleted() {
        let storage = MemoryStorage::new();
        let player = PlayerId::random();
        write_player(&storage, player, &sample_state()).unwrap();

        let mut next = sample_state();
        next.access.remove("vein2");
        next.unlocked.clear();
        write_player(&storage, player, &next).unwrap();

        assert!(storage.scan_by_zone(Table::Times, "vein2").unwrap().is_empty());
        assert!(storage
            .scan_by_player(Table::UnlockedBlocks, player)
            .unwrap()
            .is_empty());
        assert_eq!(read_player(&storage, player).unwrap(), next);
    }

    #[test]
    fn other_players_rows_are_untouched() {
        let storage = MemoryStorage::new();
        let a = PlayerId::random();
        let b = PlayerId::random();
        write_player(&storage, a, &sample_state()).unwrap();
        write_player(&storage, b, &DurableState::default()).unwrap();

        assert_eq!(storage.scan_by_zone(Table::Times, "stone1").unwrap().len(), 1);
        assert_eq!(read_player(&storage, a).unwrap(), sample_state());
    }

    #[test]
    fn corrupt_rows_are_skipped_and_mark_the_state_incomplete() {
        let storage = MemoryStorage::new();
        let player = PlayerId::random();
        write_player(&storage, player, &sample_state()).unwrap();
        storage
            .upsert(Table::Times, player, "deep3", json!("lots"))
            .unwrap();
        storage
            .upsert(Table::UnlockedBlocks, player, "market", json!(["not a block!"]))
            .unwrap();

        let state = read_player(&storage, player).unwrap();
        assert!(state.incomplete);
        assert_eq!(state.access.get("stone1"), Some(&120));
        assert_eq!(state.access.get("vein2"), Some(&5));
        assert!(!state.access.contains_key("deep3"));
        assert!(state.unlocked.contains_key("shop"));
        assert!(!state.unlocked.contains_key("market"));
    }

    #[test]
    fn incomplete_state_only_upserts() {
        let storage = MemoryStorage::new();
        let player = PlayerId::random();
        write_player(&storage, player, &sample_state()).unwrap();

        let mut partial = DurableState {
            incomplete: true,
            ..DurableState::default()
        };
        partial.access.insert("deep3".into(), 30);
        write_player(&storage, player, &partial).unwrap();

        let stored = read_player(&storage, player).unwrap();
        assert_eq!(stored.access.len(), 3);
        assert_eq!(stored.access.get("stone1"), Some(&120));
        assert_eq!(stored.access.get("deep3"), Some(&30));
        assert!(stored.unlocked.contains_key("shop"));
    }

    fn scan_by_zone_returns_that_zone_only(storage: &dyn Storage) {
        let a = PlayerId::random();
        let b = PlayerId::random();
        let c = PlayerId::random();
        write_player(storage, a, &sample_state()).unwrap();
        let mut other = DurableState::default();
        other.access.insert("stone1".into(), 7);
        other.access.insert("deep3".into(), 9);
        write_player(storage, b, &other).unwrap();
        write_player(storage, c, &DurableState::default()).unwrap();

        let mut stone: Vec<_> = storage
            .scan_by_zone(Table::Times, "stone1")
            .unwrap()
            .into_iter()
            .map(|r| (r.player, r.value))
            .collect();
        stone.sort_by_key(|(p, _)| *p);
        let mut expected = vec![(a, json!(120)), (b, json!(7))];
        expected.sort_by_key(|(p, _)| *p);
        assert_eq!(stone, expected);

        let deep = storage.scan_by_zone(Table::Times, "deep3").unwrap();
        assert_eq!(deep.len(), 1);
        assert_eq!((deep[0].player, deep[0].zone.as_str()), (b, "deep3"));

        let shop = storage.scan_by_zone(Table::UnlockedBlocks, "shop").unwrap();
        assert_eq!(shop.len(), 1);
        assert_eq!(shop[0].player, a);
        assert_eq!(shop[0].value, json!(["minecraft:diamond_ore"]));

        assert!(storage.scan_by_zone(Table::UnlockedBlocks, "stone1").unwrap().is_empty());
        assert!(storage.scan_by_zone(Table::Times, "nowhere").unwrap().is_empty());
    }

    #[test]
    fn memory_scan_by_zone() {
        scan_by_zone_returns_that_zone_only(&MemoryStorage::new());
    }

    #[test]
    fn json_file_scan_by_zone() {
        let path = temp_path("scan.json");
        scan_by_zone_returns_that_zone_only(&JsonFileStorage::open(&path).unwrap());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    // -----------------------------------------------------------------------
    // JsonFileStorage
    // -----------------------------------------------------------------------

    #[test]
    fn json_file_survives_reopen() {
        let path = temp_path("store.json");
        let player = PlayerId::random();
        {
            let storage = JsonFileStorage::open(&path).unwrap();
            write_player(&storage, player, &sample_state()).unwrap();
        }

        let reopened = JsonFileStorage::open(&path).unwrap();
        assert_eq!(read_player(&reopened, player).unwrap(), sample_state());

        let text = std::fs::read_to_string(&path).unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["schema_version"], json!(2));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_starts_empty() {
        let path = temp_path("absent.json");
        let storage = JsonFileStorage::open(&path).unwrap();
        assert!(storage
            .scan_by_player(Table::Times, PlayerId::random())
            .unwrap()
            .is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn legacy_layout_is_migrated() {
        let path = temp_path("legacy.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let player = PlayerId::random();
        let legacy = json!({
            "skymines_times": [
                { "mine_id": "stone1", "player_uuid": player.to_string(), "time": 300 },
                { "mine_id": "vein2", "player_uuid": player.to_string(), "time": 0 },
                { "mine_id": "stone1", "player_uuid": "not-a-uuid", "time": 50 }
            ]
        });
        std::fs::write(&path, legacy.to_string()).unwrap();

        let storage = JsonFileStorage::open(&path).unwrap();
        let state = read_player(&storage, player).unwrap();
        assert_eq!(state.access.get("stone1"), Some(&300));
        assert!(!state.access.contains_key("vein2"));
        assert_eq!(storage.scan_by_zone(Table::Times, "stone1").unwrap().len(), 1);

        // The rewritten document is the new layout, and the backup is gone.
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["schema_version"], json!(2));
        assert!(!path.with_extension("legacy.json").exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn unreadable_document_fails_to_open() {
        let path = temp_path("broken.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(JsonFileStorage::open(&path).is_err());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    // -----------------------------------------------------------------------
    // PersistenceBridge
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn bridge_save_and_load() {
        let storage = Arc::new(MemoryStorage::new());
        let bridge = PersistenceBridge::new(storage.clone());
        let player = PlayerId::random();

        assert!(bridge.save(player, sample_state()).await);
        assert_eq!(bridge.load(player).await, sample_state());
        assert_eq!(bridge.load(PlayerId::random()).await, DurableState::default());
    }

    #[tokio::test]
    async fn failed_save_reports_false() {
        let storage = Arc::new(MemoryStorage::new());
        let bridge = PersistenceBridge::new(storage.clone());
        let player = PlayerId::random();
        storage.set_fail_writes(true);

        assert!(!bridge.save(player, sample_state()).await);
        assert!(storage.scan_by_player(Table::Times, player).unwrap().is_empty());

        storage.set_fail_writes(false);
        assert!(bridge.save(player, sample_state()).await);
    }

    #[tokio::test]
    async fn save_all_is_all_or_nothing_in_its_report() {
        let storage = Arc::new(MemoryStorage::new());
        let bridge = PersistenceBridge::new(storage.clone());
        let states: Vec<_> = (0..8).map(|_| (PlayerId::random(), sample_state())).collect();

        assert!(bridge.save_all(states.clone()).await);
        assert_eq!(storage.scan_by_zone(Table::Times, "stone1").unwrap().len(), 8);

        storage.set_fail_writes(true);
        assert!(!bridge.save_all(states).await);
        assert!(bridge.save_all(Vec::new()).await);
    }

    #[tokio::test]
    async fn corrupt_row_loads_as_incomplete() {
        let storage = Arc::new(MemoryStorage::new());
        let player = PlayerId::random();
        storage
            .upsert(Table::Times, player, "stone1", json!(-4))
            .unwrap();
        let bridge = PersistenceBridge::new(storage);

        let state = bridge.load(player).await;
        assert!(state.access.is_empty());
        assert!(state.incomplete);
    }

    #[test]
    fn bridge_works_from_sync_code() {
        let storage = Arc::new(MemoryStorage::new());
        let bridge = PersistenceBridge::new(storage);
        let player = PlayerId::random();

        assert!(tokio_test::block_on(bridge.save(player, sample_state())));
        assert_eq!(tokio_test::block_on(bridge.load(player)), sample_state());
    }
}
