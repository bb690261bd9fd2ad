use gamesave::container::LoadOutcome;
use gamesave::error::GameSaveError;
use gamesave::manager::{ManagerOptions, SaveManager, INDEX_CONTAINER_NAME, INDEX_DISPLAY_NAME};
use gamesave::model::{BoardData, IndexRecord};
use gamesave::store::memory::{MemoryStore, StoreOp};
use gamesave::store::{ContainerStore, DATA_BLOB, PADDING_BLOB};

async fn setup() -> (MemoryStore, SaveManager<MemoryStore>) {
    setup_with(ManagerOptions::default()).await
}

async fn setup_with(options: ManagerOptions) -> (MemoryStore, SaveManager<MemoryStore>) {
    let store = MemoryStore::new();
    let manager = SaveManager::new(options);
    manager
        .initialize_for_user(&store, "player1", false)
        .await
        .unwrap();
    store.clear_operations();
    (store, manager)
}

fn stored_index(store: &MemoryStore) -> IndexRecord {
    let bytes = store.blob(INDEX_CONTAINER_NAME, DATA_BLOB).unwrap();
    bytemuck::pod_read_unaligned(&bytes)
}

fn stored_board(store: &MemoryStore, slot: u32) -> Option<BoardData> {
    store
        .blob(&format!("game_board_{slot}"), DATA_BLOB)
        .map(|bytes| bytemuck::pod_read_unaligned(&bytes))
}

#[tokio::test]
async fn test_fresh_user_gets_new_index() {
    let store = MemoryStore::new();
    let manager = SaveManager::new(ManagerOptions::default());
    assert_eq!(manager.slot_count(), 4);
    manager.reset();

    manager
        .initialize_for_user(&store, "player1", false)
        .await
        .unwrap();

    assert!(manager.is_initialized());
    assert!(manager.index().is_loaded());
    assert_eq!(manager.active_slot(), 1);
    assert_eq!(manager.index_update_count(), 0);
    assert_eq!(store.submits_to(INDEX_CONTAINER_NAME), 1);

    let persisted = stored_index(&store);
    assert_eq!(persisted.active_slot, 1);
    assert_eq!(persisted.update_counter, 0);
    assert_eq!(persisted.version, 1);
}

#[tokio::test]
async fn test_load_index_falls_back_to_single_save() {
    let (store, manager) = setup().await;
    store.delete_container(INDEX_CONTAINER_NAME).await.unwrap();
    store.clear_operations();

    manager.load_index().await.unwrap();

    assert!(manager.index().is_loaded());
    assert_eq!(manager.active_slot(), 1);
    let submits = store
        .operations()
        .into_iter()
        .filter(|op| matches!(op, StoreOp::Submit { .. }))
        .count();
    assert_eq!(submits, 1);
}

#[tokio::test]
async fn test_load_index_fallback_save_failure_is_reported() {
    // Too small to hold even the index.
    let store = MemoryStore::new().with_quota(4);
    let manager = SaveManager::new(ManagerOptions::default());
    manager
        .initialize_for_user(&store, "player1", false)
        .await
        .unwrap();
    assert!(manager.is_initialized());
    assert!(!manager.index().is_loaded());

    let err = manager.load_index().await.unwrap_err();
    assert!(matches!(err, GameSaveError::QuotaExceeded { .. }));
    assert_eq!(manager.active_slot(), 1);
    assert!(!manager.index().is_loaded());
    assert_eq!(store.submits_to(INDEX_CONTAINER_NAME), 2);
}

#[tokio::test]
async fn test_failed_transfers_never_change_the_board() {
    let (store, manager) = setup().await;
    manager.update_active_board(|b| b.score = 10).unwrap();
    manager.save(true).await.unwrap();

    manager.update_active_board(|b| b.score = 20).unwrap();
    let before = bytemuck::bytes_of(&manager.active_board().unwrap()).to_vec();

    store.inject_failure("game_board_1");
    assert!(manager.get().await.is_err());
    assert!(manager.read().await.is_err());
    let after = bytemuck::bytes_of(&manager.active_board().unwrap()).to_vec();
    assert_eq!(before, after);

    store.clear_failures();
    assert_eq!(manager.read().await.unwrap(), LoadOutcome::Loaded);
    assert_eq!(manager.active_board().unwrap().score, 10);
}

#[tokio::test]
async fn test_dirty_flag_round_trip() {
    let (store, manager) = setup().await;
    assert!(!manager.is_active_slot_dirty());

    manager.mark_active_slot_dirty().unwrap();
    assert!(manager.is_active_slot_dirty());

    store.inject_failure("game_board_1");
    assert!(manager.save(true).await.is_err());
    assert!(manager.is_active_slot_dirty());

    store.clear_failures();
    assert!(manager.save(true).await.unwrap());
    assert!(!manager.is_active_slot_dirty());

    assert!(!manager.save(true).await.unwrap());
    assert!(!manager.is_active_slot_dirty());
}

#[tokio::test]
async fn test_loaded_flag_survives_failed_read() {
    let (store, manager) = setup().await;
    manager.mark_active_slot_dirty().unwrap();
    manager.save(true).await.unwrap();
    assert!(manager.slot(1).unwrap().is_loaded());

    store.inject_failure("game_board_1");
    assert!(manager.read().await.is_err());
    assert!(manager.slot(1).unwrap().is_loaded());
}

#[tokio::test]
async fn test_switch_flushes_old_slot_without_blocking_index() {
    let (store, manager) = setup().await;
    manager.update_active_board(|b| b.score = 5).unwrap();
    store.hold("game_board_1");

    let flush = manager.set_active_slot(2).unwrap().expect("dirty slot is flushed");

    // The flush was issued: hook ran, dirty cleared.
    let old = manager.slot(1).unwrap();
    assert!(!old.is_dirty());
    assert_eq!(old.data().update_count, 1);

    // The index switched without waiting for it.
    assert_eq!(manager.active_slot(), 2);
    assert_eq!(manager.index_update_count(), 1);
    assert!(manager.is_index_dirty());
    assert!(manager.save_index(true).await.unwrap());
    assert_eq!(stored_index(&store).active_slot, 2);
    assert_eq!(stored_index(&store).update_counter, 1);
    assert!(stored_board(&store, 1).is_none());

    store.release();
    assert!(flush.await.unwrap());
    let saved = stored_board(&store, 1).unwrap();
    assert_eq!(saved.score, 5);
    assert_eq!(saved.update_count, 1);
    assert!(manager.slot(1).unwrap().is_on_remote());
}

#[tokio::test]
async fn test_failed_flush_leaves_old_slot_dirty() {
    let (store, manager) = setup().await;
    manager.update_active_board(|b| b.words_found = 3).unwrap();
    store.inject_failure("game_board_1");

    let flush = manager.set_active_slot(3).unwrap().unwrap();
    assert!(!flush.await.unwrap());

    assert!(manager.slot(1).unwrap().is_dirty());
    assert_eq!(manager.active_slot(), 3);
    assert!(manager.is_index_dirty());
}

#[tokio::test]
async fn test_metadata_matches_managed_containers_only() {
    let (store, manager) = setup().await;
    store.seed("game_board_2", "Game Board 2", &[(DATA_BLOB, &[0u8; 80][..])]);
    store.seed("foreign_save", "Someone Else", &[(DATA_BLOB, &b"xyz"[..])]);
    store.set_needs_sync("game_board_2", true);

    let refresh = manager.load_all_container_metadata(None, true).await.unwrap();

    assert_eq!(refresh.matched, vec!["game_board_2", INDEX_CONTAINER_NAME]);
    assert_eq!(refresh.foreign, vec!["foreign_save"]);

    let slot2 = manager.slot(2).unwrap().metadata();
    assert!(slot2.is_on_remote);
    assert!(slot2.needs_sync);
    assert_eq!(slot2.total_size, 80);
    assert_eq!(slot2.blobs.len(), 1);
    assert!(!manager.slot(1).unwrap().is_on_remote());
    assert!(!manager.slot(3).unwrap().is_on_remote());

    let index = manager.index().metadata();
    assert!(index.is_on_remote);
    assert_eq!(index.display_name, INDEX_DISPLAY_NAME);

    let blob_queries = store
        .operations()
        .into_iter()
        .filter(|op| matches!(op, StoreOp::QueryBlobs { .. }))
        .count();
    assert_eq!(blob_queries, 2);
}

#[tokio::test]
async fn test_padding_only_below_minimum() {
    let options = ManagerOptions {
        minimum_padded_size: 1024,
        ..ManagerOptions::default()
    };
    let (store, manager) = setup_with(options).await;
    manager.mark_active_slot_dirty().unwrap();
    manager.save(true).await.unwrap();

    let data = store.blob("game_board_1", DATA_BLOB).unwrap();
    let padding = store.blob("game_board_1", PADDING_BLOB).unwrap();
    assert!(data.len() + padding.len() >= 1024);

    let options = ManagerOptions {
        minimum_padded_size: 16,
        ..ManagerOptions::default()
    };
    let (store, manager) = setup_with(options).await;
    manager.mark_active_slot_dirty().unwrap();
    manager.save(true).await.unwrap();
    assert!(store.blob("game_board_1", DATA_BLOB).is_some());
    assert!(store.blob("game_board_1", PADDING_BLOB).is_none());
}

#[tokio::test]
async fn test_suspend_flushes_only_dirty_containers() {
    let (store, manager) = setup().await;
    manager.suspend().await;
    assert_eq!(store.submits_to("game_board_1"), 0);
    assert_eq!(store.submits_to(INDEX_CONTAINER_NAME), 0);
    assert!(!manager.is_initialized());

    manager.resume_for_user(&store).await.unwrap();
    assert!(manager.is_initialized());
    assert_eq!(manager.user().as_deref(), Some("player1"));

    assert!(manager.set_active_slot(2).unwrap().is_none());
    manager.update_active_board(|b| b.score = 12).unwrap();
    store.clear_operations();

    manager.suspend().await;
    assert_eq!(store.submits_to("game_board_2"), 1);
    assert_eq!(store.submits_to(INDEX_CONTAINER_NAME), 1);
    assert!(!manager.is_suspending());
    assert!(!manager.is_active_slot_dirty());
    assert!(!manager.is_index_dirty());
}

#[tokio::test]
async fn test_suspend_when_not_initialized_saves_nothing() {
    let store = MemoryStore::new();
    let manager: SaveManager<MemoryStore> = SaveManager::new(ManagerOptions::default());
    manager.suspend().await;
    assert!(store.operations().is_empty());
    assert!(!manager.is_suspending());
}

#[tokio::test]
async fn test_sign_out_flushes_dirty_board() {
    let (store, manager) = setup().await;
    manager.update_active_board(|b| b.set_tiles("HELLO")).unwrap();
    manager.on_sign_out().await;
    assert_eq!(stored_board(&store, 1).unwrap().tile(0, 0), Some('H'));
    assert_eq!(store.submits_to(INDEX_CONTAINER_NAME), 0);
}

#[tokio::test]
async fn test_sync_mode_locks_after_first_session() {
    let store = MemoryStore::new();
    let manager = SaveManager::new(ManagerOptions::default());
    manager.set_sync_on_demand(true).unwrap();
    manager
        .initialize_for_user(&store, "player1", false)
        .await
        .unwrap();

    assert!(store.operations().contains(&StoreOp::Open {
        user: "player1".into(),
        sync_on_demand: true,
    }));
    assert!(!store
        .operations()
        .iter()
        .any(|op| matches!(op, StoreOp::QueryBlobs { .. })));

    assert!(matches!(
        manager.set_sync_on_demand(false),
        Err(GameSaveError::SyncModeLocked)
    ));
    manager.reset();
    assert!(manager.has_been_initialized());
    assert!(manager.set_sync_on_demand(false).is_err());
    assert!(manager.is_sync_on_demand());
}

#[tokio::test]
async fn test_delete_removes_container_and_resets_slot() {
    let (store, manager) = setup().await;
    manager.update_active_board(|b| b.score = 1).unwrap();
    manager.save(true).await.unwrap();
    assert!(store.container_names().contains(&"game_board_1".to_string()));

    manager.delete().await.unwrap();
    assert!(!store.container_names().contains(&"game_board_1".to_string()));
    let slot = manager.slot(1).unwrap();
    assert!(!slot.is_loaded());
    assert!(!slot.is_dirty());
    assert_eq!(slot.data(), BoardData::default());

    assert!(manager.delete().await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_blobs_keeps_container() {
    let (store, manager) = setup().await;
    manager.mark_active_slot_dirty().unwrap();
    manager.save(true).await.unwrap();

    manager.delete_blobs().await.unwrap();
    assert!(store.container_names().contains(&"game_board_1".to_string()));
    assert!(store.blob("game_board_1", DATA_BLOB).is_none());
    assert_eq!(manager.get().await.unwrap(), LoadOutcome::NotFound);
}

#[tokio::test]
async fn test_quota_tracks_saves() {
    let store = MemoryStore::new().with_quota(1000);
    let manager = SaveManager::new(ManagerOptions::default());
    manager
        .initialize_for_user(&store, "player1", false)
        .await
        .unwrap();
    let index_size = std::mem::size_of::<IndexRecord>() as i64;
    assert_eq!(manager.remaining_quota(), 1000 - index_size);

    manager.mark_active_slot_dirty().unwrap();
    manager.save(true).await.unwrap();
    let board_size = std::mem::size_of::<BoardData>() as i64;
    assert_eq!(
        manager.get_remaining_quota().await,
        1000 - index_size - board_size
    );
}

#[tokio::test]
async fn test_remote_sync_state_reaches_report() {
    let store = MemoryStore::new().with_latency(std::time::Duration::from_millis(2));
    store.seed("game_board_2", "Game Board 2", &[(DATA_BLOB, &[0u8; 80][..])]);
    store.set_needs_sync("game_board_2", true);
    store.set_changed("game_board_2", true);
    assert!(!store.set_changed("game_board_9", true));

    let manager = SaveManager::new(ManagerOptions::default());
    manager
        .initialize_for_user(&store, "player1", true)
        .await
        .unwrap();

    let meta = manager.slot(2).unwrap().metadata();
    assert!(meta.is_on_remote);
    assert!(meta.needs_sync);
    assert!(meta.changed_since_last_sync);
    assert!(manager
        .metadata_report(false)
        .iter()
        .any(|l| l.starts_with("Game Board 2 (80 bytes) (needs sync) (changed on disk)")));
}

#[tokio::test]
async fn test_failed_blob_query_clears_stale_listing() {
    let (store, manager) = setup().await;
    store.seed(
        "game_board_2",
        "Game Board 2",
        &[(DATA_BLOB, &[0u8; 80][..]), (PADDING_BLOB, &[0u8; 16][..])],
    );

    manager.load_all_container_metadata(None, true).await.unwrap();
    assert_eq!(manager.slot(2).unwrap().metadata().blobs.len(), 2);

    store.inject_failure("game_board_2");
    let refresh = manager.load_all_container_metadata(None, true).await.unwrap();
    assert!(refresh.matched.contains(&"game_board_2".to_string()));

    let slot2 = manager.slot(2).unwrap().metadata();
    assert!(slot2.is_on_remote);
    assert_eq!(slot2.total_size, 96);
    assert!(slot2.blobs.is_empty());

    store.clear_failures();
    manager.load_all_container_metadata(None, true).await.unwrap();
    assert_eq!(manager.slot(2).unwrap().metadata().blobs.len(), 2);
}
