use bytes::Bytes;
use gamesave::error::GameSaveError;
use gamesave::manager::{ManagerOptions, SaveManager};
use gamesave::store::fs::{FsProvider, FsStore};
use gamesave::store::{ContainerStore, ReadTarget, DATA_BLOB, PADDING_BLOB};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const QUOTA: i64 = 64 * 1024;

fn setup() -> (TempDir, FsStore) {
    let dir = TempDir::new().unwrap();
    let store = FsStore::new(dir.path(), QUOTA);
    (dir, store)
}

fn upsert(name: &str, bytes: &[u8]) -> HashMap<String, Bytes> {
    HashMap::from([(name.to_string(), Bytes::copy_from_slice(bytes))])
}

fn blob_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.ends_with(".blob"))
        .collect();
    names.sort();
    names
}

fn assert_no_tmp_files(dir: &Path) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            assert_no_tmp_files(&path);
            continue;
        }
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(!name.ends_with(".tmp"), "Found leftover tmp file: {}", name);
    }
}

#[tokio::test]
async fn test_fs_store_round_trip() {
    let (dir, store) = setup();
    store
        .submit_updates("game_board_1", upsert(DATA_BLOB, b"abcd"), &[], "Game Board 1")
        .await
        .unwrap();

    let mut buf = [0u8; 4];
    store
        .read_blobs("game_board_1", &mut [ReadTarget::new(DATA_BLOB, &mut buf)])
        .await
        .unwrap();
    assert_eq!(&buf, b"abcd");

    let blobs = store
        .get_blobs("game_board_1", &[DATA_BLOB, PADDING_BLOB])
        .await
        .unwrap();
    assert_eq!(blobs.len(), 1);

    let container_dir = dir.path().join("game_board_1");
    assert!(container_dir.join("container.json").exists());
    let files = blob_files(&container_dir);
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("data."));
    assert_eq!(fs::read(container_dir.join(&files[0])).unwrap(), b"abcd");
    assert_no_tmp_files(dir.path());
}

#[tokio::test]
async fn test_fs_store_reports_absence() {
    let (_dir, store) = setup();
    let mut buf = [0u8; 4];

    let err = store
        .read_blobs("game_board_1", &mut [ReadTarget::new(DATA_BLOB, &mut buf)])
        .await
        .unwrap_err();
    assert!(matches!(err, GameSaveError::ContainerNotFound(_)));

    store
        .submit_updates("game_board_1", upsert(PADDING_BLOB, b"pp"), &[], "Game Board 1")
        .await
        .unwrap();
    let err = store
        .read_blobs("game_board_1", &mut [ReadTarget::new(DATA_BLOB, &mut buf)])
        .await
        .unwrap_err();
    assert!(matches!(err, GameSaveError::BlobNotFound { .. }));

    assert!(store
        .get_blobs("missing", &[DATA_BLOB])
        .await
        .unwrap()
        .is_empty());
    assert!(store.delete_container("missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_fs_store_read_rejects_wrong_size() {
    let (_dir, store) = setup();
    store
        .submit_updates("c", upsert(DATA_BLOB, b"toolong"), &[], "C")
        .await
        .unwrap();

    let mut buf = [0u8; 4];
    let err = store
        .read_blobs("c", &mut [ReadTarget::new(DATA_BLOB, &mut buf)])
        .await
        .unwrap_err();
    assert!(matches!(err, GameSaveError::SizeMismatch { expected: 4, actual: 7 }));
    assert_eq!(buf, [0u8; 4]);
}

#[tokio::test]
async fn test_fs_store_deletes_and_lists() {
    let (_dir, store) = setup();
    let mut both = upsert(DATA_BLOB, &[1u8; 10]);
    both.insert(PADDING_BLOB.to_string(), Bytes::from_static(&[0u8; 6]));
    store
        .submit_updates("game_board_2", both, &[], "Game Board 2")
        .await
        .unwrap();
    store
        .submit_updates("other", upsert(DATA_BLOB, b"x"), &[], "Other")
        .await
        .unwrap();

    let infos = store.query_container_info(Some("game_board")).await.unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].display_name, "Game Board 2");
    assert_eq!(infos[0].total_size, 16);
    assert_eq!(store.query_container_info(None).await.unwrap().len(), 2);

    store
        .submit_updates("game_board_2", HashMap::new(), &[DATA_BLOB, PADDING_BLOB], "Game Board 2")
        .await
        .unwrap();
    assert!(store.query_blob_info("game_board_2").await.unwrap().is_empty());

    store.delete_container("other").await.unwrap();
    assert_eq!(store.query_container_info(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fs_store_enforces_quota() {
    let dir = TempDir::new().unwrap();
    let store = FsStore::new(dir.path(), 10);
    store
        .submit_updates("a", upsert(DATA_BLOB, &[0u8; 8]), &[], "A")
        .await
        .unwrap();
    assert_eq!(store.remaining_quota_bytes().await.unwrap(), 2);

    let err = store
        .submit_updates("b", upsert(DATA_BLOB, &[0u8; 4]), &[], "B")
        .await
        .unwrap_err();
    assert!(matches!(err, GameSaveError::QuotaExceeded { needed: 4, remaining: 2 }));

    // Replacing a blob only counts the growth.
    store
        .submit_updates("a", upsert(DATA_BLOB, &[0u8; 10]), &[], "A")
        .await
        .unwrap();
    assert_eq!(store.remaining_quota_bytes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_fs_store_rejects_unsafe_names() {
    let (_dir, store) = setup();
    assert!(store
        .submit_updates("../escape", upsert(DATA_BLOB, b"x"), &[], "X")
        .await
        .is_err());
    assert!(store
        .submit_updates("ok", upsert("../data", b"x"), &[], "X")
        .await
        .is_err());
}

#[tokio::test]
async fn test_manager_over_fs_store() {
    let dir = TempDir::new().unwrap();
    let provider = FsProvider::new(dir.path(), QUOTA);

    let manager = SaveManager::new(ManagerOptions::default());
    manager
        .initialize_for_user(&provider, "player1", false)
        .await
        .unwrap();
    assert_eq!(manager.active_slot(), 1);
    manager.update_active_board(|b| b.score = 77).unwrap();
    manager.save(true).await.unwrap();

    let user_root = dir.path().join("users").join("player1");
    assert!(user_root.join("game_board_index").join("container.json").exists());
    assert_eq!(blob_files(&user_root.join("game_board_index")).len(), 1);
    assert!(user_root.join("game_board_1").join("container.json").exists());
    assert_no_tmp_files(&user_root);

    let fresh = SaveManager::new(ManagerOptions::default());
    fresh
        .initialize_for_user(&provider, "player1", true)
        .await
        .unwrap();
    assert!(fresh.slot(1).unwrap().is_on_remote());
    fresh.read().await.unwrap();
    assert_eq!(fresh.active_board().unwrap().score, 77);
    assert_eq!(fresh.active_board().unwrap().update_count, 1);
}
