//! 元数据存储集成测试：去重、配对、磁盘校验与 schema 升级

mod common;

use std::sync::Arc;

use common::{open_store, temp_store, write_image, FlakyFs};
use cuotiben_store::{
    DeleteMode, ItemType, LocalFs, StoreError, CURRENT_SCHEMA_VERSION, DEFAULT_TAG, METADATA_FILE,
};

// ============================================================================
// 去重
// ============================================================================

#[test]
fn test_uploading_same_file_twice_yields_one_item() {
    let (dir, mut store) = temp_store();
    let photo = write_image(dir.path(), "camera/IMG_0001.jpg", b"same pixels");

    let id = store.import_file(&photo).expect("Failed to import");
    let err = store.import_file(&photo).unwrap_err();

    assert!(err.is_duplicate());
    assert!(matches!(err, StoreError::DuplicateContent { existing_id } if existing_id == id));
    assert_eq!(store.len(), 1);

    let stored: Vec<_> = std::fs::read_dir(store.base_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() != METADATA_FILE)
        .collect();
    assert_eq!(stored.len(), 1);
}

#[test]
fn test_add_file_rejects_duplicate_content_under_other_name() {
    let (dir, mut store) = temp_store();
    let first = write_image(dir.path(), "a.png", b"identical");
    let second = write_image(dir.path(), "b.png", b"identical");

    let stored_a = store.base_dir().join("a.png");
    let stored_b = store.base_dir().join("b.png");
    std::fs::copy(&first, &stored_a).unwrap();
    std::fs::copy(&second, &stored_b).unwrap();

    store.add_file(&first, &stored_a).expect("Failed to add");
    assert!(store.add_file(&second, &stored_b).unwrap_err().is_duplicate());
    assert_eq!(store.len(), 1);
}

#[test]
fn test_add_file_rejects_path_outside_base_dir() {
    let (dir, mut store) = temp_store();
    let source = write_image(dir.path(), "outside.png", b"x");
    assert!(matches!(
        store.add_file(&source, &source),
        Err(StoreError::InvalidPath(_))
    ));
    assert!(store.is_empty());
}

// ============================================================================
// 配对
// ============================================================================

#[test]
fn test_pairing_is_symmetric_and_unpair_clears_both() {
    let (dir, mut store) = temp_store();
    let q = store.import_file(&write_image(dir.path(), "q.png", b"q")).unwrap();
    let a = store.import_file(&write_image(dir.path(), "a.png", b"a")).unwrap();
    store.set_type(&a, ItemType::Answer).unwrap();

    let pair_id = store.pair(&q, &a).unwrap();
    for id in [&q, &a] {
        let item = store.get_item(id).unwrap();
        assert!(item.is_paired);
        assert_eq!(item.pair_id.as_deref(), Some(pair_id.as_str()));
    }

    store.unpair(&q, &a).unwrap();
    for id in [&q, &a] {
        let item = store.get_item(id).unwrap();
        assert!(!item.is_paired);
        assert!(item.pair_id.is_none());
    }
    assert!(store.pair_members(&pair_id).is_empty());
}

#[test]
fn test_pairing_reuses_existing_pair_id_of_either_side() {
    let (dir, mut store) = temp_store();
    let a = store.import_file(&write_image(dir.path(), "a.png", b"a")).unwrap();
    let b = store.import_file(&write_image(dir.path(), "b.png", b"b")).unwrap();
    let c = store.import_file(&write_image(dir.path(), "c.png", b"c")).unwrap();

    let first = store.pair(&a, &b).unwrap();
    // c 没有 pairId，沿用 b 的
    assert_eq!(store.pair(&c, &b).unwrap(), first);
    assert_eq!(store.get_item(&c).unwrap().pair_id.as_deref(), Some(first.as_str()));
}

#[test]
fn test_pairing_survives_reload() {
    let (dir, mut store) = temp_store();
    let q = store.import_file(&write_image(dir.path(), "q.png", b"q")).unwrap();
    let a = store.import_file(&write_image(dir.path(), "a.png", b"a")).unwrap();
    let pair_id = store.pair(&q, &a).unwrap();

    let reopened = open_store(store.base_dir(), Arc::new(LocalFs));
    let mut members: Vec<&str> = reopened.pair_members(&pair_id).iter().map(|i| i.id.as_str()).collect();
    members.sort();
    let mut expected = vec![q.as_str(), a.as_str()];
    expected.sort();
    assert_eq!(members, expected);
}

#[test]
fn test_pair_unknown_item_fails_without_changes() {
    let (dir, mut store) = temp_store();
    let q = store.import_file(&write_image(dir.path(), "q.png", b"q")).unwrap();
    assert!(matches!(store.pair(&q, "missing"), Err(StoreError::NotFound(_))));
    assert!(!store.get_item(&q).unwrap().is_paired);
}

// ============================================================================
// 磁盘校验与删除
// ============================================================================

#[test]
fn test_missing_files_are_pruned_on_read() {
    let (dir, mut store) = temp_store();
    let keep = store.import_file(&write_image(dir.path(), "keep.png", b"keep")).unwrap();
    let gone = store.import_file(&write_image(dir.path(), "gone.png", b"gone")).unwrap();
    std::fs::remove_file(store.base_dir().join("gone.png")).unwrap();

    let files = &store.get_metadata().unwrap().files;
    assert_eq!(files.len(), 1);
    assert!(files.contains_key(&keep));
    assert!(store.get_item(&gone).is_none());

    // 内容已删除，可以重新上传
    let again = write_image(dir.path(), "gone-again.png", b"gone");
    assert!(store.import_file(&again).is_ok());
}

#[test]
fn test_delete_removes_file_from_disk() {
    let (dir, mut store) = temp_store();
    let id = store.import_file(&write_image(dir.path(), "q.png", b"q")).unwrap();
    store.delete_file(&id, DeleteMode::Single).unwrap();

    assert!(store.is_empty());
    assert!(!store.base_dir().join("q.png").exists());
    assert!(matches!(store.delete_file(&id, DeleteMode::Single), Err(StoreError::NotFound(_))));
}

// ============================================================================
// Schema 升级
// ============================================================================

#[test]
fn test_legacy_metadata_file_is_upgraded_once() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("images");
    write_image(&base, "old.png", b"legacy");
    std::fs::write(
        base.join(METADATA_FILE),
        r#"{
            "version": "1.0",
            "baseDir": "C:\\Users\\someone\\old",
            "files": {
                "legacy-1": {
                    "id": "legacy-1",
                    "relativePath": "old.png",
                    "originalFileName": "old.png",
                    "uploadDate": "2023-12-01T08:00:00.000Z",
                    "originalDate": "2023-11-30T08:00:00.000Z",
                    "fileSize": 6,
                    "lastModified": "2023-12-01T08:00:00.000Z"
                }
            }
        }"#,
    )
    .unwrap();

    let store = open_store(&base, Arc::new(LocalFs));
    let item = store.get_item("legacy-1").expect("legacy item kept");
    assert_eq!(store.document().version, CURRENT_SCHEMA_VERSION);
    assert_eq!(store.document().base_dir, base);
    assert_eq!(item.proficiency, 0);
    assert_eq!(item.training_interval, 1);
    assert_eq!(item.tags, vec![DEFAULT_TAG.to_string()]);
    assert_eq!(item.item_type, ItemType::Mistake);
    assert_eq!(item.answer_time_limit, 300);
    assert_eq!(item.last_training_date, item.upload_date);
    assert!(item.training_records.is_empty());
    drop(store);

    let after_first = std::fs::read_to_string(base.join(METADATA_FILE)).unwrap();
    let reopened = open_store(&base, Arc::new(LocalFs));
    let after_second = std::fs::read_to_string(base.join(METADATA_FILE)).unwrap();
    assert_eq!(after_first, after_second);
    assert_eq!(reopened.len(), 1);
}

// ============================================================================
// 保存失败时内存与磁盘一致
// ============================================================================

#[test]
fn test_failed_save_leaves_pairing_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("images");
    let fs = Arc::new(FlakyFs::failing_on("never"));
    let mut store = open_store(&base, fs.clone());
    let q = store.import_file(&write_image(dir.path(), "q.png", b"q")).unwrap();
    let a = store.import_file(&write_image(dir.path(), "a.png", b"a")).unwrap();

    fs.set_fail_writes(true);
    assert!(matches!(store.pair(&q, &a), Err(StoreError::Io(_))));
    for id in [&q, &a] {
        let item = store.get_item(id).unwrap();
        assert!(!item.is_paired);
        assert!(item.pair_id.is_none());
    }

    fs.set_fail_writes(false);
    let pair_id = store.pair(&q, &a).unwrap();

    fs.set_fail_writes(true);
    assert!(store.unpair(&q, &a).is_err());
    assert_eq!(store.get_item(&q).unwrap().pair_id.as_deref(), Some(pair_id.as_str()));
    assert_eq!(store.pair_members(&pair_id).len(), 2);
}

#[test]
fn test_failed_save_keeps_deleted_item_and_file() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("images");
    let fs = Arc::new(FlakyFs::failing_on("never"));
    let mut store = open_store(&base, fs.clone());
    let q = store.import_file(&write_image(dir.path(), "q.png", b"q")).unwrap();
    let a = store.import_file(&write_image(dir.path(), "a.png", b"a")).unwrap();
    let pair_id = store.pair(&q, &a).unwrap();

    fs.set_fail_writes(true);
    assert!(store.delete_file(&q, DeleteMode::Cascade).is_err());

    assert_eq!(store.len(), 2);
    assert_eq!(store.pair_members(&pair_id).len(), 2);
    assert!(base.join("q.png").exists());
    assert!(base.join("a.png").exists());

    fs.set_fail_writes(false);
    let reopened = open_store(&base, Arc::new(LocalFs));
    assert!(reopened.get_item(&q).is_some());
    assert!(reopened.get_item(&a).is_some());
}
