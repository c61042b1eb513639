//! 成员管理集成测试

mod common;

use std::sync::Arc;

use common::{fixed_clock, write_image};
use cuotiben_store::{LocalFs, MemberManager, StoreError, DEFAULT_MEMBER, METADATA_FILE};
use tempfile::TempDir;

fn open_manager(dir: &TempDir) -> MemberManager {
    MemberManager::open(dir.path().join("data"), Arc::new(LocalFs), fixed_clock())
        .expect("Failed to open member manager")
}

#[test]
fn test_default_member_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open_manager(&dir);

    assert_eq!(manager.current(), DEFAULT_MEMBER);
    assert_eq!(manager.list().len(), 1);
    assert!(manager.store().base_dir().join(METADATA_FILE).exists());
    assert!(manager.member_dir(DEFAULT_MEMBER).join("exams").is_dir());
    assert!(dir.path().join("data").join("members.json").exists());
}

#[test]
fn test_create_switch_and_isolation() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = open_manager(&dir);
    let photo = write_image(dir.path(), "q.png", b"question");
    manager.store_mut().import_file(&photo).unwrap();

    manager.create("xiaoming").unwrap();
    assert!(matches!(manager.create("xiaoming"), Err(StoreError::AlreadyExists(_))));
    assert!(matches!(manager.create("../evil"), Err(StoreError::Validation(_))));

    manager.switch("xiaoming").unwrap();
    assert_eq!(manager.current(), "xiaoming");
    assert!(manager.store().is_empty());
    // 不同成员之间不去重
    manager.store_mut().import_file(&photo).unwrap();

    let names: Vec<&str> = manager.list().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec![DEFAULT_MEMBER, "xiaoming"]);
    assert!(matches!(manager.switch("nobody"), Err(StoreError::NotFound(_))));
}

#[test]
fn test_current_member_cannot_be_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = open_manager(&dir);
    manager.create("sister").unwrap();
    let sister_dir = manager.member_dir("sister");

    assert!(matches!(manager.delete(DEFAULT_MEMBER), Err(StoreError::MemberInUse(_))));
    assert!(matches!(manager.delete("nobody"), Err(StoreError::NotFound(_))));

    manager.delete("sister").unwrap();
    assert!(!sister_dir.exists());
    assert_eq!(manager.list().len(), 1);
}

#[test]
fn test_selection_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut manager = open_manager(&dir);
        manager.create("brother").unwrap();
        manager.switch("brother").unwrap();
    }
    let manager = open_manager(&dir);
    assert_eq!(manager.current(), "brother");
    assert_eq!(manager.list().len(), 2);
}

#[test]
fn test_migrate_current_updates_registry() {
    let dir = tempfile::tempdir().unwrap();
    let new_dir = dir.path().join("usb-drive");
    {
        let mut manager = open_manager(&dir);
        manager.store_mut().import_file(&write_image(dir.path(), "q.png", b"q")).unwrap();
        let report = manager.migrate_current(&new_dir).unwrap();
        assert!(report.success);
        assert_eq!(manager.current_info().unwrap().base_dir, new_dir);
    }
    let manager = open_manager(&dir);
    assert_eq!(manager.store().base_dir(), new_dir.as_path());
    assert_eq!(manager.store().len(), 1);
}

#[test]
fn test_password_protected_member_requires_login() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = open_manager(&dir);
    let info = manager.create_with_password("xiaohong", "secret").unwrap();
    assert!(info.is_protected());
    assert!(info.last_login_at.is_none());
    assert!(matches!(manager.create_with_password("empty", ""), Err(StoreError::Validation(_))));
    assert!(matches!(manager.create_with_password(DEFAULT_MEMBER, "pw"), Err(StoreError::Validation(_))));

    assert!(matches!(manager.switch("xiaohong"), Err(StoreError::Unauthorized(_))));
    assert!(matches!(manager.login("xiaohong", Some("wrong")), Err(StoreError::Unauthorized(_))));
    assert_eq!(manager.current(), DEFAULT_MEMBER);
    assert!(manager.verify("xiaohong", Some("secret")).unwrap());
    assert!(!manager.verify("xiaohong", None).unwrap());
    assert!(matches!(manager.verify("nobody", None), Err(StoreError::NotFound(_))));

    manager.login("xiaohong", Some("secret")).unwrap();
    assert_eq!(manager.current(), "xiaohong");
    assert_eq!(manager.current_info().unwrap().last_login_at, Some(common::test_now()));

    let registry = std::fs::read_to_string(dir.path().join("data").join("members.json")).unwrap();
    assert!(!registry.contains("secret"));
    assert!(registry.contains("passwordHash"));
}

#[test]
fn test_logout_returns_to_default_member() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = open_manager(&dir);
    manager.create_with_password("xiaohong", "secret").unwrap();
    manager.login("xiaohong", Some("secret")).unwrap();
    manager.delete(DEFAULT_MEMBER).unwrap();

    manager.logout().unwrap();
    assert_eq!(manager.current(), DEFAULT_MEMBER);
    assert!(manager.store().is_empty());

    let reopened = open_manager(&dir);
    assert_eq!(reopened.current(), DEFAULT_MEMBER);
    assert_eq!(reopened.list().len(), 2);
}
