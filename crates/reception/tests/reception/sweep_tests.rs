use super::*;
use crate::test_support::temp_root;

#[test]
fn sweep_should_remove_stale_part_files_only() {
    let root = temp_root("sweep-stale");
    let stale = root.join("a1.part");
    let active = root.join("b2.part");
    let kept = root.join("notes.txt");
    for path in [&stale, &active, &kept] {
        std::fs::write(path, b"x").expect("write fixture");
    }
    std::fs::create_dir_all(root.join("nested.part")).expect("create dir");

    let in_use = HashSet::from([active.clone()]);
    let removed = sweep_orphaned_downloads(&root, Duration::ZERO, &in_use).expect("sweep");

    assert_eq!(removed, 1);
    assert!(!stale.exists());
    assert!(active.exists());
    assert!(kept.exists());
    assert!(root.join("nested.part").is_dir());
}

#[test]
fn sweep_should_keep_recent_files() {
    let root = temp_root("sweep-recent");
    let fresh = root.join("c3.part");
    std::fs::write(&fresh, b"x").expect("write fixture");

    let removed = sweep_orphaned_downloads(&root, Duration::from_secs(3600), &HashSet::new())
        .expect("sweep");
    assert_eq!(removed, 0);
    assert!(fresh.exists());
}

#[test]
fn sweep_should_ignore_missing_directory() {
    let root = temp_root("sweep-missing");
    let removed = sweep_orphaned_downloads(&root.join("nope"), Duration::ZERO, &HashSet::new())
        .expect("sweep");
    assert_eq!(removed, 0);
}
