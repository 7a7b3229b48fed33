//! End-to-end tests through a real FUSE mount.
//!
//! Run: `cargo nextest run -p vdu-mount --features fuse-tests fuse_tests`

#![cfg(all(unix, feature = "fuse-tests"))]

mod common;

#[allow(unused_imports)]
use common::*;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;

// =============================================================================
// Read and write
// =============================================================================

#[test]
fn test_write_read_roundtrip() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("hello.txt", b"Hello, World!").expect("write failed");
    assert_eq!(mount.read("hello.txt").unwrap(), b"Hello, World!");
    assert_eq!(mount.metadata("hello.txt").unwrap().len(), 13);
    // Lands in the cache root unchanged.
    assert_eq!(std::fs::read(mount.backing("hello.txt")).unwrap(), b"Hello, World!");
}

#[test]
fn test_overwrite_truncates() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("f.txt", b"a much longer first version").unwrap();
    mount.write("f.txt", b"short").unwrap();
    assert_eq!(mount.read("f.txt").unwrap(), b"short");
}

#[test]
fn test_append() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("log.txt", b"one\n").unwrap();
    mount.append("log.txt", b"two\n").unwrap();
    assert_eq!(mount.read("log.txt").unwrap(), b"one\ntwo\n");
}

#[test]
fn test_truncate_and_extend() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("t.bin", &[7u8; 100]).unwrap();
    mount.truncate("t.bin", 10).unwrap();
    assert_eq!(mount.read("t.bin").unwrap(), vec![7u8; 10]);
    mount.truncate("t.bin", 20).unwrap();
    let content = mount.read("t.bin").unwrap();
    assert_eq!(&content[..10], &[7u8; 10]);
    assert_eq!(&content[10..], &[0u8; 10]);
}

// =============================================================================
// Names
// =============================================================================

#[test]
fn test_lookup_is_case_insensitive() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("Readme.TXT", b"case").unwrap();
    assert_eq!(mount.read("README.txt").unwrap(), b"case");
    assert_eq!(mount.list("").unwrap(), vec!["Readme.TXT"]);
}

#[test]
fn test_directories() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.mkdir("docs").unwrap();
    mount.write("docs/a.txt", b"a").unwrap();
    mount.write("docs/b.txt", b"b").unwrap();
    assert!(mount.metadata("docs").unwrap().is_dir());
    assert_eq!(mount.list("docs").unwrap(), vec!["a.txt", "b.txt"]);

    let err = mount.rmdir("docs").unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOTEMPTY));

    mount.remove("docs/a.txt").unwrap();
    mount.remove("docs/b.txt").unwrap();
    mount.rmdir("docs").unwrap();
    assert!(!mount.exists("docs"));
}

#[test]
fn test_missing_file() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    let err = mount.read("nope.txt").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// Rename
// =============================================================================

#[test]
fn test_rename_file_replaces_file() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("src.txt", b"new").unwrap();
    mount.write("dst.txt", b"old").unwrap();
    mount.rename("src.txt", "dst.txt").unwrap();
    assert!(!mount.exists("src.txt"));
    assert_eq!(mount.read("dst.txt").unwrap(), b"new");
}

#[test]
fn test_rename_directory_moves_children() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.mkdir("old").unwrap();
    mount.write("old/inner.txt", b"inner").unwrap();
    mount.rename("old", "new").unwrap();
    assert_eq!(mount.read("new/inner.txt").unwrap(), b"inner");
    assert!(!mount.exists("old"));
}

#[test]
fn test_case_only_rename() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("name.txt", b"x").unwrap();
    mount.rename("name.txt", "NAME.txt").unwrap();
    assert_eq!(mount.list("").unwrap(), vec!["NAME.txt"]);
}

// =============================================================================
// Attributes
// =============================================================================

#[test]
fn test_readonly_mode_blocks_writes_and_unlink() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("locked.txt", b"keep").unwrap();
    let path = mount.path("locked.txt");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444)).unwrap();
    assert_eq!(mount.metadata("locked.txt").unwrap().permissions().mode() & 0o222, 0);

    let err = mount.remove("locked.txt").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
    mount.remove("locked.txt").unwrap();
}

#[test]
fn test_statfs_reports_blocks() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    let stat = nix::sys::statvfs::statvfs(&mount.mount_path).unwrap();
    assert_eq!(stat.block_size(), 4096);
    assert!(stat.blocks() > 0);
}

#[test]
fn test_handles_released_after_close() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    mount.write("a.txt", b"a").unwrap();
    let _ = mount.read("a.txt").unwrap();
    // Release is asynchronous in the kernel; give it a moment.
    std::thread::sleep(std::time::Duration::from_millis(200));
    assert_eq!(mount.host().provider().open_handles(), 0);
}
