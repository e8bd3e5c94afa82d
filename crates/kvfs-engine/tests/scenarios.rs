//! End-to-end behaviour of the engine through its public API.

use std::io::SeekFrom;

use kvfs_engine::{EngineConfig, FileType, Filesystem, OpenFlags, INLINE_THRESHOLD};
use proptest::prelude::*;

async fn write_new(fs: &Filesystem, path: &str, data: &[u8]) {
    let mut h = fs.create(path).await.unwrap();
    h.write(data).unwrap();
    h.close().await.unwrap();
}

async fn read_all(fs: &Filesystem, path: &str) -> Vec<u8> {
    let mut h = fs.open(path).await.unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    while let Some(n) = h.read(&mut buf).unwrap() {
        out.extend_from_slice(&buf[..n]);
    }
    h.close().await.unwrap();
    out
}

fn names(entries: Vec<kvfs_engine::Stat>) -> Vec<String> {
    entries.into_iter().map(|s| s.name).collect()
}

#[tokio::test]
async fn create_without_parent_is_enoent() {
    let fs = Filesystem::in_memory().await.unwrap();
    let err = fs.create("a/b.txt").await.unwrap_err();
    assert_eq!(err.code(), "ENOENT");
    assert_eq!(err.errno(), libc::ENOENT);
}

#[tokio::test]
async fn large_write_goes_external_and_reads_back() {
    let fs = Filesystem::in_memory().await.unwrap();
    fs.mkdir("a", 0o755).await.unwrap();
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    write_new(&fs, "a/b.txt", &payload).await;

    let st = fs.stat("a/b.txt").await.unwrap();
    assert_eq!(st.size, 5000);
    assert!(st.data_external);
    assert_eq!(read_all(&fs, "a/b.txt").await, payload);
}

#[tokio::test]
async fn directory_rename_moves_subtree() {
    let fs = Filesystem::in_memory().await.unwrap();
    fs.mkdir("x", 0o755).await.unwrap();
    fs.mkdir("x/y", 0o755).await.unwrap();
    write_new(&fs, "x/y/f", b"hi").await;
    let before = fs.stat("x/y/f").await.unwrap();

    fs.rename("x", "z").await.unwrap();

    assert!(names(fs.readdir("z").await.unwrap()).contains(&"y".to_string()));
    assert_eq!(fs.read_file("z/y/f").await.unwrap(), b"hi");
    assert_eq!(fs.stat("x").await.unwrap_err().code(), "ENOENT");
    assert_eq!(fs.stat("x/y/f").await.unwrap_err().code(), "ENOENT");

    let after = fs.stat("z/y/f").await.unwrap();
    assert_eq!(
        (after.size, after.mtime, after.file_type),
        (before.size, before.mtime, before.file_type)
    );
    assert_eq!(names(fs.readdir(".").await.unwrap()), vec!["z"]);
}

#[tokio::test]
async fn dangling_symlink_is_enoent() {
    let fs = Filesystem::in_memory().await.unwrap();
    fs.symlink("missing", "link").await.unwrap();
    assert_eq!(fs.open("link").await.unwrap_err().code(), "ENOENT");
}

#[tokio::test]
async fn symlink_cycle_is_eloop() {
    let fs = Filesystem::in_memory().await.unwrap();
    fs.symlink("l2", "l1").await.unwrap();
    fs.symlink("/l1", "l2").await.unwrap();
    assert_eq!(fs.open("l1").await.unwrap_err().code(), "ELOOP");
    assert_eq!(fs.read_file("l2").await.unwrap_err().code(), "ELOOP");
    // The links themselves are still inspectable.
    assert_eq!(fs.stat("l1").await.unwrap().file_type, FileType::Symlink);
}

#[tokio::test]
async fn remove_requires_empty_directory() {
    let fs = Filesystem::in_memory().await.unwrap();
    fs.mkdir("d", 0o755).await.unwrap();
    fs.mkdir("d/e", 0o755).await.unwrap();
    assert_eq!(fs.remove("d").await.unwrap_err().code(), "ENOTEMPTY");
    fs.remove("d/e").await.unwrap();
    fs.remove("d").await.unwrap();
    assert!(!names(fs.readdir(".").await.unwrap()).contains(&"d".to_string()));
}

#[tokio::test]
async fn inline_threshold_boundary() {
    let fs = Filesystem::in_memory().await.unwrap();
    write_new(&fs, "below", &vec![1u8; INLINE_THRESHOLD - 1]).await;
    write_new(&fs, "at", &vec![1u8; INLINE_THRESHOLD]).await;
    assert!(!fs.stat("below").await.unwrap().data_external);
    assert!(fs.stat("at").await.unwrap().data_external);
}

#[tokio::test]
async fn mkdir_appears_in_parent_listing() {
    let fs = Filesystem::in_memory().await.unwrap();
    fs.mkdir_all("p/q", 0o755).await.unwrap();
    fs.mkdir("p/q/r", 0o755).await.unwrap();
    assert_eq!(names(fs.readdir("p/q").await.unwrap()), vec!["r"]);
    assert_eq!(names(fs.readdir("/").await.unwrap()), vec!["p"]);
}

#[tokio::test]
async fn truncate_keeps_size_and_content_consistent() {
    let fs = Filesystem::in_memory().await.unwrap();
    write_new(&fs, "t", b"abcdef").await;
    fs.truncate("t", 3).await.unwrap();
    assert_eq!(fs.stat("t").await.unwrap().size, 3);
    assert_eq!(read_all(&fs, "t").await, b"abc");

    fs.truncate("t", INLINE_THRESHOLD as u64 + 10).await.unwrap();
    let data = fs.read_file("t").await.unwrap();
    assert_eq!(data.len(), INLINE_THRESHOLD + 10);
    assert_eq!(&data[..3], b"abc");
    assert!(data[3..].iter().all(|&b| b == 0));
    assert!(fs.stat("t").await.unwrap().data_external);
}

#[tokio::test]
async fn handle_cursor_and_append() {
    let fs = Filesystem::in_memory().await.unwrap();
    let mut h = fs
        .openfile("log", OpenFlags::RDWR | OpenFlags::CREATE | OpenFlags::APPEND)
        .await
        .unwrap();
    h.write(b"alpha ").unwrap();
    h.write(b"beta").unwrap();
    h.seek(SeekFrom::Start(0)).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(h.read(&mut buf).unwrap(), Some(5));
    assert_eq!(&buf, b"alpha");
    h.close().await.unwrap();
    assert_eq!(fs.read_file("log").await.unwrap(), b"alpha beta");
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::with_data_dir(dir.path());
    let big: Vec<u8> = (0..INLINE_THRESHOLD * 2).map(|i| i as u8).collect();

    {
        let fs = Filesystem::mount(&config).await.unwrap();
        fs.mkdir_all("docs/old", 0o755).await.unwrap();
        write_new(&fs, "docs/old/big.bin", &big).await;
        write_new(&fs, "docs/old/note", b"small").await;
        fs.symlink("docs/new/note", "shortcut").await.unwrap();
        fs.rename("docs/old", "docs/new").await.unwrap();
        fs.chmod("docs/new/note", 0o600).await.unwrap();
    }

    let fs = Filesystem::mount(&config).await.unwrap();
    assert_eq!(fs.read_file("docs/new/big.bin").await.unwrap(), big);
    assert_eq!(fs.read_file("shortcut").await.unwrap(), b"small");
    assert_eq!(fs.stat("docs/new/note").await.unwrap().mode & 0o777, 0o600);
    assert_eq!(fs.stat("docs/old").await.unwrap_err().code(), "ENOENT");
    assert_eq!(names(fs.readdir("docs").await.unwrap()), vec!["new"]);
}

#[tokio::test]
async fn checkpoint_then_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::with_data_dir(dir.path());
    {
        let fs = Filesystem::mount(&config).await.unwrap();
        fs.write_file("a", b"before checkpoint").await.unwrap();
        fs.checkpoint().await.unwrap();
        fs.write_file("b", b"after checkpoint").await.unwrap();
    }

    let reopened = EngineConfig {
        checkpoint_on_open: true,
        ..config
    };
    let fs = Filesystem::mount(&reopened).await.unwrap();
    assert_eq!(fs.read_file("a").await.unwrap(), b"before checkpoint");
    assert_eq!(fs.read_file("b").await.unwrap(), b"after checkpoint");
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn payload_round_trips_across_threshold(len in 0usize..(INLINE_THRESHOLD * 2), seed in any::<u8>()) {
        let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
        let (read_back, external) = block_on(async {
            let fs = Filesystem::in_memory().await.unwrap();
            write_new(&fs, "p", &data).await;
            let external = fs.stat("p").await.unwrap().data_external;
            (read_all(&fs, "p").await, external)
        });
        prop_assert_eq!(read_back, data);
        prop_assert_eq!(external, len >= INLINE_THRESHOLD);
    }
}
