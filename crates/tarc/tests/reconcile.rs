use std::fs;

use tarc::{
    error::Error,
    metainfo::Layout,
    reconcile::{FileStatus, PieceStatus, Progress, Reconciler, TorrentState},
    scanner::ScanOptions,
    source::{Catalog, TorrentDir},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod common;
use common::*;

fn not_cancelled() -> CancellationToken {
    CancellationToken::new()
}

/// piece_length: 16384
/// ----------------------
/// | data.bin: 20000    |
/// -----------p----------
/// | 16384     | 3616   |
/// ----------------------
#[tokio::test]
async fn single_file_complete_then_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = TorrentBuilder::single("data.bin", random_bytes(20_000), 16384);
    torrent.write_all(dir.path());
    let info = torrent.build();

    let report = Reconciler::new()
        .reconcile(&[info.clone()], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let t = report.torrent(&info.info_hash).unwrap();
    assert_eq!(t.layout, Layout::SingleFile);
    assert_eq!(t.file_count, 1);
    assert_eq!(t.total_length, 20_000);
    assert_eq!(t.trackers, vec!["udp://tracker.example:1337"]);
    assert_eq!(t.piece_count, 2);
    assert_eq!(t.counts.verified, 2);
    assert_eq!(t.counts.missing, 0);
    assert_eq!(t.counts.corrupt, 0);
    assert_eq!(t.completion, 1.0);
    assert_eq!(t.state, TorrentState::Complete);
    assert_eq!(report.file("data.bin").unwrap().status, FileStatus::Tracked);

    write(dir.path(), "data.bin", &torrent.bytes_of("data.bin")[..10_000]);

    let report = Reconciler::new()
        .reconcile(&[info.clone()], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let t = report.torrent(&info.info_hash).unwrap();
    assert_eq!(t.counts.verified, 0);
    assert_eq!(t.counts.missing, 2);
    assert_eq!(t.counts.corrupt, 0);
    assert_eq!(t.missing_pieces, vec![0, 1]);
    assert_eq!(t.completion, 0.0);
    assert_eq!(t.missing_files, vec!["data.bin"]);
    // the file is there, only too short
    assert_eq!(t.state, TorrentState::Incomplete);
    assert_eq!(
        report.file("data.bin").unwrap().status,
        FileStatus::SizeMismatch
    );
}

#[tokio::test]
async fn flipped_byte_is_corrupt_not_missing() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = TorrentBuilder::single("data.bin", random_bytes(50_000), 16384);
    let info = torrent.build();

    let mut bytes = torrent.bytes_of("data.bin").to_vec();
    bytes[16384 + 5] ^= 0x01;
    write(dir.path(), "data.bin", &bytes);

    let report = Reconciler::new()
        .workers(3)
        .reconcile(&[info.clone()], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let t = &report.torrents[0];
    assert_eq!(t.piece_count, 4);
    assert_eq!(t.corrupt_pieces, vec![1]);
    assert!(t.missing_pieces.is_empty());
    assert_eq!(t.counts.verified, 3);
    assert_eq!(t.completion, 0.75);
    assert_eq!(t.state, TorrentState::Incomplete);
}

/// piece_length: 16384
/// ------------------------------------------
/// | a: 32768            | b: 10000 | c: 20000 |
/// ----------p-----------p----------p---------
/// | 0        | 1        | 2           | 3   |
/// ------------------------------------------
fn three_files() -> TorrentBuilder {
    TorrentBuilder::multi("set", 16384)
        .file("a", random_bytes(32_768))
        .file("b", random_bytes(10_000))
        .file("dir/c", random_bytes(20_000))
}

#[tokio::test]
async fn deleted_file_only_affects_its_pieces() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = three_files();
    torrent.write_all(dir.path());
    let info = torrent.build();

    fs::remove_file(dir.path().join("set/dir/c")).unwrap();

    let report = Reconciler::new()
        .reconcile(&[info.clone()], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let t = &report.torrents[0];
    assert_eq!(t.counts.verified, 2);
    assert_eq!(t.missing_pieces, vec![2, 3]);
    assert_eq!(t.counts.missing, 2);
    // piece 2 starts in b, which is on disk
    assert_eq!(t.counts.partially_available, 1);
    assert_eq!(t.missing_files, vec!["set/dir/c"]);
    assert_eq!(t.state, TorrentState::Incomplete);
    assert!(t.read_errors.is_empty());
}

#[tokio::test]
async fn piece_spanning_present_and_absent_file_is_not_verified() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = three_files();
    torrent.write_all(dir.path());
    let info = torrent.build();

    fs::remove_file(dir.path().join("set/b")).unwrap();

    let report = Reconciler::new()
        .reconcile(&[info], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let t = &report.torrents[0];
    assert_eq!(t.missing_pieces, vec![2]);
    assert_eq!(t.counts.partially_available, 1);
    assert_eq!(t.counts.verified, 3);
    assert!(PieceStatus::PartiallyAvailable.is_missing());
}

#[tokio::test]
async fn size_mismatch_is_never_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = three_files();
    torrent.write_all(dir.path());
    let info = torrent.build();

    let mut c = torrent.bytes_of("dir/c").to_vec();
    c.push(0);
    write(dir.path(), "set/dir/c", &c);

    let report = Reconciler::new()
        .reconcile(&[info], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let t = &report.torrents[0];
    assert_eq!(t.counts.corrupt, 0);
    assert_eq!(t.missing_pieces, vec![2, 3]);

    let c = report.file("set/dir/c").unwrap();
    assert_eq!(c.status, FileStatus::SizeMismatch);
    assert_eq!(c.claims.len(), 1);
    assert!(!c.claims[0].size_matches);
    assert_eq!(c.claims[0].declared_length, 20_000);
    assert_eq!(c.claims[0].byte_start, 42_768);
    assert_eq!(c.claims[0].first_piece, Some(2));
    assert_eq!(c.claims[0].last_piece, Some(3));
}

#[tokio::test]
async fn untracked_files_and_absent_torrents() {
    let dir = tempfile::tempdir().unwrap();
    let present = three_files();
    present.write_all(dir.path());
    let absent = TorrentBuilder::single("gone.iso", random_bytes(40_000), 16384);

    write(dir.path(), "notes.txt", b"not in any torrent");
    write(dir.path(), "set/extra", b"neither");

    let report = Reconciler::new()
        .reconcile(&[present.build(), absent.build()], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let untracked: Vec<&str> =
        report.untracked().map(|f| f.record.relative_path.as_str()).collect();
    assert_eq!(untracked, vec!["notes.txt", "set/extra"]);

    let gone = report.absent().collect::<Vec<_>>();
    assert_eq!(gone.len(), 1);
    assert_eq!(gone[0].name, "gone.iso");
    assert_eq!(gone[0].counts.missing, gone[0].piece_count);
    assert_eq!(gone[0].completion, 0.0);
    assert_eq!(gone[0].missing_files, vec!["gone.iso"]);

    assert_eq!(report.torrents[0].state, TorrentState::Complete);
}

#[tokio::test]
async fn overlapping_torrents_claim_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let shared = random_bytes(30_000);

    let small = TorrentBuilder::multi("shared", 16384).file("a", shared.clone());
    let big = TorrentBuilder::multi("shared", 32768)
        .file("a", shared)
        .file("b", random_bytes(5_000));
    big.write_all(dir.path());

    let (small, big) = (small.build(), big.build());
    let report = Reconciler::new()
        .reconcile(&[small.clone(), big.clone()], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let a = report.file("shared/a").unwrap();
    assert_eq!(a.status, FileStatus::Tracked);
    assert_eq!(a.claims.len(), 2);
    assert_eq!(a.claims[0].info_hash, small.info_hash);
    assert_eq!(a.claims[0].last_piece, Some(1));
    assert_eq!(a.claims[1].info_hash, big.info_hash);
    assert_eq!(a.claims[1].last_piece, Some(0));

    for t in &report.torrents {
        assert_eq!(t.state, TorrentState::Complete, "{}", t.info_hash);
    }
}

#[tokio::test]
async fn padding_files_are_never_looked_for() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = TorrentBuilder::multi("padded", 16)
        .file("a", random_bytes(10))
        .pad(6)
        .file("b", random_bytes(40));
    torrent.write_all(dir.path());

    let report = Reconciler::new()
        .reconcile(&[torrent.build()], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let t = &report.torrents[0];
    assert_eq!(t.layout, Layout::MultiFile);
    assert_eq!(t.file_count, 2);
    assert_eq!(t.total_length, 56);
    assert_eq!(t.piece_count, 4);
    assert_eq!(t.counts.verified, 4);
    assert!(t.missing_files.is_empty());
    assert!(report.file("padded/.pad/6").is_none());
}

#[tokio::test]
async fn catalog_dedups_and_reports_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let one = tempfile::tempdir().unwrap();
    let two = tempfile::tempdir().unwrap();

    let torrent = three_files();
    torrent.write_all(dir.path());
    let blob = torrent.bencode();

    write(one.path(), "set.torrent", &blob);
    write(two.path(), "copy.torrent", &blob);
    write(two.path(), "broken.torrent", b"d4:infod4:name3:abce");

    let catalog = Catalog::gather(&[
        TorrentDir::new("home", one.path()),
        TorrentDir::new("seedbox", two.path()),
    ])
    .await
    .unwrap();

    let report = Reconciler::new()
        .reconcile_catalog(&catalog, dir.path(), &not_cancelled())
        .await
        .unwrap();

    assert_eq!(report.torrents.len(), 1);
    assert_eq!(report.torrents[0].origins, vec!["home", "seedbox"]);
    assert_eq!(report.torrents[0].state, TorrentState::Complete);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].origin.ends_with("broken.torrent"));
    assert!(report.started_at <= report.finished_at);
}

#[tokio::test]
async fn hidden_files_can_be_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = TorrentBuilder::multi(".stash", 16).file("a", random_bytes(20));
    torrent.write_all(dir.path());
    let info = torrent.build();

    let report = Reconciler::new()
        .scan_options(ScanOptions { skip_hidden: true })
        .reconcile(&[info.clone()], dir.path(), &not_cancelled())
        .await
        .unwrap();
    assert!(report.files.is_empty());
    assert_eq!(report.torrents[0].state, TorrentState::Absent);

    let report = Reconciler::new()
        .reconcile(&[info], dir.path(), &not_cancelled())
        .await
        .unwrap();
    assert_eq!(report.torrents[0].state, TorrentState::Complete);
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_file_is_missing_with_a_cause() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let torrent = TorrentBuilder::single("locked", random_bytes(100), 32);
    torrent.write_all(dir.path());

    let path = dir.path().join("locked");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();
    // permission bits mean nothing to root
    if fs::File::open(&path).is_ok() {
        return;
    }

    let report = Reconciler::new()
        .reconcile(&[torrent.build()], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let t = &report.torrents[0];
    assert_eq!(t.counts.missing, 4);
    assert_eq!(t.read_errors.len(), 4);
    assert_eq!(t.read_errors[0].piece, 0);
    assert_eq!(t.read_errors[0].error.path, "locked");
}

#[tokio::test]
async fn corrupt_pieces_are_sorted_whatever_the_finishing_order() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = TorrentBuilder::single("data.bin", random_bytes(16 * 1024), 1024);
    let info = torrent.build();

    let mut bytes = torrent.bytes_of("data.bin").to_vec();
    for piece in [13, 2, 7, 0, 9] {
        bytes[piece * 1024 + 100] ^= 0xff;
    }
    write(dir.path(), "data.bin", &bytes);

    for _ in 0..5 {
        let report = Reconciler::new()
            .workers(4)
            .reconcile(&[info.clone()], dir.path(), &not_cancelled())
            .await
            .unwrap();

        let t = &report.torrents[0];
        assert_eq!(t.corrupt_pieces, vec![0, 2, 7, 9, 13]);
        assert_eq!(t.counts.corrupt, 5);
        assert_eq!(t.counts.verified, 11);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_dir_is_a_scan_error_not_a_failed_pass() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let kept = three_files();
    kept.write_all(dir.path());
    let hidden = TorrentBuilder::multi("locked", 16).file("a", random_bytes(40));
    hidden.write_all(dir.path());

    let locked = dir.path().join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    // permission bits mean nothing to root
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let result = Reconciler::new()
        .reconcile(&[kept.build(), hidden.build()], dir.path(), &not_cancelled())
        .await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let report = result.unwrap();

    assert_eq!(report.scan_errors.len(), 1);
    assert_eq!(report.scan_errors[0].path, "locked");

    assert_eq!(report.torrents[0].state, TorrentState::Complete);
    assert_eq!(report.torrents[1].state, TorrentState::Absent);
    assert_eq!(report.torrents[1].missing_files, vec!["locked/a"]);
}

#[tokio::test]
async fn cancelled_before_the_pass() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = TorrentBuilder::single("data.bin", random_bytes(100), 16);
    torrent.write_all(dir.path());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = Reconciler::new()
        .reconcile(&[torrent.build()], dir.path(), &cancel)
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn cancelled_mid_pass_then_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = TorrentBuilder::single("data.bin", random_bytes(16_000), 16);
    torrent.write_all(dir.path());
    let info = torrent.build();
    assert_eq!(info.piece_count(), 1000);

    // a slow consumer keeps the pass from running ahead
    let (tx, mut rx) = mpsc::channel::<Progress>(1);
    let cancel = CancellationToken::new();

    let pass = {
        let reconciler = Reconciler::new().workers(4).progress(tx);
        let torrents = vec![info.clone()];
        let root = dir.path().to_path_buf();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            reconciler.reconcile(&torrents, &root, &cancel).await
        })
    };

    for _ in 0..10 {
        let progress = rx.recv().await.unwrap();
        assert_eq!(progress.queued, 1000);
    }
    cancel.cancel();

    let result = pass.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));

    let report = Reconciler::new()
        .workers(4)
        .reconcile(&[info], dir.path(), &not_cancelled())
        .await
        .unwrap();
    assert_eq!(report.torrents[0].counts.verified, 1000);
}

#[tokio::test]
async fn progress_is_sent_for_every_hashed_piece() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = three_files();
    torrent.write_all(dir.path());
    fs::remove_file(dir.path().join("set/b")).unwrap();

    let (tx, mut rx) = mpsc::channel::<Progress>(100);
    Reconciler::new()
        .progress(tx)
        .reconcile(&[torrent.build()], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(progress) = rx.recv().await {
        events.push(progress);
    }
    // piece 2 needs b and is settled without hashing
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|p| p.queued == 3));
    assert_eq!(events.last().unwrap().hashed, 3);
}

#[tokio::test]
async fn report_serializes() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = TorrentBuilder::single("data.bin", random_bytes(100), 64);
    torrent.write_all(dir.path());
    let info = torrent.build();

    let report = Reconciler::new()
        .reconcile(&[info.clone()], dir.path(), &not_cancelled())
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(
        json["torrents"][0]["info_hash"],
        serde_json::Value::String(info.info_hash.to_string())
    );
    assert_eq!(json["torrents"][0]["state"], "Complete");
    assert_eq!(json["files"][0]["relative_path"], "data.bin");
    assert!(json["started_at"].as_str().unwrap().contains('T'));
}
