mod support;

use std::fs;

use ledgerboot_bootstrap::{BootstrapEvent, BootstrapMode, ErrorKind, RunPhase, Stage};
use ledgerboot_primitives::{hash256_to_hex, hex_lower, sha256};

use support::*;

fn staged_source(dir: &std::path::Path, magic: [u8; 4], nonce: u32) -> std::path::PathBuf {
    let source = dir.join("downloads").join("bootstrap.zip");
    write_file(&source, &bootstrap_zip(magic, &genesis(nonce)));
    source
}

#[test]
fn stage_one_from_file_writes_archive_digest() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let data = tempfile::tempdir().expect("tempdir");
    let source = staged_source(scratch.path(), MAGIC, 7);
    let controller = controller(data.path(), params_for(&genesis(7)));
    controller.set_mode(BootstrapMode::File).expect("mode");
    controller.set_source_path(&source).expect("source");
    assert!(controller.source_path_ok());

    let events = controller.subscribe();
    controller.run_stage_one().expect("start");
    controller.last_run_result().expect("stage one");

    let marker = controller.layout().verified_marker();
    let expected = hex_lower(&sha256(&fs::read(&source).expect("source bytes")));
    assert_eq!(read(&marker), expected);
    assert!(controller.stage_two_prepared());
    assert_eq!(controller.phase(), RunPhase::Completed);
    assert_eq!(controller.progress(), 100);
    assert!(controller.last_error().is_none());
    assert!(source.exists(), "user-selected archive must be left alone");

    let received: Vec<_> = events.try_iter().collect();
    assert_run_shape(&received);
    assert!(received.iter().any(|event| matches!(
        event,
        BootstrapEvent::StageCompleted {
            stage: Stage::One,
            outcome: Ok(())
        }
    )));
}

#[test]
fn archive_from_another_network_is_rejected() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let data = tempfile::tempdir().expect("tempdir");
    seed_live_ledger(data.path());

    let cases = [(MAGIC, 99u32), (OTHER_MAGIC, 7u32)];
    let controller = controller(data.path(), params_for(&genesis(7)));
    controller.set_mode(BootstrapMode::File).expect("mode");
    for (magic, nonce) in cases {
        let source = staged_source(scratch.path(), magic, nonce);
        controller.set_source_path(&source).expect("source");
        controller.run_stage_one().expect("start");
        let err = controller.last_run_result().expect_err("wrong network");
        assert_eq!(err.kind, ErrorKind::Integrity, "{err}");
        if nonce != 7 {
            assert!(err.message.contains(&format!("nonce {nonce}]")), "{err}");
            assert!(err.message.contains("nonce 7]"), "{err}");
            assert!(err.message.contains(&hash256_to_hex(&GENESIS_HASH)), "{err}");
        } else {
            assert!(err.message.contains(&hex_lower(&OTHER_MAGIC)));
            assert!(err.message.contains(&hex_lower(&MAGIC)));
        }
        assert!(!controller.stage_two_prepared());
        assert_eq!(read(&data.path().join("blocks/blk00000.dat")), "live blocks");
    }
}

#[test]
fn non_archive_source_fails_before_extraction() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let data = tempfile::tempdir().expect("tempdir");
    let source = scratch.path().join("bootstrap.tar.gz");
    write_file(&source, b"\x1f\x8b\x08\x00 not a zip");

    let controller = controller(data.path(), params_for(&genesis(7)));
    controller.set_mode(BootstrapMode::File).expect("mode");
    controller.set_source_path(&source).expect("source");
    controller.run_stage_one().expect("start");
    let err = controller.last_run_result().expect_err("format");
    assert_eq!(err.kind, ErrorKind::Format);
    assert!(err.message.contains(&source.display().to_string()));
    assert!(!controller.layout().staging_dir().exists());
}

#[test]
fn missing_source_is_io_error() {
    let data = tempfile::tempdir().expect("tempdir");
    let controller = controller(data.path(), params_for(&genesis(7)));
    let source = data.path().join("nowhere.zip");
    controller.set_mode(BootstrapMode::File).expect("mode");
    controller.set_source_path(&source).expect("source");
    assert!(!controller.source_path_ok());
    controller.run_stage_one().expect("start");
    let err = controller.last_run_result().expect_err("missing");
    assert_eq!(err.kind, ErrorKind::Io);
    assert!(err.message.contains("nowhere.zip"));
}

#[test]
fn stage_two_requires_marker() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let data = tempfile::tempdir().expect("tempdir");
    seed_live_ledger(data.path());
    let source = staged_source(scratch.path(), MAGIC, 7);

    let controller = controller(data.path(), params_for(&genesis(7)));
    controller.set_mode(BootstrapMode::File).expect("mode");
    controller.set_source_path(&source).expect("source");
    controller.run_stage_one().expect("start");
    controller.last_run_result().expect("stage one");

    let marker = controller.layout().verified_marker();
    fs::remove_file(&marker).expect("remove marker");
    controller.run_stage_two().expect("start");
    let err = controller.last_run_result().expect_err("unverified");
    assert_eq!(err.kind, ErrorKind::Integrity);
    assert!(err.message.contains(&marker.display().to_string()));
    assert_eq!(read(&data.path().join("blocks/blk00000.dat")), "live blocks");
    assert!(!data.path().join("blocks.bak").exists());
    assert!(data.path().join("peers.dat").exists());
}

#[test]
fn full_bootstrap_replaces_ledger_and_merges_config() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let data = tempfile::tempdir().expect("tempdir");
    seed_live_ledger(data.path());
    let source = staged_source(scratch.path(), MAGIC, 7);

    let controller = controller(data.path(), params_for(&genesis(7)));
    controller.set_mode(BootstrapMode::File).expect("mode");
    controller.set_source_path(&source).expect("source");
    controller.run_stage_one().expect("start one");
    controller.last_run_result().expect("stage one");

    let events = controller.subscribe();
    controller.run_stage_two().expect("start two");
    controller.last_run_result().expect("stage two");

    let root = data.path();
    assert_eq!(read(&root.join("zerocoin/LOG")), "staged");
    assert_eq!(read(&root.join("zerocoin.bak/LOG")), "live zerocoin");
    assert_eq!(read(&root.join("blocks.bak/blk00000.dat")), "live blocks");
    assert_eq!(read(&root.join("chainstate/CURRENT")), "MANIFEST-000001\n");
    assert_eq!(read(&conf_path(root)), "a=1\nb=2\naddnode=10.0.0.1\nc=3\n");
    assert_eq!(read(&root.join("ledgerboot.conf.bak")), "a=1\naddnode=1.2.3.4\nb=2\n");
    assert!(controller.config_merged());
    assert!(!root.join("peers.dat").exists());
    assert!(!root.join("banlist.dat").exists());
    assert!(!controller.layout().staging_dir().exists());
    assert!(source.exists());

    let received: Vec<_> = events.try_iter().collect();
    assert_run_shape(&received);
}

#[test]
fn stage_two_resumes_after_interrupted_swap() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let data = tempfile::tempdir().expect("tempdir");
    seed_live_ledger(data.path());
    let source = staged_source(scratch.path(), MAGIC, 7);

    let controller = controller(data.path(), params_for(&genesis(7)));
    controller.set_mode(BootstrapMode::File).expect("mode");
    controller.set_source_path(&source).expect("source");
    controller.run_stage_one().expect("start one");
    controller.last_run_result().expect("stage one");

    // Crash between moving chainstate aside and promoting the staged copy.
    let root = data.path();
    fs::rename(root.join("chainstate"), root.join("chainstate.bak")).expect("backup");

    controller.run_stage_two().expect("start two");
    controller.last_run_result().expect("stage two");
    assert_eq!(read(&root.join("chainstate/CURRENT")), "MANIFEST-000001\n");
    assert_eq!(read(&root.join("chainstate.bak/CURRENT")), "live chainstate");
    assert_eq!(read(&root.join("blocks.bak/blk00000.dat")), "live blocks");
}
