#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ledgerboot_bootstrap::{
    BootstrapController, BootstrapEvent, BootstrapParams, ControllerSettings, Transport,
};
use ledgerboot_consensus::Network;
use ledgerboot_primitives::block::BlockHeader;
use ledgerboot_primitives::encoding::Encoder;
use zip::write::FileOptions;
use zip::ZipWriter;

pub const MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];
pub const OTHER_MAGIC: [u8; 4] = [0x26, 0x72, 0xa6, 0xbd];
pub const URL: &str = "https://bootstrap.test/regtest.zip";
pub const GENESIS_HASH: [u8; 32] = [0x3c; 32];

pub fn genesis(nonce: u32) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_block: [0u8; 32],
        merkle_root: [0x5a; 32],
        time: 1_525_482_708,
        bits: 0x207f_ffff,
        nonce,
    }
}

pub fn params_for(header: &BlockHeader) -> BootstrapParams {
    BootstrapParams {
        network: Network::Regtest,
        message_start: MAGIC,
        genesis_hash: GENESIS_HASH,
        genesis_header: header.clone(),
        bootstrap_url: URL.to_string(),
        min_free_space: 0,
    }
}

pub fn segment(magic: [u8; 4], header: &BlockHeader) -> Vec<u8> {
    let mut body = Encoder::new();
    body.write_bytes(&header.consensus_encode());
    body.write_varint(1);
    body.write_bytes(&[0u8; 32]);
    let body = body.into_inner();
    let mut out = magic.to_vec();
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Archive with all three ledger sub-trees and a config fragment.
pub fn bootstrap_zip(magic: [u8; 4], header: &BlockHeader) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let entries: [(&str, Vec<u8>); 4] = [
        ("blocks/blk00000.dat", segment(magic, header)),
        ("chainstate/CURRENT", b"MANIFEST-000001\n".to_vec()),
        ("zerocoin/LOG", b"staged".to_vec()),
        ("ledgerboot.conf", b"addnode=10.0.0.1\nc=3\n".to_vec()),
    ];
    for (name, data) in entries {
        writer
            .start_file(name, FileOptions::default())
            .expect("start entry");
        writer.write_all(&data).expect("write entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    let mut file = File::create(path).expect("create");
    file.write_all(bytes).expect("write");
}

pub fn seed_live_ledger(data_dir: &Path) {
    write_file(&data_dir.join("blocks/blk00000.dat"), b"live blocks");
    write_file(&data_dir.join("chainstate/CURRENT"), b"live chainstate");
    write_file(&data_dir.join("zerocoin/LOG"), b"live zerocoin");
    write_file(&data_dir.join("peers.dat"), b"peers");
    write_file(&data_dir.join("banlist.dat"), b"bans");
    write_file(&data_dir.join("ledgerboot.conf"), b"a=1\naddnode=1.2.3.4\nb=2\n");
}

pub fn conf_path(data_dir: &Path) -> PathBuf {
    data_dir.join("ledgerboot.conf")
}

pub fn controller(data_dir: &Path, params: BootstrapParams) -> BootstrapController {
    BootstrapController::new(ControllerSettings::new(data_dir, conf_path(data_dir), params))
        .expect("controller")
}

pub fn controller_with(
    data_dir: &Path,
    params: BootstrapParams,
    transport: Arc<dyn Transport>,
) -> BootstrapController {
    let settings =
        ControllerSettings::new(data_dir, conf_path(data_dir), params).with_transport(transport);
    BootstrapController::new(settings).expect("controller")
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("read")
}

/// Checks the per-run ordering: StateChanged, Progress*, StageCompleted, StateChanged.
pub fn assert_run_shape(events: &[BootstrapEvent]) {
    assert!(events.len() >= 3, "too few events: {events:?}");
    match events.first() {
        Some(BootstrapEvent::StateChanged(status)) => assert!(status.running),
        other => panic!("run must open with a running state change, got {other:?}"),
    }
    match events.last() {
        Some(BootstrapEvent::StateChanged(status)) => assert!(!status.running),
        other => panic!("run must close with an idle state change, got {other:?}"),
    }
    let middle = &events[1..events.len() - 1];
    let (last, progress) = middle.split_last().expect("completion event");
    assert!(matches!(last, BootstrapEvent::StageCompleted { .. }), "{last:?}");
    assert!(progress
        .iter()
        .all(|event| matches!(event, BootstrapEvent::Progress { .. })));
}
