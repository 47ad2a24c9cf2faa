mod support;

use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use ledgerboot_bootstrap::{
    BootstrapError, BootstrapEvent, BootstrapMode, ErrorKind, TransferBody, Transport,
};

use support::*;

struct MemoryTransport {
    payload: Vec<u8>,
}

impl Transport for MemoryTransport {
    fn get(&self, _url: &str) -> Result<TransferBody, BootstrapError> {
        Ok(TransferBody {
            total: Some(self.payload.len() as u64),
            reader: Box::new(Cursor::new(self.payload.clone())),
        })
    }
}

/// Holds the first read until the test releases the gate.
struct GatedTransport {
    payload: Vec<u8>,
    gate: Receiver<()>,
}

struct GatedReader {
    inner: Cursor<Vec<u8>>,
    gate: Option<Receiver<()>>,
}

impl Read for GatedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(gate) = self.gate.take() {
            let _ = gate.recv_timeout(Duration::from_secs(30));
        }
        self.inner.read(buf)
    }
}

impl Transport for GatedTransport {
    fn get(&self, _url: &str) -> Result<TransferBody, BootstrapError> {
        Ok(TransferBody {
            total: Some(self.payload.len() as u64),
            reader: Box::new(GatedReader {
                inner: Cursor::new(self.payload.clone()),
                gate: Some(self.gate.clone()),
            }),
        })
    }
}

/// Never delivers a byte while the test holds the sender.
struct SilentTransport {
    hold: Receiver<()>,
}

struct SilentReader {
    hold: Receiver<()>,
}

impl Read for SilentReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        let _ = self.hold.recv();
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "closed"))
    }
}

impl Transport for SilentTransport {
    fn get(&self, _url: &str) -> Result<TransferBody, BootstrapError> {
        Ok(TransferBody {
            total: Some(1 << 30),
            reader: Box::new(SilentReader {
                hold: self.hold.clone(),
            }),
        })
    }
}

fn gated(payload: Vec<u8>) -> (Arc<GatedTransport>, Sender<()>) {
    let (tx, rx) = unbounded();
    (Arc::new(GatedTransport { payload, gate: rx }), tx)
}

fn wait_for_download_start(events: &Receiver<BootstrapEvent>) {
    loop {
        match events.recv_timeout(Duration::from_secs(30)) {
            Ok(BootstrapEvent::Progress { message, .. }) if message.starts_with("Downloading") => {
                return
            }
            Ok(_) => continue,
            Err(err) => panic!("no download progress: {err}"),
        }
    }
}

#[test]
fn cloud_download_is_staged_and_verified() {
    let data = tempfile::tempdir().expect("tempdir");
    let payload = bootstrap_zip(MAGIC, &genesis(3));
    let transport = Arc::new(MemoryTransport {
        payload: payload.clone(),
    });
    let controller = controller_with(data.path(), params_for(&genesis(3)), transport);
    assert_eq!(controller.mode(), BootstrapMode::Cloud);

    let events = controller.subscribe();
    controller.run_stage_one().expect("start");
    controller.last_run_result().expect("stage one");

    let layout = controller.layout();
    assert_eq!(std::fs::read(layout.archive_path()).expect("archive"), payload);
    assert!(!layout.archive_tmp_path().exists());
    assert!(controller.stage_two_prepared());

    let received: Vec<_> = events.try_iter().collect();
    assert_run_shape(&received);
    assert!(received.iter().any(|event| matches!(
        event,
        BootstrapEvent::Progress { message, percent: 100 } if message.starts_with("Downloading")
    )));

    controller.run_stage_two().expect("start two");
    controller.last_run_result().expect("stage two");
    assert!(!layout.archive_path().exists());
    assert!(!layout.staging_dir().exists());
}

#[test]
fn downloaded_non_archive_hints_manual_download() {
    let data = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(MemoryTransport {
        payload: b"<html>maintenance</html>".to_vec(),
    });
    let controller = controller_with(data.path(), params_for(&genesis(3)), transport);
    controller.run_stage_one().expect("start");
    let err = controller.last_run_result().expect_err("format");
    assert_eq!(err.kind, ErrorKind::Format);
    assert!(err.message.contains("Try to download bootstrap file manually"));
    assert!(err.message.contains(URL));
    assert!(!controller.layout().staging_dir().exists());
}

#[test]
fn cancelled_download_leaves_nothing_behind() {
    let data = tempfile::tempdir().expect("tempdir");
    let (transport, release) = gated(bootstrap_zip(MAGIC, &genesis(3)));
    let controller = controller_with(data.path(), params_for(&genesis(3)), transport);

    let events = controller.subscribe();
    controller.run_stage_one().expect("start");
    wait_for_download_start(&events);
    assert!(controller.is_running());

    controller.cancel();
    let _ = release.send(());
    let err = controller.last_run_result().expect_err("cancelled");
    assert_eq!(err.kind, ErrorKind::Cancelled);

    let layout = controller.layout();
    assert!(!layout.archive_path().exists());
    assert!(!layout.archive_tmp_path().exists());
    assert!(!layout.staging_dir().exists());
    assert!(!controller.is_running());
}

#[test]
fn selection_is_locked_while_running() {
    let data = tempfile::tempdir().expect("tempdir");
    let (transport, release) = gated(bootstrap_zip(MAGIC, &genesis(3)));
    let controller = controller_with(data.path(), params_for(&genesis(3)), transport);

    let events = controller.subscribe();
    controller.run_stage_one().expect("start");
    wait_for_download_start(&events);

    let err = controller.set_mode(BootstrapMode::File).expect_err("running");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(controller.set_source_path(data.path().join("x.zip")).is_err());
    assert!(controller.run_stage_one().is_err());
    assert!(controller.run_stage_two().is_err());
    assert!(controller.cleanup().is_err());
    assert!(controller.can_run_stage_one().is_err());

    let _ = release.send(());
    controller.last_run_result().expect("stage one");
    controller.set_mode(BootstrapMode::File).expect("idle again");
    controller.cleanup().expect("cleanup");
    assert!(!controller.stage_two_prepared());
}

#[test]
fn dropping_controller_mid_download_stops_worker() {
    let data = tempfile::tempdir().expect("tempdir");
    let (transport, release) = gated(bootstrap_zip(MAGIC, &genesis(3)));
    let controller = controller_with(data.path(), params_for(&genesis(3)), transport);
    let events = controller.subscribe();
    controller.run_stage_one().expect("start");
    wait_for_download_start(&events);

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        let _ = release.send(());
    });
    drop(controller);
    releaser.join().expect("releaser");

    // Nothing is delivered once shutdown began, so the channel just drains and closes.
    let late: Vec<_> = events.try_iter().collect();
    assert!(late
        .iter()
        .all(|event| !matches!(event, BootstrapEvent::StageCompleted { .. })));
    assert!(!data.path().join("bootstrap.zip.tmp").exists());
}

#[test]
fn cancel_stops_a_download_that_never_receives_data() {
    let data = tempfile::tempdir().expect("tempdir");
    let (hold, rx) = unbounded::<()>();
    let transport = Arc::new(SilentTransport { hold: rx });
    let controller = controller_with(data.path(), params_for(&genesis(3)), transport);

    controller.run_stage_one().expect("start");
    thread::sleep(Duration::from_millis(300));
    assert!(controller.is_running());

    controller.cancel();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while controller.is_running() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(!controller.is_running());
    let err = controller.last_run_result().expect_err("cancelled");
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(!controller.layout().archive_tmp_path().exists());
    drop(hold);
}
