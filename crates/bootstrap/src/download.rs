//! Streams a remote payload into `<dest>.tmp` and promotes it on success.
//!
//! The transfer itself runs on a fetch thread so a stalled connection never keeps the
//! caller from observing cancellation.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::BootstrapError;
use crate::layout::{remove_file_if_exists, rename, with_suffix, TMP_SUFFIX};

const DOWNLOAD_CHUNK: usize = 64 * 1024;
/// How often the progress callback runs while no data arrives.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const RATE_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
/// A transfer that delivers nothing for this long fails as a network error.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Returned by the progress callback after every chunk and on idle polls.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transfer {
    Continue,
    Cancel,
}

pub struct TransferBody {
    /// Declared payload size, when the server sent one.
    pub total: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<TransferBody, BootstrapError>;
}

/// Plain HTTPS GET via `minreq`.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpTransport;

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<TransferBody, BootstrapError> {
        let response = minreq::get(url)
            .send_lazy()
            .map_err(|err| BootstrapError::Network(format!("download failed: {url} ({err})")))?;
        if response.status_code != 200 {
            return Err(BootstrapError::Network(format!(
                "download failed: {url} (HTTP {})",
                response.status_code
            )));
        }
        let total = response
            .headers
            .get("content-length")
            .and_then(|value| value.trim().parse::<u64>().ok());
        Ok(TransferBody {
            total,
            reader: Box::new(response),
        })
    }
}

enum Fetched {
    Started(Option<u64>),
    Data(Vec<u8>),
    Finished,
    Failed(BootstrapError),
}

/// Downloads `url` to `dest`, returning the number of bytes written.
///
/// `progress` receives `(total, transferred)` with `total == 0` when unknown. On any
/// failure or cancellation neither `<dest>.tmp` nor `dest` is left behind.
pub fn download<F>(
    transport: Arc<dyn Transport>,
    url: &str,
    dest: &Path,
    progress: F,
) -> Result<u64, BootstrapError>
where
    F: FnMut(u64, u64) -> Transfer,
{
    download_with_stall_timeout(transport, url, dest, STALL_TIMEOUT, progress)
}

pub fn download_with_stall_timeout<F>(
    transport: Arc<dyn Transport>,
    url: &str,
    dest: &Path,
    stall_timeout: Duration,
    mut progress: F,
) -> Result<u64, BootstrapError>
where
    F: FnMut(u64, u64) -> Transfer,
{
    let tmp = with_suffix(dest, TMP_SUFFIX);
    let result = stream_to(transport, url, &tmp, stall_timeout, &mut progress)
        .and_then(|written| rename(&tmp, dest).map(|()| written));
    if result.is_err() {
        let _ = remove_file_if_exists(&tmp);
        let _ = remove_file_if_exists(dest);
    }
    result
}

fn stream_to(
    transport: Arc<dyn Transport>,
    url: &str,
    tmp: &Path,
    stall_timeout: Duration,
    progress: &mut dyn FnMut(u64, u64) -> Transfer,
) -> Result<u64, BootstrapError> {
    if progress(0, 0) == Transfer::Cancel {
        return Err(BootstrapError::Cancelled);
    }
    let mut file = File::create(tmp).map_err(BootstrapError::io_at("create", tmp))?;
    let fetched = spawn_fetch(transport, url)?;

    let mut total = 0u64;
    let mut transferred = 0u64;
    let mut last_data = Instant::now();
    loop {
        match fetched.recv_timeout(IDLE_POLL_INTERVAL) {
            Ok(Fetched::Started(declared)) => {
                total = declared.unwrap_or(0);
                last_data = Instant::now();
            }
            Ok(Fetched::Data(bytes)) => {
                file.write_all(&bytes)
                    .map_err(BootstrapError::io_at("write", tmp))?;
                transferred += bytes.len() as u64;
                last_data = Instant::now();
                if progress(total, transferred) == Transfer::Cancel {
                    return Err(BootstrapError::Cancelled);
                }
            }
            Ok(Fetched::Finished) => break,
            Ok(Fetched::Failed(err)) => return Err(err),
            Err(RecvTimeoutError::Timeout) => {
                if progress(total, transferred) == Transfer::Cancel {
                    return Err(BootstrapError::Cancelled);
                }
                if last_data.elapsed() >= stall_timeout {
                    return Err(BootstrapError::Network(format!(
                            "download stalled: {url} after {transferred} bytes, idle for {}ms",
                        stall_timeout.as_millis()
                    )));
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(BootstrapError::Network(format!(
                    "download aborted: {url} after {transferred} bytes"
                )))
            }
        }
    }
    file.sync_all().map_err(BootstrapError::io_at("flush", tmp))?;

    if total > 0 && transferred != total {
        return Err(BootstrapError::Network(format!(
            "download truncated: {url} ({transferred} of {total} bytes)"
        )));
    }
    Ok(transferred)
}

/// The fetch thread exits on its own once the receiver is dropped.
fn spawn_fetch(
    transport: Arc<dyn Transport>,
    url: &str,
) -> Result<Receiver<Fetched>, BootstrapError> {
    let (tx, rx) = bounded(4);
    let url = url.to_string();
    thread::Builder::new()
        .name("bootstrap-fetch".to_string())
        .spawn(move || fetch(transport.as_ref(), &url, &tx))
        .map_err(|err| BootstrapError::Unexpected(format!("failed to spawn fetch thread: {err}")))?;
    Ok(rx)
}

fn fetch(transport: &dyn Transport, url: &str, tx: &Sender<Fetched>) {
    let mut body = match transport.get(url) {
        Ok(body) => body,
        Err(err) => {
            let _ = tx.send(Fetched::Failed(err));
            return;
        }
    };
    if tx.send(Fetched::Started(body.total)).is_err() {
        return;
    }
    let mut transferred = 0u64;
    loop {
        let mut buf = vec![0u8; DOWNLOAD_CHUNK];
        let read = match body.reader.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(Fetched::Finished);
                return;
            }
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let _ = tx.send(Fetched::Failed(BootstrapError::Network(format!(
                    "download interrupted: {url} after {transferred} bytes ({err})"
                ))));
                return;
            }
        };
        buf.truncate(read);
        transferred += read as u64;
        if tx.send(Fetched::Data(buf)).is_err() {
            return;
        }
    }
}

/// Percentage for a progress report, or `None` when the inputs cannot produce a
/// meaningful value (unknown total, nothing yet, or more bytes than declared).
pub fn progress_percent(total: u64, transferred: u64) -> Option<u8> {
    if transferred == 0 || total == 0 || total < transferred {
        return None;
    }
    Some((transferred as u128 * 100 / total as u128) as u8)
}

/// Rolling transfer rate, resampled once per interval.
#[derive(Debug)]
pub struct RateSampler {
    interval: Duration,
    sample_start: Instant,
    sample_bytes: u64,
    rate: u64,
}

impl RateSampler {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            sample_start: start,
            sample_bytes: 0,
            rate: 0,
        }
    }

    /// Bytes per second over the last completed sample.
    pub fn observe(&mut self, transferred: u64) -> u64 {
        self.observe_at(Instant::now(), transferred)
    }

    pub fn observe_at(&mut self, now: Instant, transferred: u64) -> u64 {
        let elapsed = now.saturating_duration_since(self.sample_start);
        if elapsed > self.interval {
            let secs = elapsed.as_secs().max(1);
            self.rate = transferred.saturating_sub(self.sample_bytes) / secs;
            self.sample_bytes = transferred;
            self.sample_start = now;
        }
        self.rate
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit + 1 < UNITS.len() {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
