//! Sequences the two bootstrap stages on a single background worker.
//!
//! Stage I acquires an archive (download or local file), checks it and leaves a verified
//! staging copy plus a `verified` marker. Stage II swaps the staged ledger into the data
//! directory, merges the shipped config fragment and cleans up. Observers follow a run
//! through [`BootstrapController::subscribe`].

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use fs2::FileExt;
use ledgerboot_log::{log_error, log_info, log_warn};

use crate::archive::{
    extract_archive, verify_archive, Authenticity, AuthenticityCheck, UncheckedAuthenticity,
};
use crate::conf_merge::merge_config;
use crate::download::{
    download, human_size, progress_percent, HttpTransport, RateSampler, Transfer, Transport,
    RATE_SAMPLE_INTERVAL,
};
use crate::error::{BootstrapError, ErrorKind, RunError};
use crate::layout::{remove_file_if_exists, BootstrapLayout};
use crate::ledger::{verify_layout, verify_network_identity, write_verified_marker};
use crate::params::BootstrapParams;
use crate::replace::{remove_peer_state, replace_ledger};

const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(250);
const RUNNING_MESSAGE: &str = "bootstrap is running";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BootstrapMode {
    #[default]
    Cloud,
    File,
}

impl BootstrapMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cloud" => Some(Self::Cloud),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::File => "file",
        }
    }
}

impl fmt::Display for BootstrapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    One,
    Two,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::One => "stage I",
            Self::Two => "stage II",
        }
    }

    fn thread_name(self) -> &'static str {
        match self {
            Self::One => "bootstrap-stage1",
            Self::Two => "bootstrap-stage2",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RunPhase {
    #[default]
    Idle,
    Acquiring,
    Verifying,
    Extracting,
    LayoutChecking,
    MarkerWriting,
    Replacing,
    ConfigMerging,
    CleaningUp,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Verifying => "verifying",
            Self::Extracting => "extracting",
            Self::LayoutChecking => "layout-checking",
            Self::MarkerWriting => "marker-writing",
            Self::Replacing => "replacing",
            Self::ConfigMerging => "config-merging",
            Self::CleaningUp => "cleaning-up",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run state. Reset when a worker starts, except for the previous run's error.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunState {
    pub phase: RunPhase,
    pub progress: u8,
    /// `Some` exactly when the most recently completed run failed.
    pub last_error: Option<RunError>,
    pub config_merged: bool,
    pub authenticity: Option<Authenticity>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapStatus {
    pub mode: BootstrapMode,
    pub source_path: Option<PathBuf>,
    pub running: bool,
    pub phase: RunPhase,
    pub progress: u8,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BootstrapEvent {
    StateChanged(BootstrapStatus),
    Progress { message: String, percent: u8 },
    StageCompleted {
        stage: Stage,
        outcome: Result<(), RunError>,
    },
}

pub struct ControllerSettings {
    pub data_dir: PathBuf,
    /// Live node configuration file that Stage II merges into.
    pub conf_path: PathBuf,
    pub params: BootstrapParams,
    pub transport: Arc<dyn Transport>,
    pub authenticity: Arc<dyn AuthenticityCheck>,
}

impl ControllerSettings {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        conf_path: impl Into<PathBuf>,
        params: BootstrapParams,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            conf_path: conf_path.into(),
            params,
            transport: Arc::new(HttpTransport),
            authenticity: Arc::new(UncheckedAuthenticity),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_authenticity(mut self, authenticity: Arc<dyn AuthenticityCheck>) -> Self {
        self.authenticity = authenticity;
        self
    }
}

#[derive(Clone, Debug, Default)]
struct Selection {
    mode: BootstrapMode,
    source_path: Option<PathBuf>,
}

struct Shared {
    layout: BootstrapLayout,
    conf_path: PathBuf,
    params: BootstrapParams,
    transport: Arc<dyn Transport>,
    authenticity: Arc<dyn AuthenticityCheck>,
    state: Mutex<RunState>,
    active: AtomicBool,
    cancel: AtomicBool,
    closing: AtomicBool,
    subscribers: Mutex<Vec<Sender<BootstrapEvent>>>,
}

pub struct BootstrapController {
    shared: Arc<Shared>,
    /// Guards mode/source changes against a concurrent start.
    selection: Mutex<Selection>,
    worker: Mutex<Option<JoinHandle<()>>>,
    _lock: File,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BootstrapController {
    /// Fails if the data directory is missing or another controller already owns it.
    pub fn new(settings: ControllerSettings) -> Result<Self, BootstrapError> {
        if !settings.data_dir.is_dir() {
            return Err(BootstrapError::Precondition(format!(
                "data directory {} does not exist",
                settings.data_dir.display()
            )));
        }
        let layout = BootstrapLayout::new(settings.data_dir);
        let lock_file = lock_data_dir(&layout)?;
        log_info!(
            "bootstrap controller ready for {} ({})",
            layout.data_dir().display(),
            settings.params.network
        );
        Ok(Self {
            shared: Arc::new(Shared {
                layout,
                conf_path: settings.conf_path,
                params: settings.params,
                transport: settings.transport,
                authenticity: settings.authenticity,
                state: Mutex::new(RunState::default()),
                active: AtomicBool::new(false),
                cancel: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
            selection: Mutex::new(Selection::default()),
            worker: Mutex::new(None),
            _lock: lock_file,
        })
    }

    pub fn layout(&self) -> &BootstrapLayout {
        &self.shared.layout
    }

    pub fn params(&self) -> &BootstrapParams {
        &self.shared.params
    }

    pub fn subscribe(&self) -> Receiver<BootstrapEvent> {
        let (tx, rx) = unbounded();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    pub fn is_running(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> u8 {
        lock(&self.shared.state).progress
    }

    pub fn phase(&self) -> RunPhase {
        lock(&self.shared.state).phase
    }

    pub fn mode(&self) -> BootstrapMode {
        lock(&self.selection).mode
    }

    pub fn source_path(&self) -> Option<PathBuf> {
        lock(&self.selection).source_path.clone()
    }

    /// Whether the selected local archive exists.
    pub fn source_path_ok(&self) -> bool {
        lock(&self.selection)
            .source_path
            .as_deref()
            .is_some_and(Path::exists)
    }

    /// Whether Stage I left a verified marker behind.
    pub fn stage_two_prepared(&self) -> bool {
        self.shared.layout.verified_marker().exists()
    }

    pub fn config_merged(&self) -> bool {
        lock(&self.shared.state).config_merged
    }

    pub fn state(&self) -> RunState {
        lock(&self.shared.state).clone()
    }

    pub fn status(&self) -> BootstrapStatus {
        let selection = lock(&self.selection).clone();
        self.shared.status(&selection, self.is_running())
    }

    /// Error of the most recent run without waiting for an active one.
    pub fn last_error(&self) -> Option<RunError> {
        lock(&self.shared.state).last_error.clone()
    }

    /// Waits for the active run, then reports how the most recent run ended.
    pub fn last_run_result(&self) -> Result<(), RunError> {
        self.wait();
        match self.last_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn set_mode(&self, mode: BootstrapMode) -> Result<(), BootstrapError> {
        let mut selection = lock(&self.selection);
        self.ensure_idle()?;
        selection.mode = mode;
        let status = self.shared.status(&selection, false);
        drop(selection);
        self.shared.emit(BootstrapEvent::StateChanged(status));
        Ok(())
    }

    pub fn set_source_path(&self, path: impl Into<PathBuf>) -> Result<(), BootstrapError> {
        let mut selection = lock(&self.selection);
        self.ensure_idle()?;
        selection.source_path = Some(path.into());
        let status = self.shared.status(&selection, false);
        drop(selection);
        self.shared.emit(BootstrapEvent::StateChanged(status));
        Ok(())
    }

    pub fn can_run_stage_one(&self) -> Result<(), BootstrapError> {
        self.ensure_idle()?;
        self.free_space_ok()
    }

    pub fn can_run_stage_two(&self) -> Result<(), BootstrapError> {
        self.ensure_idle()?;
        self.free_space_ok()
    }

    /// Clears leftovers from earlier attempts and starts Stage I in the background.
    pub fn run_stage_one(&self) -> Result<(), BootstrapError> {
        let selection = lock(&self.selection);
        self.can_run_stage_one()?;
        self.shared.layout.cleanup(selection.source_path.as_deref())?;
        let snapshot = selection.clone();
        self.start(Stage::One, snapshot, |shared, selection| {
            shared.stage_one(selection)
        })
    }

    /// Starts Stage II in the background. The verified marker is checked by the worker.
    pub fn run_stage_two(&self) -> Result<(), BootstrapError> {
        let selection = lock(&self.selection);
        self.can_run_stage_two()?;
        let snapshot = selection.clone();
        self.start(Stage::Two, snapshot, |shared, selection| {
            shared.stage_two(selection)
        })
    }

    /// Asks the worker to stop at its next download checkpoint.
    pub fn cancel(&self) {
        if self.is_running() {
            log_info!("bootstrap cancel requested");
        }
        self.shared.cancel.store(true, Ordering::Release);
    }

    pub fn wait(&self) {
        let mut worker = lock(&self.worker);
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                log_error!("bootstrap worker terminated abnormally");
            }
        }
    }

    /// Removes the staging root and any staged or partial archive.
    pub fn cleanup(&self) -> Result<(), BootstrapError> {
        let selection = lock(&self.selection);
        self.ensure_idle()?;
        self.shared.layout.cleanup(selection.source_path.as_deref())
    }

    fn ensure_idle(&self) -> Result<(), BootstrapError> {
        if self.is_running() {
            return Err(BootstrapError::Precondition(RUNNING_MESSAGE.to_string()));
        }
        Ok(())
    }

    fn free_space_ok(&self) -> Result<(), BootstrapError> {
        let required = self.shared.params.min_free_space;
        if required == 0 {
            return Ok(());
        }
        let dir = self.shared.layout.data_dir();
        let available = fs2::available_space(dir).map_err(BootstrapError::io_at("stat", dir))?;
        if available < required {
            return Err(BootstrapError::Precondition(format!(
                "not enough free space available in {}: {} available, at least {} required",
                dir.display(),
                human_size(available),
                human_size(required)
            )));
        }
        Ok(())
    }

    fn start<F>(&self, stage: Stage, selection: Selection, job: F) -> Result<(), BootstrapError>
    where
        F: FnOnce(&Shared, &Selection) -> Result<(), BootstrapError> + Send + 'static,
    {
        let mut worker = lock(&self.worker);
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }
        {
            // last_error describes the previous run until this one completes.
            let mut state = lock(&self.shared.state);
            let last_error = state.last_error.take();
            *state = RunState {
                last_error,
                ..RunState::default()
            };
        }
        self.shared.cancel.store(false, Ordering::Release);
        self.shared.active.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(stage.thread_name().to_string())
            .spawn(move || shared.run_worker(stage, &selection, job));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.active.store(false, Ordering::Release);
                Err(BootstrapError::Unexpected(format!(
                    "failed to spawn {stage} worker: {err}"
                )))
            }
        }
    }
}

impl Drop for BootstrapController {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::Release);
        self.shared.cancel.store(true, Ordering::Release);
        self.wait();
    }
}

fn lock_data_dir(layout: &BootstrapLayout) -> Result<File, BootstrapError> {
    let path = layout.lock_file();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(BootstrapError::io_at("open", &path))?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();
            Ok(file)
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            Err(BootstrapError::Precondition(format!(
                "data dir {} is already owned by another bootstrap controller; lock file {}",
                layout.data_dir().display(),
                path.display()
            )))
        }
        Err(err) => Err(BootstrapError::io("lock", &path, err)),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Rate-limits progress events; phase announcements bypass it.
#[derive(Default)]
struct Reporter {
    last: Option<(Instant, u8)>,
}

impl Reporter {
    fn due(&mut self, percent: u8) -> bool {
        let now = Instant::now();
        let due = match self.last {
            None => true,
            Some((at, previous)) => {
                previous != percent || now.duration_since(at) >= PROGRESS_MIN_INTERVAL
            }
        };
        if due {
            self.last = Some((now, percent));
        }
        due
    }
}

impl Shared {
    fn status(&self, selection: &Selection, running: bool) -> BootstrapStatus {
        let state = lock(&self.state);
        BootstrapStatus {
            mode: selection.mode,
            source_path: selection.source_path.clone(),
            running,
            phase: state.phase,
            progress: state.progress,
        }
    }

    fn emit(&self, event: BootstrapEvent) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn enter(&self, phase: RunPhase, message: String) {
        let percent = {
            let mut state = lock(&self.state);
            state.phase = phase;
            state.progress
        };
        log_info!("{message}");
        self.emit(BootstrapEvent::Progress { message, percent });
    }

    fn run_worker<F>(&self, stage: Stage, selection: &Selection, job: F)
    where
        F: FnOnce(&Shared, &Selection) -> Result<(), BootstrapError>,
    {
        self.emit(BootstrapEvent::StateChanged(self.status(selection, true)));
        log_info!("{stage} worker start");

        let result = match panic::catch_unwind(AssertUnwindSafe(|| job(self, selection))) {
            Ok(result) => result,
            Err(payload) => Err(BootstrapError::Unexpected(panic_message(payload.as_ref()))),
        };

        let outcome = {
            let mut state = lock(&self.state);
            match &result {
                Ok(()) => {
                    state.phase = RunPhase::Completed;
                    state.last_error = None;
                    Ok(())
                }
                Err(err) => {
                    state.phase = RunPhase::Failed;
                    let run_error = RunError::from(err);
                    state.last_error = Some(run_error.clone());
                    Err(run_error)
                }
            }
        };
        match &result {
            Ok(()) => log_info!("bootstrap {stage} completed"),
            Err(err) if err.kind() == ErrorKind::Cancelled => {
                log_warn!("bootstrap {stage} cancelled")
            }
            Err(err) if err.kind() == ErrorKind::Consistency => {
                log_error!("consistency fault: bootstrap {stage} failed: {err}")
            }
            Err(err) => log_error!("bootstrap {stage} failed: {err}"),
        }

        self.emit(BootstrapEvent::StageCompleted { stage, outcome });
        self.emit(BootstrapEvent::StateChanged(self.status(selection, false)));
        log_info!("{stage} worker exit");
        self.active.store(false, Ordering::Release);
    }

    fn stage_one(&self, selection: &Selection) -> Result<(), BootstrapError> {
        match selection.mode {
            BootstrapMode::Cloud => {
                let archive = self.acquire()?;
                let url = self.params.bootstrap_url.as_str();
                self.stage_archive(&archive, Some(url))
            }
            BootstrapMode::File => {
                let Some(source) = selection.source_path.as_deref() else {
                    return Err(BootstrapError::Precondition(
                        "no bootstrap file selected".to_string(),
                    ));
                };
                if !source.exists() {
                    return Err(BootstrapError::io(
                        "open",
                        source,
                        io::Error::new(io::ErrorKind::NotFound, "path does not exist"),
                    ));
                }
                self.stage_archive(source, None)
            }
        }
    }

    /// Downloads the network's bootstrap archive into the data directory.
    fn acquire(&self) -> Result<PathBuf, BootstrapError> {
        let url = self.params.bootstrap_url.as_str();
        if url.is_empty() {
            return Err(BootstrapError::Precondition(format!(
                "bootstrap URL is empty for {}",
                self.params.network
            )));
        }

        let archive = self.layout.archive_path();
        for leftover in [archive.clone(), self.layout.archive_tmp_path()] {
            if leftover.exists() {
                let fault = BootstrapError::Consistency(format!(
                    "{} exists before download",
                    leftover.display()
                ));
                log_error!("consistency fault: {fault}; removing it and continuing");
                remove_file_if_exists(&leftover)?;
            }
        }

        self.enter(RunPhase::Acquiring, format!("Downloading {url}"));
        let mut sampler = RateSampler::new(RATE_SAMPLE_INTERVAL);
        let mut reporter = Reporter::default();
        let written = download(Arc::clone(&self.transport), url, &archive, |total, transferred| {
            if self.cancel.load(Ordering::Acquire) {
                return Transfer::Cancel;
            }
            let rate = sampler.observe(transferred);
            let percent = {
                let mut state = lock(&self.state);
                if let Some(percent) = progress_percent(total, transferred) {
                    state.progress = percent;
                }
                state.progress
            };
            if reporter.due(percent) {
                self.emit(BootstrapEvent::Progress {
                    message: format!(
                        "Downloading {} ({}/s)",
                        human_size(transferred),
                        human_size(rate)
                    ),
                    percent,
                });
            }
            Transfer::Continue
        })?;
        log_info!("downloaded {} to {}", human_size(written), archive.display());
        Ok(archive)
    }

    fn stage_archive(
        &self,
        archive: &Path,
        download_url: Option<&str>,
    ) -> Result<(), BootstrapError> {
        self.enter(RunPhase::Verifying, format!("Checking {}...", archive.display()));
        verify_archive(archive).map_err(|err| match (err, download_url) {
            (BootstrapError::Format(message), Some(url)) => BootstrapError::Format(format!(
                "{message}\nTry to download bootstrap file manually: {url}"
            )),
            (err, _) => err,
        })?;

        let authenticity = self.authenticity.check(archive)?;
        if authenticity == Authenticity::Unchecked {
            log_warn!(
                "authenticity of {} was not checked; archive contents are untrusted",
                archive.display()
            );
        }
        lock(&self.state).authenticity = Some(authenticity);

        let staging = self.layout.staging_dir();
        self.enter(RunPhase::Extracting, format!("Unzipping {}...", archive.display()));
        extract_archive(archive, &staging)?;

        self.enter(RunPhase::LayoutChecking, format!("Verifying {}...", staging.display()));
        verify_layout(&staging)?;
        verify_network_identity(&staging, &self.params)?;

        self.enter(RunPhase::MarkerWriting, "Writing verified marker...".to_string());
        let digest = write_verified_marker(archive, &self.layout.verified_marker())?;
        log_info!("bootstrap archive {} verified, sha256 {digest}", archive.display());
        lock(&self.state).progress = 100;
        Ok(())
    }

    fn stage_two(&self, selection: &Selection) -> Result<(), BootstrapError> {
        let marker = self.layout.verified_marker();
        if !marker.exists() {
            return Err(BootstrapError::Integrity(format!(
                "bootstrap is not verified, {} does not exist",
                marker.display()
            )));
        }

        self.enter(
            RunPhase::Replacing,
            format!("Replacing ledger data in {}...", self.layout.data_dir().display()),
        );
        replace_ledger(&self.layout)?;

        self.enter(RunPhase::ConfigMerging, format!("Merging {}...", self.conf_path.display()));
        let merged = merge_config(&self.conf_path, &self.layout.conf_fragment())?;
        lock(&self.state).config_merged = merged.changed_config();
        remove_peer_state(&self.layout)?;

        self.enter(RunPhase::CleaningUp, "Cleaning up...".to_string());
        self.layout.cleanup(selection.source_path.as_deref())?;
        lock(&self.state).progress = 100;
        Ok(())
    }
}
