use crate::notifier::Notifier;
use crate::run_log::RunLog;
use anyhow::{anyhow, Context, Result};
use autobackup_lib::archive::write_generation;
use autobackup_lib::profile::{validate, Limits, Method, Profile, ValidProfile, ValidationError};
use autobackup_lib::retention::generation_name;
use autobackup_lib::rotation::next_slot;
use autobackup_lib::types::{RunState, SchedulerStatus, Severity};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause between a one-shot run finishing and the process being terminated.
const DAILY_EXIT_DELAY: Duration = Duration::from_secs(2);

/// Ends the hosting process once a one-shot run is done.
pub trait ProcessTerminator: Send + Sync {
    fn terminate(&self);
}

/// Terminates by cancelling the daemon's shutdown token.
pub struct ShutdownTerminator(pub CancellationToken);

impl ProcessTerminator for ShutdownTerminator {
    fn terminate(&self) {
        info!("One-shot run finished, requesting shutdown");
        self.0.cancel();
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Cannot start backup. There is an active process.")]
    ConcurrentRun,
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Runs one profile's backup loop at a time on a background task.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    shared: Mutex<Shared>,
    notifier: Arc<dyn Notifier>,
    run_log: Arc<dyn RunLog>,
    terminator: Arc<dyn ProcessTerminator>,
    limits: Limits,
    daily_exit_delay: Duration,
}

#[derive(Default)]
struct Shared {
    state: RunState,
    run: Option<ActiveRun>,
    /// Generations written by the most recent pass.
    generations: Vec<PathBuf>,
    recent_backup: String,
}

struct ActiveRun {
    profile_name: String,
    profile: ValidProfile,
    cancel: CancellationToken,
    started_at: Option<DateTime<Utc>>,
    /// Source folders covered by the current pass.
    folders_done: usize,
}

impl Scheduler {
    pub fn new(
        limits: Limits,
        notifier: Arc<dyn Notifier>,
        run_log: Arc<dyn RunLog>,
        terminator: Arc<dyn ProcessTerminator>,
    ) -> Self {
        Self::with_exit_delay(limits, notifier, run_log, terminator, DAILY_EXIT_DELAY)
    }

    /// Like `new`, with a custom pause before a one-shot run terminates the process.
    pub fn with_exit_delay(
        limits: Limits,
        notifier: Arc<dyn Notifier>,
        run_log: Arc<dyn RunLog>,
        terminator: Arc<dyn ProcessTerminator>,
        daily_exit_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared::default()),
                notifier,
                run_log,
                terminator,
                limits,
                daily_exit_delay,
            }),
        }
    }

    /// Validates `profile` and starts its run loop in the background.
    ///
    /// Must be called from within a tokio runtime. The profile's numeric
    /// fields are normalized in place.
    pub fn start(&self, profile: &mut Profile, name: &str) -> Result<(), SchedulerError> {
        if self.inner.lock().state != RunState::Idle {
            self.inner
                .notifier
                .notify(Severity::Error, &SchedulerError::ConcurrentRun.to_string(), false);
            return Err(SchedulerError::ConcurrentRun);
        }

        let valid = match validate(profile, &self.inner.limits) {
            Ok(valid) => valid,
            Err(e) => {
                warn!("Profile {} failed validation: {:?}", name, e);
                self.inner.notifier.notify(Severity::Error, &e.to_string(), false);
                return Err(e.into());
            }
        };

        let cancel = CancellationToken::new();
        {
            let mut shared = self.inner.lock();
            if shared.state != RunState::Idle {
                drop(shared);
                self.inner
                    .notifier
                    .notify(Severity::Error, &SchedulerError::ConcurrentRun.to_string(), false);
                return Err(SchedulerError::ConcurrentRun);
            }
            shared.state = RunState::Running;
            shared.run = Some(ActiveRun {
                profile_name: name.to_string(),
                profile: valid.clone(),
                cancel: cancel.clone(),
                started_at: None,
                folders_done: 0,
            });
        }

        info!(
            "Starting {} backup for profile {} every {}s",
            valid.method, name, valid.interval
        );
        let inner = self.inner.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let worker = tokio::spawn(run_loop(inner.clone(), name.clone(), valid, cancel));
            let outcome = match worker.await {
                Ok(result) => result,
                Err(e) => Err(anyhow!("Backup task aborted: {}", e)),
            };
            if let Err(e) = outcome {
                inner.report_failure(&name, &e);
            }
            inner.finish_run();
        });
        Ok(())
    }

    /// Stops the active run, waking it from any pending wait.
    ///
    /// Returns whether a run was active.
    pub fn stop(&self, suppress_no_active_message: bool) -> bool {
        self.inner.stop(suppress_no_active_message)
    }

    /// Seconds until the next pass of the active run. Negative when overdue.
    pub fn time_remaining(&self) -> Option<i64> {
        self.inner.lock().time_remaining()
    }

    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    pub fn status(&self) -> SchedulerStatus {
        let shared = self.inner.lock();
        SchedulerStatus {
            state: shared.state,
            profile: shared.run.as_ref().map(|r| r.profile_name.clone()),
            last_run_started_at: shared.run.as_ref().and_then(|r| r.started_at),
            time_remaining_secs: shared.time_remaining(),
            generations: shared.generations.clone(),
            recent_backup: shared.recent_backup.clone(),
        }
    }

    /// Text shown when the user asks for the most recent backup.
    pub fn recent_report(&self) -> String {
        let shared = self.inner.lock();
        if shared.recent_backup.is_empty() {
            return "No recent backups were made.".to_string();
        }
        match (shared.state, shared.time_remaining()) {
            (RunState::Running, Some(left)) => {
                format!("{}\nTime left: {} seconds", shared.recent_backup, left)
            }
            _ => shared.recent_backup.clone(),
        }
    }
}

impl Shared {
    fn time_remaining(&self) -> Option<i64> {
        let run = self.run.as_ref()?;
        let started = run.started_at?;
        let elapsed = Utc::now().signed_duration_since(started).num_seconds();
        Some(run.profile.interval as i64 - elapsed)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self, suppress_no_active_message: bool) -> bool {
        let (incomplete, recent) = {
            let mut shared = self.lock();
            let active = match shared.run.as_ref() {
                Some(run) if shared.state == RunState::Running => {
                    run.cancel.cancel();
                    Some(run.folders_done != run.profile.folders.len())
                }
                _ => None,
            };
            let Some(incomplete) = active else {
                drop(shared);
                if !suppress_no_active_message {
                    self.notifier
                        .notify(Severity::Alert, "No active process to terminate", false);
                }
                return false;
            };
            shared.state = RunState::Cancelling;
            (incomplete, shared.recent_backup.clone())
        };

        if incomplete {
            self.notifier.notify(
                Severity::Error,
                "Process terminated before all folders could be backed up.",
                false,
            );
        }
        if !recent.is_empty() {
            if let Err(e) = self.run_log.log(recent.trim_end()) {
                self.notifier.notify(
                    Severity::Error,
                    &format!("Can not write to log file. {}", e),
                    true,
                );
            }
        }
        self.notifier.notify(Severity::Alert, "Process terminated.", false);
        true
    }

    fn report_failure(&self, name: &str, e: &anyhow::Error) {
        error!("Backup run for profile {} failed: {:#}", name, e);
        self.notifier
            .notify(Severity::Error, &format!("Unexpected error: {:#}", e), false);
        if let Err(log_err) = self.run_log.log(&format!("ERROR: {:#}", e)) {
            warn!("Failed to write run log: {}", log_err);
        }
    }

    fn finish_run(&self) {
        let mut shared = self.lock();
        shared.run = None;
        shared.state = RunState::Idle;
        debug!("Backup worker exited");
    }

    /// Resets per-pass bookkeeping at the start of a pass.
    fn begin_pass(&self, name: &str) {
        let mut shared = self.lock();
        if let Some(run) = shared.run.as_mut() {
            run.started_at = Some(Utc::now());
            run.folders_done = 0;
        }
        shared.generations.clear();
        shared.recent_backup = format!("Recent Backup created for profile: {}\n", name);
    }

    /// Marks `folders` source folders of the current pass as handled.
    fn count_folders(&self, folders: usize) {
        if let Some(run) = self.lock().run.as_mut() {
            run.folders_done += folders;
        }
    }

    fn record_generation(&self, generation: &Path) {
        let mut shared = self.lock();
        shared.generations.push(generation.to_path_buf());
        shared
            .recent_backup
            .push_str(&format!("Folder: {}\n", generation.display()));
    }
}

async fn run_loop(
    inner: Arc<Inner>,
    name: String,
    profile: ValidProfile,
    cancel: CancellationToken,
) -> Result<()> {
    match profile.method {
        Method::Rotate => {
            while !cancel.is_cancelled() {
                let last = backup_pass(&inner, &name, &profile, &cancel).await?;
                if profile.interval == 0 {
                    continue;
                }
                inner.notifier.notify(
                    Severity::Alert,
                    &format!("Backup: {}", display_last(last.as_deref())),
                    false,
                );

                let idle = profile.interval.saturating_sub(profile.warning_time);
                if !sleep_or_cancel(&cancel, Duration::from_secs(idle)).await {
                    break;
                }
                inner.notifier.notify(
                    Severity::Alert,
                    &format!(
                        "A backup is about to begin in {} seconds.",
                        profile.warning_time
                    ),
                    false,
                );
                if !sleep_or_cancel(&cancel, Duration::from_secs(profile.warning_time)).await {
                    break;
                }
            }
        }
        Method::Daily => {
            let last = backup_pass(&inner, &name, &profile, &cancel).await?;
            inner.notifier.notify(
                Severity::Alert,
                &format!("Backup: {}", display_last(last.as_deref())),
                false,
            );
            sleep_or_cancel(&cancel, inner.daily_exit_delay).await;
            inner.stop(true);
            inner.terminator.terminate();
        }
    }
    info!("Backup loop for profile {} ended", name);
    Ok(())
}

fn display_last(last: Option<&Path>) -> String {
    last.map(|p| p.display().to_string())
        .unwrap_or_default()
}

/// Waits for `duration` unless `cancel` fires first. Returns false if cancelled.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => !cancel.is_cancelled(),
    }
}

/// Writes one generation per source folder, or one archive for the whole
/// profile in compression mode. Returns the last generation written.
async fn backup_pass(
    inner: &Arc<Inner>,
    name: &str,
    profile: &ValidProfile,
    cancel: &CancellationToken,
) -> Result<Option<PathBuf>> {
    inner.begin_pass(name);

    if profile.compression {
        // An archive covers every folder once its write has begun
        inner.count_folders(profile.folders.len());
        let generation = write_rotated(
            profile.folders.clone(),
            profile.destination.clone(),
            name.to_string(),
            profile.copies,
            true,
        )
        .await?;
        inner.record_generation(&generation);
        return Ok(Some(generation));
    }

    let mut last = None;
    for folder in &profile.folders {
        if cancel.is_cancelled() {
            debug!("Pass for profile {} cancelled before {:?}", name, folder);
            break;
        }
        let source_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("Cannot back up {:?}: it has no folder name", folder))?;
        let generation = write_rotated(
            vec![folder.clone()],
            profile.destination.clone(),
            source_name,
            profile.copies,
            false,
        )
        .await?;
        inner.count_folders(1);
        inner.record_generation(&generation);
        last = Some(generation);
    }
    Ok(last)
}

/// Picks the rotation slot for `base_name` and writes the generation, off the
/// async runtime.
async fn write_rotated(
    sources: Vec<PathBuf>,
    destination: PathBuf,
    base_name: String,
    copies: u32,
    compress: bool,
) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let slot = next_slot(&destination, &base_name, copies)
            .with_context(|| format!("Failed to rotate generations of {}", base_name))?;
        let target = destination.join(generation_name(&base_name, slot));
        debug!("Writing generation {:?}", target);
        let written = write_generation(&sources, &target, compress)
            .with_context(|| format!("Failed to write {:?}", target))?;
        Ok(written)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<(Severity, String)>>);

    impl RecordingNotifier {
        fn messages(&self) -> Vec<(Severity, String)> {
            self.0.lock().unwrap().clone()
        }

        fn count(&self, message: &str) -> usize {
            self.messages().iter().filter(|(_, m)| m == message).count()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, severity: Severity, message: &str, _force: bool) {
            self.0.lock().unwrap().push((severity, message.to_string()));
        }
    }

    #[derive(Default)]
    struct MemoryLog(Mutex<Vec<String>>);

    impl RunLog for MemoryLog {
        fn log(&self, line: &str) -> io::Result<()> {
            self.0.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingTerminator(AtomicUsize);

    impl ProcessTerminator for CountingTerminator {
        fn terminate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        tmp: TempDir,
        scheduler: Scheduler,
        notifier: Arc<RecordingNotifier>,
        log: Arc<MemoryLog>,
        terminator: Arc<CountingTerminator>,
    }

    fn fixture() -> Fixture {
        let tmp = tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let log = Arc::new(MemoryLog::default());
        let terminator = Arc::new(CountingTerminator::default());
        let limits = Limits {
            min_copies: 1,
            max_copies: 8,
            min_interval: 1,
            max_interval: 10000,
            min_warning_time: 0,
        };
        let scheduler = Scheduler::with_exit_delay(
            limits,
            notifier.clone(),
            log.clone(),
            terminator.clone(),
            Duration::from_millis(100),
        );
        Fixture {
            tmp,
            scheduler,
            notifier,
            log,
            terminator,
        }
    }

    impl Fixture {
        fn profile(&self, folders: &[&str], interval: i64, warning: i64) -> Profile {
            let dest = self.tmp.path().join("dest");
            fs::create_dir_all(&dest).unwrap();
            let folders = folders
                .iter()
                .map(|f| {
                    let path = self.tmp.path().join(f);
                    fs::create_dir_all(&path).unwrap();
                    fs::write(path.join("data.txt"), f.as_bytes()).unwrap();
                    path.to_string_lossy().to_string()
                })
                .collect();
            Profile {
                folders,
                destination: dest.to_string_lossy().to_string(),
                interval: interval.into(),
                copies: 2.into(),
                method: "Rotate".to_string(),
                warning_time: warning.into(),
                compression: false,
            }
        }

        fn dest(&self) -> PathBuf {
            self.tmp.path().join("dest")
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_first_pass_writes_generations() {
        let f = fixture();
        let mut profile = f.profile(&["docs", "photos"], 60, 10);
        f.scheduler.start(&mut profile, "home").unwrap();

        let s = f.scheduler.clone();
        assert!(wait_until(|| s.status().generations.len() == 2, Duration::from_secs(5)).await);

        let status = f.scheduler.status();
        assert_eq!(status.state, RunState::Running);
        assert_eq!(status.profile.as_deref(), Some("home"));
        assert!(status.recent_backup.starts_with("Recent Backup created for profile: home\n"));
        assert!(f.dest().join("docs_0/data.txt").exists());
        assert!(f.dest().join("photos_0/data.txt").exists());

        let left = f.scheduler.time_remaining().unwrap();
        assert!((55..=60).contains(&left), "unexpected time left {}", left);
        assert!(f.scheduler.recent_report().contains("Time left:"));

        assert!(f.scheduler.stop(false));
    }

    #[tokio::test]
    async fn test_start_rejects_concurrent_run() {
        let f = fixture();
        let mut profile = f.profile(&["docs"], 60, 10);
        f.scheduler.start(&mut profile, "home").unwrap();

        let mut again = profile.clone();
        let err = f.scheduler.start(&mut again, "home").unwrap_err();
        assert!(matches!(err, SchedulerError::ConcurrentRun));
        assert_eq!(
            f.notifier
                .count("Cannot start backup. There is an active process."),
            1
        );
        f.scheduler.stop(true);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_profile() {
        let f = fixture();
        let mut profile = f.profile(&["docs"], 60, 10);
        profile.method = "Hourly".to_string();
        let err = f.scheduler.start(&mut profile, "home").unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        assert_eq!(f.scheduler.state(), RunState::Idle);
        assert_eq!(f.notifier.count("Backup Method does not exist."), 1);
    }

    #[tokio::test]
    async fn test_stop_wakes_sleeping_run() {
        let f = fixture();
        let mut profile = f.profile(&["docs"], 3600, 10);
        f.scheduler.start(&mut profile, "home").unwrap();

        let s = f.scheduler.clone();
        assert!(wait_until(|| !s.status().generations.is_empty(), Duration::from_secs(5)).await);

        assert!(f.scheduler.stop(false));
        let s = f.scheduler.clone();
        assert!(
            wait_until(|| s.state() == RunState::Idle, Duration::from_secs(1)).await,
            "run loop did not observe cancellation"
        );
        assert_eq!(f.scheduler.time_remaining(), None);
        assert_eq!(f.notifier.count("Process terminated."), 1);
        assert_eq!(
            f.notifier
                .count("Process terminated before all folders could be backed up."),
            0
        );

        let log = f.log.0.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("docs_0"));
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let f = fixture();
        assert!(!f.scheduler.stop(false));
        assert_eq!(f.notifier.messages().len(), 1);
        assert_eq!(f.notifier.count("No active process to terminate"), 1);
        assert_eq!(f.scheduler.state(), RunState::Idle);

        assert!(!f.scheduler.stop(true));
        assert_eq!(f.notifier.messages().len(), 1);
        assert_eq!(f.scheduler.recent_report(), "No recent backups were made.");
    }

    #[tokio::test]
    async fn test_rotation_across_passes() {
        let f = fixture();
        let mut profile = f.profile(&["docs"], 1, 0);
        f.scheduler.start(&mut profile, "home").unwrap();

        // Passes at roughly 0s, 1s, 2s, 3s
        tokio::time::sleep(Duration::from_millis(3500)).await;
        f.scheduler.stop(true);
        let s = f.scheduler.clone();
        assert!(wait_until(|| s.state() == RunState::Idle, Duration::from_secs(2)).await);

        let mut names: Vec<String> = fs::read_dir(f.dest())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["docs_0", "docs_1"]);
        assert!(f
            .notifier
            .messages()
            .iter()
            .any(|(_, m)| m == "A backup is about to begin in 0 seconds."));
    }

    #[tokio::test]
    async fn test_compression_writes_one_archive() {
        let f = fixture();
        let mut profile = f.profile(&["docs", "photos"], 60, 10);
        profile.compression = true;
        f.scheduler.start(&mut profile, "home").unwrap();

        let s = f.scheduler.clone();
        assert!(wait_until(|| !s.status().generations.is_empty(), Duration::from_secs(5)).await);
        f.scheduler.stop(true);

        assert!(f.dest().join("home_0.zip").is_file());
        assert!(!f.dest().join("docs_0").exists());
        assert_eq!(
            f.notifier
                .count("Process terminated before all folders could be backed up."),
            0
        );
    }

    #[tokio::test]
    async fn test_stop_during_archive_write_is_complete() {
        use std::ffi::CString;
        use std::io::Read;
        use std::os::unix::ffi::OsStrExt;

        let f = fixture();
        let mut profile = f.profile(&["docs", "photos"], 60, 10);
        profile.compression = true;
        profile.copies = 3.into();

        // The archive for slot 2 is a FIFO, so creating it blocks until it is opened for reading
        fs::write(f.dest().join("home_0.zip"), b"old").unwrap();
        let fifo = f.dest().join("home_2.zip");
        let c_path = CString::new(fifo.as_os_str().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) }, 0);

        f.scheduler.start(&mut profile, "home").unwrap();
        let s = f.scheduler.clone();
        assert!(
            wait_until(
                || s.status().last_run_started_at.is_some(),
                Duration::from_secs(5)
            )
            .await
        );

        assert!(f.scheduler.stop(false));
        assert_eq!(
            f.notifier
                .count("Process terminated before all folders could be backed up."),
            0
        );
        assert_eq!(f.notifier.count("Process terminated."), 1);

        // Opening the read end releases the blocked writer
        tokio::task::spawn_blocking(move || {
            let mut bytes = Vec::new();
            fs::File::open(&fifo).unwrap().read_to_end(&mut bytes).unwrap();
        })
        .await
        .unwrap();

        let s = f.scheduler.clone();
        assert!(wait_until(|| s.state() == RunState::Idle, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_daily_runs_once_and_terminates() {
        let f = fixture();
        let mut profile = f.profile(&["docs"], 60, 10);
        profile.method = "Daily".to_string();
        f.scheduler.start(&mut profile, "nightly").unwrap();

        let terminator = f.terminator.clone();
        assert!(
            wait_until(
                || terminator.0.load(Ordering::SeqCst) == 1,
                Duration::from_secs(5)
            )
            .await
        );
        let s = f.scheduler.clone();
        assert!(wait_until(|| s.state() == RunState::Idle, Duration::from_secs(1)).await);

        assert!(f.dest().join("docs_0").is_dir());
        assert!(!f.dest().join("docs_1").exists());
        assert_eq!(f.notifier.count("Process terminated."), 1);
        assert_eq!(f.log.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_run_returns_to_idle() {
        let f = fixture();
        let mut profile = f.profile(&["docs"], 60, 10);
        // A directory squatting where the next copy wants to write a file
        fs::create_dir_all(f.dest().join("docs_1/data.txt")).unwrap();
        f.scheduler.start(&mut profile, "home").unwrap();

        let s = f.scheduler.clone();
        assert!(wait_until(|| s.state() == RunState::Idle, Duration::from_secs(5)).await);
        assert!(f
            .notifier
            .messages()
            .iter()
            .any(|(sev, m)| *sev == Severity::Error && m.starts_with("Unexpected error:")));
        assert!(f
            .log
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|l| l.starts_with("ERROR:")));
    }
}
