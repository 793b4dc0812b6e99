use anyhow::{Context, Result};
use autobackup_daemon::controller::Controller;
use autobackup_daemon::notifier::{DesktopNotifier, Notifier};
use autobackup_daemon::run_log::FileRunLog;
use autobackup_lib::config::{load_settings, settings_path};
use autobackup_lib::ipc::{error_codes, Request, Response};
use autobackup_lib::paths;
use autobackup_lib::profile::JsonProfileStore;
use autobackup_lib::types::Severity;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

struct Daemon {
    pid_path: PathBuf,
    socket_path: PathBuf,
    shutdown: CancellationToken,
}

impl Daemon {
    fn new(shutdown: CancellationToken) -> Self {
        Self {
            pid_path: paths::pid_path(),
            socket_path: paths::socket_path(),
            shutdown,
        }
    }

    fn create_pid_file(&self) -> Result<()> {
        if self.pid_path.exists() {
            let old_pid = fs::read_to_string(&self.pid_path)?;
            if let Ok(pid) = old_pid.trim().parse::<i32>() {
                // Signal 0 only checks that the process exists
                if unsafe { libc::kill(pid, 0) } == 0 {
                    anyhow::bail!("Daemon is already running with PID {}", pid);
                } else {
                    warn!("Stale PID file found (PID {}), removing...", pid);
                    let _ = fs::remove_file(&self.pid_path);
                }
            }
        }

        if let Some(parent) = self.pid_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.pid_path, std::process::id().to_string())
            .context("Failed to write PID file")?;
        Ok(())
    }

    fn cleanup(&self) {
        // Only cleanup if the PID file contains our PID
        if let Ok(content) = fs::read_to_string(&self.pid_path) {
            if content.trim() == std::process::id().to_string() {
                info!("Cleaning up PID and socket files...");
                let _ = fs::remove_file(&self.pid_path);
                let _ = fs::remove_file(&self.socket_path);
            }
        }
    }

    async fn run(&self, controller: Arc<Controller>) -> Result<()> {
        self.create_pid_file()?;

        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).context("Failed to bind Unix socket")?;
        info!("Daemon listening on {:?}", self.socket_path);

        controller.autostart();

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        loop {
            tokio::select! {
                accept_res = listener.accept() => {
                    match accept_res {
                        Ok((stream, _)) => {
                            let controller = controller.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, controller).await {
                                    error!("Error handling client: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down...");
                    break;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, exiting...");
                    break;
                }
            }
        }

        controller.scheduler().stop(true);
        Ok(())
    }
}

async fn handle_client(mut stream: UnixStream, controller: Arc<Controller>) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => controller.handle(request),
            Err(e) => Response::Error {
                code: error_codes::INVALID_REQUEST.into(),
                message: format!("Failed to parse JSON: {}", e),
            },
        };
        line.clear();

        let json = serde_json::to_string(&response)? + "\n";
        writer.write_all(json.as_bytes()).await?;
    }

    Ok(())
}

/// Logs to stderr and to a daily rolling file under the data directory.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = paths::log_dir();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
    let appender = tracing_appender::rolling::daily(&log_dir, "autobackup-daemon.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_tracing()?;

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings from {:?}: {}", settings_path(), e);
            return Err(e).context("Invalid settings");
        }
    };

    let run_log = Arc::new(FileRunLog::new(paths::run_log_path()));
    let notifier = Arc::new(DesktopNotifier::new(&settings.local, run_log.clone()));
    let store = Arc::new(JsonProfileStore::new(paths::profiles_path()));
    let shutdown = CancellationToken::new();
    let silent_start = settings.local.silent_start;
    let startup_notifier = notifier.clone();

    let controller = Arc::new(Controller::new(
        settings,
        settings_path(),
        store,
        notifier,
        run_log,
        shutdown.clone(),
    ));
    info!("autobackup daemon starting");
    if !silent_start {
        startup_notifier.notify(Severity::Info, "Automatic Backup is running.", false);
    }

    let daemon = Daemon::new(shutdown);
    let res = daemon.run(controller).await;
    daemon.cleanup();
    res
}
