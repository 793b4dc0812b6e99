use crate::run_log::RunLog;
use autobackup_lib::config::{LocalSettings, NotifyLevel};
use autobackup_lib::types::Severity;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Delivers user-facing messages.
pub trait Notifier: Send + Sync {
    /// Shows `message` if the user's settings allow it. `force` bypasses
    /// the mute switch and the level filter.
    fn notify(&self, severity: Severity, message: &str, force: bool);

    /// Turns non-forced notifications on or off.
    fn set_enabled(&self, _enabled: bool) {}
}

/// Desktop notifications via the freedesktop notification service.
pub struct DesktopNotifier {
    enabled: AtomicBool,
    level: NotifyLevel,
    /// When set, every notification is also written to the run log.
    debug: bool,
    run_log: Arc<dyn RunLog>,
}

impl DesktopNotifier {
    pub fn new(settings: &LocalSettings, run_log: Arc<dyn RunLog>) -> Self {
        Self {
            enabled: AtomicBool::new(settings.do_notifications),
            level: settings.notify_level,
            debug: settings.debug,
            run_log,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Whether a notification reaches the desktop.
    pub fn should_show(&self, severity: Severity, force: bool) -> bool {
        force || (self.enabled() && self.level.allows(severity))
    }

    fn show(&self, severity: Severity, message: &str) {
        let icon = match severity {
            Severity::Error => "dialog-error",
            Severity::Alert => "dialog-warning",
            Severity::Info => "dialog-information",
        };
        if let Err(e) = notify_rust::Notification::new()
            .summary(&format!("Automatic Backup {}", severity))
            .body(message)
            .icon(icon)
            .show()
        {
            warn!("Failed to show desktop notification: {}", e);
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, severity: Severity, message: &str, force: bool) {
        match severity {
            Severity::Error => error!("{}", message),
            Severity::Alert | Severity::Info => info!("{}", message),
        }

        if self.debug {
            if let Err(e) = self.run_log.log(&format!("{} {}", severity, message)) {
                warn!("Failed to write notification to run log: {}", e);
            }
        }

        if self.should_show(severity, force) {
            self.show(severity, message);
        }
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}
