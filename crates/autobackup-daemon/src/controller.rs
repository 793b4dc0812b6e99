use crate::notifier::Notifier;
use crate::run_log::RunLog;
use crate::scheduler::{Scheduler, SchedulerError, ShutdownTerminator};
use autobackup_lib::config::{save_settings_to, Settings};
use autobackup_lib::ipc::{error_codes, Request, Response, ResponseData};
use autobackup_lib::menu::tray_menu;
use autobackup_lib::profile::{validate, Profile, ProfileStore, Profiles};
use autobackup_lib::types::Severity;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Routes client requests to the scheduler, the profile store and the
/// settings file.
pub struct Controller {
    settings: Mutex<Settings>,
    settings_path: PathBuf,
    store: Arc<dyn ProfileStore>,
    profiles: Mutex<Profiles>,
    scheduler: Scheduler,
    notifier: Arc<dyn Notifier>,
    shutdown: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn error_response(code: &str, message: impl Into<String>) -> Response {
    Response::Error {
        code: code.to_string(),
        message: message.into(),
    }
}

impl Controller {
    /// Builds a controller whose one-shot runs end by cancelling `shutdown`.
    pub fn new(
        settings: Settings,
        settings_path: PathBuf,
        store: Arc<dyn ProfileStore>,
        notifier: Arc<dyn Notifier>,
        run_log: Arc<dyn RunLog>,
        shutdown: CancellationToken,
    ) -> Self {
        let scheduler = Scheduler::new(
            settings.limits(),
            notifier.clone(),
            run_log,
            Arc::new(ShutdownTerminator(shutdown.clone())),
        );
        Self::with_scheduler(settings, settings_path, store, notifier, scheduler, shutdown)
    }

    pub fn with_scheduler(
        settings: Settings,
        settings_path: PathBuf,
        store: Arc<dyn ProfileStore>,
        notifier: Arc<dyn Notifier>,
        scheduler: Scheduler,
        shutdown: CancellationToken,
    ) -> Self {
        let profiles = match store.load_all() {
            Ok(profiles) => profiles,
            Err(e) => {
                error!("Failed to load profiles: {}", e);
                notifier.notify(Severity::Error, &format!("Profiles could not be loaded. {}", e), false);
                Profiles::new()
            }
        };
        Self {
            settings: Mutex::new(settings),
            settings_path,
            store,
            profiles: Mutex::new(profiles),
            scheduler,
            notifier,
            shutdown,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Starts the autostart profile, if one is configured.
    pub fn autostart(&self) {
        let autostart = lock(&self.settings).autostart.clone();
        if !autostart.enabled {
            return;
        }
        self.notifier.notify(
            Severity::Alert,
            &format!("Autostart has been activated for profile: {}", autostart.profile),
            true,
        );
        if let Err(response) = self.start_profile(&autostart.profile) {
            error!("Autostart failed: {:?}", response);
        }
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,
            Request::Status => Response::Ok(Some(ResponseData::Status {
                status: self.scheduler.status(),
            })),
            Request::Start { profile } => match self.start_profile(&profile) {
                Ok(()) => Response::Ok(Some(ResponseData::Started { profile })),
                Err(response) => response,
            },
            Request::Stop => Response::Ok(Some(ResponseData::Stopped {
                was_running: self.scheduler.stop(false),
            })),
            Request::Recent => {
                let text = self.scheduler.recent_report();
                self.notifier.notify(Severity::Info, &text, true);
                Response::Ok(Some(ResponseData::Recent { text }))
            }
            Request::Profiles => Response::Ok(Some(ResponseData::Profiles {
                profiles: lock(&self.profiles).clone(),
            })),
            Request::SaveProfile { name, profile } => self.save_profile(&name, profile),
            Request::ReloadProfiles => self.reload_profiles(),
            Request::Menu => {
                let alerts_on = lock(&self.settings).local.do_notifications;
                let profiles = lock(&self.profiles);
                Response::Ok(Some(ResponseData::Menu {
                    entries: tray_menu(profiles.keys().map(String::as_str), alerts_on),
                }))
            }
            Request::ToggleAlerts => self.toggle_alerts(),
            Request::SetAutostart { profile } => self.set_autostart(profile),
            Request::Shutdown => {
                info!("Shutdown requested via IPC");
                self.scheduler.stop(true);
                self.shutdown.cancel();
                Response::Ok(None)
            }
        }
    }

    fn start_profile(&self, name: &str) -> Result<(), Response> {
        let Some(mut profile) = lock(&self.profiles).get(name).cloned() else {
            self.notifier
                .notify(Severity::Error, &format!("Profile {} does not exist.", name), false);
            return Err(error_response(
                error_codes::UNKNOWN_PROFILE,
                format!("Unknown profile: {}", name),
            ));
        };
        self.scheduler
            .start(&mut profile, name)
            .map_err(|e| match e {
                SchedulerError::ConcurrentRun => {
                    error_response(error_codes::ALREADY_RUNNING, e.to_string())
                }
                SchedulerError::Validation(_) => {
                    error_response(error_codes::INVALID_PROFILE, e.to_string())
                }
            })
    }

    fn save_profile(&self, name: &str, mut profile: Profile) -> Response {
        if name.is_empty() {
            self.notifier.notify(Severity::Error, "No Profile Name set.", false);
            return error_response(error_codes::INVALID_PROFILE, "No Profile Name set.");
        }
        let limits = lock(&self.settings).limits();
        if let Err(e) = validate(&mut profile, &limits) {
            self.notifier.notify(Severity::Error, &e.to_string(), false);
            return error_response(error_codes::INVALID_PROFILE, e.to_string());
        }

        match self.store.upsert(name, profile) {
            Ok(profiles) => {
                *lock(&self.profiles) = profiles.clone();
                self.notifier.notify(Severity::Info, "Profile has been saved.", false);
                Response::Ok(Some(ResponseData::Profiles { profiles }))
            }
            Err(e) => {
                error!("Failed to save profile {}: {}", name, e);
                self.notifier
                    .notify(Severity::Error, "Profile could not be saved.", false);
                error_response(error_codes::STORE_ERROR, e.to_string())
            }
        }
    }

    fn reload_profiles(&self) -> Response {
        match self.store.load_all() {
            Ok(profiles) => {
                *lock(&self.profiles) = profiles.clone();
                self.notifier.notify(Severity::Info, "Reload successful.", false);
                Response::Ok(Some(ResponseData::Profiles { profiles }))
            }
            Err(e) => {
                self.notifier.notify(
                    Severity::Error,
                    &format!("Profiles could not be loaded. {}", e),
                    false,
                );
                error_response(error_codes::STORE_ERROR, e.to_string())
            }
        }
    }

    fn toggle_alerts(&self) -> Response {
        let enabled = {
            let mut settings = lock(&self.settings);
            settings.local.do_notifications = !settings.local.do_notifications;
            settings.local.do_notifications
        };
        self.notifier.set_enabled(enabled);
        match self.persist_settings() {
            Ok(()) => Response::Ok(Some(ResponseData::Alerts { enabled })),
            Err(response) => response,
        }
    }

    fn set_autostart(&self, profile: Option<String>) -> Response {
        if let Some(ref name) = profile {
            if !lock(&self.profiles).contains_key(name) {
                return error_response(
                    error_codes::UNKNOWN_PROFILE,
                    format!("Unknown profile: {}", name),
                );
            }
        }
        {
            let mut settings = lock(&self.settings);
            settings.autostart.enabled = profile.is_some();
            settings.autostart.profile = profile.clone().unwrap_or_default();
        }
        match self.persist_settings() {
            Ok(()) => Response::Ok(Some(ResponseData::Autostart { profile })),
            Err(response) => response,
        }
    }

    fn persist_settings(&self) -> Result<(), Response> {
        let settings = lock(&self.settings).clone();
        match save_settings_to(&settings, &self.settings_path) {
            Ok(()) => {
                self.notifier.notify(Severity::Info, "Config has been updated.", false);
                Ok(())
            }
            Err(e) => {
                error!("Failed to write settings: {}", e);
                self.notifier
                    .notify(Severity::Error, "Config could not be updated.", false);
                Err(error_response(error_codes::CONFIG_ERROR, e.to_string()))
            }
        }
    }
}
