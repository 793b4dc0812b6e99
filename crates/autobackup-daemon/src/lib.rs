//! Background side of autobackup: the run scheduler and the collaborators it
//! reports through.

pub mod controller;
pub mod notifier;
pub mod run_log;
pub mod scheduler;
