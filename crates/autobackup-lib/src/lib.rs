//! Shared library for autobackup.
//! Includes settings, the profile model and validator, the rotation engine
//! (retention index, rotation policy, archive writer) and IPC message types.

pub mod archive;
pub mod config;
pub mod ipc;
pub mod menu;
pub mod paths;
pub mod profile;
pub mod retention;
pub mod rotation;
pub mod types;
