use anyhow::anyhow;
use autobackup_lib::ipc::{Request, Response, ResponseData};
use autobackup_lib::menu::MenuEntry;
use autobackup_lib::paths;
use autobackup_lib::profile::{JsonProfileStore, NumberField, Profile, ProfileStore, Profiles};
use autobackup_lib::types::{RunState, SchedulerStatus};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Show results in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the backup loop for a profile
    Start {
        /// Name of the profile to run
        profile: String,
    },
    /// Stop the active backup run
    Stop,
    /// Show the scheduler state and the next pass
    Status,
    /// Show the most recent backup summary
    Recent,
    /// List all saved profiles
    List,
    /// Save a profile (replaces an existing profile with the same name)
    Add {
        /// Profile name
        name: String,
        /// Folder to back up (repeatable)
        #[arg(long = "folder", required = true)]
        folders: Vec<String>,
        /// Folder receiving the generations
        #[arg(long)]
        destination: String,
        /// Seconds between passes
        #[arg(long, default_value = "3600")]
        interval: i64,
        /// Generations kept per folder
        #[arg(long, default_value = "3")]
        copies: i64,
        /// Rotate or Daily
        #[arg(long, default_value = "Rotate")]
        method: String,
        /// Seconds of notice before a pass
        #[arg(long, default_value = "60")]
        warning_time: i64,
        /// Write one zip archive per pass
        #[arg(long)]
        compress: bool,
    },
    /// Re-read the profile file in the daemon
    Reload,
    /// Show the tray menu entries
    Menu,
    /// Toggle desktop notifications
    Alerts,
    /// Set or clear the profile started with the daemon
    Autostart {
        /// Profile to start automatically
        #[arg(required_unless_present = "disable", conflicts_with = "disable")]
        profile: Option<String>,
        /// Turn autostart off
        #[arg(long)]
        disable: bool,
    },
    /// Stop the daemon
    Shutdown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let json = cli.json;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Start { profile } => {
            handle_start(profile, json, quiet).await?;
        }
        Commands::Stop => {
            handle_stop(json, quiet).await?;
        }
        Commands::Status => {
            handle_status(json, quiet).await?;
        }
        Commands::Recent => {
            handle_recent(json, quiet).await?;
        }
        Commands::List => {
            handle_list(json, quiet)?;
        }
        Commands::Add {
            name,
            folders,
            destination,
            interval,
            copies,
            method,
            warning_time,
            compress,
        } => {
            let profile = Profile {
                folders,
                destination,
                interval: interval.into(),
                copies: copies.into(),
                method,
                warning_time: warning_time.into(),
                compression: compress,
            };
            handle_add(name, profile, json, quiet).await?;
        }
        Commands::Reload => {
            handle_reload(json, quiet).await?;
        }
        Commands::Menu => {
            handle_menu(json, quiet).await?;
        }
        Commands::Alerts => {
            handle_alerts(json, quiet).await?;
        }
        Commands::Autostart { profile, disable } => {
            let profile = if disable { None } else { profile };
            handle_autostart(profile, json, quiet).await?;
        }
        Commands::Shutdown => {
            handle_shutdown(json, quiet).await?;
        }
    }

    Ok(())
}

/// Sends one request and exits with status 1 on a daemon error.
async fn call(request: Request) -> anyhow::Result<Option<ResponseData>> {
    let mut stream = connect_to_daemon().await?;
    let mut reader = BufReader::new(&mut stream);
    send_request(reader.get_mut(), request).await?;

    match receive_response(&mut reader).await? {
        Response::Ok(data) => Ok(data),
        Response::Error { code, message } => {
            eprintln!("Error from daemon ({}): {}", code, message);
            std::process::exit(1);
        }
        Response::Pong => Err(anyhow!("Unexpected Pong response")),
    }
}

async fn handle_start(profile: String, json: bool, quiet: bool) -> anyhow::Result<()> {
    call(Request::Start {
        profile: profile.clone(),
    })
    .await?;
    if json {
        println!("{}", serde_json::json!({ "status": "started", "profile": profile }));
    } else if !quiet {
        println!("Backup started for profile '{}'.", profile);
    }
    Ok(())
}

async fn handle_stop(json: bool, quiet: bool) -> anyhow::Result<()> {
    match call(Request::Stop).await? {
        Some(ResponseData::Stopped { was_running }) => {
            if json {
                println!("{}", serde_json::json!({ "was_running": was_running }));
            } else if !quiet {
                if was_running {
                    println!("Process terminated.");
                } else {
                    println!("No active process to terminate");
                }
            }
        }
        _ => println!("Unexpected response from daemon."),
    }
    Ok(())
}

async fn handle_status(json: bool, quiet: bool) -> anyhow::Result<()> {
    match call(Request::Status).await? {
        Some(ResponseData::Status { status }) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else if !quiet {
                display_status(&status);
            }
        }
        _ => println!("Unexpected response from daemon."),
    }
    Ok(())
}

async fn handle_recent(json: bool, quiet: bool) -> anyhow::Result<()> {
    match call(Request::Recent).await? {
        Some(ResponseData::Recent { text }) => {
            if json {
                println!("{}", serde_json::json!({ "recent": text }));
            } else if !quiet {
                println!("{}", text.trim_end());
            }
        }
        _ => println!("Unexpected response from daemon."),
    }
    Ok(())
}

fn handle_list(json: bool, quiet: bool) -> anyhow::Result<()> {
    let store = JsonProfileStore::new(paths::profiles_path());
    let profiles = match store.load_all() {
        Ok(profiles) => profiles,
        Err(e) => {
            eprintln!("Error loading profiles from {:?}: {}", store.path(), e);
            std::process::exit(2);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
    } else if !quiet {
        display_profiles(&profiles);
    }
    Ok(())
}

async fn handle_add(name: String, profile: Profile, json: bool, quiet: bool) -> anyhow::Result<()> {
    call(Request::SaveProfile {
        name: name.clone(),
        profile,
    })
    .await?;
    if json {
        println!("{}", serde_json::json!({ "status": "saved", "profile": name }));
    } else if !quiet {
        println!("Profile has been saved.");
    }
    Ok(())
}

async fn handle_reload(json: bool, quiet: bool) -> anyhow::Result<()> {
    match call(Request::ReloadProfiles).await? {
        Some(ResponseData::Profiles { profiles }) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "status": "success", "profiles": profiles.len() })
                );
            } else if !quiet {
                println!("Reload successful. {} profile(s) loaded.", profiles.len());
            }
        }
        _ => println!("Unexpected response from daemon."),
    }
    Ok(())
}

async fn handle_menu(json: bool, quiet: bool) -> anyhow::Result<()> {
    match call(Request::Menu).await? {
        Some(ResponseData::Menu { entries }) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if !quiet {
                for entry in &entries {
                    println!("{}", format_menu_entry(entry));
                }
            }
        }
        _ => println!("Unexpected response from daemon."),
    }
    Ok(())
}

async fn handle_alerts(json: bool, quiet: bool) -> anyhow::Result<()> {
    match call(Request::ToggleAlerts).await? {
        Some(ResponseData::Alerts { enabled }) => {
            if json {
                println!("{}", serde_json::json!({ "alerts": enabled }));
            } else if !quiet {
                println!("Alerts {}.", if enabled { "enabled" } else { "disabled" });
            }
        }
        _ => println!("Unexpected response from daemon."),
    }
    Ok(())
}

async fn handle_autostart(profile: Option<String>, json: bool, quiet: bool) -> anyhow::Result<()> {
    match call(Request::SetAutostart { profile }).await? {
        Some(ResponseData::Autostart { profile }) => {
            if json {
                println!("{}", serde_json::json!({ "autostart": profile }));
            } else if !quiet {
                match profile {
                    Some(name) => println!("Autostart set to profile '{}'.", name),
                    None => println!("Autostart disabled."),
                }
            }
        }
        _ => println!("Unexpected response from daemon."),
    }
    Ok(())
}

async fn handle_shutdown(json: bool, quiet: bool) -> anyhow::Result<()> {
    call(Request::Shutdown).await?;
    if json {
        println!("{}", serde_json::json!({ "status": "success" }));
    } else if !quiet {
        println!("Daemon is shutting down.");
    }
    Ok(())
}

async fn connect_to_daemon() -> anyhow::Result<UnixStream> {
    let socket_path = paths::socket_path();
    UnixStream::connect(&socket_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound
            || e.kind() == std::io::ErrorKind::ConnectionRefused
        {
            eprintln!("Error: Daemon is not running.");
            std::process::exit(3);
        }
        anyhow!("Failed to connect to daemon: {}", e)
    })
}

async fn send_request(stream: &mut UnixStream, request: Request) -> anyhow::Result<()> {
    let json = serde_json::to_string(&request)?;
    stream.write_all(json.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    Ok(())
}

async fn receive_response<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> anyhow::Result<Response> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.is_empty() {
        return Err(anyhow!("Connection closed by daemon"));
    }
    let response: Response = serde_json::from_str(&line)?;
    Ok(response)
}

fn display_status(status: &SchedulerStatus) {
    let state_str = match status.state {
        RunState::Idle => "Idle",
        RunState::Running => "Running",
        RunState::Cancelling => "Stopping",
    };
    let profile_str = status.profile.as_deref().unwrap_or("-");
    let last_str = status
        .last_run_started_at
        .map(|at| format_human_duration(Utc::now().signed_duration_since(at)))
        .unwrap_or_else(|| "Never".to_string());
    let next_str = status
        .time_remaining_secs
        .map(format_remaining)
        .unwrap_or_else(|| "-".to_string());

    println!(
        "{:<10} {:<15} {:<20} {:<15}",
        "STATE", "PROFILE", "LAST PASS", "NEXT PASS"
    );
    println!("{}", "-".repeat(60));
    println!(
        "{:<10} {:<15} {:<20} {:<15}",
        state_str, profile_str, last_str, next_str
    );

    if !status.generations.is_empty() {
        println!();
        for generation in &status.generations {
            println!("  {}", generation.display());
        }
    }
}

fn display_profiles(profiles: &Profiles) {
    if profiles.is_empty() {
        println!("No profiles configured.");
        return;
    }

    println!(
        "{:<15} {:<8} {:<10} {:<7} {:<30} {:<30}",
        "NAME", "METHOD", "INTERVAL", "COPIES", "FOLDERS", "DESTINATION"
    );
    println!("{}", "-".repeat(105));

    for (name, profile) in profiles {
        let folders_str = match profile.folders.as_slice() {
            [] => "None".to_string(),
            [first] => first.clone(),
            [first, rest @ ..] => format!("{} (+{} more)", first, rest.len()),
        };
        println!(
            "{:<15} {:<8} {:<10} {:<7} {:<30} {:<30}",
            name,
            profile.method,
            format_field(&profile.interval),
            format_field(&profile.copies),
            folders_str,
            profile.destination
        );
    }
}

fn format_field(field: &NumberField) -> String {
    match field {
        NumberField::Number(n) => n.to_string(),
        NumberField::Text(s) => s.clone(),
    }
}

fn format_menu_entry(entry: &MenuEntry) -> String {
    match entry.checked {
        Some(true) => format!("[x] {}", entry.label),
        Some(false) => format!("[ ] {}", entry.label),
        None => format!("    {}", entry.label),
    }
}

/// Formats the seconds until the next pass as a short countdown.
fn format_remaining(secs: i64) -> String {
    if secs <= 0 {
        return "due".to_string();
    }
    let (hours, mins, secs) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("in {}h {}m", hours, mins)
    } else if mins > 0 {
        format!("in {}m {}s", mins, secs)
    } else {
        format!("in {}s", secs)
    }
}

/// Formats a chrono Duration into a human-readable relative time string.
/// Handles negative durations gracefully by showing "just now".
fn format_human_duration(duration: Duration) -> String {
    let secs = duration.num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }
    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        if mins == 1 {
            "1 min ago".to_string()
        } else {
            format!("{} mins ago", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        if hours == 1 {
            "1 hour ago".to_string()
        } else {
            format!("{} hours ago", hours)
        }
    } else {
        let days = secs / 86400;
        if days == 1 {
            "1 day ago".to_string()
        } else {
            format!("{} days ago", days)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobackup_lib::menu::tray_menu;

    #[test]
    fn test_format_human_duration() {
        assert_eq!(format_human_duration(Duration::seconds(30)), "30s ago");
        assert_eq!(format_human_duration(Duration::seconds(61)), "1 min ago");
        assert_eq!(
            format_human_duration(Duration::seconds(7200)),
            "2 hours ago"
        );
        assert_eq!(format_human_duration(Duration::seconds(86400)), "1 day ago");
    }

    #[test]
    fn test_format_human_duration_negative() {
        // Clock skew shows "just now"
        assert_eq!(format_human_duration(Duration::seconds(-1)), "just now");
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(-5), "due");
        assert_eq!(format_remaining(0), "due");
        assert_eq!(format_remaining(42), "in 42s");
        assert_eq!(format_remaining(125), "in 2m 5s");
        assert_eq!(format_remaining(3 * 3600 + 120), "in 3h 2m");
    }

    #[test]
    fn test_format_menu_entry() {
        let menu = tray_menu(["docs"], false);
        assert_eq!(format_menu_entry(&menu[0]), "    Show Recent");
        assert_eq!(format_menu_entry(&menu[1]), "[ ] Show Alerts");
        assert_eq!(format_menu_entry(&menu[3]), "    Start docs");
    }

    #[test]
    fn test_format_field_keeps_raw_text() {
        assert_eq!(format_field(&NumberField::Number(60)), "60");
        assert_eq!(format_field(&"soon".into()), "soon");
    }

    #[test]
    fn test_autostart_args() {
        let cli = Cli::try_parse_from(["autobackup", "autostart", "--disable"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Autostart {
                profile: None,
                disable: true
            }
        ));
        assert!(Cli::try_parse_from(["autobackup", "autostart"]).is_err());
        assert!(Cli::try_parse_from(["autobackup", "autostart", "docs", "--disable"]).is_err());
    }
}
