use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;

struct TestEnv {
    temp_dir: TempDir,
    daemon: Child,
}

fn workspace_bin(name: &str) -> PathBuf {
    let workspace_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf();
    let path = workspace_root.join("target/debug").join(name);
    if path.exists() {
        path
    } else {
        PathBuf::from(name)
    }
}

impl TestEnv {
    async fn setup() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let config_dir = temp_dir.path().join("config");
        let runtime_dir = temp_dir.path().join("runtime");
        fs::create_dir_all(config_dir.join("autobackup"))?;
        fs::create_dir_all(temp_dir.path().join("data"))?;
        fs::create_dir_all(&runtime_dir)?;
        fs::create_dir_all(temp_dir.path().join("source/docs"))?;
        fs::create_dir_all(temp_dir.path().join("target"))?;
        fs::write(temp_dir.path().join("source/docs/a.txt"), "hello world")?;
        fs::write(
            config_dir.join("autobackup/config.toml"),
            "[local]\ndo_notifications = false\nsilent_start = true\n",
        )?;

        let daemon = Command::new(workspace_bin("autobackup-daemon"))
            .env("XDG_CONFIG_HOME", &config_dir)
            .env("XDG_DATA_HOME", temp_dir.path().join("data"))
            .env("XDG_RUNTIME_DIR", &runtime_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let socket_path = runtime_dir.join("autobackup.sock");
        let mut attempts = 0;
        while !socket_path.exists() && attempts < 50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            attempts += 1;
        }
        assert!(
            socket_path.exists(),
            "Daemon failed to start or create socket"
        );

        Ok(Self { temp_dir, daemon })
    }

    fn path(&self, rel: &str) -> String {
        self.temp_dir.path().join(rel).display().to_string()
    }

    fn run_cli(&self, args: &[&str]) -> Result<(bool, String, String)> {
        let output = Command::new(workspace_bin("autobackup"))
            .args(args)
            .env("XDG_CONFIG_HOME", self.temp_dir.path().join("config"))
            .env("XDG_DATA_HOME", self.temp_dir.path().join("data"))
            .env("XDG_RUNTIME_DIR", self.temp_dir.path().join("runtime"))
            .output()?;

        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ))
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = self.daemon.kill();
        let _ = self.daemon.wait();
    }
}

#[tokio::test]
#[ignore] // Requires the daemon binary to be built
async fn test_cli_add_list_and_menu() -> Result<()> {
    let env = TestEnv::setup().await?;
    let source = env.path("source/docs");
    let target = env.path("target");

    let (ok, stdout, stderr) = env.run_cli(&[
        "add",
        "docs",
        "--folder",
        &source,
        "--destination",
        &target,
    ])?;
    assert!(ok, "add failed: {}", stderr);
    assert!(stdout.contains("Profile has been saved."));

    let (ok, stdout, _) = env.run_cli(&["list"])?;
    assert!(ok);
    assert!(stdout.contains("docs"));

    let (ok, stdout, _) = env.run_cli(&["menu"])?;
    assert!(ok);
    assert!(stdout.contains("Start docs"));
    assert!(stdout.contains("[ ] Show Alerts"));
    Ok(())
}

#[tokio::test]
#[ignore] // Requires the daemon binary to be built
async fn test_cli_start_status_stop() -> Result<()> {
    let env = TestEnv::setup().await?;
    let source = env.path("source/docs");
    let target = env.path("target");
    env.run_cli(&[
        "add",
        "docs",
        "--folder",
        &source,
        "--destination",
        &target,
    ])?;

    let (ok, stdout, stderr) = env.run_cli(&["start", "docs"])?;
    assert!(ok, "start failed: {}", stderr);
    assert!(stdout.contains("Backup started for profile 'docs'."));

    let mut attempts = 0;
    while !env.temp_dir.path().join("target/docs_0/a.txt").exists() && attempts < 50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        attempts += 1;
    }

    let (ok, stdout, _) = env.run_cli(&["--json", "status"])?;
    assert!(ok);
    assert!(stdout.contains(r#""state": "Running""#));

    let (ok, stdout, _) = env.run_cli(&["recent"])?;
    assert!(ok);
    assert!(stdout.contains("Recent Backup created for profile: docs"));

    let (ok, stdout, _) = env.run_cli(&["stop"])?;
    assert!(ok);
    assert!(stdout.contains("Process terminated."));

    // Starting an unknown profile is a daemon error
    let (ok, _, stderr) = env.run_cli(&["start", "ghost"])?;
    assert!(!ok);
    assert!(stderr.contains("Unknown profile"));
    Ok(())
}
