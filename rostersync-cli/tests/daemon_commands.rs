use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rostersync"))
}

fn rostersync(home: &Path) -> Command {
    let mut cmd = Command::new(binary());
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1");
    cmd
}

struct DaemonProcess {
    child: Child,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(home: &Path) -> Self {
        let child = rostersync(home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        Self {
            child,
            home: home.to_path_buf(),
        }
    }

    fn stop(&mut self) {
        let _ = rostersync(&self.home).args(["daemon", "stop"]).status();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn json_output(home: &Path, args: &[&str]) -> Option<Value> {
    let output = rostersync(home).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    serde_json::from_slice(&output.stdout).ok()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn control_commands_report_a_stopped_daemon() {
    let home = TempDir::new().expect("home");

    let status = json_output(home.path(), &["daemon", "status"]).expect("status JSON");
    assert_eq!(status["running"], false);

    rostersync(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
    rostersync(home.path())
        .args(["daemon", "trigger", "guild"])
        .assert()
        .failure()
        .stderr(contains("daemon is not running"));
}

#[test]
fn triggered_run_completes_through_the_daemon() {
    let home = TempDir::new().expect("home");
    rostersync(home.path())
        .args(["init", "guild", "--sheet", "s1"])
        .assert()
        .success();
    fs::write(
        home.path()
            .join(".rostersync")
            .join("rosters")
            .join("guild.members.json"),
        r#"[{"id": "1", "display_name": "Alice"}]"#,
    )
    .expect("members");

    let mut daemon = DaemonProcess::start(home.path());
    assert!(
        wait_until(Duration::from_secs(5), || {
            json_output(home.path(), &["daemon", "status"])
                .map(|v| v["running"] == true)
                .unwrap_or(false)
        }),
        "daemon did not report running state in time",
    );

    let output = rostersync(home.path())
        .args(["daemon", "trigger", "guild"])
        .output()
        .expect("trigger");
    assert!(
        output.status.success(),
        "trigger failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let handle = String::from_utf8(output.stdout)
        .expect("utf8")
        .trim()
        .to_string();
    assert!(handle.parse::<u64>().is_ok(), "handle should be numeric: {handle}");

    let finished = wait_until(Duration::from_secs(10), || {
        json_output(home.path(), &["daemon", "run-status", &handle])
            .map(|v| v["state"] == "succeeded")
            .unwrap_or(false)
    });
    assert!(finished, "triggered run did not succeed in time");

    let ledger = home
        .path()
        .join(".rostersync")
        .join("sheets")
        .join("s1")
        .join("Ledger.json");
    let contents = fs::read_to_string(ledger).expect("ledger written by daemon run");
    assert!(contents.contains("Alice"));

    rostersync(home.path())
        .args(["daemon", "notify", "guild"])
        .assert()
        .success()
        .stdout(contains("roster 'guild' marked changed"));
    let status = json_output(home.path(), &["daemon", "status"]).expect("status JSON");
    let rosters = status["rosters"].as_array().expect("rosters");
    assert!(rosters
        .iter()
        .any(|r| r["roster"] == "guild" && r["pending"] == true));

    rostersync(home.path())
        .args(["daemon", "run-status", "9999"])
        .assert()
        .failure()
        .stderr(contains("unknown run handle 9999"));

    daemon.stop();
}
