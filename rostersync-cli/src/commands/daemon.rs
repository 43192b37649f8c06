//! `rostersync daemon` — background scheduler lifecycle and run control.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use rostersync_daemon::paths::socket_path;
use rostersync_daemon::{
    notify_changed, request_run_status, request_status, request_stop, request_trigger,
    start_blocking, DaemonError, RunHandle,
};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (watcher + scheduler + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Reconcile a roster now; prints the run handle without waiting.
    Trigger(RosterArg),
    /// Show the state of a previously triggered run.
    RunStatus(RunStatusArgs),
    /// Mark a roster as changed so the next tick reconciles it.
    Notify(RosterArg),
}

#[derive(Args, Debug)]
pub struct RosterArg {
    pub roster: String,
}

#[derive(Args, Debug)]
pub struct RunStatusArgs {
    pub handle: u64,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Trigger(args) => {
            let handle = request_trigger(&home, &args.roster)
                .with_context(|| format!("failed to trigger roster '{}'", args.roster))?;
            println!("{handle}");
        }
        DaemonCommand::RunStatus(args) => {
            let status = request_run_status(&home, RunHandle(args.handle))
                .with_context(|| format!("failed to query run {}", args.handle))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("failed to render run status JSON")?
            );
        }
        DaemonCommand::Notify(args) => {
            notify_changed(&home, &args.roster)
                .with_context(|| format!("failed to notify roster '{}'", args.roster))?;
            println!("roster '{}' marked changed", args.roster);
        }
    }

    Ok(())
}
