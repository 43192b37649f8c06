use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use rostersync_core::{config, RosterId};

use crate::error::{io_err, DaemonError};
use crate::paths::{
    rosters_root, rostersync_root, socket_path, DAEMON_LABEL, DEBOUNCE_WINDOW, DEFAULT_TICK,
    MEMBERS_SUFFIX,
};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::scheduler::{LocalExecutor, RunHandle, Scheduler, SchedulerHandle, SchedulerOverview};

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let tick = configured_tick(&home);
    let started_at_unix = unix_seconds_now();
    tracing::info!(
        tick_seconds = tick.as_secs(),
        root = %rostersync_root(&home).display(),
        "daemon starting",
    );

    let (scheduler, handle) = Scheduler::new(Arc::new(LocalExecutor::new(home.clone())), tick);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = scheduler.run(shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let result = watcher_task(home, handle, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                handle,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (scheduler_result, watcher_result, socket_result, signal_result) = tokio::join!(
        scheduler_handle,
        watcher_handle,
        socket_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Shortest `tick_seconds` across configured rosters.
fn configured_tick(home: &Path) -> Duration {
    let rosters = match config::list_rosters_at(home) {
        Ok(rosters) => rosters,
        Err(err) => {
            tracing::warn!(error = %err, "could not list rosters, using default tick");
            return DEFAULT_TICK;
        }
    };
    rosters
        .iter()
        .filter_map(|roster| match config::load_config_at(home, roster) {
            Ok(cfg) => Some(cfg.schedule.tick_seconds),
            Err(err) => {
                tracing::warn!(roster = %roster, error = %err, "skipping unreadable roster config");
                None
            }
        })
        .filter(|&secs| secs > 0)
        .min()
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TICK)
}

async fn watcher_task(
    home: PathBuf,
    scheduler: SchedulerHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let rosters = rosters_root(&home);
    if !rosters.exists() {
        fs::create_dir_all(&rosters).map_err(|e| io_err(&rosters, e))?;
    }
    // Event paths arrive canonicalized on some platforms (/private/var on macOS).
    let rosters = fs::canonicalize(&rosters).map_err(|e| io_err(&rosters, e))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&rosters, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %rosters.display(), "watching roster directory");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    let Some(roster) = roster_for_members_path(&path, &rosters) else {
                        continue;
                    };
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    tracing::info!(roster = %roster, "member snapshot changed");
                    scheduler.roster_changed(roster).await?;
                }
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    scheduler: SchedulerHandle,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let scheduler = scheduler.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        scheduler,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    scheduler: SchedulerHandle,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(&request, &home, &scheduler, &shutdown_tx, started_at_unix).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// Answer one socket request.
async fn dispatch(
    request: &DaemonRequest,
    home: &Path,
    scheduler: &SchedulerHandle,
    shutdown_tx: &broadcast::Sender<()>,
    started_at_unix: u64,
) -> DaemonResponse {
    let result = match request.cmd.as_str() {
        "status" => scheduler
            .overview()
            .await
            .map(|overview| build_status_payload(home, &overview, started_at_unix)),
        "trigger" => match &request.roster {
            Some(roster) => scheduler
                .trigger(RosterId::from(roster.as_str()))
                .await
                .map(|handle| json!({ "handle": handle })),
            None => return DaemonResponse::error("trigger requires a roster"),
        },
        "run-status" => match request.handle {
            Some(handle) => match scheduler.run_status(RunHandle(handle)).await {
                Ok(Some(status)) => serde_json::to_value(status).map_err(DaemonError::from),
                Ok(None) => return DaemonResponse::error(format!("unknown run handle {handle}")),
                Err(err) => Err(err),
            },
            None => return DaemonResponse::error("run-status requires a handle"),
        },
        "changed" => match &request.roster {
            Some(roster) => scheduler
                .roster_changed(RosterId::from(roster.as_str()))
                .await
                .map(|()| json!({ "pending": true })),
            None => return DaemonResponse::error("changed requires a roster"),
        },
        "stop" => {
            tracing::info!("stop requested over socket");
            let _ = shutdown_tx.send(());
            Ok(json!({ "stopping": true }))
        }
        other => return DaemonResponse::error(format!("unknown command '{other}'")),
    };

    match result {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

fn build_status_payload(home: &Path, overview: &SchedulerOverview, started_at_unix: u64) -> Value {
    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "started_at_unix": started_at_unix,
        "tick_seconds": overview.tick_seconds,
        "rosters": overview.rosters,
        "socket": socket_path(home).display().to_string(),
        "rosters_root": rosters_root(home).display().to_string(),
    })
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// `<rosters>/<roster>.members.json` → `roster`.
fn roster_for_members_path(path: &Path, rosters: &Path) -> Option<RosterId> {
    if path.parent() != Some(rosters) {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    let roster = name.strip_suffix(MEMBERS_SUFFIX)?;
    if roster.is_empty() {
        return None;
    }
    Some(RosterId::from(roster))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    config::rosters_dir_at(home)?;
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

pub(crate) fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use chrono::Utc;
    use rostersync_core::types::SheetId;
    use rostersync_sync::RunReport;
    use tempfile::TempDir;
    use tokio::time::advance;

    use crate::scheduler::RunExecutor;

    struct InstantExecutor;

    #[async_trait]
    impl RunExecutor for InstantExecutor {
        async fn execute(&self, roster: &RosterId) -> Result<RunReport, DaemonError> {
            Ok(RunReport::new(roster, false, Utc::now()))
        }
    }

    fn spawn_scheduler() -> (SchedulerHandle, broadcast::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let (scheduler, handle) = Scheduler::new(Arc::new(InstantExecutor), DEFAULT_TICK);
        tokio::spawn(scheduler.run(shutdown_rx));
        (handle, shutdown_tx)
    }

    fn request(cmd: &str, roster: Option<&str>, handle: Option<u64>) -> DaemonRequest {
        DaemonRequest {
            cmd: cmd.to_string(),
            roster: roster.map(str::to_string),
            handle,
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let threshold = Duration::from_millis(100);
        let mut debounce = HashMap::<PathBuf, Instant>::new();
        let path = PathBuf::from("/tmp/rosters/guild.members.json");
        let mut triggers = 0usize;

        for _ in 0..5 {
            if should_process_event_with_threshold(&mut debounce, &path, Instant::now(), threshold)
            {
                triggers += 1;
            }
            advance(Duration::from_millis(10)).await;
        }
        assert_eq!(triggers, 1, "rapid saves should collapse to one change event");

        advance(Duration::from_millis(150)).await;
        assert!(should_process_event_with_threshold(
            &mut debounce,
            &path,
            Instant::now(),
            threshold
        ));
    }

    #[test]
    fn only_member_snapshots_map_to_rosters() {
        let rosters = Path::new("/home/u/.rostersync/rosters");
        assert_eq!(
            roster_for_members_path(&rosters.join("guild.members.json"), rosters),
            Some(RosterId::from("guild"))
        );
        assert_eq!(roster_for_members_path(&rosters.join("guild.yaml"), rosters), None);
        assert_eq!(roster_for_members_path(&rosters.join(".members.json"), rosters), None);
        assert_eq!(
            roster_for_members_path(Path::new("/elsewhere/guild.members.json"), rosters),
            None
        );
    }

    #[test]
    fn stale_socket_file_is_removed() {
        let dir = TempDir::new().expect("dir");
        let socket = dir.path().join("rostersync.sock");
        fs::write(&socket, b"").expect("stale file");
        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
        prepare_socket_for_bind(&socket).expect("missing socket is fine");
    }

    #[test]
    fn tick_is_the_shortest_configured_interval() {
        let home = TempDir::new().expect("home");
        assert_eq!(configured_tick(home.path()), DEFAULT_TICK);

        for (name, secs) in [("alpha", 120), ("beta", 30)] {
            let roster = RosterId::from(name);
            let mut cfg = config::init_config_at(home.path(), &roster, SheetId::from("s"), None)
                .expect("init");
            cfg.schedule.tick_seconds = secs;
            config::save_config_at(home.path(), &roster, &cfg).expect("save");
        }
        assert_eq!(configured_tick(home.path()), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn trigger_then_run_status_over_dispatch() {
        let home = TempDir::new().expect("home");
        let (scheduler, shutdown) = spawn_scheduler();

        let response = dispatch(
            &request("trigger", Some("guild"), None),
            home.path(),
            &scheduler,
            &shutdown,
            0,
        )
        .await;
        assert!(response.ok);
        let handle = response.data.expect("data")["handle"]
            .as_u64()
            .expect("numeric handle");

        let response = dispatch(
            &request("run-status", None, Some(handle)),
            home.path(),
            &scheduler,
            &shutdown,
            0,
        )
        .await;
        assert!(response.ok);
        let data = response.data.expect("data");
        assert_eq!(data["roster"], json!("guild"));
        assert_eq!(data["handle"], json!(handle));
    }

    #[tokio::test]
    async fn dispatch_rejects_incomplete_and_unknown_requests() {
        let home = TempDir::new().expect("home");
        let (scheduler, shutdown) = spawn_scheduler();

        for (req, needle) in [
            (request("trigger", None, None), "requires a roster"),
            (request("changed", None, None), "requires a roster"),
            (request("run-status", None, None), "requires a handle"),
            (request("run-status", None, Some(42)), "unknown run handle 42"),
            (request("explode", None, None), "unknown command 'explode'"),
        ] {
            let response = dispatch(&req, home.path(), &scheduler, &shutdown, 0).await;
            assert!(!response.ok);
            assert!(
                response.error.as_deref().unwrap_or("").contains(needle),
                "{:?} should mention {needle}",
                response.error
            );
        }
    }

    #[tokio::test]
    async fn status_lists_pending_rosters() {
        let home = TempDir::new().expect("home");
        let (scheduler, shutdown) = spawn_scheduler();

        let response = dispatch(
            &request("changed", Some("guild"), None),
            home.path(),
            &scheduler,
            &shutdown,
            0,
        )
        .await;
        assert_eq!(response.data, Some(json!({ "pending": true })));

        let response = dispatch(
            &request("status", None, None),
            home.path(),
            &scheduler,
            &shutdown,
            1_000_000,
        )
        .await;
        let payload = response.data.expect("status data");
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["label"], json!(DAEMON_LABEL));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["tick_seconds"], json!(60));
        let rosters = payload["rosters"].as_array().expect("rosters array");
        assert_eq!(rosters.len(), 1);
        assert_eq!(rosters[0]["roster"], json!("guild"));
        assert_eq!(rosters[0]["pending"], json!(true));
    }

    #[tokio::test]
    async fn stop_broadcasts_shutdown() {
        let home = TempDir::new().expect("home");
        let (scheduler, shutdown) = spawn_scheduler();
        let mut observer = shutdown.subscribe();

        let response = dispatch(
            &request("stop", None, None),
            home.path(),
            &scheduler,
            &shutdown,
            0,
        )
        .await;
        assert_eq!(response.data, Some(json!({ "stopping": true })));
        observer.recv().await.expect("shutdown signal");
    }

    #[tokio::test]
    async fn socket_round_trip_through_a_live_listener() {
        let home = TempDir::new().expect("home");
        ensure_runtime_dirs(home.path()).expect("dirs");
        let (scheduler, shutdown) = spawn_scheduler();

        let server = {
            let home = home.path().to_path_buf();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                socket_server_task(home, scheduler, shutdown.clone(), shutdown.subscribe(), 7).await
            })
        };

        let socket = socket_path(home.path());
        for _ in 0..50 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut stream = UnixStream::connect(&socket).await.expect("connect");
        stream
            .write_all(b"{\"cmd\":\"status\"}\n{\"cmd\":\"stop\"}\n")
            .await
            .expect("write");
        let mut lines = BufReader::new(stream).lines();
        let status: DaemonResponse =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line"))
                .expect("decode");
        assert!(status.ok);
        assert_eq!(status.data.expect("data")["started_at_unix"], json!(7));
        let stop: DaemonResponse =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line"))
                .expect("decode");
        assert!(stop.ok);

        server.await.expect("join").expect("server exits cleanly");
        assert!(!socket.exists(), "socket removed on shutdown");
    }
}
