use anyhow::Result;
use common::{CacheEntrySummary, Command, DaemonStatus, Response, UpdateError, UpdateInterval};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::Daemon;
use crate::display::DisplayServer;
use crate::fetcher::HttpTransport;
use crate::orchestrator::UpdateOutcome;
use crate::store::KvStore;

pub async fn start<T, D, S>(daemon: Arc<Daemon<T, D, S>>) -> Result<()>
where
    T: HttpTransport + 'static,
    D: DisplayServer + 'static,
    S: KvStore + 'static,
{
    let socket_path = common::get_socket_path();

    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("IPC server listening on: {}", socket_path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let daemon = daemon.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, daemon).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Err(e) => {
                log::error!("Error accepting connection: {}", e);
            }
        }
    }
}

async fn handle_client<T, D, S>(stream: UnixStream, daemon: Arc<Daemon<T, D, S>>) -> Result<()>
where
    T: HttpTransport + 'static,
    D: DisplayServer + 'static,
    S: KvStore + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(command) => handle_command(command, &daemon).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(UpdateError::Unknown(format!("invalid command: {}", e)))
            }
        };

        // Send response
        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn handle_command<T, D, S>(command: Command, daemon: &Arc<Daemon<T, D, S>>) -> Response
where
    T: HttpTransport + 'static,
    D: DisplayServer + 'static,
    S: KvStore + 'static,
{
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Query => {
            let scheduler = &daemon.scheduler;
            Response::Status(DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: daemon.uptime_secs(),
                updating: daemon.orchestrator.is_updating(),
                scheduler_running: scheduler.is_running(),
                mode: daemon.orchestrator.mode(),
                interval: scheduler.interval(),
                last_update: scheduler.last_success().map(|t| t.to_rfc3339()),
                due_in_secs: scheduler.due_in_secs(),
                last_error: daemon.orchestrator.last_error(),
            })
        }

        // The update runs to completion on this connection so the caller
        // gets the terminal result; with retries that can take a while.
        Command::Update => match daemon.orchestrator.try_update().await {
            Ok(UpdateOutcome::Applied) => Response::Ok,
            Ok(UpdateOutcome::Skipped) => Response::Busy,
            Err(e) => Response::Error(e),
        },

        Command::SetMode { mode } => match daemon.orchestrator.set_mode(mode).await {
            Ok(UpdateOutcome::Applied) => Response::Ok,
            // Mode persisted; the refresh was dropped because an update is
            // already in flight.
            Ok(UpdateOutcome::Skipped) => Response::Busy,
            Err(e) => Response::Error(e),
        },

        Command::SetInterval { hours, minutes } => {
            let interval = UpdateInterval::clamped(hours, minutes);
            daemon.scheduler.set_interval(interval);
            Response::Ok
        }

        Command::Start => {
            daemon.scheduler.start(daemon.update_tx.clone());
            Response::Ok
        }

        Command::Stop => {
            daemon.scheduler.stop();
            Response::Ok
        }

        Command::ListDisplays => {
            Response::Displays(daemon.orchestrator.display_server().displays())
        }

        Command::ListCache => {
            let entries = daemon
                .orchestrator
                .cache()
                .entries()
                .into_iter()
                .map(|entry| CacheEntrySummary {
                    path: entry.path.display().to_string(),
                    created_at: entry.created_at.to_rfc3339(),
                    size_bytes: entry.size_bytes,
                })
                .collect();
            Response::Cache(entries)
        }

        Command::ClearCache => match daemon.orchestrator.cache().clear() {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error(e),
        },

        Command::Kill => {
            log::info!("Received kill command");
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                let _ = std::fs::remove_file(common::get_socket_path());
                std::process::exit(0);
            });
            Response::Ok
        }
    }
}
