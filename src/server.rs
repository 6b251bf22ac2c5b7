use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::EnvFilter;

use crate::aof::{self, Aof, FsyncPolicy};
use crate::commands::executable::Executable;
use crate::commands::Command;
use crate::config::Config;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Binds the listener described by `config` and serves until Ctrl-C.
pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;

    serve(listener, config, signal::ctrl_c()).await
}

/// Rebuilds the store from the append only file, then accepts connections on `listener` until
/// `shutdown` completes. Each connection is served by its own task.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    shutdown: impl Future,
) -> Result<(), Error> {
    let store = Store::new();

    // Nothing is accepted before the log has been replayed.
    let aof = match &config.aof_path {
        Some(path) => match aof::replay(path, |frame| apply(frame, &store)).await {
            Ok(count) => {
                info!(
                    count,
                    keys = store.len(),
                    hashes = store.hash_len(),
                    "Replayed append only file"
                );
                open_aof(path, config.appendfsync).await
            }
            // An append was cut short, drop it so new records aren't written after it.
            Err(aof::Error::Truncated { record, offset }) => {
                warn!(
                    record,
                    offset, "Append only file ends in a partial record, truncating it"
                );
                match aof::truncate(path, offset).await {
                    Ok(()) => open_aof(path, config.appendfsync).await,
                    Err(err) => {
                        error!(
                            %err,
                            "Failed to truncate append only file, running without durability"
                        );
                        None
                    }
                }
            }
            // Records past the damage can't be replayed, neither could anything appended.
            Err(err) => {
                error!(
                    %err,
                    "Append only file replay failed, serving what was replayed without durability"
                );
                None
            }
        },
        None => None,
    };

    let fsync_task = aof
        .as_ref()
        .filter(|aof| aof.fsync() == FsyncPolicy::Everysec)
        .map(|aof| tokio::spawn(sync_every_second(aof.clone())));

    info!("Redis server listening on {}", listener.local_addr()?);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (socket, client_address) = res?;
                let store = store.clone();
                let aof = aof.clone();
                info!("Accepted connection from {:?}", client_address);

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, client_address, store, aof).await {
                        error!(%e, "Connection error");
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    if let Some(task) = fsync_task {
        task.abort();
    }

    if let Some(aof) = aof {
        if let Err(err) = aof.close().await {
            error!(%err, "Failed to close append only file");
        }
    }

    Ok(())
}

#[instrument(
    name = "connection",
    skip(stream, store, aof),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    store: Store,
    aof: Option<Arc<Aof>>,
) -> Result<(), Error> {
    let mut conn = Connection::new(stream, client_address);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    while let Some(frame) = conn.read_frame().await? {
        debug!("Received frame from client: {}", frame);
        let res = process_frame(frame, &store, aof.as_deref()).await?;
        debug!("Sending response to client: {}", res);

        conn.write_frame(res).await?;
    }

    info!("Connection closed");
    Ok(())
}

/// Runs one client request. Malformed or unknown commands produce an error reply and leave the
/// store untouched.
async fn process_frame(frame: Frame, store: &Store, aof: Option<&Aof>) -> Result<Frame, Error> {
    let cmd = match Command::try_from(frame.clone()) {
        Ok(cmd) => cmd,
        Err(err) => {
            warn!(%err, "Invalid command");
            return Ok(err.into());
        }
    };

    if cmd.is_write() {
        if let Some(aof) = aof {
            // Logged before it is applied, and applied before the next write is logged.
            return match aof.append_with(&frame, || cmd.exec(store.clone())).await {
                Ok(res) => res,
                Err(err) => {
                    error!(%err, "Failed to append command, rejecting it");
                    Ok(Frame::Error("ERR failed to persist command".to_string()))
                }
            };
        }
    }

    cmd.exec(store.clone())
}

/// Applies a replayed record. Replay never appends to the log.
fn apply(frame: Frame, store: &Store) {
    let cmd = match Command::try_from(frame) {
        Ok(cmd) => cmd,
        Err(err) => {
            warn!(%err, "Skipping invalid append only file record");
            return;
        }
    };

    if let Err(err) = cmd.exec(store.clone()) {
        warn!(%err, "Failed to apply append only file record");
    }
}

async fn open_aof(path: &Path, fsync: FsyncPolicy) -> Option<Arc<Aof>> {
    match Aof::open(path, fsync).await {
        Ok(aof) => Some(Arc::new(aof)),
        Err(err) => {
            warn!(%err, path = %path.display(), "Running without durability");
            None
        }
    }
}

async fn sync_every_second(aof: Arc<Aof>) {
    let mut interval = time::interval(Duration::from_secs(1));

    loop {
        interval.tick().await;
        if let Err(err) = aof.sync().await {
            warn!(%err, "Failed to sync append only file");
        }
    }
}
