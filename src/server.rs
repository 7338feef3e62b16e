use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::common::is_transient_accept_error;
use crate::config::CitronConfig;
use crate::connection::handle_connection;
use crate::handlers::{create_handler, SharedHandler};

type ShutdownRx = watch::Receiver<()>;

/// Holds a bound listener and all necessary context to handle its
/// connections.
pub struct ListenerContext {
    pub server_name: String,
    pub listener: TcpListener,
    pub handler: SharedHandler,
    pub shutdown_rx: ShutdownRx,
}

/// Builds the handler for every configured server and binds its listener.
pub async fn prepare_listeners(
    config: &CitronConfig,
    shutdown_rx: ShutdownRx,
) -> Result<Vec<ListenerContext>> {
    let mut contexts = Vec::with_capacity(config.server.len());
    for (name, server_config) in &config.server {
        let handler = create_handler(&server_config.handler)
            .with_context(|| format!("Creating handler for server '{name}'"))?;

        let listener = TcpListener::bind(server_config.listen_addr)
            .await
            .with_context(|| format!("Binding server '{name}' to {}", server_config.listen_addr))?;

        info!(server_name = %name, addr = %server_config.listen_addr, "Listener bound");
        contexts.push(ListenerContext {
            server_name: name.clone(),
            listener,
            handler,
            shutdown_rx: shutdown_rx.clone(),
        });
    }
    Ok(contexts)
}

/// Spawns one accept loop per listener. Each accepted connection is
/// handed to its own task; the loops exit on the shutdown signal.
pub fn spawn_accept_loops(contexts: Vec<ListenerContext>) -> Vec<JoinHandle<Result<()>>> {
    contexts
        .into_iter()
        .map(|ctx| tokio::spawn(accept_loop(ctx)))
        .collect()
}

async fn accept_loop(ctx: ListenerContext) -> Result<()> {
    let ListenerContext {
        server_name,
        listener,
        handler,
        mut shutdown_rx,
    } = ctx;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                info!(server_name = %server_name, "Accept loop received shutdown signal. Exiting.");
                return Ok(());
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote_addr)) => {
                        let handler = handler.clone();
                        let conn_shutdown_rx = shutdown_rx.clone();
                        let conn_server_name = server_name.clone();
                        tokio::spawn(async move {
                            handle_connection(
                                stream,
                                remote_addr,
                                handler,
                                conn_shutdown_rx,
                                conn_server_name,
                            )
                            .await;
                        });
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!(server_name = %server_name, error = %e, "Transient error accepting connection");
                    }
                    Err(e) => {
                        error!(server_name = %server_name, error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}
