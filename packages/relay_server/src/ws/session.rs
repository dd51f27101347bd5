use std::sync::Arc;

use axum::extract::ws::WebSocket;
use futures::StreamExt;
use relay_hub::{Connection, HubHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reader::{ReaderExit, run_reader};
use super::writer::{WriterExit, run_writer};
use crate::config::ConnectionConfig;
use crate::metrics::ServerMetrics;

/// Everything a socket session needs from the server.
#[derive(Clone)]
pub struct SocketContext {
    pub hub: HubHandle,
    pub config: Arc<ConnectionConfig>,
    pub metrics: Arc<ServerMetrics>,
}

/// Drive one upgraded socket from registration to teardown.
///
/// The record is registered before either pump starts, and the connection is
/// unregistered once the reader returns, whatever made it return.
pub async fn serve_socket(socket: WebSocket, display_name: String, ctx: SocketContext) {
    let (connection, outbound) = Connection::new(display_name.clone(), ctx.config.outbound_capacity);
    let conn_id = connection.id().clone();

    info!(conn_id = %conn_id, username = %display_name, "WebSocket connected");
    ctx.metrics.connection_opened();

    if ctx.hub.register(connection).await.is_err() {
        warn!(conn_id = %conn_id, "Hub is closed, dropping connection");
        ctx.metrics.connection_closed();
        return;
    }

    let (ws_sender, ws_receiver) = socket.split();
    let writer_stopped = CancellationToken::new();

    let writer = tokio::spawn(run_writer(
        ws_sender,
        outbound,
        conn_id.clone(),
        ctx.config.clone(),
        ctx.metrics.clone(),
        writer_stopped.clone(),
    ));

    let reader_exit = run_reader(ws_receiver, &conn_id, &display_name, &ctx, writer_stopped).await;
    log_reader_exit(&conn_id, &reader_exit, &ctx.metrics);

    if ctx.hub.unregister(conn_id.clone()).await.is_err() {
        debug!(conn_id = %conn_id, "Hub already closed during unregister");
    }

    // Unregistering closed the queue, so the writer finishes what is buffered
    // and returns.
    match writer.await {
        Ok(exit) => log_writer_exit(&conn_id, &exit, &ctx.metrics),
        Err(e) => error!(conn_id = %conn_id, "Writer task failed: {}", e),
    }

    ctx.metrics.connection_closed();
    info!(conn_id = %conn_id, username = %display_name, "WebSocket disconnected");
}

fn log_reader_exit(conn_id: &relay_hub::ConnectionId, exit: &ReaderExit, metrics: &ServerMetrics) {
    match exit {
        ReaderExit::LivenessTimeout => {
            metrics.liveness_timeout();
            warn!(conn_id = %conn_id, "Reader stopped: {}", exit);
        }
        ReaderExit::Decode(e) => {
            warn!(conn_id = %conn_id, code = e.error_code(), "Reader stopped: {}", exit);
        }
        ReaderExit::Transport(_) => {
            metrics.websocket_error();
            warn!(conn_id = %conn_id, "Reader stopped: {}", exit);
        }
        _ if exit.is_expected() => debug!(conn_id = %conn_id, "Reader stopped: {}", exit),
        _ => warn!(conn_id = %conn_id, "Reader stopped: {}", exit),
    }
}

fn log_writer_exit(conn_id: &relay_hub::ConnectionId, exit: &WriterExit, metrics: &ServerMetrics) {
    match exit {
        WriterExit::QueueClosed => debug!(conn_id = %conn_id, "Writer stopped: {}", exit),
        WriterExit::WriteTimeout | WriterExit::Transport(_) => {
            metrics.websocket_error();
            warn!(conn_id = %conn_id, "Writer stopped: {}", exit);
        }
    }
}
