use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::SinkExt;
use futures::stream::SplitSink;
use relay_hub::{ConnectionId, OutboundQueue, encode_batch};
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::config::ConnectionConfig;
use crate::metrics::ServerMetrics;

type WsSink = SplitSink<WebSocket, Message>;

/// Why the outbound pump stopped.
#[derive(Debug, thiserror::Error)]
pub enum WriterExit {
    #[error("outbound queue closed")]
    QueueClosed,
    #[error("write timed out")]
    WriteTimeout,
    #[error("transport error: {0}")]
    Transport(#[source] axum::Error),
}

/// Outbound pump. Always cancels `stopped` on the way out so the reader
/// stops too.
pub(super) async fn run_writer(
    mut sender: WsSink,
    mut outbound: OutboundQueue,
    conn_id: ConnectionId,
    config: Arc<ConnectionConfig>,
    metrics: Arc<ServerMetrics>,
    stopped: CancellationToken,
) -> WriterExit {
    let exit = write_loop(&mut sender, &mut outbound, &conn_id, &config, &metrics).await;
    stopped.cancel();
    let _ = timeout(config.write_wait, sender.close()).await;
    exit
}

async fn write_loop(
    sender: &mut WsSink,
    outbound: &mut OutboundQueue,
    conn_id: &ConnectionId,
    config: &ConnectionConfig,
    metrics: &ServerMetrics,
) -> WriterExit {
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            first = outbound.recv() => {
                let Some(first) = first else {
                    let _ = timeout(config.write_wait, sender.send(Message::Close(None))).await;
                    return WriterExit::QueueClosed;
                };

                // Coalesce whatever else is already queued into the same frame
                let mut batch = vec![first];
                while let Ok(next) = outbound.try_recv() {
                    batch.push(next);
                }

                let body = match encode_batch(&batch) {
                    Ok(body) => body,
                    Err(e) => {
                        error!(conn_id = %conn_id, "Failed to encode outbound events: {}", e);
                        continue;
                    }
                };

                if let Err(exit) = write(sender, Message::Text(body.into()), config).await {
                    return exit;
                }
                metrics.frame_sent(batch.len());
            }
            _ = ping.tick() => {
                trace!(conn_id = %conn_id, "Sending ping");
                if let Err(exit) = write(sender, Message::Ping(Bytes::new()), config).await {
                    return exit;
                }
            }
        }
    }
}

async fn write(sender: &mut WsSink, msg: Message, config: &ConnectionConfig) -> Result<(), WriterExit> {
    match timeout(config.write_wait, sender.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriterExit::Transport(e)),
        Err(_) => Err(WriterExit::WriteTimeout),
    }
}
