//! WebSocket transport
//!
//! A minimal WebSocket server that turns every connection into one broker
//! subscription. Responsibilities:
//! - Accept TCP/WebSocket connections
//! - Create a `Client` pair for each connection and register it with the `Broker`
//! - Forward every payload the broker fans out to the socket as a binary frame
//! - Submit every text or binary frame the peer sends for broadcast through
//!   the connection's inbound queue
//! - Unregister the client when the socket goes away
//!
//! Frames carry raw payload bytes; there is no envelope or framing on top.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tungstenite::Utf8Bytes;
use uuid::Uuid;

use crate::broker::Broker;
use crate::client::{Client, Connection};
use crate::config::Settings;
use crate::utils::Result;

/// Build a broker from `settings`, start it, and serve WebSocket clients until
/// the listener fails or ctrl-c is received. The broker is shut down on the
/// way out; delivery tasks still stuck after `server.shutdown_grace_ms` are
/// aborted.
pub async fn serve(settings: Settings) -> Result<()> {
    let addr = settings.addr();
    let broker = Broker::with_options(settings.broker_options());
    broker.start().await;

    let result = tokio::select! {
        res = start_websocket_server(&addr, broker.clone(), settings.clone()) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };

    broker.shutdown_within(settings.shutdown_grace()).await;
    result
}

/// Bind `addr` and serve WebSocket clients on it.
pub async fn start_websocket_server(addr: &str, broker: Broker, settings: Settings) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve_listener(listener, broker, settings).await;
    Ok(())
}

/// Accept connections on an already bound listener. Never returns; accept
/// errors are logged and retried after a short pause.
///
/// At most `server.max_connections` clients are admitted at once. Each
/// admitted connection holds a permit until it disconnects.
pub async fn serve_listener(listener: TcpListener, broker: Broker, settings: Settings) {
    let permits = Arc::new(Semaphore::new(
        settings.server.max_connections.min(Semaphore::MAX_PERMITS),
    ));
    let settings = Arc::new(settings);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_connection(
                    stream,
                    peer,
                    broker.clone(),
                    permits.clone(),
                    settings.clone(),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: Broker,
    permits: Arc<Semaphore>,
    settings: Arc<Settings>,
) {
    let mut ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, "WebSocket handshake error: {e}");
            return;
        }
    };

    let Ok(permit) = permits.try_acquire_owned() else {
        warn!(%peer, "connection limit reached, refusing client");
        let frame = CloseFrame {
            code: CloseCode::Again,
            reason: Utf8Bytes::from_static("connection limit reached"),
        };
        if let Err(e) = ws_stream.close(Some(frame)).await {
            debug!(%peer, "failed to close refused connection: {e}");
        }
        return;
    };

    let key = format!("client-{}", Uuid::new_v4());
    let (client, connection) = Client::pair(settings.broker.queue_capacity);
    let Connection {
        inbound,
        mut outbound,
    } = connection;
    broker.register(key.clone(), client).await;
    info!(key = %key, %peer, "client connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Broker → socket. Ends when the broker drops its half or the socket dies;
    // either way the socket is closed so the peer and the read loop notice.
    let writer = {
        let key = key.clone();
        tokio::spawn(async move {
            while let Some(payload) = outbound.recv().await {
                if let Err(e) = ws_sender.send(WsMessage::binary(payload)).await {
                    warn!(key = %key, "Failed to send message: {e}");
                    break;
                }
            }
            if let Err(e) = ws_sender.close().await {
                debug!(key = %key, "close after send loop failed: {e}");
            }
            debug!(key = %key, "send loop closed");
        })
    };

    // Socket → broker, through the inbound queue.
    while let Some(frame) = ws_receiver.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                warn!(key = %key, "read error: {e}");
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        if !(msg.is_binary() || msg.is_text()) {
            continue;
        }
        if inbound.send(msg.into_data()).await.is_err() {
            break;
        }
    }

    broker.unregister(&key).await;
    drop(permit);
    drop(inbound);
    if let Err(e) = writer.await {
        error!(key = %key, "send loop failed: {e}");
    }
    info!(key = %key, "client disconnected");
}
