//! WebSocket transport for the sync protocol.
//!
//! Each connection gets a bounded outbound queue drained by its own writer
//! task; the read loop handles one frame at a time so a device's frames are
//! processed in order. The first frame that names a user and device binds
//! the connection to that identity and registers it.

use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use notisync_core::{ClientMessage, ConnectionHandle, ServerMessage, SyncError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(state.config.outbound_queue_capacity.max(1));
    let mut session = Session::new(state, tx);
    info!(connection_id = %session.connection_id, "WebSocket connection opened");

    let writer = tokio::spawn(write_loop(sink, rx, session.connection_id));

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => session.on_frame(text.as_str()).await,
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => session.on_frame(text).await,
                Err(_) => session.reply(ServerMessage::sync_error(
                    None,
                    "Binary frames must be UTF-8 JSON",
                )),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %session.connection_id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    let connection_id = session.connection_id;
    session.close();
    // The peer is gone; anything still queued has nowhere to go.
    writer.abort();
    info!(connection_id = %connection_id, "WebSocket connection closed");
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMessage>,
    connection_id: Uuid,
) {
    while let Some(message) = rx.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "Failed to encode frame");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            debug!(connection_id = %connection_id, error = %e, "WebSocket write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

/// Protocol state of one connection, independent of the socket.
pub(crate) struct Session {
    state: AppState,
    connection_id: Uuid,
    outbound: mpsc::Sender<ServerMessage>,
    bound: Option<ConnectionHandle>,
}

impl Session {
    pub(crate) fn new(state: AppState, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            state,
            connection_id: Uuid::new_v4(),
            outbound,
            bound: None,
        }
    }

    fn rate_key(&self) -> String {
        match &self.bound {
            Some(handle) => handle.device_id().to_string(),
            None => self.connection_id.to_string(),
        }
    }

    /// Handle one inbound text frame. Every failure is answered with an
    /// ERROR result and the connection stays usable.
    pub(crate) async fn on_frame(&mut self, text: &str) {
        let max = self.state.config.max_message_size;
        if text.len() > max {
            warn!(
                connection_id = %self.connection_id,
                size = text.len(),
                max = max,
                "Frame exceeds size limit"
            );
            self.reply(ServerMessage::sync_error(
                None,
                format!("Frame too large: {} bytes (max: {})", text.len(), max),
            ));
            return;
        }

        if !self.state.rate_limiter.check(&self.rate_key()) {
            warn!(connection_id = %self.connection_id, "Rate limit exceeded");
            self.reply(ServerMessage::sync_error(None, "Rate limit exceeded"));
            return;
        }

        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "Rejected frame");
                self.reply(ServerMessage::sync_error(None, e.to_string()));
                return;
            }
        };

        if let Err(e) = self.bind(&message) {
            warn!(connection_id = %self.connection_id, error = %e, "Rejected frame");
            let request_id = message.request_id().map(str::to_string);
            self.reply(ServerMessage::sync_error(request_id, e.to_string()));
            return;
        }

        match message {
            ClientMessage::SyncRequest(request) => {
                self.state.sync.handle_sync(request).await;
            }
            ClientMessage::MarkRead(request) => {
                if let Err(e) = self
                    .state
                    .sync
                    .mark_read(&request.user_id, &request.notification_ids)
                    .await
                {
                    self.reply(ServerMessage::sync_error(None, e.to_string()));
                }
            }
            ClientMessage::Ping => self.reply(ServerMessage::Pong),
        }
    }

    /// Bind the connection to the identity the frame names, registering it
    /// on first use. A different identity on a bound connection is refused.
    fn bind(&mut self, message: &ClientMessage) -> Result<(), SyncError> {
        let Some((user_id, device_id)) = message.identity() else {
            return Ok(());
        };

        if let Some(handle) = &self.bound {
            if handle.user_id() == user_id && handle.device_id() == device_id {
                return Ok(());
            }
            return Err(SyncError::IdentityMismatch {
                bound: format!("{}/{}", handle.user_id(), handle.device_id()),
                requested: format!("{}/{}", user_id, device_id),
            });
        }

        let handle = ConnectionHandle::new(device_id, user_id, self.outbound.clone());
        if let Some(previous) = self.state.registry().register(handle.clone()) {
            info!(
                device_id = %device_id,
                replaced = %previous.connection_id(),
                "Device reconnected, previous connection replaced"
            );
        }
        self.state
            .rate_limiter
            .rekey(&self.connection_id.to_string(), device_id);
        info!(
            connection_id = %self.connection_id,
            user_id = %user_id,
            device_id = %device_id,
            "Connection bound"
        );
        self.bound = Some(handle);
        Ok(())
    }

    /// Queue a frame for this connection only.
    fn reply(&self, message: ServerMessage) {
        match self.outbound.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %self.connection_id, "Outbound queue full, reply dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Unregister the connection if it is still the one registered for its
    /// device, and drop the rate-limit state it owns.
    pub(crate) fn close(self) {
        let limiter = &self.state.rate_limiter;
        limiter.forget(&self.connection_id.to_string());

        if let Some(handle) = &self.bound {
            if self.state.registry().release(handle) {
                limiter.forget(handle.device_id());
                debug!(device_id = %handle.device_id(), "Connection unregistered");
            }
        }
        debug!(
            connection_id = %self.connection_id,
            rate_buckets = limiter.tracked(),
            "Session closed"
        );
    }
}
