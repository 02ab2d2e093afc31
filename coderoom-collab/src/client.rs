//! Connection Coordinator: the one relay connection a client session owns.
//!
//! Provides:
//! - Idempotent `connect()` around a shared connection slot
//! - Room tracking so every reconnect re-emits `joinCodeRoom`
//! - Capped exponential backoff via [`ReconnectMachine`]
//! - Connection status as a `watch` value and as [`CoordinatorEvent::Status`]
//!
//! ```text
//!  CodeRoomSession ──ConnectionHandle──► outgoing queue ──► driver task ──► relay
//!        ▲                                                     │
//!        └──────────── CoordinatorEvent (status, server) ◄─────┘
//! ```
//!
//! Events sent while disconnected are dropped, not queued: the relay has
//! no memory of a previous connection, so after a reconnect the client
//! rejoins and the relay's join snapshot is the source of truth.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::backoff::{ReconnectMachine, ReconnectState};
use crate::config::ClientConfig;
use crate::protocol::{ClientEvent, ProtocolError, RoomId, ServerEvent};

/// Connection status published to the UI.
pub type ConnectionStatus = ReconnectState;

/// Anything that can carry client events to the relay.
pub trait EventSink {
    /// Send an event. Returns `false` if it was dropped.
    fn send(&self, event: ClientEvent) -> bool;

    fn is_connected(&self) -> bool;
}

impl EventSink for mpsc::UnboundedSender<ClientEvent> {
    fn send(&self, event: ClientEvent) -> bool {
        mpsc::UnboundedSender::send(self, event).is_ok()
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }
}

/// Events emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    Status(ConnectionStatus),
    Server(ServerEvent),
}

/// Client-side validation and transport errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    EmptyRoomId,
    EmptyUsername,
    Protocol(ProtocolError),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRoomId => write!(f, "Room id is required"),
            Self::EmptyUsername => write!(f, "Username is required"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Reject blank room ids and usernames before anything reaches the wire.
pub fn validate_identity(room_id: &str, username: &str) -> Result<(), ClientError> {
    if room_id.trim().is_empty() {
        return Err(ClientError::EmptyRoomId);
    }
    if username.trim().is_empty() {
        return Err(ClientError::EmptyUsername);
    }
    Ok(())
}

/// Cheap, cloneable sending side of the coordinator.
#[derive(Clone)]
pub struct ConnectionHandle {
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }
}

impl EventSink for ConnectionHandle {
    fn send(&self, event: ClientEvent) -> bool {
        if !self.is_connected() {
            log::debug!("Dropping event for room {} while disconnected", event.room_id());
            return false;
        }
        self.outgoing.send(event).is_ok()
    }

    fn is_connected(&self) -> bool {
        self.status().is_connected()
    }
}

struct Driver {
    handle: ConnectionHandle,
    task: JoinHandle<()>,
}

/// Owns the relay connection for one client session.
pub struct ConnectionCoordinator {
    config: ClientConfig,
    slot: Arc<Mutex<Option<Driver>>>,
    joined: Arc<Mutex<HashMap<RoomId, String>>>,
    event_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<CoordinatorEvent>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionCoordinator {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            slot: Arc::new(Mutex::new(None)),
            joined: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
        }
    }

    /// Start the connection driver, or return the existing handle.
    pub async fn connect(&self) -> ConnectionHandle {
        let mut slot = self.slot.lock().await;
        if let Some(driver) = slot.as_ref() {
            if !driver.task.is_finished() {
                return driver.handle.clone();
            }
        }

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ReconnectState::Disconnected);
        let handle = ConnectionHandle {
            outgoing,
            status: status_rx,
        };

        self.shutdown_tx.send_replace(false);
        let task = tokio::spawn(drive(
            self.config.clone(),
            outgoing_rx,
            status_tx,
            self.event_tx.clone(),
            self.joined.clone(),
            self.shutdown_tx.subscribe(),
        ));

        log::info!("Connecting to {}", self.config.server_url);
        *slot = Some(Driver {
            handle: handle.clone(),
            task,
        });
        handle
    }

    /// Handle to the current connection, if `connect()` was called.
    pub async fn handle(&self) -> Option<ConnectionHandle> {
        self.slot.lock().await.as_ref().map(|d| d.handle.clone())
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.handle()
            .await
            .map(|h| h.status())
            .unwrap_or(ReconnectState::Disconnected)
    }

    /// Take the event receiver. Only the first caller gets it.
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<CoordinatorEvent>> {
        self.event_rx.take()
    }

    /// Join a room now (if connected) and on every future reconnect.
    pub async fn join_room(&self, room_id: &str, username: &str) -> Result<(), ClientError> {
        validate_identity(room_id, username)?;
        let room_id = room_id.trim().to_string();
        let username = username.trim().to_string();

        self.joined
            .lock()
            .await
            .insert(room_id.clone(), username.clone());
        self.send(ClientEvent::JoinCodeRoom { room_id, username }).await;
        Ok(())
    }

    /// Leave a room. Unconfirmed; the relay sends nothing back.
    pub async fn leave_room(&self, room_id: &str) -> bool {
        self.joined.lock().await.remove(room_id);
        self.send(ClientEvent::LeaveCodeRoom {
            room_id: room_id.to_string(),
        })
        .await
    }

    pub async fn joined_rooms(&self) -> Vec<RoomId> {
        self.joined.lock().await.keys().cloned().collect()
    }

    pub async fn send(&self, event: ClientEvent) -> bool {
        match self.handle().await {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    /// Close the connection and stop reconnecting.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let driver = self.slot.lock().await.take();
        if let Some(driver) = driver {
            if let Err(e) = driver.task.await {
                log::error!("Connection driver panicked: {e}");
            }
        }
    }
}

impl Drop for ConnectionCoordinator {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

fn publish(
    state: ConnectionStatus,
    status_tx: &watch::Sender<ConnectionStatus>,
    event_tx: &mpsc::UnboundedSender<CoordinatorEvent>,
) {
    status_tx.send_replace(state);
    // Receiver may be gone; the watch value still holds.
    let _ = event_tx.send(CoordinatorEvent::Status(state));
}

/// Connection driver: connect, pump frames, back off, repeat.
async fn drive(
    config: ClientConfig,
    mut outgoing_rx: mpsc::UnboundedReceiver<ClientEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    event_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    joined: Arc<Mutex<HashMap<RoomId, String>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut machine = ReconnectMachine::new(config.backoff);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        publish(machine.begin_connect(), &status_tx, &event_tx);

        let attempt = tokio::select! {
            result = tokio_tungstenite::connect_async(config.server_url.as_str()) => result,
            _ = shutdown_rx.changed() => break,
        };

        match attempt {
            Ok((ws_stream, _)) => {
                let (mut write, mut read) = ws_stream.split();

                // Anything left from the previous connection is stale.
                while outgoing_rx.try_recv().is_ok() {}

                log::info!("Connected to {}", config.server_url);
                publish(machine.on_connected(), &status_tx, &event_tx);

                let rejoin: Vec<(RoomId, String)> = joined
                    .lock()
                    .await
                    .iter()
                    .map(|(r, u)| (r.clone(), u.clone()))
                    .collect();
                let mut alive = true;
                for (room_id, username) in rejoin {
                    log::info!("Joining room {room_id} as {username}");
                    let event = ClientEvent::JoinCodeRoom { room_id, username };
                    if !send_event(&mut write, &event).await {
                        alive = false;
                        break;
                    }
                }

                while alive {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            let _ = write.send(Message::Close(None)).await;
                            publish(machine.on_disconnected(), &status_tx, &event_tx);
                            return;
                        }

                        cmd = outgoing_rx.recv() => match cmd {
                            Some(event) => alive = send_event(&mut write, &event).await,
                            // Every handle is gone.
                            None => {
                                let _ = write.send(Message::Close(None)).await;
                                publish(machine.on_disconnected(), &status_tx, &event_tx);
                                return;
                            }
                        },

                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => match ServerEvent::decode(text.as_str()) {
                                Ok(event) => {
                                    let _ = event_tx.send(CoordinatorEvent::Server(event));
                                }
                                Err(e) => log::warn!("Failed to decode relay frame: {e}"),
                            },
                            Some(Ok(Message::Ping(data))) => {
                                alive = write.send(Message::Pong(data)).await.is_ok();
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Relay closed the connection");
                                alive = false;
                            }
                            Some(Err(e)) => {
                                log::error!("Relay connection error: {e}");
                                alive = false;
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                }

                publish(machine.on_disconnected(), &status_tx, &event_tx);
            }
            Err(e) => {
                log::warn!("Connection to {} failed: {e}", config.server_url);
                publish(machine.on_failure(), &status_tx, &event_tx);
            }
        }

        let delay = machine.schedule_retry();
        publish(machine.state(), &status_tx, &event_tx);
        log::info!(
            "Reconnecting in {:?} (attempt {})",
            delay,
            machine.attempts()
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    publish(ReconnectState::Disconnected, &status_tx, &event_tx);
}

async fn send_event<S>(write: &mut S, event: &ClientEvent) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let text = match event.encode() {
        Ok(text) => text,
        Err(e) => {
            log::error!("Failed to encode {}: {e}", event.room_id());
            return true;
        }
    };
    match write.send(Message::text(text)).await {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to send to relay: {e}");
            false
        }
    }
}
