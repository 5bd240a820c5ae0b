//! Registry of live device connections, indexed by device and by user.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::ServerMessage;

/// Sending half of one device connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connection_id: Uuid,
    device_id: String,
    user_id: String,
    sender: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    pub fn new(device_id: &str, user_id: &str, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            user_id: user_id.to_string(),
            sender,
        }
    }

    /// Create a handle together with the receiver its writer task drains.
    pub fn channel(
        device_id: &str,
        user_id: &str,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(device_id, user_id, tx), rx)
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue a message without waiting. Returns false if it was dropped.
    pub fn send(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    device_id = %self.device_id,
                    connection_id = %self.connection_id,
                    "Outbound queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    device_id = %self.device_id,
                    connection_id = %self.connection_id,
                    "Connection closed, dropping message"
                );
                false
            }
        }
    }
}

#[derive(Default)]
struct Indices {
    by_device: HashMap<String, ConnectionHandle>,
    /// user id -> device ids currently registered for that user
    by_user: HashMap<String, HashSet<String>>,
}

impl Indices {
    fn remove_device(&mut self, device_id: &str) -> Option<ConnectionHandle> {
        let handle = self.by_device.remove(device_id)?;
        if let Some(devices) = self.by_user.get_mut(&handle.user_id) {
            devices.remove(device_id);
            if devices.is_empty() {
                self.by_user.remove(&handle.user_id);
            }
        }
        Some(handle)
    }
}

/// Both indices live behind one lock so readers never observe them out of
/// step. The lock is only held for in-memory map updates.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Indices>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection, replacing any handle already held for the
    /// same device. The replaced handle is returned and left open.
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut indices = self.write();
        let replaced = indices.remove_device(&handle.device_id);

        indices
            .by_user
            .entry(handle.user_id.clone())
            .or_default()
            .insert(handle.device_id.clone());

        debug!(
            device_id = %handle.device_id,
            user_id = %handle.user_id,
            connection_id = %handle.connection_id,
            replaced = replaced.is_some(),
            "Registered connection"
        );
        indices.by_device.insert(handle.device_id.clone(), handle);
        replaced
    }

    /// Remove a device from both indices. No-op if it is not registered.
    pub fn unregister(&self, device_id: &str) -> Option<ConnectionHandle> {
        let removed = self.write().remove_device(device_id);
        if removed.is_some() {
            debug!(device_id = %device_id, "Unregistered connection");
        }
        removed
    }

    /// Unregister `handle` only if it is still the live entry for its
    /// device. A connection that was replaced must not evict its successor.
    pub fn release(&self, handle: &ConnectionHandle) -> bool {
        let mut indices = self.write();
        let is_current = indices
            .by_device
            .get(&handle.device_id)
            .is_some_and(|current| current.connection_id == handle.connection_id);

        if is_current {
            indices.remove_device(&handle.device_id);
            debug!(
                device_id = %handle.device_id,
                connection_id = %handle.connection_id,
                "Released connection"
            );
        }
        is_current
    }

    /// All connections currently registered for a user.
    pub fn connections_for_user(&self, user_id: &str) -> Vec<ConnectionHandle> {
        let indices = self.read();
        indices
            .by_user
            .get(user_id)
            .map(|devices| {
                devices
                    .iter()
                    .filter_map(|device_id| indices.by_device.get(device_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn connection_for_device(&self, device_id: &str) -> Option<ConnectionHandle> {
        self.read().by_device.get(device_id).cloned()
    }

    /// Queue a message for one device. Returns false if the device is not
    /// connected or its queue refused the message.
    pub fn send_to_device(&self, device_id: &str, message: ServerMessage) -> bool {
        match self.connection_for_device(device_id) {
            Some(handle) => handle.send(message),
            None => {
                debug!(device_id = %device_id, "No live connection for device");
                false
            }
        }
    }

    /// Fan a message out to every connection of a user. Each send is
    /// independent; returns how many connections accepted it.
    pub fn broadcast_to_user(&self, user_id: &str, message: &ServerMessage) -> usize {
        self.connections_for_user(user_id)
            .into_iter()
            .filter(|handle| handle.send(message.clone()))
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.read().by_device.len()
    }

    pub fn user_count(&self) -> usize {
        self.read().by_user.len()
    }
}
