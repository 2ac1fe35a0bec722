//! Connection registry for the event stream.
//!
//! Tracks which users currently hold an open push channel and delivers
//! event frames to them. Delivery is best-effort: a disconnected user
//! simply misses the event, there is no buffering and no retry. Each
//! user may hold several connections at once (one per browser tab).

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::metrics;
use crate::models::UserRole;
use crate::sse::frame::{comment_frame, event_frame};

type FrameSender = mpsc::UnboundedSender<Bytes>;

/// One registered push channel: a live frame sender plus its role tag.
struct Entry {
    id: Uuid,
    role: UserRole,
    tx: FrameSender,
}

/// Receiving half of a freshly opened connection.
///
/// The first frame queued on `rx` is always the `:ok` liveness comment.
pub struct Connection {
    pub entry_id: Uuid,
    pub rx: mpsc::UnboundedReceiver<Bytes>,
}

/// Process-wide registry of open push channels, keyed by user id.
///
/// Shared state behind `Arc<RwLock<..>>`; all mutation happens under the
/// write lock. Invariant: a user key never maps to an empty entry list —
/// the key is removed together with its last entry.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Vec<Entry>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for `user_id`.
    ///
    /// The `:ok` comment frame is queued before the connection becomes
    /// visible to senders, so it is always the first thing on the wire.
    pub async fn open(&self, user_id: &str, role: UserRole) -> Connection {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(comment_frame("ok"));

        let entry = Entry {
            id: Uuid::new_v4(),
            role,
            tx,
        };
        let entry_id = entry.id;

        let mut connections = self.connections.write().await;
        connections
            .entry(user_id.to_string())
            .or_default()
            .push(entry);
        metrics::connection_opened();

        tracing::debug!(user_id, role = role.as_str(), %entry_id, "connection opened");
        Connection { entry_id, rx }
    }

    /// Remove one connection of `user_id`. Idempotent; removes the user
    /// key entirely when its last entry goes.
    pub async fn close(&self, user_id: &str, entry_id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(entries) = connections.get_mut(user_id) {
            let before = entries.len();
            entries.retain(|entry| entry.id != entry_id);
            if entries.len() < before {
                metrics::connection_closed();
                tracing::debug!(user_id, %entry_id, "connection closed");
            }
            if entries.is_empty() {
                connections.remove(user_id);
            }
        }
    }

    /// Deliver an event to every open connection of `user_id`.
    ///
    /// Returns the number of connections written to; 0 when the user is
    /// not connected. A failed write removes that one entry and does not
    /// affect delivery to the others.
    pub async fn send_to_user<T: Serialize>(
        &self,
        user_id: &str,
        event: &str,
        payload: &T,
    ) -> usize {
        let frame = match event_frame(event, payload) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(event, error = %err, "failed to serialize event payload");
                return 0;
            }
        };

        let mut connections = self.connections.write().await;
        let Some(entries) = connections.get_mut(user_id) else {
            return 0;
        };

        let mut delivered = 0;
        entries.retain(|entry| match entry.tx.send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                // receiver gone: treat the failed write as a close
                metrics::connection_closed();
                metrics::entry_dropped();
                tracing::debug!(user_id, entry_id = %entry.id, "dropping dead connection");
                false
            }
        });
        if entries.is_empty() {
            connections.remove(user_id);
        }

        metrics::events_sent(event, delivered as u64);
        delivered
    }

    /// Deliver an event to every connection tagged with `role`, across
    /// all users. Write failures drop the affected entry and never abort
    /// the loop.
    pub async fn broadcast_to_role<T: Serialize>(
        &self,
        role: UserRole,
        event: &str,
        payload: &T,
    ) -> usize {
        let frame = match event_frame(event, payload) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(event, error = %err, "failed to serialize event payload");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut connections = self.connections.write().await;
        connections.retain(|user_id, entries| {
            entries.retain(|entry| {
                if entry.role != role {
                    return true;
                }
                match entry.tx.send(frame.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(_) => {
                        metrics::connection_closed();
                        metrics::entry_dropped();
                        tracing::debug!(%user_id, entry_id = %entry.id, "dropping dead connection");
                        false
                    }
                }
            });
            !entries.is_empty()
        });

        metrics::events_sent(event, delivered as u64);
        delivered
    }

    /// Total open connections across all users (diagnostic).
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.values().map(|entries| entries.len()).sum()
    }

    /// Open connections held by one user.
    pub async fn user_connection_count(&self, user_id: &str) -> usize {
        let connections = self.connections.read().await;
        connections
            .get(user_id)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Whether the user currently holds at least one open connection.
    pub async fn is_user_connected(&self, user_id: &str) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(user_id)
    }

    /// Number of distinct users with at least one open connection.
    pub async fn connected_user_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }
}
