//! Session-scoped subscriber groups
//!
//! Each connection owns an unbounded channel; a session group is the set of
//! connections that joined it. Publishing to a session fans the message out
//! to every member and prunes connections whose receiver has gone away.

use crate::streaming::events::{HubEvent, HubMessage};
use crate::streaming::sink::EventSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

/// Identifier of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Default)]
struct Groups {
    connections: HashMap<ConnectionId, UnboundedSender<HubMessage>>,
    sessions: HashMap<String, HashSet<ConnectionId>>,
}

impl Groups {
    fn remove_connection(&mut self, connection: ConnectionId) {
        self.connections.remove(&connection);
        self.sessions.retain(|_, members| {
            members.remove(&connection);
            !members.is_empty()
        });
    }
}

/// Connection registry and session fan-out
#[derive(Default)]
pub struct SubscriberGroups {
    inner: RwLock<Groups>,
}

impl SubscriberGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the receiver for its outbound messages
    pub fn connect(&self) -> (ConnectionId, UnboundedReceiver<HubMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = ConnectionId::new();
        self.write().connections.insert(connection, tx);
        info!(%connection, "Client connected");
        (connection, rx)
    }

    /// Drop a connection and all of its group memberships
    pub fn disconnect(&self, connection: ConnectionId) {
        self.write().remove_connection(connection);
        info!(%connection, "Client disconnected");
    }

    /// Add a connection to a session group. Returns false for unknown connections.
    pub fn join(&self, connection: ConnectionId, session_id: &str) -> bool {
        let mut groups = self.write();
        if !groups.connections.contains_key(&connection) {
            return false;
        }
        groups
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(connection);
        info!(%connection, session_id, "Client joined session");
        true
    }

    /// Remove a connection from a session group
    pub fn leave(&self, connection: ConnectionId, session_id: &str) {
        let mut groups = self.write();
        if let Some(members) = groups.sessions.get_mut(session_id) {
            members.remove(&connection);
            if members.is_empty() {
                groups.sessions.remove(session_id);
            }
        }
        info!(%connection, session_id, "Client left session");
    }

    /// Send a message to one connection only
    pub fn send_to(&self, connection: ConnectionId, message: HubMessage) -> bool {
        let delivered = self
            .read()
            .connections
            .get(&connection)
            .map(|tx| tx.send(message).is_ok())
            .unwrap_or(false);

        if !delivered {
            self.write().remove_connection(connection);
        }
        delivered
    }

    /// Fan a session event out to every member; returns the number delivered
    pub fn publish(&self, session_id: &str, event: HubEvent) -> usize {
        let message = HubMessage::for_session(session_id, event);
        let mut closed = Vec::new();
        let mut delivered = 0;

        {
            let groups = self.read();
            let Some(members) = groups.sessions.get(session_id) else {
                return 0;
            };
            for connection in members {
                match groups.connections.get(connection) {
                    Some(tx) if tx.send(message.clone()).is_ok() => delivered += 1,
                    _ => closed.push(*connection),
                }
            }
        }

        if !closed.is_empty() {
            let mut groups = self.write();
            for connection in closed {
                debug!(%connection, "Pruning closed connection");
                groups.remove_connection(connection);
            }
        }
        delivered
    }

    pub fn members(&self, session_id: &str) -> usize {
        self.read()
            .sessions
            .get(session_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Groups> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Groups> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventSink for SubscriberGroups {
    async fn emit(&self, session_id: &str, event: HubEvent) {
        self.publish(session_id, event);
    }

    fn subscriber_count(&self, session_id: &str) -> usize {
        self.members(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_only_members() {
        let groups = SubscriberGroups::new();
        let (a, mut rx_a) = groups.connect();
        let (_b, mut rx_b) = groups.connect();

        assert!(groups.join(a, "s1"));
        assert_eq!(groups.publish("s1", HubEvent::StreamingStarted), 1);

        let message = rx_a.try_recv().unwrap();
        assert_eq!(message.session_id.as_deref(), Some("s1"));
        assert_eq!(message.event, HubEvent::StreamingStarted);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_join_unknown_connection_fails() {
        let groups = SubscriberGroups::new();
        assert!(!groups.join(ConnectionId::new(), "s1"));
        assert_eq!(groups.members("s1"), 0);
    }

    #[test]
    fn test_leave_and_disconnect() {
        let groups = SubscriberGroups::new();
        let (a, _rx_a) = groups.connect();
        let (b, _rx_b) = groups.connect();
        groups.join(a, "s1");
        groups.join(b, "s1");
        groups.join(b, "s2");
        assert_eq!(groups.members("s1"), 2);

        groups.leave(a, "s1");
        assert_eq!(groups.members("s1"), 1);

        groups.disconnect(b);
        assert_eq!(groups.members("s1"), 0);
        assert_eq!(groups.members("s2"), 0);
        assert_eq!(groups.connection_count(), 1);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let groups = SubscriberGroups::new();
        let (a, rx_a) = groups.connect();
        groups.join(a, "s1");
        drop(rx_a);

        assert_eq!(groups.publish("s1", HubEvent::StreamingStarted), 0);
        assert_eq!(groups.members("s1"), 0);
        assert_eq!(groups.connection_count(), 0);
    }

    #[test]
    fn test_send_to_single_connection() {
        let groups = SubscriberGroups::new();
        let (a, mut rx_a) = groups.connect();

        assert!(groups.send_to(a, HubMessage::direct(HubEvent::error("busy"))));
        assert_eq!(rx_a.try_recv().unwrap().event, HubEvent::error("busy"));
        assert!(!groups.send_to(ConnectionId::new(), HubMessage::direct(HubEvent::StreamingStarted)));
    }
}
