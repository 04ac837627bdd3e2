//! Connection registry for the long-polling transport
//!
//! Every open connection owns a mailbox of queued events that is drained by
//! its next poll. Room broadcast groups live here too, independent of the
//! room directory.

use crate::membership::PendingArrival;
use crate::protocol::{ConnectionId, PeerEvent, RoomId};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// An arrival held back until the joiner has picked up its snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeldArrival {
    arrival: PendingArrival,
    snapshot_delivered: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Mailbox {
    events: VecDeque<PeerEvent>,
    last_seen_ms: u64,
    held: Vec<HeldArrival>,
}

/// Open connections and room broadcast groups
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Mailboxes {
    connections: BTreeMap<ConnectionId, Mailbox>,
    groups: BTreeMap<RoomId, BTreeSet<ConnectionId>>,
}

impl Mailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection
    pub fn open(&mut self, connection: ConnectionId, now_ms: u64) {
        self.connections.insert(
            connection,
            Mailbox {
                last_seen_ms: now_ms,
                ..Default::default()
            },
        );
    }

    /// Drop a connection, its queued events and its group subscriptions.
    ///
    /// Returns whether the connection was open.
    pub fn close(&mut self, connection: ConnectionId) -> bool {
        self.groups.retain(|_, members| {
            members.remove(&connection);
            !members.is_empty()
        });
        self.connections.remove(&connection).is_some()
    }

    pub fn is_open(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    /// Number of open connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Record activity. Returns false for unknown connections.
    pub fn touch(&mut self, connection: ConnectionId, now_ms: u64) -> bool {
        match self.connections.get_mut(&connection) {
            Some(mailbox) => {
                mailbox.last_seen_ms = now_ms;
                true
            }
            None => false,
        }
    }

    /// Take every queued event, oldest first.
    ///
    /// Held arrivals whose snapshots were queued before this drain count as
    /// delivered from here on.
    pub fn drain(&mut self, connection: ConnectionId) -> Option<Vec<PeerEvent>> {
        let mailbox = self.connections.get_mut(&connection)?;
        for held in &mut mailbox.held {
            held.snapshot_delivered = true;
        }
        Some(mailbox.events.drain(..).collect())
    }

    /// Hold an arrival until the joiner acknowledges its snapshot.
    ///
    /// Arrivals for different rooms are held side by side; a newer join to
    /// the same room replaces the one still held for it.
    pub fn hold_arrival(&mut self, arrival: PendingArrival) {
        let Some(mailbox) = self.connections.get_mut(&arrival.connection) else {
            return;
        };
        mailbox
            .held
            .retain(|held| held.arrival.room_id != arrival.room_id);
        mailbox.held.push(HeldArrival {
            arrival,
            snapshot_delivered: false,
        });
    }

    /// Forget every held arrival, e.g. because the joiner left its rooms
    pub fn discard_arrivals(&mut self, connection: ConnectionId) {
        if let Some(mailbox) = self.connections.get_mut(&connection) {
            mailbox.held.clear();
        }
    }

    /// Release every held arrival whose snapshot has already been polled
    pub fn take_acknowledged_arrivals(&mut self, connection: ConnectionId) -> Vec<PendingArrival> {
        let Some(mailbox) = self.connections.get_mut(&connection) else {
            return Vec::new();
        };
        let (released, pending): (Vec<_>, Vec<_>) = mailbox
            .held
            .drain(..)
            .partition(|held| held.snapshot_delivered);
        mailbox.held = pending;
        released.into_iter().map(|held| held.arrival).collect()
    }

    /// Connections not seen for longer than `timeout`
    pub fn idle_connections(&self, now_ms: u64, timeout: Duration) -> Vec<ConnectionId> {
        let timeout_ms = timeout.as_millis() as u64;
        self.connections
            .iter()
            .filter(|(_, mailbox)| now_ms.saturating_sub(mailbox.last_seen_ms) > timeout_ms)
            .map(|(connection, _)| *connection)
            .collect()
    }

    /// Members of a room's broadcast group
    #[cfg(test)]
    fn group(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.groups
            .get(room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Transport for Mailboxes {
    fn subscribe(&mut self, connection: ConnectionId, room_id: &RoomId) {
        if self.is_open(connection) {
            self.groups.entry(room_id.clone()).or_default().insert(connection);
        }
    }

    fn unsubscribe(&mut self, connection: ConnectionId, room_id: &RoomId) {
        if let Some(members) = self.groups.get_mut(room_id) {
            members.remove(&connection);
            if members.is_empty() {
                self.groups.remove(room_id);
            }
        }
    }

    fn send_to(&mut self, connection: ConnectionId, event: PeerEvent) {
        match self.connections.get_mut(&connection) {
            Some(mailbox) => mailbox.events.push_back(event),
            None => {
                trace!(%connection, kind = event.kind(), "dropping event for closed connection")
            }
        }
    }

    fn broadcast_to_room(&mut self, room_id: &RoomId, exclude: ConnectionId, event: PeerEvent) {
        let Some(members) = self.groups.get(room_id) else {
            return;
        };
        for connection in members.iter().filter(|id| **id != exclude) {
            if let Some(mailbox) = self.connections.get_mut(connection) {
                mailbox.events.push_back(event.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrival(connection: ConnectionId, room: &str) -> PendingArrival {
        PendingArrival {
            room_id: RoomId::from(room),
            connection,
            display_name: "Alice".to_string(),
        }
    }

    #[test]
    fn send_to_closed_connection_is_dropped() {
        let mut mailboxes = Mailboxes::new();
        let gone = ConnectionId::new();
        mailboxes.send_to(gone, PeerEvent::UserDisconnected { id: gone });
        assert!(mailboxes.drain(gone).is_none());
        assert!(mailboxes.is_empty());
    }

    #[test]
    fn drain_returns_events_in_order_and_empties_queue() {
        let mut mailboxes = Mailboxes::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        mailboxes.open(a, 0);
        mailboxes.send_to(a, PeerEvent::UserConnected { id: b, name: "Bob".to_string() });
        mailboxes.send_to(a, PeerEvent::UserDisconnected { id: b });

        let kinds: Vec<&str> = mailboxes.drain(a).unwrap().iter().map(PeerEvent::kind).collect();
        assert_eq!(kinds, vec!["user-connected", "user-disconnected"]);
        assert_eq!(mailboxes.drain(a), Some(vec![]));
    }

    #[test]
    fn subscribe_ignores_closed_connections() {
        let mut mailboxes = Mailboxes::new();
        let room_id = RoomId::from("r1");
        mailboxes.subscribe(ConnectionId::new(), &room_id);
        assert!(mailboxes.group(&room_id).is_empty());
    }

    #[test]
    fn close_drops_group_subscriptions() {
        let mut mailboxes = Mailboxes::new();
        let a = ConnectionId::new();
        let room_id = RoomId::from("r1");
        mailboxes.open(a, 0);
        mailboxes.subscribe(a, &room_id);
        assert_eq!(mailboxes.group(&room_id), vec![a]);

        assert!(mailboxes.close(a));
        assert!(!mailboxes.close(a));
        assert!(mailboxes.group(&room_id).is_empty());
    }

    #[test]
    fn held_arrival_released_only_after_snapshot_drained() {
        let mut mailboxes = Mailboxes::new();
        let a = ConnectionId::new();
        mailboxes.open(a, 0);
        mailboxes.send_to(a, PeerEvent::ExistingUsers { users: vec![] });
        mailboxes.hold_arrival(arrival(a, "r1"));

        assert!(mailboxes.take_acknowledged_arrivals(a).is_empty());
        mailboxes.drain(a);
        assert_eq!(mailboxes.take_acknowledged_arrivals(a), vec![arrival(a, "r1")]);
        assert!(mailboxes.take_acknowledged_arrivals(a).is_empty());
    }

    #[test]
    fn arrivals_for_different_rooms_are_held_side_by_side() {
        let mut mailboxes = Mailboxes::new();
        let a = ConnectionId::new();
        mailboxes.open(a, 0);
        mailboxes.hold_arrival(arrival(a, "r1"));
        mailboxes.hold_arrival(arrival(a, "r2"));
        mailboxes.drain(a);

        assert_eq!(
            mailboxes.take_acknowledged_arrivals(a),
            vec![arrival(a, "r1"), arrival(a, "r2")]
        );
    }

    #[test]
    fn rejoining_same_room_replaces_held_arrival() {
        let mut mailboxes = Mailboxes::new();
        let a = ConnectionId::new();
        mailboxes.open(a, 0);
        mailboxes.hold_arrival(arrival(a, "r1"));
        mailboxes.drain(a);
        let renamed = PendingArrival {
            display_name: "Alicia".to_string(),
            ..arrival(a, "r1")
        };
        mailboxes.hold_arrival(renamed);

        // The newer join has not had its snapshot polled yet.
        assert!(mailboxes.take_acknowledged_arrivals(a).is_empty());
        mailboxes.drain(a);
        let released = mailboxes.take_acknowledged_arrivals(a);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].display_name, "Alicia");
    }

    #[test]
    fn only_delivered_arrivals_are_released() {
        let mut mailboxes = Mailboxes::new();
        let a = ConnectionId::new();
        mailboxes.open(a, 0);
        mailboxes.hold_arrival(arrival(a, "r1"));
        mailboxes.drain(a);
        mailboxes.hold_arrival(arrival(a, "r2"));

        assert_eq!(mailboxes.take_acknowledged_arrivals(a), vec![arrival(a, "r1")]);
        mailboxes.drain(a);
        assert_eq!(mailboxes.take_acknowledged_arrivals(a), vec![arrival(a, "r2")]);
    }

    #[test]
    fn discard_drops_every_held_arrival() {
        let mut mailboxes = Mailboxes::new();
        let a = ConnectionId::new();
        mailboxes.open(a, 0);
        mailboxes.hold_arrival(arrival(a, "r1"));
        mailboxes.hold_arrival(arrival(a, "r2"));
        mailboxes.discard_arrivals(a);
        mailboxes.drain(a);

        assert!(mailboxes.take_acknowledged_arrivals(a).is_empty());
    }

    #[test]
    fn idle_connections_respects_timeout() {
        let mut mailboxes = Mailboxes::new();
        let stale = ConnectionId::new();
        let fresh = ConnectionId::new();
        mailboxes.open(stale, 1_000);
        mailboxes.open(fresh, 1_000);
        mailboxes.touch(fresh, 60_000);

        let idle = mailboxes.idle_connections(62_000, Duration::from_secs(60));
        assert_eq!(idle, vec![stale]);
    }
}
