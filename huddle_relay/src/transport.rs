//! Delivery primitives the membership and routing logic sends through

use crate::protocol::{ConnectionId, PeerEvent, RoomId};

/// Fire-and-forget delivery to connections and room broadcast groups.
///
/// Sends to connections that are not (or no longer) open must be silently
/// dropped.
pub trait Transport {
    /// Add a connection to a room's broadcast group
    fn subscribe(&mut self, connection: ConnectionId, room_id: &RoomId);

    /// Remove a connection from a room's broadcast group
    fn unsubscribe(&mut self, connection: ConnectionId, room_id: &RoomId);

    /// Unicast an event
    fn send_to(&mut self, connection: ConnectionId, event: PeerEvent);

    /// Deliver an event to every member of a room's broadcast group but `exclude`
    fn broadcast_to_room(&mut self, room_id: &RoomId, exclude: ConnectionId, event: PeerEvent);
}
