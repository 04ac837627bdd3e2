//! Relaying signaling messages and room-wide events
//!
//! Nothing here checks that sender and target share a room; peers only learn
//! each other's ids through the membership events.

use crate::protocol::{ConnectionId, PeerEvent, RoomId, SignalData};
use crate::transport::Transport;
use tracing::debug;

/// Forward a signaling payload to exactly one connection.
///
/// An unknown target is not an error; the transport drops the event.
pub fn relay<T: Transport>(
    transport: &mut T,
    sender: ConnectionId,
    target: ConnectionId,
    data: SignalData,
) {
    debug!(from = %sender, to = %target, kind = data.kind(), "relaying signal");
    transport.send_to(target, PeerEvent::Signal { from: sender, data });
}

/// Deliver a chat or typing event to everyone in the room but the sender
pub fn broadcast_to_room<T: Transport>(
    transport: &mut T,
    room_id: &RoomId,
    sender: ConnectionId,
    event: PeerEvent,
) {
    debug!(from = %sender, room = %room_id, kind = event.kind(), "broadcasting to room");
    transport.broadcast_to_room(room_id, sender, event);
}
