//! Joining and leaving rooms
//!
//! A join unicasts the existing-users snapshot to the newcomer and hands back
//! a [`PendingArrival`]. Only [`announce`] turns that into `user-connected`
//! events for the rest of the room, so the snapshot is always sent before
//! anyone else can learn about the newcomer and start signaling to it.

use crate::directory::{Member, RoomDirectory};
use crate::protocol::{ConnectionId, PeerEvent, RoomId};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A join whose arrival has not been announced to the room yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use = "the rest of the room only learns about the newcomer through `announce`"]
pub struct PendingArrival {
    pub room_id: RoomId,
    pub connection: ConnectionId,
    pub display_name: String,
}

/// One room a connection was removed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: RoomId,
    pub member: Member,
    /// Whether the room was deleted because it became empty
    pub room_closed: bool,
}

/// Join a room and unicast the existing-users snapshot to the joiner.
///
/// A repeated join from the same connection overwrites its member record.
pub fn join<T: Transport>(
    directory: &mut RoomDirectory,
    transport: &mut T,
    room_id: RoomId,
    connection: ConnectionId,
    user_id: String,
    display_name: String,
) -> PendingArrival {
    transport.subscribe(connection, &room_id);

    let room = directory.get_or_create(&room_id);
    // Snapshot before inserting so the joiner never sees itself.
    let existing = room.snapshot_excluding(connection);
    room.insert(Member {
        connection_id: connection,
        user_id,
        display_name: display_name.clone(),
    });

    info!(
        %connection,
        room = %room_id,
        name = %display_name,
        existing = existing.len(),
        members = room.len(),
        "joined room"
    );

    transport.send_to(connection, PeerEvent::ExistingUsers { users: existing });

    PendingArrival {
        room_id,
        connection,
        display_name,
    }
}

/// Tell the rest of the room about a newcomer.
///
/// Broadcasts to every current member but the newcomer. Nothing is sent if
/// the newcomer has left the room in the meantime.
pub fn announce<T: Transport>(
    directory: &RoomDirectory,
    transport: &mut T,
    arrival: PendingArrival,
) {
    let still_present = directory
        .get(&arrival.room_id)
        .is_some_and(|room| room.contains(arrival.connection));
    if !still_present {
        debug!(connection = %arrival.connection, room = %arrival.room_id, "newcomer already gone");
        return;
    }

    debug!(connection = %arrival.connection, room = %arrival.room_id, "announcing arrival");
    transport.broadcast_to_room(
        &arrival.room_id,
        arrival.connection,
        PeerEvent::UserConnected {
            id: arrival.connection,
            name: arrival.display_name,
        },
    );
}

/// Remove a connection from every room it is in.
///
/// Remaining members get `user-disconnected`, and rooms left empty are
/// deleted. Calling this again for the same connection does nothing.
pub fn leave<T: Transport>(
    directory: &mut RoomDirectory,
    transport: &mut T,
    connection: ConnectionId,
) -> Vec<Departure> {
    let mut removed = Vec::new();
    directory.for_each_room(|room_id, room| {
        if let Some(member) = room.remove(connection) {
            removed.push((room_id.clone(), member, room.is_empty()));
        }
    });

    removed
        .into_iter()
        .map(|(room_id, member, room_closed)| {
            transport.unsubscribe(connection, &room_id);
            transport.broadcast_to_room(
                &room_id,
                connection,
                PeerEvent::UserDisconnected { id: connection },
            );
            info!(%connection, room = %room_id, name = %member.display_name, "left room");

            if room_closed {
                directory.remove(&room_id);
                info!(room = %room_id, "room is empty and removed");
            }

            Departure {
                room_id,
                member,
                room_closed,
            }
        })
        .collect()
}
