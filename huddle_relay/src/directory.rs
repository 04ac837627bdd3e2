//! Room directory: which connections are in which room
//!
//! Membership is keyed by [`ConnectionId`] rather than the client-supplied
//! user id, since only the connection id is unique and addressable.

use crate::protocol::{ConnectionId, ExistingUser, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One participant in one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub display_name: String,
}

/// A named set of members
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Room {
    members: BTreeMap<ConnectionId, Member>,
}

impl Room {
    /// Members other than `connection`, in a stable order
    pub fn snapshot_excluding(&self, connection: ConnectionId) -> Vec<ExistingUser> {
        self.members
            .values()
            .filter(|member| member.connection_id != connection)
            .map(|member| ExistingUser {
                id: member.connection_id,
                name: member.display_name.clone(),
            })
            .collect()
    }

    /// Insert a member, replacing any previous record for the same connection
    pub fn insert(&mut self, member: Member) -> Option<Member> {
        self.members.insert(member.connection_id, member)
    }

    pub fn remove(&mut self, connection: ConnectionId) -> Option<Member> {
        self.members.remove(&connection)
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.members.contains_key(&connection)
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&Member> {
        self.members.get(&connection)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }
}

/// Mapping from room id to room
///
/// Rooms are created lazily by [`RoomDirectory::get_or_create`]. Removing a
/// room once it empties is up to the caller.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RoomDirectory {
    rooms: BTreeMap<RoomId, Room>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, room_id: &RoomId) -> &mut Room {
        self.rooms.entry(room_id.clone()).or_default()
    }

    /// Remove a room if present
    pub fn remove(&mut self, room_id: &RoomId) -> Option<Room> {
        self.rooms.remove(room_id)
    }

    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of rooms
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Visit every room in key order.
    ///
    /// Keys are collected up front, so a room removed by the time it would be
    /// visited is skipped.
    pub fn for_each_room(&mut self, mut f: impl FnMut(&RoomId, &mut Room)) {
        let room_ids: Vec<RoomId> = self.rooms.keys().cloned().collect();
        for room_id in room_ids {
            if let Some(room) = self.rooms.get_mut(&room_id) {
                f(&room_id, room);
            }
        }
    }

    /// Ids of every room that currently holds `connection`
    pub fn rooms_with_member(&self, connection: ConnectionId) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|(_, room)| room.contains(connection))
            .map(|(room_id, _)| room_id.clone())
            .collect()
    }
}
