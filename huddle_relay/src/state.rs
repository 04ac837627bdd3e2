//! Server state management for the signaling relay
//!
//! The room directory and the connection mailboxes live together behind one
//! lock, so every join, leave and relay is a single critical section. When a
//! state file is configured the state is reloaded before and saved after each
//! operation, for runtimes that spin up a fresh instance per request.

use crate::config::{AnnouncePolicy, ServerConfig};
use crate::directory::RoomDirectory;
use crate::error::SignalingError;
use crate::mailbox::{Mailboxes, unix_millis};
use crate::membership::{self, Departure};
use crate::protocol::{ClientRequest, ConnectionId, ExistingUser, PeerEvent, RoomId};
use crate::router;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything guarded by the state lock
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
struct InnerState {
    directory: RoomDirectory,
    mailboxes: Mailboxes,
}

impl InnerState {
    /// Load state from file, or create default if file doesn't exist
    fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "discarding unreadable state file");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save state to file
    fn save(&self, path: &Path) -> Result<(), SignalingError> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Refresh liveness for a request and release an acknowledged arrival
    fn admit(&mut self, connection: ConnectionId, now_ms: u64) -> Result<(), SignalingError> {
        if !self.mailboxes.touch(connection, now_ms) {
            return Err(SignalingError::UnknownConnection(connection));
        }
        for arrival in self.mailboxes.take_acknowledged_arrivals(connection) {
            membership::announce(&self.directory, &mut self.mailboxes, arrival);
        }
        Ok(())
    }

    fn leave(&mut self, connection: ConnectionId) -> Vec<Departure> {
        self.mailboxes.discard_arrivals(connection);
        membership::leave(&mut self.directory, &mut self.mailboxes, connection)
    }
}

/// Shared handle to the relay state
#[derive(Clone, Default)]
pub struct ServerState {
    inner: Arc<Mutex<InnerState>>,
    config: Arc<ServerConfig>,
}

impl ServerState {
    /// Create a new in-memory server state with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            inner: Arc::default(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run `f` as one critical section.
    ///
    /// With a state file, a failed save is returned as an error: the next
    /// operation reloads the file, so the change did not take effect.
    fn transact<R>(
        &self,
        f: impl FnOnce(&mut InnerState) -> Result<R, SignalingError>,
    ) -> Result<R, SignalingError> {
        let mut state = self.inner.lock();
        let Some(path) = self.config.state_file.as_deref() else {
            return f(&mut *state);
        };

        *state = InnerState::load(path);
        let value = f(&mut *state)?;
        if let Err(err) = state.save(path) {
            warn!(path = %path.display(), error = %err, "failed to save state file");
            return Err(err);
        }
        Ok(value)
    }

    /// Read the current state without modifying it
    fn inspect<R>(&self, f: impl FnOnce(&InnerState) -> R) -> R {
        let mut state = self.inner.lock();
        if let Some(path) = self.config.state_file.as_deref() {
            *state = InnerState::load(path);
        }
        f(&state)
    }

    /// Open a new connection and return its id
    pub fn connect(&self) -> Result<ConnectionId, SignalingError> {
        let connection = ConnectionId::new();
        let now_ms = unix_millis();
        self.transact(|state| {
            state.mailboxes.open(connection, now_ms);
            Ok(())
        })?;
        info!(%connection, "client connected");
        Ok(connection)
    }

    /// Close a connection, leaving every room it is in.
    ///
    /// Returns whether the connection was open; closing twice is harmless.
    pub fn disconnect(&self, connection: ConnectionId) -> Result<bool, SignalingError> {
        let was_open = self.transact(|state| {
            state.leave(connection);
            Ok(state.mailboxes.close(connection))
        })?;
        if was_open {
            info!(%connection, "client disconnected");
        }
        Ok(was_open)
    }

    /// Apply a request from an open connection
    pub fn handle(
        &self,
        sender: ConnectionId,
        request: ClientRequest,
    ) -> Result<(), SignalingError> {
        let now_ms = unix_millis();
        let announce = self.config.announce;
        self.transact(|state| -> Result<(), SignalingError> {
            state.admit(sender, now_ms)?;
            match request {
                ClientRequest::JoinRoom {
                    room_id,
                    user_id,
                    display_name,
                } => {
                    let arrival = membership::join(
                        &mut state.directory,
                        &mut state.mailboxes,
                        room_id,
                        sender,
                        user_id,
                        display_name,
                    );
                    match announce {
                        AnnouncePolicy::Immediate => {
                            membership::announce(&state.directory, &mut state.mailboxes, arrival)
                        }
                        AnnouncePolicy::Acknowledged => state.mailboxes.hold_arrival(arrival),
                    }
                }
                ClientRequest::Signal { to, data } => {
                    router::relay(&mut state.mailboxes, sender, to, data);
                }
                ClientRequest::ChatMessage {
                    room_id,
                    message,
                    sender_name,
                } => {
                    debug!(%sender, room = %room_id, name = %sender_name, "chat message");
                    router::broadcast_to_room(
                        &mut state.mailboxes,
                        &room_id,
                        sender,
                        PeerEvent::ChatMessage {
                            message,
                            sender_name,
                        },
                    );
                }
                ClientRequest::Typing {
                    room_id,
                    user_id,
                    is_typing,
                } => {
                    router::broadcast_to_room(
                        &mut state.mailboxes,
                        &room_id,
                        sender,
                        PeerEvent::Typing { user_id, is_typing },
                    );
                }
                ClientRequest::LeaveRoom => {
                    state.leave(sender);
                }
                ClientRequest::Ready | ClientRequest::KeepAlive => {}
            }
            Ok(())
        })
    }

    /// Take every event queued for a connection
    pub fn poll(&self, connection: ConnectionId) -> Result<Vec<PeerEvent>, SignalingError> {
        let now_ms = unix_millis();
        self.transact(|state| -> Result<Vec<PeerEvent>, SignalingError> {
            state.admit(connection, now_ms)?;
            state
                .mailboxes
                .drain(connection)
                .ok_or(SignalingError::UnknownConnection(connection))
        })
    }

    /// Disconnect every connection idle for longer than the configured timeout
    pub fn reap_idle(&self) -> Result<Vec<ConnectionId>, SignalingError> {
        self.reap_idle_at(unix_millis())
    }

    pub fn reap_idle_at(&self, now_ms: u64) -> Result<Vec<ConnectionId>, SignalingError> {
        let timeout = self.config.idle_timeout;
        let reaped = self.transact(|state| {
            let idle = state.mailboxes.idle_connections(now_ms, timeout);
            for connection in &idle {
                state.leave(*connection);
                state.mailboxes.close(*connection);
            }
            Ok(idle)
        })?;
        for connection in &reaped {
            info!(%connection, "reaped idle connection");
        }
        Ok(reaped)
    }

    /// Members of a room, in a stable order
    pub fn room_members(&self, room_id: &RoomId) -> Vec<ExistingUser> {
        self.inspect(|state| {
            state
                .directory
                .get(room_id)
                .map(|room| {
                    room.members()
                        .map(|member| ExistingUser {
                            id: member.connection_id,
                            name: member.display_name.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn has_room(&self, room_id: &RoomId) -> bool {
        self.inspect(|state| state.directory.contains(room_id))
    }

    /// Number of rooms with at least one member
    pub fn room_count(&self) -> usize {
        self.inspect(|state| state.directory.len())
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.inspect(|state| state.mailboxes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SignalData;
    use serde_json::json;

    fn join(state: &ServerState, connection: ConnectionId, room: &str, name: &str) {
        state
            .handle(
                connection,
                ClientRequest::JoinRoom {
                    room_id: RoomId::from(room),
                    user_id: format!("user-{name}"),
                    display_name: name.to_string(),
                },
            )
            .unwrap();
    }

    fn user_connected(id: ConnectionId, name: &str) -> PeerEvent {
        PeerEvent::UserConnected {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn requests_from_unknown_connection_are_rejected() {
        let state = ServerState::new();
        let stranger = ConnectionId::new();
        assert!(matches!(
            state.handle(stranger, ClientRequest::KeepAlive),
            Err(SignalingError::UnknownConnection(id)) if id == stranger
        ));
        assert!(state.poll(stranger).is_err());
    }

    #[test]
    fn arrival_waits_for_acknowledgement() {
        let state = ServerState::new();
        let a = state.connect().unwrap();
        let b = state.connect().unwrap();
        join(&state, a, "r1", "Alice");
        state.poll(a).unwrap();

        join(&state, b, "r1", "Bob");
        // Nobody hears about the newcomer before it has picked up its snapshot.
        assert_eq!(state.poll(a).unwrap(), vec![]);

        assert_eq!(
            state.poll(b).unwrap(),
            vec![PeerEvent::ExistingUsers {
                users: vec![ExistingUser {
                    id: a,
                    name: "Alice".to_string()
                }]
            }]
        );
        assert_eq!(state.poll(a).unwrap(), vec![]);

        state.handle(b, ClientRequest::Ready).unwrap();
        assert_eq!(state.poll(a).unwrap(), vec![user_connected(b, "Bob")]);
    }

    #[test]
    fn arrivals_in_two_rooms_are_both_announced() {
        let state = ServerState::new();
        let (a, b, c) = (
            state.connect().unwrap(),
            state.connect().unwrap(),
            state.connect().unwrap(),
        );
        join(&state, a, "r1", "Alice");
        join(&state, c, "r2", "Carol");
        state.poll(a).unwrap();
        state.poll(c).unwrap();

        join(&state, b, "r1", "Bob");
        join(&state, b, "r2", "Bob");
        assert_eq!(state.poll(b).unwrap().len(), 2);
        state.handle(b, ClientRequest::Ready).unwrap();

        assert_eq!(state.poll(a).unwrap(), vec![user_connected(b, "Bob")]);
        assert_eq!(state.poll(c).unwrap(), vec![user_connected(b, "Bob")]);
    }

    #[test]
    fn immediate_policy_announces_on_join() {
        let state = ServerState::with_config(ServerConfig {
            announce: AnnouncePolicy::Immediate,
            ..Default::default()
        });
        let a = state.connect().unwrap();
        let b = state.connect().unwrap();
        join(&state, a, "r1", "Alice");
        join(&state, b, "r1", "Bob");

        let events = state.poll(a).unwrap();
        assert_eq!(events.last(), Some(&user_connected(b, "Bob")));
    }

    #[test]
    fn joiner_leaving_before_acknowledging_is_never_announced() {
        let state = ServerState::new();
        let a = state.connect().unwrap();
        let b = state.connect().unwrap();
        join(&state, a, "r1", "Alice");
        state.poll(a).unwrap();

        join(&state, b, "r1", "Bob");
        state.handle(b, ClientRequest::LeaveRoom).unwrap();
        state.poll(b).unwrap();
        state.handle(b, ClientRequest::Ready).unwrap();

        assert_eq!(state.poll(a).unwrap(), vec![PeerEvent::UserDisconnected { id: b }]);
    }

    #[test]
    fn signal_to_disconnected_peer_is_silent() {
        let state = ServerState::new();
        let a = state.connect().unwrap();
        let b = state.connect().unwrap();
        assert!(state.disconnect(b).unwrap());

        state
            .handle(
                a,
                ClientRequest::Signal {
                    to: b,
                    data: SignalData::Candidate {
                        candidate: json!("candidate:1"),
                    },
                },
            )
            .unwrap();
        assert_eq!(state.poll(a).unwrap(), vec![]);
        assert!(state.poll(b).is_err());
    }

    #[test]
    fn idle_connections_are_reaped_through_leave() {
        let state = ServerState::new();
        let a = state.connect().unwrap();
        join(&state, a, "r1", "Alice");

        let later = unix_millis() + state.config().idle_timeout.as_millis() as u64 + 1_000;
        assert_eq!(state.reap_idle_at(later).unwrap(), vec![a]);
        assert!(!state.has_room(&RoomId::from("r1")));
        assert_eq!(state.connection_count(), 0);
    }

    #[test]
    fn last_member_reaped_after_others_left_explicitly() {
        let state = ServerState::new();
        let room_id = RoomId::from("r1");
        let (a, b, c) = (
            state.connect().unwrap(),
            state.connect().unwrap(),
            state.connect().unwrap(),
        );
        join(&state, a, "r1", "Alice");
        join(&state, b, "r1", "Bob");
        join(&state, c, "r1", "Carol");

        assert!(state.disconnect(b).unwrap());
        assert!(state.has_room(&room_id));
        state.handle(c, ClientRequest::LeaveRoom).unwrap();
        assert!(state.has_room(&room_id));
        assert_eq!(state.room_members(&room_id).len(), 1);

        let later = unix_millis() + state.config().idle_timeout.as_millis() as u64 + 1_000;
        let reaped = state.reap_idle_at(later).unwrap();
        assert!(reaped.contains(&a));
        assert!(!state.has_room(&room_id));
    }

    #[test]
    fn state_file_survives_fresh_handles() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            state_file: Some(dir.path().join("state.json")),
            ..Default::default()
        };

        let first = ServerState::with_config(config.clone());
        let a = first.connect().unwrap();
        join(&first, a, "r1", "Alice");

        let second = ServerState::with_config(config);
        assert_eq!(
            second.room_members(&RoomId::from("r1")),
            vec![ExistingUser {
                id: a,
                name: "Alice".to_string()
            }]
        );
        assert_eq!(
            second.poll(a).unwrap(),
            vec![PeerEvent::ExistingUsers { users: vec![] }]
        );
    }

    #[test]
    fn failed_state_save_is_reported_and_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be written as a file.
        let state = ServerState::with_config(ServerConfig {
            state_file: Some(dir.path().to_path_buf()),
            ..Default::default()
        });

        assert!(matches!(state.connect(), Err(SignalingError::StateFile(_))));
        assert_eq!(state.connection_count(), 0);
    }
}
