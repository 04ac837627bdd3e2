//! WASI-compatible WebRTC signaling relay using wstd
//!
//! Clients join named rooms, learn who is already there, and exchange
//! offers, answers and connectivity candidates through the relay until they
//! can talk to each other directly. The relay never touches media.
//!
//! # Protocol
//!
//! Instead of WebSockets, this server uses HTTP long-polling:
//!
//! - **POST /connect** - Open a connection and get its peer id
//! - **GET /poll?peer_id={id}** - Take pending events
//! - **POST /events** - Send a request (X-Peer-Id header required)
//! - **POST /disconnect** - Close the connection (X-Peer-Id header required)
//! - **GET /health** - Health check
//!
//! ## Requests (client → server)
//!
//! - `{"event": "join-room", "roomId": "r1", "userId": "u1", "displayName": "Alice"}`
//! - `{"event": "signal", "to": "<uuid>", "type": "offer", "offer": ...}`
//! - `{"event": "chat-message", "roomId": "r1", "message": "hi", "senderName": "Alice"}`
//! - `{"event": "typing", "roomId": "r1", "userId": "u1", "isTyping": true}`
//! - `{"event": "ready"}`, `{"event": "leave-room"}`, `{"event": "keep-alive"}`
//!
//! ## Events (server → client)
//!
//! - `{"event": "existing-users", "users": [{"id": "<uuid>", "name": "Alice"}]}`
//! - `{"event": "user-connected", "id": "<uuid>", "name": "Bob"}`
//! - `{"event": "signal", "from": "<uuid>", "type": "answer", "answer": ...}`
//! - `{"event": "chat-message", "message": "hi", "senderName": "Alice"}`
//! - `{"event": "typing", "userId": "u1", "isTyping": true}`
//! - `{"event": "user-disconnected", "id": "<uuid>"}`
//!
//! A newcomer's `user-connected` event is held back until the newcomer has
//! polled its `existing-users` snapshot and come back with another request.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! wasmtime serve -S common --addr 127.0.0.1:3536 huddle-relay.wasm
//!
//! # Open a connection
//! curl -X POST http://127.0.0.1:3536/connect
//!
//! # Join a room
//! curl -X POST -H "X-Peer-Id: <your-id>" \
//!   -d '{"event":"join-room","roomId":"r1","userId":"u1","displayName":"Alice"}' \
//!   http://127.0.0.1:3536/events
//!
//! # Poll for events
//! curl "http://127.0.0.1:3536/poll?peer_id=<your-id>"
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod directory;
pub mod error;
pub mod handler;
pub mod mailbox;
pub mod membership;
pub mod protocol;
pub mod router;
pub mod state;
pub mod transport;

pub use config::{AnnouncePolicy, ServerConfig};
pub use error::SignalingError;
pub use handler::handle_request;
pub use protocol::{ClientRequest, ConnectionId, PeerEvent, RoomId, SignalData};
pub use state::ServerState;
