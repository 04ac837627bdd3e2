//! Error types for the signaling relay

use crate::protocol::ConnectionId;
use thiserror::Error;

/// Errors that can occur while serving a connection
#[derive(Error, Debug)]
pub enum SignalingError {
    /// The connection was never opened, was reaped, or has disconnected
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to read or write the state file
    #[error("State file error: {0}")]
    StateFile(#[from] std::io::Error),
}

/// Errors from client requests
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// The `x-peer-id` header or `peer_id` parameter was absent
    #[error("Missing peer id")]
    MissingPeerId,

    /// The peer id was not a valid UUID
    #[error("Invalid peer id: {0}")]
    InvalidPeerId(#[from] uuid::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to read the request body
    #[error("Failed to read body: {0}")]
    Body(String),
}

/// Errors from reading the server configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}
