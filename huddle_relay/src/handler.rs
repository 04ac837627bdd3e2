//! HTTP long-polling handlers for the signaling relay
//!
//! This module implements long-polling based signaling that works over
//! plain HTTP without WebSocket upgrades or long-lived connections.

use crate::error::{ClientRequestError, SignalingError};
use crate::protocol::{ClientRequest, ConnectionId, PeerEvent};
use crate::state::ServerState;
use http::header::{self, HeaderMap, HeaderValue};
use http::StatusCode;
use std::str::FromStr;
use tracing::{debug, warn};
use wstd::http::{Body, Method, Request, Response};

const PEER_ID_HEADER: &str = "x-peer-id";

const USAGE: &str = "Huddle Relay Signaling Server (Long-Polling)\n\
     \n\
     Endpoints:\n\
     - GET /health - Health check\n\
     - POST /connect - Open a connection, returns {\"peer_id\": \"uuid\"}\n\
     - GET /poll?peer_id={id} - Take pending events\n\
     - POST /events - Send a request (X-Peer-Id header required)\n\
     - POST /disconnect - Close the connection (X-Peer-Id header required)\n\
     \n\
     Requests (POST /events body):\n\
     {\"event\":\"join-room\",\"roomId\":\"r1\",\"userId\":\"u1\",\"displayName\":\"Alice\"}\n\
     {\"event\":\"signal\",\"to\":\"uuid\",\"type\":\"offer\",\"offer\":...}\n\
     {\"event\":\"chat-message\",\"roomId\":\"r1\",\"message\":\"hi\",\"senderName\":\"Alice\"}\n\
     {\"event\":\"typing\",\"roomId\":\"r1\",\"userId\":\"u1\",\"isTyping\":true}\n\
     {\"event\":\"ready\"} {\"event\":\"leave-room\"} {\"event\":\"keep-alive\"}\n\
     \n\
     Poll response format: {\"peer_id\": \"uuid\", \"events\": [...]}\n";

/// Build a response with the CORS header every endpoint carries
fn respond(status: StatusCode, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

fn respond_json(value: serde_json::Value) -> Response<Body> {
    let mut response = respond(StatusCode::OK, Body::from(value.to_string()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn ok() -> Response<Body> {
    respond(StatusCode::OK, Body::from("OK"))
}

fn client_error(err: ClientRequestError) -> Response<Body> {
    debug!(error = %err, "rejecting client request");
    respond(StatusCode::BAD_REQUEST, Body::from(err.to_string()))
}

fn signaling_error(err: SignalingError) -> Response<Body> {
    match err {
        SignalingError::UnknownConnection(_) => {
            respond(StatusCode::NOT_FOUND, Body::from(err.to_string()))
        }
        other => {
            warn!(error = %other, "request failed");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                Body::from(other.to_string()),
            )
        }
    }
}

/// Get query parameter from URI
fn get_query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next()?;
        if k == key { Some(v) } else { None }
    })
}

fn parse_peer_id(raw: Option<&str>) -> Result<ConnectionId, ClientRequestError> {
    let raw = raw.ok_or(ClientRequestError::MissingPeerId)?;
    Ok(ConnectionId::from_str(raw.trim())?)
}

/// Sender id from the `x-peer-id` header
fn peer_id_from_headers(headers: &HeaderMap) -> Result<ConnectionId, ClientRequestError> {
    parse_peer_id(
        headers
            .get(PEER_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    )
}

/// Open a new connection
fn handle_connect(state: &ServerState) -> Response<Body> {
    match state.connect() {
        Ok(peer_id) => respond_json(serde_json::json!({ "peer_id": peer_id })),
        Err(err) => signaling_error(err),
    }
}

/// Drain a connection's pending events
fn handle_poll(query: Option<&str>, state: &ServerState) -> Response<Body> {
    let peer_id = match parse_peer_id(get_query_param(query, "peer_id")) {
        Ok(id) => id,
        Err(err) => return client_error(err),
    };

    match state.poll(peer_id) {
        Ok(events) => respond_json(poll_body(peer_id, &events)),
        Err(err) => signaling_error(err),
    }
}

fn poll_body(peer_id: ConnectionId, events: &[PeerEvent]) -> serde_json::Value {
    serde_json::json!({
        "peer_id": peer_id,
        "events": events,
    })
}

/// Handle a POST /events request
async fn handle_events(request: Request<Body>, state: &ServerState) -> Response<Body> {
    let sender = match peer_id_from_headers(request.headers()) {
        Ok(id) => id,
        Err(err) => return client_error(err),
    };

    let mut body = request.into_body();
    let body_str = match body.str_contents().await {
        Ok(s) => s.to_string(),
        Err(e) => return client_error(ClientRequestError::Body(format!("{e:?}"))),
    };

    let client_request = match ClientRequest::from_str(&body_str) {
        Ok(req) => req,
        Err(e) => return client_error(ClientRequestError::Json(e)),
    };

    match state.handle(sender, client_request) {
        Ok(()) => ok(),
        Err(err) => signaling_error(err),
    }
}

/// Handle a POST /disconnect request
fn handle_disconnect(headers: &HeaderMap, state: &ServerState) -> Response<Body> {
    let peer_id = match peer_id_from_headers(headers) {
        Ok(id) => id,
        Err(err) => return client_error(err),
    };

    match state.disconnect(peer_id) {
        Ok(_) => ok(),
        Err(err) => signaling_error(err),
    }
}

/// Handle CORS preflight
fn handle_cors_preflight() -> Response<Body> {
    let mut response = respond(StatusCode::NO_CONTENT, Body::empty());
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type, x-peer-id"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
    response
}

/// Handle an HTTP request - main router
pub async fn handle_request(
    request: Request<Body>,
    state: &ServerState,
) -> Result<Response<Body>, wstd::http::Error> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path();

    // CORS preflight
    if method == Method::OPTIONS {
        return Ok(handle_cors_preflight());
    }

    if let Err(err) = state.reap_idle() {
        warn!(error = %err, "failed to reap idle connections");
    }

    let response = match (&method, path) {
        (&Method::GET, "/health") => ok(),
        (&Method::POST, "/connect") => handle_connect(state),
        (&Method::GET, "/poll") => handle_poll(uri.query(), state),
        (&Method::POST, "/events") => handle_events(request, state).await,
        (&Method::POST, "/disconnect") => handle_disconnect(request.headers(), state),
        (&Method::GET, "/") => {
            let mut response = respond(StatusCode::OK, Body::from(USAGE));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            response
        }
        _ => respond(StatusCode::NOT_FOUND, Body::from("Not Found")),
    };
    Ok(response)
}
