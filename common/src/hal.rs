//! Seams between the station logic and the board (or the host simulation).

use std::io::{self, Read, Write};

use crate::types::Reading;

/// Blocking acquisition of one DHT + MQ-135 snapshot.
pub trait SensorSource {
    fn read(&mut self) -> Reading;
}

/// Link-status query, checked before any outbound call.
pub trait NetworkLink {
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// The request never produced an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Outbound JSON POST to the inference endpoint.
pub trait PredictionTransport {
    fn post_json(&mut self, url: &str, body: &str) -> Result<TransportResponse, TransportError>;
}

/// Non-blocking accept on the dashboard listener.
pub trait ConnectionSource {
    type Conn: Read + Write;

    /// `Ok(None)` when nobody is waiting.
    fn poll_accept(&mut self) -> io::Result<Option<Self::Conn>>;
}

/// Monotonic milliseconds since boot.
pub trait Clock {
    fn now_ms(&self) -> u64;
}
