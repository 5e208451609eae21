//! Single-connection dashboard server.
//!
//! Every accepted connection gets the same page: the request is read until a
//! blank line, the peer hangs up, or the read deadline passes, and is never
//! inspected beyond that.

use std::io::{ErrorKind, Read, Write};

use log::{debug, info};

use crate::hal::Clock;

pub const REQUEST_TERMINATOR: &[u8] = b"\r\n\r\n";
pub const MAX_REQUEST_BYTES: usize = 4096;

const RESPONSE_HEADER: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/html; charset=UTF-8\r\n\
Connection: close\r\n\
\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    Terminator,
    PeerClosed,
    Timeout,
    BufferFull,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
    pub read_end: ReadEnd,
    pub request_bytes: usize,
    pub response_bytes: usize,
    pub write_ok: bool,
}

/// Services one connection end to end. `render` runs after the read phase
/// regardless of how it ended.
pub fn serve_connection<C, K, F>(
    conn: &mut C,
    clock: &K,
    read_timeout_ms: u64,
    render: F,
) -> ServeSummary
where
    C: Read + Write,
    K: Clock + ?Sized,
    F: FnOnce() -> String,
{
    info!("new client connected");

    let (request, read_end) = read_request(conn, clock, read_timeout_ms);
    debug!(
        "request read ended with {:?} after {} bytes",
        read_end,
        request.len()
    );

    let body = render();
    let write_ok = match write_response(conn, &body) {
        Ok(()) => true,
        Err(err) => {
            debug!("client dropped during response: {err}");
            false
        }
    };

    info!("client disconnected");
    ServeSummary {
        read_end,
        request_bytes: request.len(),
        response_bytes: RESPONSE_HEADER.len() + body.len(),
        write_ok,
    }
}

pub fn read_request<C, K>(conn: &mut C, clock: &K, read_timeout_ms: u64) -> (Vec<u8>, ReadEnd)
where
    C: Read,
    K: Clock + ?Sized,
{
    let deadline = clock.now_ms().saturating_add(read_timeout_ms);
    let mut request = Vec::with_capacity(512);
    let mut chunk = [0_u8; 256];

    loop {
        if clock.now_ms() >= deadline {
            return (request, ReadEnd::Timeout);
        }

        match conn.read(&mut chunk) {
            Ok(0) => return (request, ReadEnd::PeerClosed),
            Ok(read) => {
                let search_from = request.len().saturating_sub(REQUEST_TERMINATOR.len() - 1);
                let room = MAX_REQUEST_BYTES - request.len();
                request.extend_from_slice(&chunk[..read.min(room)]);

                if contains_terminator(&request[search_from..]) {
                    return (request, ReadEnd::Terminator);
                }
                if request.len() >= MAX_REQUEST_BYTES {
                    return (request, ReadEnd::BufferFull);
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                debug!("client read failed: {err}");
                return (request, ReadEnd::Error);
            }
        }
    }
}

pub fn write_response<C: Write>(conn: &mut C, body: &str) -> std::io::Result<()> {
    conn.write_all(RESPONSE_HEADER.as_bytes())?;
    conn.write_all(body.as_bytes())?;
    conn.flush()
}

fn contains_terminator(window: &[u8]) -> bool {
    window
        .windows(REQUEST_TERMINATOR.len())
        .any(|candidate| candidate == REQUEST_TERMINATOR)
}
