use std::sync::Weak;

use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;

use crate::error::{DbError, DriverError, ErrorCode};
use crate::protocol::{codec, response, Response};

use super::ConnInner;

/// Read loop for one connection. Exactly one runs per connection; it owns
/// the read half and is the only task that ever reads from the socket.
///
/// Holds a `Weak` back-reference so that a connection abandoned without
/// `close` can still unwind: once every handle is gone the write half is
/// dropped, the server closes, and the resulting EOF lands here.
pub(crate) async fn run(conn: Weak<ConnInner>, read_half: OwnedReadHalf) {
    let mut stream = BufReader::new(read_half);

    let err = loop {
        let (token, payload) = match codec::read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(e) => break e,
        };

        let Some(conn) = conn.upgrade() else {
            return;
        };
        dispatch(&conn, token, payload);
    };

    if let Some(conn) = conn.upgrade() {
        tracing::warn!("Reader for {} terminated: {}", conn.peer, err);
        conn.fail(err).await;
    }
}

/// Deliver one frame to its waiter.
fn dispatch(conn: &ConnInner, token: u64, payload: Vec<u8>) {
    // A missing entry is the normal race with cursor abandonment.
    let Some(entry) = conn.waiters.get(&token) else {
        tracing::debug!("Dropping frame for unknown token {}", token);
        return;
    };
    let tx = entry.tx.clone();
    let term = entry.term.clone();
    drop(entry);

    let response = match serde_json::from_slice::<Value>(&payload) {
        Ok(value) => response::classify(value, term.as_ref()),
        // The length prefix was honored, so only this token's stream is
        // suspect; the connection survives a bad payload.
        Err(e) => Response::Error(DbError {
            code: ErrorCode::UnexpectedResponse,
            message: format!("Invalid response payload: {}", e),
            term,
            backtrace: None,
        }),
    };

    // Terminal responses retire the waiter before anything else can look
    // the token up.
    if response.is_terminal() {
        conn.waiters.remove(&token);
    }

    // The consumer may already be gone.
    let _ = tx.send(response);
}

impl ConnInner {
    /// Terminal failure: poison the latch and drop every waiter. Each
    /// closed channel surfaces the stored error to its consumer.
    pub(crate) async fn fail(&self, err: DriverError) {
        self.writer.poison(err).await;
        self.waiters.clear();
    }
}
