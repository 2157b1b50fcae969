//! In-process server double for driver tests
//!
//! Speaks the real handshake and framing over a loopback socket and
//! answers frames according to a per-test script.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::protocol::codec;

/// A scripted single-connection server.
///
/// The script maps each received `(token, payload)` frame to the response
/// frames to send back. Every frame received after the handshake is
/// recorded for assertions.
pub(crate) struct MockServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<(u64, Value)>>>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    pub(crate) async fn start<F>(handshake_reply: &str, mut script: F) -> Self
    where
        F: FnMut(u64, &Value) -> Vec<(u64, Value)> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let reply = handshake_reply.to_string();
        let record = Arc::clone(&received);
        let accept_task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            serve_handshake(&mut stream, &reply).await;

            loop {
                let Some((token, payload)) = read_frame_raw(&mut stream).await else {
                    return;
                };
                let query: Value = serde_json::from_slice(&payload).unwrap();
                record.lock().unwrap().push((token, query.clone()));

                for (response_token, response) in script(token, &query) {
                    let body = serde_json::to_vec(&response).unwrap();
                    let frame = codec::encode_frame(response_token, &body);
                    if stream.write_all(&frame).await.is_err() {
                        return;
                    }
                }
            }
        });

        MockServer {
            addr,
            received,
            accept_task,
        }
    }

    pub(crate) fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Frames received so far, in wire order.
    pub(crate) fn frames(&self) -> Vec<(u64, Value)> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Consume the client handshake and send back a NUL-terminated reply.
pub(crate) async fn serve_handshake(stream: &mut TcpStream, reply: &str) {
    let mut word = [0u8; 4];
    stream.read_exact(&mut word).await.unwrap(); // magic
    stream.read_exact(&mut word).await.unwrap();
    let auth_len = u32::from_le_bytes(word) as usize;
    let mut auth = vec![0u8; auth_len];
    stream.read_exact(&mut auth).await.unwrap();
    stream.read_exact(&mut word).await.unwrap(); // wire protocol

    stream.write_all(reply.as_bytes()).await.unwrap();
    stream.write_all(&[0]).await.unwrap();
}

/// Read one request frame; `None` once the client is gone.
pub(crate) async fn read_frame_raw(stream: &mut TcpStream) -> Option<(u64, Vec<u8>)> {
    let mut token_buf = [0u8; 8];
    stream.read_exact(&mut token_buf).await.ok()?;
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.ok()?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.ok()?;
    Some((u64::from_le_bytes(token_buf), payload))
}
