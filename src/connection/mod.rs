//! Connection core
//!
//! A [`Connection`] multiplexes many concurrent logical queries over one
//! TCP socket. Each query is identified by a 64-bit token; a background
//! reader task demultiplexes response frames to per-token waiter channels,
//! while a write latch serializes outbound frames.

mod reader;
mod writer;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cursor::Cursor;
use crate::error::DriverError;
use crate::protocol::{codec, command, QueryType, Response};

use writer::WriteLatch;

/// Per-token registry entry: the response channel and the originating
/// term, kept only so errors can annotate the offending subterm.
#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) tx: mpsc::UnboundedSender<Response>,
    pub(crate) term: Option<Value>,
}

/// Shared state behind every [`Connection`] handle.
#[derive(Debug)]
pub(crate) struct ConnInner {
    pub(crate) peer: SocketAddr,
    pub(crate) next_token: AtomicU64,
    pub(crate) waiters: DashMap<u64, Waiter>,
    pub(crate) writer: WriteLatch,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl ConnInner {
    /// Send a CONTINUE/STOP/NOREPLY_WAIT frame reusing the query's token.
    pub(crate) async fn send_control(
        &self,
        token: u64,
        kind: QueryType,
    ) -> Result<(), DriverError> {
        self.writer
            .send_frame(token, &command::control_payload(kind))
            .await
    }

    /// The error a consumer sees when its waiter channel closes.
    pub(crate) async fn closed_error(&self) -> DriverError {
        self.writer.poison_error().await.unwrap_or_else(|| {
            DriverError::ConnectionError("Connection closed".to_string())
        })
    }

    async fn shutdown(&self, err: DriverError) {
        self.writer.poison(err).await;
        if let Some(task) = self.reader.lock().unwrap().take() {
            task.abort();
        }
        self.waiters.clear();
    }
}

/// Builder for a [`Connection`].
pub struct ConnectionBuilder {
    host: String,
    port: u16,
    auth_key: Option<String>,
    db: String,
}

impl ConnectionBuilder {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: codec::DEFAULT_PORT,
            auth_key: None,
            db: "test".to_string(),
        }
    }

    /// Server port (default 28015).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Pre-shared secret sent during the handshake.
    pub fn auth_key(mut self, key: &str) -> Self {
        self.auth_key = Some(key.to_string());
        self
    }

    /// Default database for queries on this connection.
    pub fn db(mut self, db: &str) -> Self {
        self.db = db.to_string();
        self
    }

    /// Resolve, connect, handshake, and spawn the reader task.
    pub async fn connect(self) -> Result<Connection, DriverError> {
        let addrs = lookup_host((self.host.as_str(), self.port)).await.map_err(|e| {
            DriverError::ConnectionError(format!("Failed to resolve {}: {}", self.host, e))
        })?;

        // Try every resolved address, IPv4 and IPv6 alike.
        let mut stream = None;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let mut stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => {
                return Err(DriverError::ConnectionError(format!(
                    "Failed to connect to {}:{}: {}",
                    self.host, self.port, e
                )))
            }
            (None, None) => {
                return Err(DriverError::ConnectionError(format!(
                    "No addresses resolved for {}:{}",
                    self.host, self.port
                )))
            }
        };
        stream.set_nodelay(true).map_err(|e| {
            DriverError::ConnectionError(format!("Failed to set TCP_NODELAY: {}", e))
        })?;

        stream
            .write_all(&codec::handshake_frame(self.auth_key.as_deref()))
            .await
            .map_err(|e| DriverError::ConnectionError(format!("Handshake send failed: {}", e)))?;
        stream
            .flush()
            .await
            .map_err(|e| DriverError::ConnectionError(format!("Handshake flush failed: {}", e)))?;

        let reply = codec::read_handshake_reply(&mut stream).await?;
        if reply != codec::HANDSHAKE_SUCCESS {
            return Err(DriverError::ConnectionError(reply));
        }

        let peer = stream.peer_addr().map_err(|e| {
            DriverError::ConnectionError(format!("Failed to read peer address: {}", e))
        })?;
        let (read_half, write_half) = stream.into_split();

        let inner = Arc::new(ConnInner {
            peer,
            next_token: AtomicU64::new(1),
            waiters: DashMap::new(),
            writer: WriteLatch::new(write_half),
            reader: StdMutex::new(None),
        });
        let task = tokio::spawn(reader::run(Arc::downgrade(&inner), read_half));
        *inner.reader.lock().unwrap() = Some(task);

        tracing::debug!("Connected to {}", peer);
        Ok(Connection {
            inner,
            db: self.db,
        })
    }
}

/// A handle to one multiplexed server connection.
///
/// Cloning is cheap and aliases the same socket; [`Connection::use_database`]
/// produces an alias with a different default database. Closing any alias
/// closes the shared connection.
#[derive(Clone, Debug)]
pub struct Connection {
    inner: Arc<ConnInner>,
    db: String,
}

impl Connection {
    /// Connect with defaults: no auth key, default database `"test"`.
    pub async fn connect(host: &str, port: u16) -> Result<Self, DriverError> {
        ConnectionBuilder::new(host).port(port).connect().await
    }

    /// Alias this connection under a different default database.
    pub fn use_database(&self, db: &str) -> Connection {
        Connection {
            inner: Arc::clone(&self.inner),
            db: db.to_string(),
        }
    }

    /// The default database tag carried by this handle.
    pub fn database(&self) -> &str {
        &self.db
    }

    /// Submit a query already shaped as its wire JSON array.
    ///
    /// Allocates a fresh token and registers a waiter for the response
    /// stream. A query whose options object carries `noreply: true` is
    /// sent without a waiter; its handle immediately yields a null result.
    pub async fn run(&self, query: Value) -> Result<QueryHandle, DriverError> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_vec(&query)
            .map_err(|e| DriverError::ConnectionError(format!("Failed to encode query: {}", e)))?;

        if command::is_noreply(&query) {
            self.inner.writer.send_frame(token, &payload).await?;
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(Response::Single(Value::Null));
            return Ok(QueryHandle {
                token,
                rx,
                conn: Arc::clone(&self.inner),
            });
        }

        let term = query.get(1).cloned();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.waiters.insert(token, Waiter { tx, term });
        if let Err(e) = self.inner.writer.send_frame(token, &payload).await {
            self.inner.waiters.remove(&token);
            return Err(e);
        }

        Ok(QueryHandle {
            token,
            rx,
            conn: Arc::clone(&self.inner),
        })
    }

    /// Barrier: block until every previously issued noreply query has
    /// committed on the server.
    pub async fn noreply_wait(&self) -> Result<(), DriverError> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.waiters.insert(token, Waiter { tx, term: None });
        if let Err(e) = self.inner.send_control(token, QueryType::NoreplyWait).await {
            self.inner.waiters.remove(&token);
            return Err(e);
        }

        let mut handle = QueryHandle {
            token,
            rx,
            conn: Arc::clone(&self.inner),
        };
        match handle.recv().await? {
            Response::Single(_) => Ok(()),
            Response::Error(err) => Err(err.into()),
            Response::Batch { .. } => Err(DriverError::ReadError(
                "Batch in reply to a NOREPLY_WAIT".to_string(),
            )),
        }
    }

    /// Drain outstanding noreply queries, then tear the connection down.
    ///
    /// Idempotent: a second close finds the write latch poisoned and still
    /// proceeds to socket teardown.
    pub async fn close(&self) -> Result<(), DriverError> {
        let _ = self.noreply_wait().await;
        self.inner
            .shutdown(DriverError::ConnectionError("Connection closed".to_string()))
            .await;
        tracing::debug!("Closed connection to {}", self.inner.peer);
        Ok(())
    }
}

/// The consumer's end of one query's response stream.
///
/// Wrap it in a [`Cursor`] to consume results. Dropping the handle before
/// the stream has terminated deregisters the waiter and sends exactly one
/// STOP for its token.
#[derive(Debug)]
pub struct QueryHandle {
    pub(crate) token: u64,
    rx: mpsc::UnboundedReceiver<Response>,
    pub(crate) conn: Arc<ConnInner>,
}

impl QueryHandle {
    /// The token identifying this query on the wire.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// The next response for this token, in wire order.
    pub async fn recv(&mut self) -> Result<Response, DriverError> {
        match self.rx.recv().await {
            Some(response) => Ok(response),
            None => Err(self.conn.closed_error().await),
        }
    }

    /// Consume results through a cursor.
    pub fn into_cursor(self) -> Cursor<Value> {
        Cursor::new(self)
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        // Still registered means no terminal response was delivered: the
        // stream is live and the server must be told to stop it. A retired
        // token sends nothing.
        if self.conn.waiters.remove(&self.token).is_none() {
            return;
        }
        let conn = Arc::clone(&self.conn);
        let token = self.token;
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                if let Err(e) = conn.send_control(token, QueryType::Stop).await {
                    tracing::debug!("STOP for token {} not sent: {}", token, e);
                }
            });
        }
    }
}
