//! Batched pull over a query's response stream
//!
//! A cursor buffers the datums of the batch it last received and requests
//! the next batch from the server on demand. Dropping a cursor before the
//! stream has terminated stops the server-side stream.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use serde_json::Value;

use crate::connection::QueryHandle;
use crate::error::DriverError;
use crate::protocol::{QueryType, Response};

/// Consumer-side view of one query's results.
///
/// `A` is the element type produced by the cursor's transform; a fresh
/// cursor yields raw [`Value`] datums. Methods take `&mut self`, so reads
/// on one cursor are naturally linearizable.
pub struct Cursor<A> {
    handle: QueryHandle,
    buffer: VecDeque<Value>,
    exhausted: bool,
    error: Option<DriverError>,
    transform: Arc<dyn Fn(Value) -> A + Send + Sync>,
}

impl Cursor<Value> {
    pub fn new(handle: QueryHandle) -> Self {
        Cursor {
            handle,
            buffer: VecDeque::new(),
            exhausted: false,
            error: None,
            transform: Arc::new(|datum| datum),
        }
    }
}

impl<A> Cursor<A> {
    /// The next element, fetching batches from the server as needed.
    ///
    /// Errors are sticky: once a call has failed, every later call fails
    /// with the same error.
    pub async fn next(&mut self) -> Result<Option<A>, DriverError> {
        loop {
            if let Some(err) = &self.error {
                return Err(err.clone());
            }
            if let Some(datum) = self.buffer.pop_front() {
                return Ok(Some((self.transform)(datum)));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch().await?;
        }
    }

    /// Drain the current batch. Returns an empty vector only once the
    /// stream is exhausted; it never fetches ahead of the batch it
    /// returns.
    pub async fn next_batch(&mut self) -> Result<Vec<A>, DriverError> {
        loop {
            if let Some(err) = &self.error {
                return Err(err.clone());
            }
            if !self.buffer.is_empty() || self.exhausted {
                return Ok(self.buffer.drain(..).map(|d| (self.transform)(d)).collect());
            }
            self.fetch().await?;
        }
    }

    /// Buffer the whole stream and return it.
    pub async fn collect(mut self) -> Result<Vec<A>, DriverError> {
        let mut items = Vec::new();
        loop {
            let batch = self.next_batch().await?;
            if batch.is_empty() {
                return Ok(items);
            }
            items.extend(batch);
        }
    }

    /// The stream of elements, produced on demand: nothing is fetched
    /// until the consumer advances past what is already buffered.
    pub fn into_stream(self) -> impl Stream<Item = Result<A, DriverError>> {
        futures::stream::try_unfold(self, |mut cursor| async move {
            match cursor.next().await? {
                Some(item) => Ok(Some((item, cursor))),
                None => Ok(None),
            }
        })
    }

    /// Apply `f` to every element until the stream is exhausted.
    pub async fn each<F>(mut self, mut f: F) -> Result<(), DriverError>
    where
        F: FnMut(A),
    {
        loop {
            let batch = self.next_batch().await?;
            if batch.is_empty() {
                return Ok(());
            }
            for item in batch {
                f(item);
            }
        }
    }

    /// Post-compose the cursor's transform. Buffered datums are converted
    /// lazily, so mapping an in-flight cursor is sound.
    pub fn map<B, F>(self, f: F) -> Cursor<B>
    where
        F: Fn(A) -> B + Send + Sync + 'static,
        A: 'static,
    {
        let transform = self.transform;
        Cursor {
            handle: self.handle,
            buffer: self.buffer,
            exhausted: self.exhausted,
            error: self.error,
            transform: Arc::new(move |datum| f(transform(datum))),
        }
    }

    /// Pull one response off the channel and fold it into the buffer.
    /// Exactly one CONTINUE goes out per partial batch, before the next
    /// channel read; terminal responses trigger nothing.
    async fn fetch(&mut self) -> Result<(), DriverError> {
        let response = match self.handle.recv().await {
            Ok(response) => response,
            Err(e) => {
                self.error = Some(e.clone());
                return Err(e);
            }
        };

        match response {
            Response::Single(datum) => {
                self.buffer.push_back(datum);
                self.exhausted = true;
            }
            Response::Batch {
                partial: false,
                items,
            } => {
                self.buffer.extend(items);
                self.exhausted = true;
            }
            Response::Batch {
                partial: true,
                items,
            } => {
                self.buffer.extend(items);
                if let Err(e) = self
                    .handle
                    .conn
                    .send_control(self.handle.token, QueryType::Continue)
                    .await
                {
                    self.error = Some(e.clone());
                    return Err(e);
                }
            }
            Response::Error(err) => {
                let err = DriverError::DatabaseError(err);
                self.error = Some(err.clone());
                return Err(err);
            }
        }
        Ok(())
    }
}
