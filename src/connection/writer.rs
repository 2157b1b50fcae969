use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::error::DriverError;
use crate::protocol::codec;

/// The write half of the socket behind the latch that serializes frames.
///
/// Once poisoned the latch stays poisoned; every later send fails with the
/// stored error without touching the socket.
#[derive(Debug)]
pub(crate) struct WriteLatch {
    state: Mutex<WriteState>,
}

#[derive(Debug)]
enum WriteState {
    Healthy(OwnedWriteHalf),
    Poisoned(DriverError),
}

impl WriteLatch {
    pub(crate) fn new(sink: OwnedWriteHalf) -> Self {
        Self {
            state: Mutex::new(WriteState::Healthy(sink)),
        }
    }

    /// Write one complete frame. The latch is held for exactly this frame,
    /// so concurrent submissions never interleave bytes.
    pub(crate) async fn send_frame(&self, token: u64, payload: &[u8]) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        match &mut *state {
            WriteState::Poisoned(err) => Err(err.clone()),
            WriteState::Healthy(sink) => {
                let frame = codec::encode_frame(token, payload);
                sink.write_all(&frame)
                    .await
                    .map_err(|e| DriverError::ConnectionError(format!("Write failed: {}", e)))?;
                sink.flush()
                    .await
                    .map_err(|e| DriverError::ConnectionError(format!("Flush failed: {}", e)))?;
                Ok(())
            }
        }
    }

    /// Store the terminal error. Only the first poisoning sticks; the write
    /// half is dropped, closing our side of the socket.
    pub(crate) async fn poison(&self, err: DriverError) {
        let mut state = self.state.lock().await;
        if matches!(*state, WriteState::Healthy(_)) {
            *state = WriteState::Poisoned(err);
        }
    }

    /// The stored error, if the latch has been poisoned.
    pub(crate) async fn poison_error(&self) -> Option<DriverError> {
        match &*self.state.lock().await {
            WriteState::Poisoned(err) => Some(err.clone()),
            WriteState::Healthy(_) => None,
        }
    }
}
