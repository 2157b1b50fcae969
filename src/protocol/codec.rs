use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::DriverError;

/// Handshake magic for the protocol revision this driver speaks.
pub const VERSION_V0_4: u32 = 0x400c_2d20;

/// Wire protocol selector sent at the end of the handshake: JSON payloads.
pub const WIRE_PROTOCOL_JSON: u32 = 0x7e69_70c7;

/// Conventional server port.
pub const DEFAULT_PORT: u16 = 28015;

/// Handshake reply that authorizes the connection.
pub const HANDSHAKE_SUCCESS: &str = "SUCCESS";

/// Maximum inbound frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on the handshake status string.
const MAX_HANDSHAKE_REPLY: usize = 4096;

/// Build the client half of the handshake.
pub fn handshake_frame(auth_key: Option<&str>) -> Vec<u8> {
    let auth = auth_key.unwrap_or("").as_bytes();
    let mut buf = Vec::with_capacity(12 + auth.len());
    buf.extend_from_slice(&VERSION_V0_4.to_le_bytes());
    buf.extend_from_slice(&(auth.len() as u32).to_le_bytes());
    buf.extend_from_slice(auth);
    buf.extend_from_slice(&WIRE_PROTOCOL_JSON.to_le_bytes());
    buf
}

/// Read the server's NUL-terminated handshake status string.
pub async fn read_handshake_reply<R>(stream: &mut R) -> Result<String, DriverError>
where
    R: AsyncRead + Unpin,
{
    let mut reply = Vec::new();
    loop {
        let byte = stream
            .read_u8()
            .await
            .map_err(|e| DriverError::ConnectionError(format!("Handshake read failed: {}", e)))?;
        if byte == 0 {
            break;
        }
        if reply.len() >= MAX_HANDSHAKE_REPLY {
            return Err(DriverError::ConnectionError(
                "Handshake reply exceeds maximum length".to_string(),
            ));
        }
        reply.push(byte);
    }

    String::from_utf8(reply).map_err(|_| {
        DriverError::ConnectionError("Handshake reply was not valid UTF-8".to_string())
    })
}

/// Encode a request frame: token, payload length, payload.
pub fn encode_frame(token: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + payload.len());
    buf.extend_from_slice(&token.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Read one response frame, coalescing partial reads.
///
/// EOF on a frame boundary means the server closed the connection; EOF in
/// the middle of a frame is a truncated stream. Both are fatal.
pub async fn read_frame<R>(stream: &mut R) -> Result<(u64, Vec<u8>), DriverError>
where
    R: AsyncRead + Unpin,
{
    let mut token_buf = [0u8; 8];
    stream.read_exact(&mut token_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            DriverError::ConnectionError("Connection closed by server".to_string())
        } else {
            DriverError::ConnectionError(format!("Read failed: {}", e))
        }
    })?;
    let token = u64::from_le_bytes(token_buf);

    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| truncated(e))?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(DriverError::ReadError(format!(
            "Frame of {} bytes exceeds maximum size",
            len
        )));
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| truncated(e))?;

    Ok((token, payload))
}

fn truncated(e: std::io::Error) -> DriverError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        DriverError::ConnectionError("Unexpected EOF inside a frame".to_string())
    } else {
        DriverError::ConnectionError(format!("Read failed: {}", e))
    }
}
