//! Wire protocol for the native driver
//!
//! Every message after the handshake is a framed JSON payload:
//! - **Handshake**: `[magic: u32 LE][auth_len: u32 LE][auth][protocol: u32 LE]`,
//!   answered by a NUL-terminated status string.
//! - **Request frame**: `[token: u64 LE][length: u32 LE][JSON payload]`
//! - **Response frame**: `[token: u64 LE][length: u32 LE][JSON payload]`

pub mod codec;
pub mod command;
pub mod response;
pub mod term;

pub use codec::{
    encode_frame, handshake_frame, read_frame, read_handshake_reply, DEFAULT_PORT,
    HANDSHAKE_SUCCESS, MAX_FRAME_SIZE, VERSION_V0_4, WIRE_PROTOCOL_JSON,
};
pub use command::{control_payload, is_noreply, QueryType};
pub use response::{classify, Response, ResponseType};
pub use term::{render_annotated, Frame};
