//! ReefDB native driver connection core
//!
//! A client for the ReefDB wire protocol: length-prefixed JSON frames over
//! TCP, with many concurrent logical queries multiplexed over one socket
//! and demultiplexed by a 64-bit token. Query construction and result
//! decoding live in their own layers; this crate moves pre-built JSON
//! query arrays to the server and hands raw datums back.
//!
//! # Example
//!
//! ```rust,no_run
//! use reefdb_driver::Connection;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect to the server
//!     let conn = Connection::connect("localhost", 28015).await?;
//!
//!     // Submit a pre-built query and stream its results
//!     let query = json!([1, [15, [[14, ["blog"]], "posts"]], {}]);
//!     let mut cursor = conn.run(query).await?.into_cursor();
//!     while let Some(post) = cursor.next().await? {
//!         println!("{}", post);
//!     }
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod cursor;
pub mod error;
pub mod protocol;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{Connection, ConnectionBuilder, QueryHandle};
pub use cursor::Cursor;
pub use error::{DbError, DriverError, ErrorCode};
pub use protocol::{QueryType, Response, ResponseType};
