//! heddle — a socketless HTTP/1.1 + HTTP/2 protocol engine.
//!
//! The engine owns no sockets, timers or threads: the host feeds it
//! inbound bytes via [`Connection::feed`] and sends messages through
//! the write API; everything the engine produces — outbound bytes and
//! protocol events — goes through the [`Events`] sink the connection
//! was created with.
//!
//! ```no_run
//! use heddle::{Connection, Events, Version};
//!
//! struct Sink;
//! impl Events for Sink {
//!     fn writev(&mut self, bufs: &[&[u8]]) -> Result<(), heddle::Error> {
//!         for buf in bufs {
//!             // hand the bytes to the transport
//!             let _ = buf;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let mut conn = Connection::server(Sink);
//! conn.begin(Version::Http2)?;
//! conn.feed(b"...bytes from the transport...")?;
//! # Ok::<(), heddle::Error>(())
//! ```

mod conn;
mod error;
mod events;
mod h1;
mod stream;
mod types;
mod util;

pub use conn::{Config, Connection, Kind, Version, MAX_CONTINUATIONS};
pub use error::Error;
pub use events::Events;
pub use types::{Header, Headers, Message, Method, MAX_HEADERS};

/// Re-exported wire types, so hosts can name frames and settings
/// without a separate dependency.
pub use heddle_h2 as h2;
pub use heddle_h2::{Frame, FrameType, KnownErrorCode, Settings, StreamId};
