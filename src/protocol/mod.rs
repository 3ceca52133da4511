//! Client-server communication protocol.
//!
//! This module defines the messages exchanged between tether clients and
//! servers and how they are laid out on a byte stream.
//!
//! # Channels
//!
//! A server listens on one well-known control port. A client sends
//! `Connect` there and is answered with the port of a freshly bound session
//! channel, on which every statement-level command for that session is sent.
//! `Disconnect` goes back to the control port.
//!
//! # Wire Format
//!
//! Every message is a UTF-8 JSON object whose `op` field names the
//! operation. Field order is irrelevant.
//!
//! The one exception is a `Result` response, which may carry a binary
//! columnar payload and is therefore size-framed:
//!
//! - A 50-byte size header, `{"jsonSize":"NNNNNNNNNN","arrowSize":"NNNNNNNNNN"}`,
//!   with both lengths written as ten zero-padded digits.
//! - `jsonSize` bytes of JSON control document (`op`, `queryType`,
//!   `updateCount`).
//! - `arrowSize` bytes of columnar payload, see [`columnar`](crate::columnar).
//!
//! A reader tells the two shapes apart by parsing the first complete JSON
//! document in its buffer, see [`FrameDecoder`].
//!
//! # Key Components
//!
//! - [`Command`]: a client request.
//! - [`Response`]: a server reply.
//! - [`ProtocolTransport`]: reads and writes both over any `Read + Write`
//!   stream.
mod command;
mod document;
mod error;
mod frame;
mod params;
mod response;
mod transport;

pub use command::{Command, Execution};
pub use error::ProtocolError;
pub use frame::{Frame, FrameDecoder, HEADER_SIZE, Message, SizeHeader};
pub use params::{ParamType, StatementParameters};
pub use response::{QueryKind, QueryOutcome, Response};
pub use transport::{DEFAULT_MAX_FRAME_SIZE, ProtocolTransport, TransportError};
