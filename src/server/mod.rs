//! Session server.
//!
//! A [`ControlServer`] listens on the well-known control port. Each
//! `Connect` it receives allocates a session: a listener on an ephemeral
//! port, a private database handle duplicated from the shared engine, and a
//! dedicated worker thread that accepts one client there and serves its
//! statements until the stream closes. Sessions are tracked in a
//! [`SessionRegistry`] owned by the control plane, and removed on
//! `Disconnect`, when their worker exits, or at shutdown.
mod control;
mod registry;
mod session;

use std::io;

use thiserror::Error;

use crate::columnar::ColumnarError;
use crate::engine::EngineError;
use crate::protocol::{ProtocolError, TransportError};

pub use control::{ControlServer, ShutdownHandle};
pub use registry::{SessionControl, SessionRegistry};
pub use session::{Session, SessionEvent};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server IO Error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to encode result: {0}")]
    Columnar(#[from] ColumnarError),
    #[error("'{0}' is not valid on this channel")]
    WrongChannel(&'static str),
}
