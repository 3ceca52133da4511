//! Runtime configuration for the server and its database.
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

pub const DEFAULT_CONTROL_PORT: u16 = 41442;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Well-known address of the control channel.
    pub control_addr: SocketAddr,
    /// Interface each session listener binds to, on an ephemeral port.
    pub session_host: IpAddr,
    /// Largest message accepted from a peer, in bytes.
    pub max_frame_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_CONTROL_PORT),
            session_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database file, or a private in-memory database when `None`.
    pub path: Option<PathBuf>,
    /// How long a handle waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_secs(5),
        }
    }
}
