pub mod cli;
pub mod client;
pub mod columnar;
pub mod config;
pub mod engine;
pub mod protocol;
pub mod server;
pub mod types;

pub use cli::{Command, prompt, render};
pub use client::{ClientError, Connection, PreparedStatement, ResultSet, StatementResult};
pub use config::{DatabaseConfig, ServerConfig};
pub use engine::SqliteEngine;
pub use server::{ControlServer, ServerError, ShutdownHandle};
pub use types::{ColumnType, Value};
