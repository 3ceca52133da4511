//! Blocking client for a tether server.
//!
//! [`Connection`] translates conventional connect / prepare / execute /
//! commit calls into protocol commands. It keeps the control connection it
//! connected through so it can send `Disconnect` when closed.
use std::{
    io,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
};

use log::{debug, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::columnar::{self, Column, ColumnarError, Field};
use crate::protocol::{
    Command, Execution, ProtocolError, ProtocolTransport, QueryKind, QueryOutcome, Response,
    StatementParameters, TransportError,
};
use crate::types::Value;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client IO Error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("server error: {0}")]
    Server(String),
    #[error("unexpected '{0}' response")]
    Unexpected(&'static str),
    #[error("invalid result payload: {0}")]
    Columnar(#[from] ColumnarError),
}

/// A statement prepared on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    id: Uuid,
    kind: QueryKind,
    sql: String,
}

impl PreparedStatement {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Decoded rows of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Vec<Column>,
    row_count: usize,
}

impl ResultSet {
    pub fn from_payload(payload: &[u8]) -> Result<Self, ColumnarError> {
        let (columns, row_count) = columnar::decode(payload)?;
        Ok(Self { columns, row_count })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.columns.iter().map(|c| &c.field)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Value at `row` of the column at `column`, both zero-based.
    pub fn get(&self, row: usize, column: usize) -> Option<&Value> {
        self.columns.get(column)?.values.get(row)
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.row_count).map(move |row| {
            self.columns
                .iter()
                .map(|c| &c.values[row])
                .collect()
        })
    }
}

/// What running a statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Rows(ResultSet),
    Changed(u64),
    Nothing,
}

impl StatementResult {
    fn from_outcome(outcome: QueryOutcome) -> Result<Self, ClientError> {
        Ok(match outcome {
            QueryOutcome::Rows(payload) => StatementResult::Rows(ResultSet::from_payload(&payload)?),
            QueryOutcome::ChangedRows(count) => StatementResult::Changed(count),
            QueryOutcome::Nothing => StatementResult::Nothing,
        })
    }
}

/// One session on a tether server.
pub struct Connection {
    control: ProtocolTransport<TcpStream>,
    session: ProtocolTransport<TcpStream>,
    session_id: Uuid,
    auto_commit: bool,
    transaction_running: bool,
    closed: bool,
}

impl Connection {
    /// Ask the control channel at `addr` for a session and connect to it.
    pub fn open(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        let server = stream.peer_addr()?;
        let mut control = ProtocolTransport::new(stream);

        control.write_command(&Command::Connect)?;
        let (port, session_id) = match control.read_response()? {
            Response::Connected { port, session_id } => (port, session_id),
            Response::ExceptionRaised { message } => return Err(ClientError::Server(message)),
            other => return Err(ClientError::Unexpected(other.op())),
        };

        let session_addr = SocketAddr::new(server.ip(), port);
        debug!("session {session_id} at {session_addr}");
        let session = ProtocolTransport::new(TcpStream::connect(session_addr)?);

        Ok(Self {
            control,
            session,
            session_id,
            auto_commit: true,
            transaction_running: false,
            closed: false,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Whether statements have run since the last commit or rollback with
    /// auto-commit off.
    pub fn transaction_running(&self) -> bool {
        self.transaction_running
    }

    /// Switching auto-commit back on commits a running transaction first.
    pub fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ClientError> {
        if auto_commit && !self.auto_commit && self.transaction_running {
            self.commit()?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement, ClientError> {
        let command = Command::PrepareSql { sql: sql.into() };
        match self.request(&command)? {
            Response::Prepared {
                query_kind,
                statement_id,
            } => Ok(PreparedStatement {
                id: statement_id,
                kind: query_kind,
                sql: sql.into(),
            }),
            other => Err(ClientError::Unexpected(other.op())),
        }
    }

    pub fn execute(
        &mut self,
        statement: &PreparedStatement,
        parameters: StatementParameters,
    ) -> Result<StatementResult, ClientError> {
        let command = Command::Execute(self.execution(statement, parameters));
        self.run(&command)
    }

    /// Execute for a row count. Returns `None` for statements that report
    /// nothing.
    pub fn execute_update(
        &mut self,
        statement: &PreparedStatement,
        parameters: StatementParameters,
    ) -> Result<Option<u64>, ClientError> {
        let command = Command::ExecuteUpdate(self.execution(statement, parameters));
        match self.run(&command)? {
            StatementResult::Changed(count) => Ok(Some(count)),
            StatementResult::Nothing => Ok(None),
            StatementResult::Rows(_) => Err(ClientError::Unexpected("Result")),
        }
    }

    /// Run a statement without preparing it first.
    pub fn execute_sql(&mut self, sql: &str) -> Result<StatementResult, ClientError> {
        self.run(&Command::ExecuteSql { sql: sql.into() })
    }

    pub fn query(&mut self, sql: &str) -> Result<ResultSet, ClientError> {
        let command = Command::ExecuteQuery {
            sql: sql.into(),
            statement_id: None,
        };
        match self.run(&command)? {
            StatementResult::Rows(rows) => Ok(rows),
            _ => Err(ClientError::Unexpected("Result")),
        }
    }

    pub fn commit(&mut self) -> Result<(), ClientError> {
        match self.request(&Command::Commit)? {
            Response::Committed => {
                self.transaction_running = false;
                Ok(())
            }
            other => Err(ClientError::Unexpected(other.op())),
        }
    }

    pub fn rollback(&mut self) -> Result<(), ClientError> {
        match self.request(&Command::Rollback)? {
            Response::Aborted => {
                self.transaction_running = false;
                Ok(())
            }
            other => Err(ClientError::Unexpected(other.op())),
        }
    }

    /// End the session on the server.
    pub fn close(mut self) -> Result<(), ClientError> {
        self.disconnect()
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let session_id = self.session_id;
        self.control
            .write_command(&Command::Disconnect { session_id })?;
        match self.control.read_response()? {
            Response::Disconnected { .. } => Ok(()),
            Response::ExceptionRaised { message } => Err(ClientError::Server(message)),
            other => Err(ClientError::Unexpected(other.op())),
        }
    }

    fn execution(
        &self,
        statement: &PreparedStatement,
        parameters: StatementParameters,
    ) -> Execution {
        Execution {
            statement_id: statement.id,
            auto_commit: self.auto_commit,
            parameters,
        }
    }

    fn run(&mut self, command: &Command) -> Result<StatementResult, ClientError> {
        let response = self.request(command)?;
        if !self.auto_commit {
            self.transaction_running = true;
        }
        match response {
            Response::Result(outcome) => StatementResult::from_outcome(outcome),
            other => Err(ClientError::Unexpected(other.op())),
        }
    }

    fn request(&mut self, command: &Command) -> Result<Response, ClientError> {
        self.session.write_command(command)?;
        match self.session.read_response()? {
            Response::ExceptionRaised { message } => Err(ClientError::Server(message)),
            response => Ok(response),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("failed to disconnect session {}: {e}", self.session_id);
        }
    }
}
