use std::{
    net::TcpListener,
    sync::{Arc, mpsc},
    thread,
};

use log::{debug, info, warn};
use uuid::Uuid;

use super::registry::SessionControl;
use super::ServerError;
use crate::columnar::{self, columns_from_rows};
use crate::engine::{EngineError, Handle, RowSet};
use crate::protocol::{
    Command, Execution, ProtocolTransport, QueryKind, QueryOutcome, Response, TransportError,
};
use crate::types::Value;

/// Emitted by a session worker when it exits for any reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Closed(Uuid),
}

/// The single prepared statement a session holds.
#[derive(Debug)]
struct PreparedStatement {
    id: Uuid,
    sql: String,
    kind: QueryKind,
    bindings: Vec<Value>,
}

/// Statement lifecycle of one session: prepare, execute with fresh
/// bindings, commit or roll back.
///
/// Every failure turns into an `ExceptionRaised` reply; the session itself
/// stays usable.
pub struct Session<H: Handle> {
    id: Uuid,
    handle: H,
    statement: Option<PreparedStatement>,
}

impl<H: Handle> Session<H> {
    pub fn new(id: Uuid, handle: H) -> Self {
        Self {
            id,
            handle,
            statement: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&mut self, command: Command) -> Response {
        let op = command.op();
        match self.dispatch(command) {
            Ok(response) => response,
            Err(e) => {
                warn!("session {} failed '{op}': {e}", self.id);
                Response::exception(e)
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<Response, ServerError> {
        let op = command.op();
        let response = match command {
            Command::PrepareSql { sql } => {
                let kind = self.handle.prepare(&sql)?;
                let id = Uuid::new_v4();
                debug!("session {} prepared {id} ({kind}): {sql}", self.id);
                self.statement = Some(PreparedStatement {
                    id,
                    sql,
                    kind,
                    bindings: Vec::new(),
                });
                Response::Prepared {
                    query_kind: kind,
                    statement_id: id,
                }
            }
            Command::Execute(execution) => Response::Result(self.execute(execution, true)?),
            Command::ExecuteUpdate(execution) => Response::Result(self.execute(execution, false)?),
            Command::ExecuteSql { sql } => {
                let kind = self.handle.prepare(&sql)?;
                Response::Result(self.run(&sql, kind, &[])?)
            }
            Command::ExecuteQuery { sql, statement_id } => {
                debug!("session {} running query for {statement_id:?}", self.id);
                let rows = self.handle.execute_query(&sql, &[])?;
                Response::Result(encode_rows(rows)?)
            }
            Command::Commit => {
                self.handle.commit()?;
                Response::Committed
            }
            Command::Rollback => {
                self.handle.rollback()?;
                Response::Aborted
            }
            Command::Connect | Command::Disconnect { .. } => {
                return Err(ServerError::WrongChannel(op));
            }
        };
        Ok(response)
    }

    /// `Execute` returns rows for a query; `ExecuteUpdate` never does.
    fn execute(&mut self, execution: Execution, rows: bool) -> Result<QueryOutcome, ServerError> {
        let statement = self.statement.as_mut().ok_or(EngineError::NoStatement)?;
        if statement.id != execution.statement_id {
            return Err(EngineError::UnknownStatement(execution.statement_id).into());
        }
        statement.bindings = execution.parameters.bindings();
        self.handle.set_auto_commit(execution.auto_commit)?;

        let kind = match statement.kind {
            QueryKind::QueryResult if !rows => QueryKind::ChangedRows,
            kind => kind,
        };
        let (sql, bindings) = (statement.sql.clone(), statement.bindings.clone());
        self.run(&sql, kind, &bindings)
    }

    fn run(&mut self, sql: &str, kind: QueryKind, params: &[Value]) -> Result<QueryOutcome, ServerError> {
        let outcome = match kind {
            QueryKind::QueryResult => encode_rows(self.handle.execute_query(sql, params)?)?,
            QueryKind::ChangedRows => QueryOutcome::ChangedRows(self.handle.execute_update(sql, params)?),
            QueryKind::Nothing => {
                self.handle.execute_update(sql, params)?;
                QueryOutcome::Nothing
            }
        };
        Ok(outcome)
    }
}

fn encode_rows(rows: RowSet) -> Result<QueryOutcome, ServerError> {
    let row_count = rows.rows.len();
    let columns = columns_from_rows(rows.fields, rows.rows);
    Ok(QueryOutcome::Rows(columnar::encode(&columns, row_count)?))
}

/// Start the worker thread of a freshly allocated session.
///
/// The worker accepts exactly one client on `listener`, serves it until the
/// stream ends or the session is stopped, then reports
/// [`SessionEvent::Closed`].
pub(crate) fn spawn_worker<H: Handle>(
    session: Session<H>,
    listener: TcpListener,
    control: Arc<SessionControl>,
    events: mpsc::Sender<SessionEvent>,
    max_frame_size: u64,
) -> std::io::Result<thread::JoinHandle<()>> {
    let id = session.id();
    thread::Builder::new()
        .name(format!("session-{id}"))
        .spawn(move || {
            let mut session = session;
            match serve(&mut session, listener, &control, max_frame_size) {
                Ok(()) => info!("session {id} closed"),
                Err(e) if control.is_stopped() => debug!("session {id} stopped: {e}"),
                Err(e) => warn!("session {id} ended with error: {e}"),
            }
            // Dropping the session here releases its database handle.
            drop(session);
            let _ = events.send(SessionEvent::Closed(id));
        })
}

fn serve<H: Handle>(
    session: &mut Session<H>,
    listener: TcpListener,
    control: &SessionControl,
    max_frame_size: u64,
) -> Result<(), TransportError> {
    let (stream, peer) = listener.accept()?;
    drop(listener);

    control.attach(stream.try_clone()?);
    if control.is_stopped() {
        return Ok(());
    }
    info!("session {} accepted client {peer}", session.id());

    let mut transport = ProtocolTransport::with_max_frame_size(stream, max_frame_size);
    loop {
        let command = match transport.read_command() {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!("session {}: {e}", session.id());
                transport.write_response(&Response::exception(e))?;
                continue;
            }
            Err(e) => return Err(e),
        };

        debug!("session {} received '{}'", session.id(), command.op());
        let response = session.handle(command);
        transport.write_response(&response)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, SqliteEngine};
    use crate::protocol::StatementParameters;
    use crate::types::ColumnType;

    fn session() -> Session<<SqliteEngine as Engine>::Handle> {
        let engine = SqliteEngine::in_memory().unwrap();
        Session::new(Uuid::new_v4(), engine.duplicate_handle().unwrap())
    }

    fn prepare(session: &mut Session<impl Handle>, sql: &str) -> (QueryKind, Uuid) {
        match session.handle(Command::PrepareSql { sql: sql.into() }) {
            Response::Prepared {
                query_kind,
                statement_id,
            } => (query_kind, statement_id),
            other => panic!("unexpected response {other:?}"),
        }
    }

    fn execute(id: Uuid, values: Vec<Value>) -> Execution {
        Execution::new(id, StatementParameters::from_values(values).unwrap())
    }

    #[test]
    fn select_returns_a_columnar_result() {
        let mut session = session();
        let (kind, id) = prepare(&mut session, "SELECT 42");
        assert_eq!(kind, QueryKind::QueryResult);

        let Response::Result(QueryOutcome::Rows(payload)) =
            session.handle(Command::Execute(execute(id, vec![])))
        else {
            panic!("expected rows");
        };
        let (columns, rows) = columnar::decode(&payload).unwrap();
        assert_eq!(rows, 1);
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].field.column_type, ColumnType::BigInt);
        assert_eq!(columns[0].values, vec![Value::Int64(42)]);
    }

    #[test]
    fn update_reports_changed_rows() {
        let mut session = session();
        let response = session.handle(Command::ExecuteSql {
            sql: "CREATE TABLE t (x INTEGER)".into(),
        });
        assert_eq!(response, Response::Result(QueryOutcome::ChangedRows(0)));

        let (_, insert) = prepare(&mut session, "INSERT INTO t VALUES (?)");
        for x in 0..4 {
            let response = session.handle(Command::ExecuteUpdate(execute(insert, vec![Value::Int32(x)])));
            assert_eq!(response, Response::Result(QueryOutcome::ChangedRows(1)));
        }

        let (kind, update) = prepare(&mut session, "UPDATE t SET x = 1");
        assert_eq!(kind, QueryKind::ChangedRows);
        let response = session.handle(Command::ExecuteUpdate(execute(update, vec![])));
        assert_eq!(response, Response::Result(QueryOutcome::ChangedRows(4)));
    }

    #[test]
    fn execute_update_never_returns_rows() {
        let mut session = session();
        let (_, id) = prepare(&mut session, "SELECT 1");
        let response = session.handle(Command::ExecuteUpdate(execute(id, vec![])));
        assert_eq!(response, Response::Result(QueryOutcome::ChangedRows(0)));
    }

    #[test]
    fn empty_values_bind_nulls() {
        let mut session = session();
        session.handle(Command::ExecuteSql {
            sql: "CREATE TABLE t (a INTEGER, b TEXT)".into(),
        });
        let (_, id) = prepare(&mut session, "INSERT INTO t VALUES (?, ?)");
        let execution = Execution::new(id, StatementParameters::all_null(2));
        session.handle(Command::ExecuteUpdate(execution));

        let response = session.handle(Command::ExecuteQuery {
            sql: "SELECT COUNT(*) FROM t WHERE a IS NULL AND b IS NULL".into(),
            statement_id: None,
        });
        let Response::Result(QueryOutcome::Rows(payload)) = response else {
            panic!("expected rows");
        };
        let (columns, _) = columnar::decode(&payload).unwrap();
        assert_eq!(columns[0].values, vec![Value::Int64(1)]);
    }

    #[test]
    fn failures_become_exceptions() {
        let mut session = session();

        let response = session.handle(Command::Execute(execute(Uuid::new_v4(), vec![])));
        assert!(matches!(response, Response::ExceptionRaised { .. }));

        let response = session.handle(Command::PrepareSql {
            sql: "SELECT * FROM missing".into(),
        });
        let Response::ExceptionRaised { message } = response else {
            panic!("expected an exception");
        };
        assert!(message.contains("missing"), "{message}");

        let (_, id) = prepare(&mut session, "SELECT 1");
        let response = session.handle(Command::Execute(execute(Uuid::new_v4(), vec![])));
        assert!(matches!(response, Response::ExceptionRaised { .. }));
        assert!(matches!(
            session.handle(Command::Execute(execute(id, vec![]))),
            Response::Result(QueryOutcome::Rows(_))
        ));

        assert!(matches!(
            session.handle(Command::Connect),
            Response::ExceptionRaised { .. }
        ));
    }

    #[test]
    fn commit_and_rollback() {
        let mut session = session();
        session.handle(Command::ExecuteSql {
            sql: "CREATE TABLE t (x INTEGER)".into(),
        });

        let (_, insert) = prepare(&mut session, "INSERT INTO t VALUES (1)");
        let mut execution = execute(insert, vec![]);
        execution.auto_commit = false;
        session.handle(Command::ExecuteUpdate(execution.clone()));
        assert_eq!(session.handle(Command::Rollback), Response::Aborted);

        session.handle(Command::ExecuteUpdate(execution));
        assert_eq!(session.handle(Command::Commit), Response::Committed);

        let response = session.handle(Command::ExecuteQuery {
            sql: "SELECT COUNT(*) FROM t".into(),
            statement_id: None,
        });
        let Response::Result(QueryOutcome::Rows(payload)) = response else {
            panic!("expected rows");
        };
        let (columns, _) = columnar::decode(&payload).unwrap();
        assert_eq!(columns[0].values, vec![Value::Int64(1)]);
    }
}
