use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::ProtocolError;
use super::document::{self, Document};
use super::params::StatementParameters;

pub const CONNECT: &str = "Connect";
pub const DISCONNECT: &str = "Disconnect";
pub const PREPARE_SQL: &str = "PrepareSql";
pub const EXECUTE: &str = "Execute";
pub const EXECUTE_UPDATE: &str = "ExecuteUpdate";
pub const EXECUTE_SQL: &str = "ExecuteSql";
pub const EXECUTE_QUERY: &str = "ExecuteQuery";
pub const COMMIT: &str = "Commit";
pub const ROLLBACK: &str = "Rollback";

/// Parameters of an `Execute`/`ExecuteUpdate` request.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub statement_id: Uuid,
    pub auto_commit: bool,
    pub parameters: StatementParameters,
}

impl Execution {
    pub fn new(statement_id: Uuid, parameters: StatementParameters) -> Self {
        Self {
            statement_id,
            auto_commit: true,
            parameters,
        }
    }

    fn decode(doc: &Document, op: &'static str) -> Result<Self, ProtocolError> {
        Ok(Self {
            statement_id: doc.required_uuid(op, "statementID")?,
            auto_commit: doc.optional_bool(op, "autoCommit")?.unwrap_or(true),
            parameters: StatementParameters::decode(doc, op)?,
        })
    }
}

/// A client request.
///
/// `Connect` and `Disconnect` are sent on the control channel, everything
/// else on a session channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect,
    Disconnect { session_id: Uuid },
    PrepareSql { sql: String },
    Execute(Execution),
    ExecuteUpdate(Execution),
    ExecuteSql { sql: String },
    ExecuteQuery { sql: String, statement_id: Option<Uuid> },
    Commit,
    Rollback,
}

impl Command {
    pub fn op(&self) -> &'static str {
        match self {
            Command::Connect => CONNECT,
            Command::Disconnect { .. } => DISCONNECT,
            Command::PrepareSql { .. } => PREPARE_SQL,
            Command::Execute(_) => EXECUTE,
            Command::ExecuteUpdate(_) => EXECUTE_UPDATE,
            Command::ExecuteSql { .. } => EXECUTE_SQL,
            Command::ExecuteQuery { .. } => EXECUTE_QUERY,
            Command::Commit => COMMIT,
            Command::Rollback => ROLLBACK,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let op = self.op();
        let mut fields = document::envelope(op);
        match self {
            Command::Connect | Command::Commit | Command::Rollback => {}
            Command::Disconnect { session_id } => {
                fields.insert("sessionId".into(), session_id.to_string().into());
            }
            Command::PrepareSql { sql } | Command::ExecuteSql { sql } => {
                fields.insert("sqlString".into(), sql.clone().into());
            }
            Command::ExecuteQuery { sql, statement_id } => {
                fields.insert("sqlString".into(), sql.clone().into());
                if let Some(id) = statement_id {
                    fields.insert("statementID".into(), id.to_string().into());
                }
            }
            Command::Execute(exec) | Command::ExecuteUpdate(exec) => {
                fields.insert("statementID".into(), exec.statement_id.to_string().into());
                fields.insert("autoCommit".into(), JsonValue::Bool(exec.auto_commit));
                exec.parameters.encode_into(&mut fields, op)?;
            }
        }
        Ok(document::to_bytes(fields))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let doc = Document::parse(bytes)?;
        let command = match doc.op() {
            CONNECT => Command::Connect,
            DISCONNECT => Command::Disconnect {
                session_id: doc.required_uuid(DISCONNECT, "sessionId")?,
            },
            PREPARE_SQL => Command::PrepareSql {
                sql: doc.required_str(PREPARE_SQL, "sqlString")?.to_string(),
            },
            EXECUTE => Command::Execute(Execution::decode(&doc, EXECUTE)?),
            EXECUTE_UPDATE => Command::ExecuteUpdate(Execution::decode(&doc, EXECUTE_UPDATE)?),
            EXECUTE_SQL => Command::ExecuteSql {
                sql: doc.required_str(EXECUTE_SQL, "sqlString")?.to_string(),
            },
            EXECUTE_QUERY => Command::ExecuteQuery {
                sql: doc.required_str(EXECUTE_QUERY, "sqlString")?.to_string(),
                statement_id: match doc.get("statementID") {
                    Some(_) => Some(doc.required_uuid(EXECUTE_QUERY, "statementID")?),
                    None => None,
                },
            },
            COMMIT => Command::Commit,
            ROLLBACK => Command::Rollback,
            other => return Err(ProtocolError::UnknownOperation(other.to_string())),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use serde_json::json;

    #[test]
    fn round_trips_execute() {
        let params = StatementParameters::from_values(vec![
            Value::Int32(7),
            Value::Varchar("x".into()),
        ])
        .unwrap();
        let command = Command::ExecuteUpdate(Execution {
            statement_id: Uuid::new_v4(),
            auto_commit: false,
            parameters: params,
        });

        let bytes = command.encode().unwrap();
        assert_eq!(Command::decode(&bytes).unwrap(), command);
    }

    #[test]
    fn every_command_survives_encoding() {
        let statement_id = Uuid::new_v4();
        let params = StatementParameters::from_values(vec![
            Value::Null,
            Value::Boolean(true),
            Value::Decimal("-0.125".parse().unwrap()),
        ])
        .unwrap();

        let commands = vec![
            Command::Connect,
            Command::Disconnect {
                session_id: Uuid::new_v4(),
            },
            Command::PrepareSql {
                sql: "SELECT * FROM t WHERE a = ? AND b = '?'".into(),
            },
            Command::Execute(Execution::new(statement_id, params.clone())),
            Command::Execute(Execution::new(statement_id, StatementParameters::all_null(2))),
            Command::ExecuteUpdate(Execution {
                statement_id,
                auto_commit: false,
                parameters: StatementParameters::new(),
            }),
            Command::ExecuteSql {
                sql: "CREATE TABLE t (a INTEGER)".into(),
            },
            Command::ExecuteQuery {
                sql: "SELECT 1".into(),
                statement_id: Some(statement_id),
            },
            Command::ExecuteQuery {
                sql: "SELECT 2".into(),
                statement_id: None,
            },
            Command::Commit,
            Command::Rollback,
        ];

        for command in commands {
            let bytes = command.encode().unwrap();
            let decoded = Command::decode(&bytes).unwrap();
            assert_eq!(decoded, command, "{}", String::from_utf8_lossy(&bytes));
            assert_eq!(decoded.op(), command.op());
        }
    }

    #[test]
    fn field_order_does_not_matter() {
        let id = Uuid::new_v4();
        let input = format!(
            r#"{{"parameters":["5"],"parameterTypes":["Int"],"statementID":"{id}","op":"Execute"}}"#
        );

        let Command::Execute(exec) = Command::decode(input.as_bytes()).unwrap() else {
            panic!("expected Execute");
        };
        assert_eq!(exec.statement_id, id);
        assert!(exec.auto_commit);
        assert_eq!(exec.parameters.bindings(), vec![Value::Int32(5)]);
    }

    #[test]
    fn unknown_operation_is_reported() {
        let err = Command::decode(br#"{"op":"Vacuum"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownOperation("Vacuum".into()));
    }

    #[test]
    fn missing_fields_are_reported() {
        let inputs = vec![
            (json!({"op": "PrepareSql"}), "PrepareSql", "sqlString"),
            (json!({"op": "Disconnect"}), "Disconnect", "sessionId"),
            (json!({"op": "Execute", "parameterTypes": []}), "Execute", "statementID"),
            (json!({"sqlString": "SELECT 1"}), "message", "op"),
        ];

        for (input, op, field) in inputs {
            let err = Command::decode(input.to_string().as_bytes()).unwrap_err();
            assert_eq!(err, ProtocolError::MissingField { op, field }, "{input}");
        }
    }

    #[test]
    fn execute_query_statement_id_is_optional() {
        let command = Command::decode(br#"{"op":"ExecuteQuery","sqlString":"SELECT 1"}"#).unwrap();
        assert_eq!(
            command,
            Command::ExecuteQuery {
                sql: "SELECT 1".into(),
                statement_id: None
            }
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            Command::decode(b"{\"op\":"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Command::decode(b"[1,2]"),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
