use std::fmt;
use std::str::FromStr;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::ProtocolError;
use super::document::{self, Document, invalid};
use super::frame::{Frame, FrameDecoder, Message};

pub const CONNECTED: &str = "Connected";
pub const DISCONNECTED: &str = "Disconnected";
pub const PREPARED: &str = "Prepared";
pub const RESULT: &str = "Result";
pub const COMMITTED: &str = "Committed";
pub const ABORTED: &str = "Aborted";
pub const EXCEPTION_RAISED: &str = "ExceptionRaised";

/// What executing a statement produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    QueryResult,
    ChangedRows,
    Nothing,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::QueryResult => "QUERY_RESULT",
            QueryKind::ChangedRows => "CHANGED_ROWS",
            QueryKind::Nothing => "NOTHING",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUERY_RESULT" => Ok(QueryKind::QueryResult),
            "CHANGED_ROWS" => Ok(QueryKind::ChangedRows),
            "NOTHING" => Ok(QueryKind::Nothing),
            other => Err(format!("unknown query type '{other}'")),
        }
    }
}

/// Body of a `Result` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// An encoded columnar payload.
    Rows(Vec<u8>),
    ChangedRows(u64),
    Nothing,
}

impl QueryOutcome {
    pub fn kind(&self) -> QueryKind {
        match self {
            QueryOutcome::Rows(_) => QueryKind::QueryResult,
            QueryOutcome::ChangedRows(_) => QueryKind::ChangedRows,
            QueryOutcome::Nothing => QueryKind::Nothing,
        }
    }
}

/// A server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Connected { port: u16, session_id: Uuid },
    Disconnected { session_id: Uuid },
    Prepared { query_kind: QueryKind, statement_id: Uuid },
    Result(QueryOutcome),
    Committed,
    Aborted,
    ExceptionRaised { message: String },
}

impl Response {
    pub fn exception(message: impl fmt::Display) -> Self {
        Response::ExceptionRaised {
            message: message.to_string(),
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Response::Connected { .. } => CONNECTED,
            Response::Disconnected { .. } => DISCONNECTED,
            Response::Prepared { .. } => PREPARED,
            Response::Result(_) => RESULT,
            Response::Committed => COMMITTED,
            Response::Aborted => ABORTED,
            Response::ExceptionRaised { .. } => EXCEPTION_RAISED,
        }
    }

    /// `Result` is always size-framed; every other response is a bare JSON
    /// document.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut fields = document::envelope(self.op());
        match self {
            Response::Committed | Response::Aborted => {}
            Response::Connected { port, session_id } => {
                fields.insert("port".into(), JsonValue::from(*port));
                fields.insert("sessionId".into(), session_id.to_string().into());
            }
            Response::Disconnected { session_id } => {
                fields.insert("sessionId".into(), session_id.to_string().into());
            }
            Response::Prepared {
                query_kind,
                statement_id,
            } => {
                fields.insert("queryType".into(), query_kind.as_str().into());
                fields.insert("statementID".into(), statement_id.to_string().into());
            }
            Response::ExceptionRaised { message } => {
                fields.insert("exception".into(), message.clone().into());
            }
            Response::Result(outcome) => {
                fields.insert("queryType".into(), outcome.kind().as_str().into());
                let payload = match outcome {
                    QueryOutcome::Rows(payload) => payload.clone(),
                    QueryOutcome::ChangedRows(count) => {
                        fields.insert("updateCount".into(), JsonValue::from(*count));
                        Vec::new()
                    }
                    QueryOutcome::Nothing => Vec::new(),
                };
                return Frame::new(document::to_bytes(fields), payload).to_bytes();
            }
        }
        Ok(document::to_bytes(fields))
    }

    /// Decode a buffer holding exactly one response.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut decoder = FrameDecoder::new(u64::MAX);
        decoder.extend(bytes);
        let message = decoder
            .next_message()?
            .ok_or_else(|| ProtocolError::Malformed("incomplete response".into()))?;
        if !decoder.is_idle() {
            return Err(ProtocolError::Malformed(format!(
                "{} trailing bytes after response",
                decoder.buffered()
            )));
        }
        Self::from_message(message)
    }

    pub fn from_message(message: Message) -> Result<Self, ProtocolError> {
        match message {
            Message::Plain(bytes) => Self::decode_plain(&bytes),
            Message::Framed(frame) => Self::decode_result(frame),
        }
    }

    fn decode_plain(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let doc = Document::parse(bytes)?;
        let response = match doc.op() {
            CONNECTED => {
                let port = doc.required_u64(CONNECTED, "port")?;
                Response::Connected {
                    port: u16::try_from(port).map_err(|e| invalid(CONNECTED, "port", e))?,
                    session_id: doc.required_uuid(CONNECTED, "sessionId")?,
                }
            }
            DISCONNECTED => Response::Disconnected {
                session_id: doc.required_uuid(DISCONNECTED, "sessionId")?,
            },
            PREPARED => Response::Prepared {
                query_kind: query_kind(&doc, PREPARED)?,
                statement_id: doc.required_uuid(PREPARED, "statementID")?,
            },
            COMMITTED => Response::Committed,
            ABORTED => Response::Aborted,
            EXCEPTION_RAISED => Response::ExceptionRaised {
                message: doc.required_str(EXCEPTION_RAISED, "exception")?.to_string(),
            },
            RESULT => return Err(ProtocolError::FrameSize("'Result' arrived without a size header".into())),
            other => return Err(ProtocolError::UnknownOperation(other.to_string())),
        };
        Ok(response)
    }

    fn decode_result(frame: Frame) -> Result<Self, ProtocolError> {
        let doc = Document::parse(&frame.control)?;
        if doc.op() != RESULT {
            return Err(ProtocolError::UnexpectedFrame);
        }

        let outcome = match query_kind(&doc, RESULT)? {
            QueryKind::QueryResult => QueryOutcome::Rows(frame.payload),
            kind => {
                if !frame.payload.is_empty() {
                    return Err(ProtocolError::FrameSize(format!(
                        "{kind} result carries a {} byte payload",
                        frame.payload.len()
                    )));
                }
                match kind {
                    QueryKind::ChangedRows => {
                        QueryOutcome::ChangedRows(doc.required_u64(RESULT, "updateCount")?)
                    }
                    _ => QueryOutcome::Nothing,
                }
            }
        };
        Ok(Response::Result(outcome))
    }
}

fn query_kind(doc: &Document, op: &'static str) -> Result<QueryKind, ProtocolError> {
    doc.required_str(op, "queryType")?
        .parse()
        .map_err(|e| invalid(op, "queryType", e))
}
