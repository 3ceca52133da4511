use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::ProtocolError;

/// A decoded JSON control document with its `op` discriminator already
/// extracted.
///
/// The whole document is parsed before any field is looked at, so the order
/// fields appear in on the wire never matters.
#[derive(Debug)]
pub(crate) struct Document {
    op: String,
    fields: Map<String, JsonValue>,
}

impl Document {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: JsonValue =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let JsonValue::Object(mut fields) = value else {
            return Err(ProtocolError::Malformed("expected a JSON object".into()));
        };

        let op = match fields.remove("op") {
            Some(JsonValue::String(op)) => op,
            Some(other) => {
                return Err(ProtocolError::InvalidField {
                    op: "message",
                    field: "op",
                    reason: format!("expected a string, found {other}"),
                });
            }
            None => {
                return Err(ProtocolError::MissingField {
                    op: "message",
                    field: "op",
                });
            }
        };

        Ok(Self { op, fields })
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    pub fn required(&self, op: &'static str, field: &'static str) -> Result<&JsonValue, ProtocolError> {
        self.get(field)
            .ok_or(ProtocolError::MissingField { op, field })
    }

    pub fn required_str(&self, op: &'static str, field: &'static str) -> Result<&str, ProtocolError> {
        self.required(op, field)?
            .as_str()
            .ok_or_else(|| invalid(op, field, "expected a string"))
    }

    pub fn required_uuid(&self, op: &'static str, field: &'static str) -> Result<Uuid, ProtocolError> {
        let text = self.required_str(op, field)?;
        Uuid::parse_str(text).map_err(|e| invalid(op, field, e))
    }

    /// Integers are accepted both as JSON numbers and as decimal text.
    pub fn required_u64(&self, op: &'static str, field: &'static str) -> Result<u64, ProtocolError> {
        match self.required(op, field)? {
            JsonValue::Number(n) => n.as_u64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| invalid(op, field, "expected a non-negative integer"))
    }

    pub fn optional_bool(
        &self,
        op: &'static str,
        field: &'static str,
    ) -> Result<Option<bool>, ProtocolError> {
        match self.get(field) {
            None => Ok(None),
            Some(JsonValue::Bool(b)) => Ok(Some(*b)),
            Some(JsonValue::String(s)) => match s.as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(invalid(op, field, "expected a boolean")),
            },
            Some(_) => Err(invalid(op, field, "expected a boolean")),
        }
    }

    /// A missing array reads as empty.
    pub fn optional_array(
        &self,
        op: &'static str,
        field: &'static str,
    ) -> Result<&[JsonValue], ProtocolError> {
        match self.get(field) {
            None => Ok(&[]),
            Some(JsonValue::Array(items)) => Ok(items),
            Some(_) => Err(invalid(op, field, "expected an array")),
        }
    }
}

pub(crate) fn invalid(
    op: &'static str,
    field: &'static str,
    reason: impl ToString,
) -> ProtocolError {
    ProtocolError::InvalidField {
        op,
        field,
        reason: reason.to_string(),
    }
}

/// Start an outgoing document with its discriminator.
pub(crate) fn envelope(op: &str) -> Map<String, JsonValue> {
    let mut fields = Map::new();
    fields.insert("op".into(), JsonValue::String(op.into()));
    fields
}

pub(crate) fn to_bytes(fields: Map<String, JsonValue>) -> Vec<u8> {
    JsonValue::Object(fields).to_string().into_bytes()
}
