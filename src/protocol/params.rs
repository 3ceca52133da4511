use serde_json::{Map, Value as JsonValue};

use super::ProtocolError;
use super::document::{Document, invalid};
use crate::types::{Decimal, Value, format_timestamp, format_timestamp_tz, parse_timestamp, parse_timestamp_tz};

/// Wire tag describing how one statement parameter is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Null,
    String,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal,
    LocalDateTime,
    OffsetDateTime,
}

impl ParamType {
    pub fn tag(&self) -> &'static str {
        match self {
            ParamType::Null => "NULL",
            ParamType::String => "String",
            ParamType::Boolean => "Boolean",
            ParamType::Int8 => "Byte",
            ParamType::Int16 => "Short",
            ParamType::Int32 => "Int",
            ParamType::Int64 => "Long",
            ParamType::Float32 => "Float",
            ParamType::Float64 => "Double",
            ParamType::Decimal => "Decimal",
            ParamType::LocalDateTime => "LocalDateTime",
            ParamType::OffsetDateTime => "OffsetDateTime",
        }
    }

    /// Also accepts the older spellings some clients still send.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "NULL" | "Null" => ParamType::Null,
            "String" => ParamType::String,
            "Boolean" => ParamType::Boolean,
            "Byte" | "Int8" => ParamType::Int8,
            "Short" | "Int16" => ParamType::Int16,
            "Int" | "Integer" | "Int32" => ParamType::Int32,
            "Long" | "Int64" => ParamType::Int64,
            "Float" | "Float32" => ParamType::Float32,
            "Double" | "Float64" => ParamType::Float64,
            "Decimal" | "BigDecimal" => ParamType::Decimal,
            "Timestamp" | "LocalDateTime" => ParamType::LocalDateTime,
            "OffsetDateTime" => ParamType::OffsetDateTime,
            _ => return None,
        })
    }

    /// The tag a value is sent with, `None` for values with no parameter
    /// encoding (unsigned and 128-bit integers, bare dates and times).
    pub fn of(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Null => ParamType::Null,
            Value::Varchar(_) => ParamType::String,
            Value::Boolean(_) => ParamType::Boolean,
            Value::Int8(_) => ParamType::Int8,
            Value::Int16(_) => ParamType::Int16,
            Value::Int32(_) => ParamType::Int32,
            Value::Int64(_) => ParamType::Int64,
            Value::Float32(_) => ParamType::Float32,
            Value::Float64(_) => ParamType::Float64,
            Value::Decimal(_) => ParamType::Decimal,
            Value::Timestamp(_) => ParamType::LocalDateTime,
            Value::TimestampTz(_) => ParamType::OffsetDateTime,
            _ => return None,
        })
    }

    /// Decode a JSON parameter value of this type. JSON null always decodes
    /// to [`Value::Null`].
    fn decode_value(&self, json: &JsonValue) -> Result<Value, String> {
        if json.is_null() || *self == ParamType::Null {
            return Ok(Value::Null);
        }

        let value = match self {
            ParamType::Null => Value::Null,
            ParamType::String => Value::Varchar(expect_text(json)?.to_string()),
            ParamType::Boolean => match json {
                JsonValue::Bool(b) => Value::Boolean(*b),
                JsonValue::String(s) if s == "true" => Value::Boolean(true),
                JsonValue::String(s) if s == "false" => Value::Boolean(false),
                other => return Err(format!("expected a boolean, found {other}")),
            },
            ParamType::Int8 => Value::Int8(integer(json)?),
            ParamType::Int16 => Value::Int16(integer(json)?),
            ParamType::Int32 => Value::Int32(integer(json)?),
            ParamType::Int64 => Value::Int64(integer(json)?),
            ParamType::Float32 => Value::Float32(float(json)? as f32),
            ParamType::Float64 => Value::Float64(float(json)?),
            ParamType::Decimal => {
                let text = numeric_text(json)?;
                Value::Decimal(text.parse::<Decimal>().map_err(|e| e.to_string())?)
            }
            ParamType::LocalDateTime => {
                let text = expect_text(json)?;
                Value::Timestamp(
                    parse_timestamp(text).ok_or_else(|| format!("invalid timestamp '{text}'"))?,
                )
            }
            ParamType::OffsetDateTime => {
                let text = expect_text(json)?;
                Value::TimestampTz(
                    parse_timestamp_tz(text)
                        .ok_or_else(|| format!("invalid offset timestamp '{text}'"))?,
                )
            }
        };
        Ok(value)
    }

    /// Numbers and temporals go out as canonical text so no precision is
    /// lost to a JSON number representation.
    fn encode_value(&self, value: &Value) -> Result<JsonValue, String> {
        let json = match (self, value) {
            (_, Value::Null) => JsonValue::Null,
            (ParamType::String, Value::Varchar(s)) => JsonValue::String(s.clone()),
            (ParamType::Boolean, Value::Boolean(b)) => JsonValue::Bool(*b),
            (ParamType::Int8, Value::Int8(_))
            | (ParamType::Int16, Value::Int16(_))
            | (ParamType::Int32, Value::Int32(_))
            | (ParamType::Int64, Value::Int64(_))
            | (ParamType::Float32, Value::Float32(_))
            | (ParamType::Float64, Value::Float64(_))
            | (ParamType::Decimal, Value::Decimal(_)) => JsonValue::String(value.to_string()),
            (ParamType::LocalDateTime, Value::Timestamp(ts)) => {
                JsonValue::String(format_timestamp(ts))
            }
            (ParamType::OffsetDateTime, Value::TimestampTz(ts)) => {
                JsonValue::String(format_timestamp_tz(ts))
            }
            (ty, other) => {
                return Err(format!(
                    "{} value cannot be sent as a {} parameter",
                    other.kind(),
                    ty.tag()
                ));
            }
        };
        Ok(json)
    }
}

fn expect_text(json: &JsonValue) -> Result<&str, String> {
    json.as_str()
        .ok_or_else(|| format!("expected a string, found {json}"))
}

fn numeric_text(json: &JsonValue) -> Result<String, String> {
    match json {
        JsonValue::String(s) => Ok(s.trim().to_string()),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(format!("expected a number, found {other}")),
    }
}

fn integer<T: TryFrom<i64>>(json: &JsonValue) -> Result<T, String> {
    let text = numeric_text(json)?;
    text.parse::<i64>()
        .ok()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| format!("'{text}' is not a valid {}", std::any::type_name::<T>()))
}

fn float(json: &JsonValue) -> Result<f64, String> {
    let text = numeric_text(json)?;
    match text.as_str() {
        "NaN" => Ok(f64::NAN),
        "Infinity" | "inf" => Ok(f64::INFINITY),
        "-Infinity" | "-inf" => Ok(f64::NEG_INFINITY),
        _ => text
            .parse()
            .map_err(|_| format!("'{text}' is not a valid floating point number")),
    }
}

/// Positional parameters of one execution.
///
/// `types` always lists every position. `values` is either empty, meaning
/// every position is bound to null, or exactly as long as `types`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatementParameters {
    types: Vec<ParamType>,
    values: Vec<Value>,
}

impl StatementParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` positions, all bound to null.
    pub fn all_null(count: usize) -> Self {
        Self {
            types: vec![ParamType::Null; count],
            values: Vec::new(),
        }
    }

    /// Build parameters from values, deriving each tag from its value.
    pub fn from_values(values: Vec<Value>) -> Result<Self, ProtocolError> {
        let mut params = Self::new();
        for value in values {
            let ty = ParamType::of(&value).ok_or_else(|| {
                invalid(
                    "Execute",
                    "parameters",
                    format!("{} values cannot be sent as parameters", value.kind()),
                )
            })?;
            params.types.push(ty);
            params.values.push(value);
        }
        Ok(params)
    }

    pub fn types(&self) -> &[ParamType] {
        &self.types
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// The value bound at each position, with the all-null shorthand
    /// expanded.
    pub fn bindings(&self) -> Vec<Value> {
        if self.values.is_empty() {
            vec![Value::Null; self.types.len()]
        } else {
            self.values.clone()
        }
    }

    pub(crate) fn decode(doc: &Document, op: &'static str) -> Result<Self, ProtocolError> {
        let types = doc
            .optional_array(op, "parameterTypes")?
            .iter()
            .map(|tag| {
                let tag = tag
                    .as_str()
                    .ok_or_else(|| invalid(op, "parameterTypes", "expected string tags"))?;
                ParamType::from_tag(tag).ok_or_else(|| {
                    invalid(op, "parameterTypes", format!("unknown parameter type '{tag}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let raw = doc.optional_array(op, "parameters")?;
        if !raw.is_empty() && raw.len() != types.len() {
            return Err(invalid(
                op,
                "parameters",
                format!("{} values given for {} parameter types", raw.len(), types.len()),
            ));
        }

        let values = types
            .iter()
            .zip(raw)
            .enumerate()
            .map(|(i, (ty, json))| {
                ty.decode_value(json)
                    .map_err(|reason| invalid(op, "parameters", format!("position {}: {reason}", i + 1)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { types, values })
    }

    pub(crate) fn encode_into(
        &self,
        fields: &mut Map<String, JsonValue>,
        op: &'static str,
    ) -> Result<(), ProtocolError> {
        let types = self
            .types
            .iter()
            .map(|ty| JsonValue::String(ty.tag().to_string()))
            .collect();
        let values = self
            .types
            .iter()
            .zip(&self.values)
            .map(|(ty, value)| ty.encode_value(value).map_err(|e| invalid(op, "parameters", e)))
            .collect::<Result<Vec<_>, _>>()?;

        fields.insert("parameterTypes".into(), JsonValue::Array(types));
        fields.insert("parameters".into(), JsonValue::Array(values));
        Ok(())
    }
}
