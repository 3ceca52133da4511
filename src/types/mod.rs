//! Scalar data model shared by the wire codecs and the engine adapter.
//!
//! [`Value`] is the single dynamically typed scalar that flows through the
//! system: statement parameters are decoded into it, engine rows are
//! produced as it, and columnar payloads are built from and decoded back into
//! it. [`ColumnType`] is the SQL type lattice a result column is declared
//! with, and [`Value::cast`] is the conversion policy between the two.
mod column_type;
mod decimal;
mod temporal;

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

pub use column_type::ColumnType;
pub use decimal::{Decimal, DecimalError, MAX_PRECISION};
pub(crate) use temporal::{
    format_date, format_time, format_timestamp, format_timestamp_tz, parse_date, parse_offset,
    parse_time, parse_timestamp, parse_timestamp_tz, truncate_to_micros,
};

/// A value could not be represented in the type its column declares.
///
/// Raised only while building a columnar payload, where it is recovered by
/// storing null in that cell.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("cannot represent {kind} value '{value}' as {target}")]
pub struct CellConversionError {
    pub kind: &'static str,
    pub value: String,
    pub target: ColumnType,
}

/// One SQL scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int128(i128),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
    Varchar(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Int128(_) => "int128",
            Value::UInt8(_) => "uint8",
            Value::UInt16(_) => "uint16",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Decimal(_) => "decimal",
            Value::Varchar(_) => "varchar",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
        }
    }

    /// The column type this value would naturally be stored as, if any.
    pub fn natural_type(&self) -> Option<ColumnType> {
        Some(match self {
            Value::Null => return None,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Int8(_) => ColumnType::TinyInt,
            Value::Int16(_) => ColumnType::SmallInt,
            Value::Int32(_) => ColumnType::Integer,
            Value::Int64(_) => ColumnType::BigInt,
            Value::Int128(_) => ColumnType::HugeInt,
            Value::UInt8(_) => ColumnType::UTinyInt,
            Value::UInt16(_) => ColumnType::USmallInt,
            Value::UInt32(_) => ColumnType::UInteger,
            Value::UInt64(_) => ColumnType::UBigInt,
            Value::Float32(_) => ColumnType::Float,
            Value::Float64(_) => ColumnType::Double,
            Value::Decimal(d) => ColumnType::Decimal {
                precision: d.digits().max(d.scale()),
                scale: d.scale(),
            },
            Value::Varchar(_) => ColumnType::Varchar,
            Value::Date(_) => ColumnType::Date,
            Value::Time(_) => ColumnType::Time,
            Value::Timestamp(_) => ColumnType::Timestamp,
            Value::TimestampTz(_) => ColumnType::TimestampTz,
        })
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Boolean(b) => Some(i128::from(*b)),
            Value::Int8(v) => Some((*v).into()),
            Value::Int16(v) => Some((*v).into()),
            Value::Int32(v) => Some((*v).into()),
            Value::Int64(v) => Some((*v).into()),
            Value::Int128(v) => Some(*v),
            Value::UInt8(v) => Some((*v).into()),
            Value::UInt16(v) => Some((*v).into()),
            Value::UInt32(v) => Some((*v).into()),
            Value::UInt64(v) => Some((*v).into()),
            Value::Float32(v) => float_to_i128((*v).into()),
            Value::Float64(v) => float_to_i128(*v),
            Value::Decimal(d) => d.to_integer(),
            Value::Varchar(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some((*v).into()),
            Value::Float64(v) => Some(*v),
            Value::Decimal(d) => Some(d.to_f64()),
            Value::Varchar(s) => s.trim().parse().ok(),
            other => other.as_i128().map(|v| v as f64),
        }
    }

    fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Float32(v) => Decimal::from_f64((*v).into()),
            Value::Float64(v) => Decimal::from_f64(*v),
            Value::Varchar(s) => s.parse().ok(),
            other => other.as_i128().and_then(|v| Decimal::new(v, 0).ok()),
        }
    }

    /// Convert this value into one that can be stored in a column of
    /// `target`. Null converts to null for every type.
    pub fn cast(&self, target: ColumnType) -> Result<Value, CellConversionError> {
        if self.is_null() {
            return Ok(Value::Null);
        }

        let converted = match target {
            ColumnType::Boolean => match self {
                Value::Boolean(b) => Some(*b),
                Value::Varchar(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" => Some(true),
                    "false" | "f" | "0" => Some(false),
                    _ => None,
                },
                other => match other.as_i128() {
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    _ => None,
                },
            }
            .map(Value::Boolean),
            ColumnType::TinyInt => self.int_as::<i8>().map(Value::Int8),
            ColumnType::SmallInt => self.int_as::<i16>().map(Value::Int16),
            ColumnType::Integer => self.int_as::<i32>().map(Value::Int32),
            ColumnType::BigInt => self.int_as::<i64>().map(Value::Int64),
            ColumnType::HugeInt => self.as_i128().map(Value::Int128),
            ColumnType::UTinyInt => self.int_as::<u8>().map(Value::UInt8),
            ColumnType::USmallInt => self.int_as::<u16>().map(Value::UInt16),
            ColumnType::UInteger => self.int_as::<u32>().map(Value::UInt32),
            ColumnType::UBigInt => self.int_as::<u64>().map(Value::UInt64),
            ColumnType::Float => self
                .as_f64()
                .map(|v| v as f32)
                .filter(|v| v.is_finite() || !self.as_f64().is_some_and(f64::is_finite))
                .map(Value::Float32),
            ColumnType::Double => self.as_f64().map(Value::Float64),
            ColumnType::Decimal { precision, scale } => self
                .as_decimal()
                .and_then(|d| d.rescale(scale))
                .filter(|d| d.fits(precision))
                .map(Value::Decimal),
            ColumnType::Varchar => Some(Value::Varchar(match self {
                Value::Varchar(s) => s.clone(),
                other => other.to_string(),
            })),
            ColumnType::Date => match self {
                Value::Date(d) => Some(*d),
                Value::Timestamp(ts) => Some(ts.date()),
                Value::TimestampTz(ts) => Some(ts.date_naive()),
                Value::Varchar(s) => parse_date(s),
                _ => None,
            }
            .map(Value::Date),
            ColumnType::Time => match self {
                Value::Time(t) => Some(*t),
                Value::Timestamp(ts) => Some(ts.time()),
                Value::Varchar(s) => parse_time(s),
                _ => None,
            }
            .map(truncate_to_micros)
            .map(Value::Time),
            ColumnType::Timestamp => match self {
                Value::Timestamp(ts) => Some(*ts),
                Value::Date(d) => d.and_hms_opt(0, 0, 0),
                Value::TimestampTz(ts) => Some(ts.naive_utc()),
                Value::Varchar(s) => parse_timestamp(s),
                _ => None,
            }
            .map(truncate_to_micros)
            .map(Value::Timestamp),
            ColumnType::TimestampTz => match self {
                Value::TimestampTz(ts) => Some(*ts),
                Value::Timestamp(ts) => Some(ts.and_utc().fixed_offset()),
                Value::Varchar(s) => parse_timestamp_tz(s),
                _ => None,
            }
            .map(truncate_to_micros)
            .map(Value::TimestampTz),
        };

        converted.ok_or_else(|| CellConversionError {
            kind: self.kind(),
            value: self.to_string(),
            target,
        })
    }

    fn int_as<T: TryFrom<i128>>(&self) -> Option<T> {
        self.as_i128().and_then(|v| T::try_from(v).ok())
    }
}

fn float_to_i128(v: f64) -> Option<i128> {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1.7e38 {
        Some(v as i128)
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Int128(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Varchar(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{}", format_date(v)),
            Value::Time(v) => write!(f, "{}", format_time(v)),
            Value::Timestamp(v) => write!(f, "{}", format_timestamp(v)),
            Value::TimestampTz(v) => write!(f, "{}", format_timestamp_tz(v)),
        }
    }
}
