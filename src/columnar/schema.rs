use std::collections::HashMap;

use arrow_schema::{DataType, Field as ArrowField, TimeUnit};

use super::{ColumnarError, Field};
use crate::types::{ColumnType, MAX_PRECISION};

/// Field metadata key holding the SQL type name of a column.
pub(super) const TYPE_TAG: &str = "typeTag";

/// Arrow field for `field`, stored as `data_type`, tagged with its SQL name.
pub(super) fn to_arrow(field: &Field, data_type: DataType) -> ArrowField {
    let metadata = HashMap::from([(
        TYPE_TAG.to_string(),
        field.column_type.sql_name().to_string(),
    )]);
    ArrowField::new(field.name.as_str(), data_type, true).with_metadata(metadata)
}

/// Map an Arrow field back to a result column.
///
/// The column type follows the Arrow data type. A `typeTag` entry, when
/// present, must name the same SQL type; it is what tells a `HUGEINT`
/// apart from a `DECIMAL(38, 0)`.
pub(super) fn from_arrow(field: &ArrowField) -> Result<Field, ColumnarError> {
    let tag = field.metadata().get(TYPE_TAG).map(String::as_str);
    let unsupported = || {
        ColumnarError::Schema(format!(
            "column '{}' has unsupported type {}",
            field.name(),
            field.data_type()
        ))
    };

    let column_type = match field.data_type() {
        DataType::Boolean => ColumnType::Boolean,
        DataType::Int8 => ColumnType::TinyInt,
        DataType::Int16 => ColumnType::SmallInt,
        DataType::Int32 => ColumnType::Integer,
        DataType::Int64 => ColumnType::BigInt,
        DataType::UInt8 => ColumnType::UTinyInt,
        DataType::UInt16 => ColumnType::USmallInt,
        DataType::UInt32 => ColumnType::UInteger,
        DataType::UInt64 => ColumnType::UBigInt,
        DataType::Float32 => ColumnType::Float,
        DataType::Float64 => ColumnType::Double,
        DataType::Utf8 | DataType::Null => ColumnType::Varchar,
        DataType::Decimal128(MAX_PRECISION, 0) if tag == Some("HUGEINT") => ColumnType::HugeInt,
        DataType::Decimal128(precision, scale) => {
            let scale = u8::try_from(*scale).map_err(|_| unsupported())?;
            ColumnType::from_tag("DECIMAL", Some(*precision), Some(scale))
                .ok_or_else(unsupported)?
        }
        DataType::Date32 => ColumnType::Date,
        DataType::Time64(TimeUnit::Microsecond) => ColumnType::Time,
        DataType::Timestamp(TimeUnit::Microsecond, None) => ColumnType::Timestamp,
        DataType::Timestamp(TimeUnit::Microsecond, Some(_)) => ColumnType::TimestampTz,
        _ => return Err(unsupported()),
    };

    if let Some(tag) = tag {
        let tagged = ColumnType::from_sql_name(tag).map(|ty| ty.sql_name());
        if tagged != Some(column_type.sql_name()) {
            return Err(ColumnarError::Schema(format!(
                "column '{}' is tagged {tag} but stored as {}",
                field.name(),
                field.data_type()
            )));
        }
    }

    Ok(Field::new(field.name().as_str(), column_type))
}
