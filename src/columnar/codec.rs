use std::{io::Cursor, sync::Arc};

use arrow_array::{
    Array, ArrayRef, RecordBatch, RecordBatchOptions,
    builder::{
        BooleanBuilder, Date32Builder, Decimal128Builder, Float32Builder, Float64Builder,
        Int8Builder, Int16Builder, Int32Builder, Int64Builder, StringBuilder,
        Time64MicrosecondBuilder, TimestampMicrosecondBuilder, UInt8Builder, UInt16Builder,
        UInt32Builder, UInt64Builder,
    },
    cast::AsArray,
    types::{
        Date32Type, Decimal128Type, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type,
        Int64Type, Time64MicrosecondType, TimestampMicrosecondType, UInt8Type, UInt16Type,
        UInt32Type, UInt64Type,
    },
};
use arrow_ipc::{reader::StreamReader, writer::StreamWriter};
use arrow_schema::{ArrowError, DataType, Schema};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike};
use log::debug;

use super::{Column, ColumnarError, schema};
use crate::types::{ColumnType, Decimal, MAX_PRECISION, Value, parse_offset};

/// Every encapsulated IPC message starts with this marker.
const CONTINUATION_MARKER: [u8; 4] = [0xff; 4];

/// Column time zone when no row carries an offset.
const UTC_OFFSET: &str = "+00:00";

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;
const MICROS_PER_SECOND: i64 = 1_000_000;

/// HUGEINT travels as `Decimal128(38, 0)`, which holds 38 digits.
const MAX_HUGEINT: u128 = 10u128.pow(MAX_PRECISION as u32) - 1;

/// Encode `row_count` rows of `columns` as an Arrow IPC stream.
///
/// Cells that cannot be represented in their column's declared type are
/// stored as null.
pub fn encode(columns: &[Column], row_count: usize) -> Result<Vec<u8>, ColumnarError> {
    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays = Vec::with_capacity(columns.len());

    for column in columns {
        if column.len() != row_count {
            return Err(ColumnarError::RowCountMismatch {
                column: column.field.name.clone(),
                rows: row_count,
                detail: format!("column has {} values", column.len()),
            });
        }
        let array = build_array(column.field.column_type, &cast_cells(column))?;
        fields.push(schema::to_arrow(&column.field, array.data_type().clone()));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let options = RecordBatchOptions::new().with_row_count(Some(row_count));
    let batch = RecordBatch::try_new_with_options(schema.clone(), arrays, &options)?;

    let mut writer = StreamWriter::try_new(Vec::new(), &schema)?;
    writer.write(&batch)?;
    Ok(writer.into_inner()?)
}

/// Cast every cell to the column type, nulling the ones that do not fit.
fn cast_cells(column: &Column) -> Vec<Value> {
    let ty = column.field.column_type;
    column
        .values
        .iter()
        .enumerate()
        .map(|(row, cell)| match cell.cast(ty) {
            Ok(Value::Int128(v)) if v.unsigned_abs() > MAX_HUGEINT => {
                debug!(
                    "column '{}' row {row}: {v} exceeds {MAX_PRECISION} digits, storing null",
                    column.field.name
                );
                Value::Null
            }
            Ok(value) => value,
            Err(e) => {
                debug!("column '{}' row {row}: {e}, storing null", column.field.name);
                Value::Null
            }
        })
        .collect()
}

/// Build the Arrow array for cells already cast to `ty`.
fn build_array(ty: ColumnType, cells: &[Value]) -> Result<ArrayRef, ArrowError> {
    let rows = cells.len();

    macro_rules! build {
        ($builder:expr, $cell:pat => $native:expr) => {{
            let mut builder = $builder;
            for cell in cells {
                builder.append_option(match cell {
                    $cell => Some($native),
                    _ => None,
                });
            }
            Arc::new(builder.finish()) as ArrayRef
        }};
    }

    Ok(match ty {
        ColumnType::Boolean => build!(BooleanBuilder::with_capacity(rows), Value::Boolean(v) => *v),
        ColumnType::TinyInt => build!(Int8Builder::with_capacity(rows), Value::Int8(v) => *v),
        ColumnType::SmallInt => build!(Int16Builder::with_capacity(rows), Value::Int16(v) => *v),
        ColumnType::Integer => build!(Int32Builder::with_capacity(rows), Value::Int32(v) => *v),
        ColumnType::BigInt => build!(Int64Builder::with_capacity(rows), Value::Int64(v) => *v),
        ColumnType::HugeInt => build!(
            Decimal128Builder::with_capacity(rows).with_precision_and_scale(MAX_PRECISION, 0)?,
            Value::Int128(v) => *v
        ),
        ColumnType::UTinyInt => build!(UInt8Builder::with_capacity(rows), Value::UInt8(v) => *v),
        ColumnType::USmallInt => build!(UInt16Builder::with_capacity(rows), Value::UInt16(v) => *v),
        ColumnType::UInteger => build!(UInt32Builder::with_capacity(rows), Value::UInt32(v) => *v),
        ColumnType::UBigInt => build!(UInt64Builder::with_capacity(rows), Value::UInt64(v) => *v),
        ColumnType::Float => build!(Float32Builder::with_capacity(rows), Value::Float32(v) => *v),
        ColumnType::Double => build!(Float64Builder::with_capacity(rows), Value::Float64(v) => *v),
        ColumnType::Decimal { precision, scale } => {
            let scale = i8::try_from(scale).map_err(|_| {
                ArrowError::InvalidArgumentError(format!("decimal scale {scale} is too large"))
            })?;
            build!(
                Decimal128Builder::with_capacity(rows).with_precision_and_scale(precision, scale)?,
                Value::Decimal(d) => d.unscaled()
            )
        }
        ColumnType::Varchar => build!(
            StringBuilder::with_capacity(rows, rows * 16),
            Value::Varchar(s) => s.as_str()
        ),
        ColumnType::Date => build!(
            Date32Builder::with_capacity(rows),
            Value::Date(d) => d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
        ),
        ColumnType::Time => build!(
            Time64MicrosecondBuilder::with_capacity(rows),
            Value::Time(t) => i64::from(t.num_seconds_from_midnight()) * MICROS_PER_SECOND
                + i64::from(t.nanosecond() / 1_000)
        ),
        ColumnType::Timestamp => build!(
            TimestampMicrosecondBuilder::with_capacity(rows),
            Value::Timestamp(ts) => ts.and_utc().timestamp_micros()
        ),
        ColumnType::TimestampTz => {
            // One zone per column: rows keep their instant, not their offset.
            let zone = cells
                .iter()
                .find_map(|cell| match cell {
                    Value::TimestampTz(ts) => Some(ts.offset().to_string()),
                    _ => None,
                })
                .unwrap_or_else(|| UTC_OFFSET.to_string());
            build!(
                TimestampMicrosecondBuilder::with_capacity(rows).with_timezone(zone),
                Value::TimestampTz(ts) => ts.timestamp_micros()
            )
        }
    })
}

/// Decode an Arrow IPC stream into its columns and row count.
///
/// The stream may hold any number of record batches; their rows are
/// concatenated in order.
pub fn decode(bytes: &[u8]) -> Result<(Vec<Column>, usize), ColumnarError> {
    check_stream_start(bytes)?;

    let reader = StreamReader::try_new(Cursor::new(bytes), None)?;
    let arrow_schema = reader.schema();
    let batches = reader.collect::<Result<Vec<RecordBatch>, ArrowError>>()?;

    // Arrow arrays such as nulls occupy no bytes per row. Refuse row counts
    // the payload could not have carried before materializing any cell.
    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    if rows.saturating_mul(arrow_schema.fields().len()) > bytes.len().saturating_mul(8) {
        return Err(ColumnarError::ImplausibleRowCount {
            rows,
            size: bytes.len(),
        });
    }

    let mut columns = arrow_schema
        .fields()
        .iter()
        .map(|f| Ok(Column::new(schema::from_arrow(f)?, Vec::with_capacity(rows))))
        .collect::<Result<Vec<_>, ColumnarError>>()?;

    for batch in &batches {
        for (column, array) in columns.iter_mut().zip(batch.columns()) {
            read_array(column, array)?;
        }
    }

    Ok((columns, rows))
}

/// The schema message must be framed and its length must fit the payload.
fn check_stream_start(bytes: &[u8]) -> Result<(), ColumnarError> {
    let not_a_stream = |reason: &str| ColumnarError::Schema(format!("not an Arrow IPC stream: {reason}"));

    let Some((marker, rest)) = bytes.split_first_chunk::<4>() else {
        return Err(not_a_stream("payload too short"));
    };
    if *marker != CONTINUATION_MARKER {
        return Err(not_a_stream("missing continuation marker"));
    }
    let Some((len, rest)) = rest.split_first_chunk::<4>() else {
        return Err(not_a_stream("payload too short"));
    };
    let len = i32::from_le_bytes(*len);
    if usize::try_from(len).map_or(true, |len| len > rest.len()) {
        return Err(not_a_stream("schema message length out of range"));
    }
    Ok(())
}

/// Append the cells of one batch's `array` to `column`.
fn read_array(column: &mut Column, array: &ArrayRef) -> Result<(), ColumnarError> {
    let Column { field, values } = column;

    if array.data_type() == &DataType::Null {
        values.resize(values.len() + array.len(), Value::Null);
        return Ok(());
    }

    let mismatch = || ColumnarError::Region {
        column: field.name.clone(),
        reason: format!("{} array cannot hold {}", array.data_type(), field.column_type),
    };
    let invalid = |row: usize| ColumnarError::Region {
        column: field.name.clone(),
        reason: format!("row {row} does not hold a valid {}", field.column_type),
    };

    macro_rules! read {
        ($typed:expr, $native:ident => $value:expr) => {{
            let typed = $typed.ok_or_else(mismatch)?;
            for (row, cell) in typed.iter().enumerate() {
                let value = match cell {
                    Some($native) => $value.ok_or_else(|| invalid(row))?,
                    None => Value::Null,
                };
                values.push(value);
            }
        }};
    }

    match field.column_type {
        ColumnType::Boolean => read!(array.as_boolean_opt(), v => Some(Value::Boolean(v))),
        ColumnType::TinyInt => read!(array.as_primitive_opt::<Int8Type>(), v => Some(Value::Int8(v))),
        ColumnType::SmallInt => {
            read!(array.as_primitive_opt::<Int16Type>(), v => Some(Value::Int16(v)))
        }
        ColumnType::Integer => {
            read!(array.as_primitive_opt::<Int32Type>(), v => Some(Value::Int32(v)))
        }
        ColumnType::BigInt => read!(array.as_primitive_opt::<Int64Type>(), v => Some(Value::Int64(v))),
        ColumnType::HugeInt => read!(
            array.as_primitive_opt::<Decimal128Type>(),
            v => (v.unsigned_abs() <= MAX_HUGEINT).then_some(Value::Int128(v))
        ),
        ColumnType::UTinyInt => {
            read!(array.as_primitive_opt::<UInt8Type>(), v => Some(Value::UInt8(v)))
        }
        ColumnType::USmallInt => {
            read!(array.as_primitive_opt::<UInt16Type>(), v => Some(Value::UInt16(v)))
        }
        ColumnType::UInteger => {
            read!(array.as_primitive_opt::<UInt32Type>(), v => Some(Value::UInt32(v)))
        }
        ColumnType::UBigInt => {
            read!(array.as_primitive_opt::<UInt64Type>(), v => Some(Value::UInt64(v)))
        }
        ColumnType::Float => {
            read!(array.as_primitive_opt::<Float32Type>(), v => Some(Value::Float32(v)))
        }
        ColumnType::Double => {
            read!(array.as_primitive_opt::<Float64Type>(), v => Some(Value::Float64(v)))
        }
        ColumnType::Decimal { precision, scale } => read!(
            array.as_primitive_opt::<Decimal128Type>(),
            v => Decimal::new(v, scale)
                .ok()
                .filter(|d| d.fits(precision))
                .map(Value::Decimal)
        ),
        ColumnType::Varchar => {
            read!(array.as_string_opt::<i32>(), v => Some(Value::Varchar(v.to_string())))
        }
        ColumnType::Date => read!(
            array.as_primitive_opt::<Date32Type>(),
            days => days
                .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .map(Value::Date)
        ),
        ColumnType::Time => read!(
            array.as_primitive_opt::<Time64MicrosecondType>(),
            micros => time_from_micros(micros).map(Value::Time)
        ),
        ColumnType::Timestamp => read!(
            array.as_primitive_opt::<TimestampMicrosecondType>(),
            micros => DateTime::from_timestamp_micros(micros).map(|ts| Value::Timestamp(ts.naive_utc()))
        ),
        ColumnType::TimestampTz => {
            let offset = match array.data_type() {
                DataType::Timestamp(_, Some(zone)) => parse_offset(zone),
                _ => None,
            }
            .ok_or_else(|| ColumnarError::Region {
                column: field.name.clone(),
                reason: format!("unsupported time zone in {}", array.data_type()),
            })?;
            read!(
                array.as_primitive_opt::<TimestampMicrosecondType>(),
                micros => DateTime::from_timestamp_micros(micros)
                    .map(|ts| Value::TimestampTz(ts.with_timezone(&offset)))
            )
        }
    }

    Ok(())
}

fn time_from_micros(micros: i64) -> Option<NaiveTime> {
    let secs = u32::try_from(micros.div_euclid(MICROS_PER_SECOND)).ok()?;
    let nanos = u32::try_from(micros.rem_euclid(MICROS_PER_SECOND) * 1_000).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::Field;
    use arrow_array::{Int32Array, NullArray};
    use arrow_schema::Field as ArrowField;
    use chrono::NaiveDateTime;

    fn column(name: &str, ty: ColumnType, values: Vec<Value>) -> Column {
        Column::new(Field::new(name, ty), values)
    }

    fn timestamp(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    fn ipc_stream(fields: Vec<ArrowField>, batches: Vec<Vec<ArrayRef>>) -> Vec<u8> {
        let schema = Arc::new(Schema::new(fields));
        let mut writer = StreamWriter::try_new(Vec::new(), &schema).unwrap();
        for arrays in batches {
            writer
                .write(&RecordBatch::try_new(schema.clone(), arrays).unwrap())
                .unwrap();
        }
        writer.into_inner().unwrap()
    }

    #[test]
    fn mixed_result_set_survives_encoding() {
        let columns = vec![
            column("flag", ColumnType::Boolean, vec![
                Value::Boolean(true),
                Value::Null,
                Value::Boolean(false),
            ]),
            column("big", ColumnType::HugeInt, vec![
                Value::Int128(-(10i128.pow(37))),
                Value::Int128(0),
                Value::Null,
            ]),
            column("u", ColumnType::UBigInt, vec![
                Value::UInt64(u64::MAX),
                Value::Null,
                Value::UInt64(1),
            ]),
            column("ratio", ColumnType::Float, vec![
                Value::Float32(0.5),
                Value::Float32(f32::NEG_INFINITY),
                Value::Null,
            ]),
            column(
                "amount",
                ColumnType::Decimal {
                    precision: 9,
                    scale: 3,
                },
                vec![
                    Value::Decimal("-123456.789".parse().unwrap()),
                    Value::Null,
                    Value::Decimal("0.001".parse().unwrap()),
                ],
            ),
            column("name", ColumnType::Varchar, vec![
                Value::Varchar("héllo".into()),
                Value::Varchar(String::new()),
                Value::Null,
            ]),
            column("day", ColumnType::Date, vec![
                Value::Date(NaiveDate::from_ymd_opt(1969, 12, 31).unwrap()),
                Value::Null,
                Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
            ]),
            column("at", ColumnType::Time, vec![
                Value::Time(NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap()),
                Value::Null,
                Value::Time(NaiveTime::from_hms_opt(0, 0, 0).unwrap()),
            ]),
            column("ts", ColumnType::Timestamp, vec![
                Value::Timestamp(timestamp("1900-01-01 00:00:00.000001")),
                Value::Timestamp(timestamp("2024-06-30 12:00:00")),
                Value::Null,
            ]),
            column("tstz", ColumnType::TimestampTz, vec![
                Value::Null,
                Value::TimestampTz(
                    DateTime::parse_from_rfc3339("2024-06-30T12:00:00.25-07:00").unwrap(),
                ),
                Value::TimestampTz(DateTime::parse_from_rfc3339("2024-06-30T12:00:00+05:45").unwrap()),
            ]),
        ];

        let bytes = encode(&columns, 3).unwrap();
        let (decoded, rows) = decode(&bytes).unwrap();
        assert_eq!(rows, 3);
        assert_eq!(decoded, columns);

        // Instants survive; every row takes the column's zone.
        let Value::TimestampTz(tz) = &decoded[9].values[2] else {
            panic!("expected an offset timestamp");
        };
        assert_eq!(tz.offset().local_minus_utc(), -7 * 3600);
        assert_eq!(tz.to_rfc3339(), "2024-06-29T23:15:00-07:00");
    }

    #[test]
    fn payload_is_a_standard_arrow_stream() {
        let columns = vec![
            column("id", ColumnType::Integer, vec![Value::Int32(42)]),
            column(
                "price",
                ColumnType::Decimal {
                    precision: 10,
                    scale: 2,
                },
                vec![Value::Decimal(Decimal::new(1999, 2).unwrap())],
            ),
        ];

        let bytes = encode(&columns, 1).unwrap();
        let mut reader = StreamReader::try_new(Cursor::new(bytes), None).unwrap();
        let schema = reader.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Int32);
        assert_eq!(schema.field(1).data_type(), &DataType::Decimal128(10, 2));
        assert_eq!(
            schema.field(1).metadata().get("typeTag").map(String::as_str),
            Some("DECIMAL")
        );

        let batch = reader.next().unwrap().unwrap();
        assert_eq!(batch.column(0).as_primitive::<Int32Type>().value(0), 42);
        assert_eq!(batch.column(1).as_primitive::<Decimal128Type>().value(0), 1999);
        assert!(reader.next().is_none());
    }

    #[test]
    fn out_of_range_cell_becomes_null() {
        let columns = vec![
            column("small", ColumnType::TinyInt, vec![
                Value::Int64(1),
                Value::Int64(300),
                Value::Int64(3),
            ]),
            column("huge", ColumnType::HugeInt, vec![
                Value::Int128(7),
                Value::Int128(i128::MIN),
                Value::Int128(-7),
            ]),
        ];

        let (decoded, rows) = decode(&encode(&columns, 3).unwrap()).unwrap();
        assert_eq!(rows, 3);
        assert_eq!(decoded[0].values, vec![
            Value::Int8(1),
            Value::Null,
            Value::Int8(3)
        ]);
        assert_eq!(decoded[1].values, vec![
            Value::Int128(7),
            Value::Null,
            Value::Int128(-7)
        ]);
    }

    #[test]
    fn cells_are_cast_to_the_declared_type() {
        let columns = vec![column(
            "price",
            ColumnType::Decimal {
                precision: 6,
                scale: 2,
            },
            vec![Value::Float64(12.345), Value::Varchar("7".into()), Value::Float64(1e9)],
        )];

        let (decoded, _) = decode(&encode(&columns, 3).unwrap()).unwrap();
        assert_eq!(decoded[0].values, vec![
            Value::Decimal(Decimal::new(1235, 2).unwrap()),
            Value::Decimal(Decimal::new(700, 2).unwrap()),
            Value::Null,
        ]);
    }

    #[test]
    fn empty_result_keeps_its_schema() {
        let columns = vec![column("id", ColumnType::Integer, vec![])];
        let (decoded, rows) = decode(&encode(&columns, 0).unwrap()).unwrap();
        assert_eq!(rows, 0);
        assert_eq!(decoded, columns);
    }

    #[test]
    fn column_length_must_match_row_count() {
        let columns = vec![column("id", ColumnType::Integer, vec![Value::Int32(1)])];
        assert!(matches!(
            encode(&columns, 2),
            Err(ColumnarError::RowCountMismatch { .. })
        ));
    }

    #[test]
    fn batches_are_concatenated() {
        let bytes = ipc_stream(vec![ArrowField::new("n", DataType::Int32, true)], vec![
            vec![Arc::new(Int32Array::from(vec![Some(1), None])) as ArrayRef],
            vec![Arc::new(Int32Array::from(vec![Some(3)])) as ArrayRef],
        ]);

        let (decoded, rows) = decode(&bytes).unwrap();
        assert_eq!(rows, 3);
        assert_eq!(decoded[0].field, Field::new("n", ColumnType::Integer));
        assert_eq!(decoded[0].values, vec![
            Value::Int32(1),
            Value::Null,
            Value::Int32(3)
        ]);
    }

    #[test]
    fn row_count_beyond_the_payload_is_refused() {
        let bytes = ipc_stream(vec![ArrowField::new("n", DataType::Null, true)], vec![vec![
            Arc::new(NullArray::new(1_600_000_000)) as ArrayRef,
        ]]);

        assert!(matches!(
            decode(&bytes),
            Err(ColumnarError::ImplausibleRowCount {
                rows: 1_600_000_000,
                ..
            })
        ));
    }

    #[test]
    fn all_null_columns_decode() {
        let bytes = ipc_stream(vec![ArrowField::new("n", DataType::Null, true)], vec![vec![
            Arc::new(NullArray::new(2)) as ArrayRef,
        ]]);

        let (decoded, rows) = decode(&bytes).unwrap();
        assert_eq!(rows, 2);
        assert_eq!(decoded[0].values, vec![Value::Null, Value::Null]);
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let columns = vec![column("id", ColumnType::BigInt, vec![
            Value::Int64(1),
            Value::Int64(2),
        ])];
        let bytes = encode(&columns, 2).unwrap();
        assert!(decode(&bytes[..bytes.len() - 12]).is_err());
        assert!(decode(&bytes[..20]).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            decode(b"definitely not a block"),
            Err(ColumnarError::Schema(_))
        ));
        assert!(matches!(
            decode(&[0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x7f, 1, 2, 3]),
            Err(ColumnarError::Schema(_))
        ));

        let mut noise = vec![0xff, 0xff, 0xff, 0xff, 8, 0, 0, 0];
        noise.extend_from_slice(b"12345678");
        assert!(decode(&noise).is_err());
    }
}
