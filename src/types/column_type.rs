use std::fmt;

use super::MAX_PRECISION;

/// Precision/scale used for a bare `DECIMAL` declaration.
const DEFAULT_DECIMAL: (u8, u8) = (18, 3);

/// Declared type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    HugeInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Varchar,
    Date,
    Time,
    Timestamp,
    TimestampTz,
}

impl ColumnType {
    /// Tag written into the columnar schema.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::TinyInt => "TINYINT",
            ColumnType::SmallInt => "SMALLINT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::HugeInt => "HUGEINT",
            ColumnType::UTinyInt => "UTINYINT",
            ColumnType::USmallInt => "USMALLINT",
            ColumnType::UInteger => "UINTEGER",
            ColumnType::UBigInt => "UBIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Decimal { .. } => "DECIMAL",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Date => "DATE",
            ColumnType::Time => "TIME",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::TimestampTz => "TIMESTAMP_WITH_TIME_ZONE",
        }
    }

    /// Resolve a type tag plus the optional decimal metadata recorded next
    /// to it in a schema.
    pub fn from_tag(tag: &str, precision: Option<u8>, scale: Option<u8>) -> Option<Self> {
        match Self::from_sql_name(tag)? {
            ColumnType::Decimal { .. } => {
                let precision = precision?;
                let scale = scale?;
                if precision == 0 || precision > MAX_PRECISION || scale > precision {
                    return None;
                }
                Some(ColumnType::Decimal { precision, scale })
            }
            other => Some(other),
        }
    }

    /// Parse a SQL type declaration such as `INTEGER`, `VARCHAR(32)`,
    /// `DECIMAL(10, 2)` or `TIMESTAMP WITH TIME ZONE`.
    pub fn from_sql_name(declared: &str) -> Option<Self> {
        let declared = declared.trim().to_ascii_uppercase();
        let (base, args) = match declared.split_once('(') {
            Some((base, rest)) => (base.trim(), Some(rest.trim_end_matches(')'))),
            None => (declared.as_str(), None),
        };
        let base = base.split_whitespace().collect::<Vec<_>>().join(" ");

        let ty = match base.as_str() {
            "BOOLEAN" | "BOOL" | "LOGICAL" => ColumnType::Boolean,
            "TINYINT" | "INT1" => ColumnType::TinyInt,
            "SMALLINT" | "INT2" | "SHORT" => ColumnType::SmallInt,
            "INTEGER" | "INT" | "INT4" | "SIGNED" | "MEDIUMINT" => ColumnType::Integer,
            "BIGINT" | "INT8" | "LONG" => ColumnType::BigInt,
            "HUGEINT" | "INT128" => ColumnType::HugeInt,
            "UTINYINT" => ColumnType::UTinyInt,
            "USMALLINT" => ColumnType::USmallInt,
            "UINTEGER" => ColumnType::UInteger,
            "UBIGINT" => ColumnType::UBigInt,
            "FLOAT" | "FLOAT4" | "REAL" => ColumnType::Float,
            "DOUBLE" | "FLOAT8" | "DOUBLE PRECISION" => ColumnType::Double,
            "DECIMAL" | "NUMERIC" => {
                let (precision, scale) = match args {
                    Some(args) => parse_decimal_args(args)?,
                    None => DEFAULT_DECIMAL,
                };
                ColumnType::Decimal { precision, scale }
            }
            "VARCHAR" | "TEXT" | "STRING" | "CHAR" | "BPCHAR" | "CLOB" | "ENUM" => {
                ColumnType::Varchar
            }
            "DATE" => ColumnType::Date,
            "TIME" => ColumnType::Time,
            "TIMESTAMP" | "DATETIME" => ColumnType::Timestamp,
            "TIMESTAMPTZ"
            | "TIMESTAMP_WITH_TIME_ZONE"
            | "TIMESTAMP WITH TIME ZONE" => ColumnType::TimestampTz,
            _ => return None,
        };
        Some(ty)
    }
}

fn parse_decimal_args(args: &str) -> Option<(u8, u8)> {
    let mut parts = args.split(',').map(|p| p.trim().parse::<u8>());
    let precision = parts.next()?.ok()?;
    let scale = match parts.next() {
        Some(scale) => scale.ok()?,
        None => 0,
    };
    if parts.next().is_some() || precision == 0 || precision > MAX_PRECISION || scale > precision {
        return None;
    }
    Some((precision, scale))
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            other => f.write_str(other.sql_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declarations() {
        let inputs = vec![
            ("integer", ColumnType::Integer),
            ("VARCHAR(32)", ColumnType::Varchar),
            (
                "decimal(10, 2)",
                ColumnType::Decimal {
                    precision: 10,
                    scale: 2,
                },
            ),
            (
                "NUMERIC",
                ColumnType::Decimal {
                    precision: 18,
                    scale: 3,
                },
            ),
            ("timestamp with time zone", ColumnType::TimestampTz),
            ("DOUBLE PRECISION", ColumnType::Double),
        ];

        for (declared, expected) in inputs {
            assert_eq!(ColumnType::from_sql_name(declared), Some(expected), "{declared}");
        }
    }

    #[test]
    fn rejects_unknown_and_bad_decimals() {
        assert_eq!(ColumnType::from_sql_name("BLOB"), None);
        assert_eq!(ColumnType::from_sql_name("DECIMAL(2,5)"), None);
        assert_eq!(ColumnType::from_sql_name("DECIMAL(40,0)"), None);
    }

    #[test]
    fn every_tag_round_trips() {
        let types = [
            ColumnType::Boolean,
            ColumnType::TinyInt,
            ColumnType::SmallInt,
            ColumnType::Integer,
            ColumnType::BigInt,
            ColumnType::HugeInt,
            ColumnType::UTinyInt,
            ColumnType::USmallInt,
            ColumnType::UInteger,
            ColumnType::UBigInt,
            ColumnType::Float,
            ColumnType::Double,
            ColumnType::Varchar,
            ColumnType::Date,
            ColumnType::Time,
            ColumnType::Timestamp,
            ColumnType::TimestampTz,
        ];
        for ty in types {
            assert_eq!(ColumnType::from_tag(ty.sql_name(), None, None), Some(ty));
        }

        let decimal = ColumnType::Decimal {
            precision: 12,
            scale: 4,
        };
        assert_eq!(ColumnType::from_tag("DECIMAL", Some(12), Some(4)), Some(decimal));
        assert_eq!(ColumnType::from_tag("DECIMAL", None, Some(4)), None);
    }
}
