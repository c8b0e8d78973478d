use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::value::fits_i64;
use super::{DbError, Result, Value};

/// Native type a mapped property or parameter is converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    Uuid,
    /// No declared type: the column's own type decides.
    Any,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Any, _) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Timestamp, Value::Timestamp(_)) => true,
            (Self::Uuid, Value::Uuid(_)) => true,
            _ => false,
        }
    }

    /// Converts `value` into this type. NULL stays NULL.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if self.is_compatible(&value) {
            return Ok(match (self, value) {
                (Self::Float, Value::Integer(i)) => Value::Float(i as f64),
                (_, v) => v,
            });
        }

        let mismatch = |v: &Value| {
            DbError::TypeMismatch(format!("Cannot convert {} '{}' to {}", v.type_name(), v, self))
        };

        match (self, &value) {
            (Self::Text, v) => Ok(Value::Text(v.to_string())),
            (Self::Integer, Value::Float(f)) if f.fract() == 0.0 && fits_i64(*f) => Ok(Value::Integer(*f as i64)),
            (Self::Integer, Value::Boolean(b)) => Ok(Value::Integer(*b as i64)),
            (Self::Integer, Value::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| mismatch(&value)),
            (Self::Float, Value::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| mismatch(&value)),
            (Self::Boolean, Value::Integer(i)) => Ok(Value::Boolean(*i != 0)),
            (Self::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "y" => Ok(Value::Boolean(true)),
                "false" | "f" | "0" | "n" => Ok(Value::Boolean(false)),
                _ => Err(mismatch(&value)),
            },
            (Self::Timestamp, Value::Text(s)) => parse_timestamp(s).ok_or_else(|| mismatch(&value)),
            (Self::Timestamp, Value::Integer(millis)) => DateTime::<Utc>::from_timestamp_millis(*millis)
                .map(Value::Timestamp)
                .ok_or_else(|| mismatch(&value)),
            (Self::Uuid, Value::Text(s)) => Uuid::parse_str(s.trim())
                .map(Value::Uuid)
                .map_err(|_| mismatch(&value)),
            _ => Err(mismatch(&value)),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<Value> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s.trim()) {
        return Some(Value::Timestamp(ts.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Value::Timestamp(naive.and_utc()))
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Uuid => write!(f, "UUID"),
            Self::Any => write!(f, "ANY"),
        }
    }
}

/// Column type on the relational side of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    BigInt,
    Double,
    Varchar,
    Boolean,
    Timestamp,
    Uuid,
    Null,
    Other,
}

impl ColumnType {
    /// Natural native type of a column, used when a property declares none.
    pub fn natural_type(&self) -> DataType {
        match self {
            Self::Integer | Self::BigInt => DataType::Integer,
            Self::Double => DataType::Float,
            Self::Varchar => DataType::Text,
            Self::Boolean => DataType::Boolean,
            Self::Timestamp => DataType::Timestamp,
            Self::Uuid => DataType::Uuid,
            Self::Null | Self::Other => DataType::Any,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Varchar => "VARCHAR",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
            Self::Uuid => "UUID",
            Self::Null => "NULL",
            Self::Other => "OTHER",
        };
        write!(f, "{}", name)
    }
}

/// Label and type of one column of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

pub type Row = Vec<Value>;
