//! SQL value representation.

use bytes::Bytes;

/// A value bound to a statement placeholder or read back from a row.
///
/// The set of variants is closed: every kind of parameter the pool can bind
/// is listed here, and each one maps onto a typed method of
/// [`ParamBinder`](crate::ParamBinder).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 8-bit signed integer (byte).
    TinyInt(i8),
    /// 16-bit signed integer (short).
    SmallInt(i16),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer (long).
    BigInt(i64),
    /// 32-bit floating point.
    Float(f32),
    /// 64-bit floating point.
    Double(f64),
    /// Character data.
    String(String),
    /// Raw byte sequence.
    Binary(Bytes),
    /// Arbitrary-precision decimal.
    #[cfg(feature = "decimal")]
    Decimal(rust_decimal::Decimal),
    /// UUID value.
    #[cfg(feature = "uuid")]
    Uuid(uuid::Uuid),
    /// Calendar date.
    #[cfg(feature = "chrono")]
    Date(chrono::NaiveDate),
    /// Time of day.
    #[cfg(feature = "chrono")]
    Time(chrono::NaiveTime),
    /// Date and time without zone.
    #[cfg(feature = "chrono")]
    Timestamp(chrono::NaiveDateTime),
    /// URL / DATALINK value.
    #[cfg(feature = "url")]
    Url(url::Url),
    /// Structured XML document.
    Xml(String),
    /// SQL array of values.
    Array(Vec<SqlValue>),
    /// Binary large object.
    Blob(Bytes),
    /// Character large object.
    Clob(String),
    /// National character large object.
    NClob(String),
    /// Reference to a structured value, as the driver's reference name.
    Ref(String),
    /// Opaque row identifier.
    RowId(Bytes),
    /// JSON document.
    #[cfg(feature = "json")]
    Json(serde_json::Value),
}

impl SqlValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as an i64 if it is any integer kind.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            Self::Int(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::TinyInt(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as a string slice for any character kind.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Xml(v) | Self::Clob(v) | Self::NClob(v) | Self::Ref(v) => {
                Some(v)
            }
            _ => None,
        }
    }

    /// Get the value as bytes for any binary kind.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) | Self::Blob(v) | Self::RowId(v) => Some(v),
            _ => None,
        }
    }

    /// Get the type name as a string.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::TinyInt(_) => "TINYINT",
            Self::SmallInt(_) => "SMALLINT",
            Self::Int(_) => "INTEGER",
            Self::BigInt(_) => "BIGINT",
            Self::Float(_) => "REAL",
            Self::Double(_) => "DOUBLE",
            Self::String(_) => "VARCHAR",
            Self::Binary(_) => "VARBINARY",
            #[cfg(feature = "decimal")]
            Self::Decimal(_) => "DECIMAL",
            #[cfg(feature = "uuid")]
            Self::Uuid(_) => "UUID",
            #[cfg(feature = "chrono")]
            Self::Date(_) => "DATE",
            #[cfg(feature = "chrono")]
            Self::Time(_) => "TIME",
            #[cfg(feature = "chrono")]
            Self::Timestamp(_) => "TIMESTAMP",
            #[cfg(feature = "url")]
            Self::Url(_) => "DATALINK",
            Self::Xml(_) => "SQLXML",
            Self::Array(_) => "ARRAY",
            Self::Blob(_) => "BLOB",
            Self::Clob(_) => "CLOB",
            Self::NClob(_) => "NCLOB",
            Self::Ref(_) => "REF",
            Self::RowId(_) => "ROWID",
            #[cfg(feature = "json")]
            Self::Json(_) => "JSON",
        }
    }
}

impl Default for SqlValue {
    fn default() -> Self {
        Self::Null
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Double,
    String => String,
    Bytes => Binary,
    Vec<SqlValue> => Array,
}

#[cfg(feature = "decimal")]
impl_from! { rust_decimal::Decimal => Decimal }

#[cfg(feature = "uuid")]
impl_from! { uuid::Uuid => Uuid }

#[cfg(feature = "chrono")]
impl_from! {
    chrono::NaiveDate => Date,
    chrono::NaiveTime => Time,
    chrono::NaiveDateTime => Timestamp,
}

#[cfg(feature = "url")]
impl_from! { url::Url => Url }

#[cfg(feature = "json")]
impl_from! { serde_json::Value => Json }

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(v))
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widening() {
        assert_eq!(SqlValue::TinyInt(-3).as_i64(), Some(-3));
        assert_eq!(SqlValue::SmallInt(300).as_i64(), Some(300));
        assert_eq!(SqlValue::BigInt(i64::MAX).as_i64(), Some(i64::MAX));
        assert_eq!(SqlValue::Double(1.0).as_i64(), None);
    }

    #[test]
    fn test_character_kinds_expose_str() {
        assert_eq!(SqlValue::Clob("big".into()).as_str(), Some("big"));
        assert_eq!(SqlValue::Xml("<a/>".into()).as_str(), Some("<a/>"));
        assert_eq!(SqlValue::Int(1).as_str(), None);
    }

    #[test]
    fn test_from_option() {
        let none: Option<i32> = None;
        assert!(SqlValue::from(none).is_null());
        assert_eq!(SqlValue::from(Some("x")), SqlValue::String("x".into()));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(SqlValue::Null.type_name(), "NULL");
        assert_eq!(SqlValue::RowId(Bytes::from_static(b"r1")).type_name(), "ROWID");
        assert_eq!(SqlValue::Array(vec![]).type_name(), "ARRAY");
    }
}
