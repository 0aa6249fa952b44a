//! Trait for converting from SQL values to Rust types.

use bytes::Bytes;

use crate::error::TypeError;
use crate::value::SqlValue;

/// Trait for types that can be read out of a result row.
pub trait FromSql: Sized {
    /// Convert from a SQL value to this type.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;
}

fn mismatch(expected: &'static str, value: &SqlValue) -> TypeError {
    if value.is_null() {
        TypeError::UnexpectedNull
    } else {
        TypeError::TypeMismatch {
            expected,
            actual: value.type_name(),
        }
    }
}

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Bool(v) => Ok(*v),
            other => other
                .as_i64()
                .map(|v| v != 0)
                .ok_or_else(|| mismatch("bool", other)),
        }
    }
}

macro_rules! from_sql_int {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FromSql for $ty {
                fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
                    let wide = value.as_i64().ok_or_else(|| mismatch($name, value))?;
                    <$ty>::try_from(wide).map_err(|_| TypeError::OutOfRange { target_type: $name })
                }
            }
        )*
    };
}

from_sql_int! {
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
}

impl FromSql for f32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Float(v) => Ok(*v),
            other => Err(mismatch("f32", other)),
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Double(v) => Ok(*v),
            SqlValue::Float(v) => Ok(f64::from(*v)),
            other => Err(mismatch("f64", other)),
        }
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| mismatch("String", value))
    }
}

impl FromSql for Bytes {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Binary(v) | SqlValue::Blob(v) | SqlValue::RowId(v) => Ok(v.clone()),
            other => Err(mismatch("Bytes", other)),
        }
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Bytes::from_sql(value).map(|b| b.to_vec())
    }
}

#[cfg(feature = "decimal")]
impl FromSql for rust_decimal::Decimal {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Decimal(v) => Ok(*v),
            other => other
                .as_i64()
                .map(rust_decimal::Decimal::from)
                .ok_or_else(|| mismatch("Decimal", other)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::NaiveDateTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Timestamp(v) => Ok(*v),
            other => Err(mismatch("NaiveDateTime", other)),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromSql for chrono::NaiveDate {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Date(v) => Ok(*v),
            SqlValue::Timestamp(v) => Ok(v.date()),
            other => Err(mismatch("NaiveDate", other)),
        }
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_sql(value).map(Some)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handling() {
        assert!(matches!(
            i32::from_sql(&SqlValue::Null),
            Err(TypeError::UnexpectedNull)
        ));
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Null).unwrap(), None);
    }

    #[test]
    fn test_integer_narrowing() {
        assert_eq!(i16::from_sql(&SqlValue::Int(300)).unwrap(), 300);
        assert!(matches!(
            i8::from_sql(&SqlValue::Int(300)),
            Err(TypeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_string_mismatch() {
        let err = String::from_sql(&SqlValue::Int(1)).unwrap_err();
        assert!(matches!(
            err,
            TypeError::TypeMismatch {
                expected: "String",
                actual: "INTEGER"
            }
        ));
    }
}
