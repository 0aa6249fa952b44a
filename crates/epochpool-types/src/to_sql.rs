//! Trait for converting Rust types to SQL values.

use bytes::Bytes;

use crate::error::TypeError;
use crate::value::SqlValue;

/// Trait for types that can be passed as statement parameters.
///
/// Pool query methods take `&[&dyn ToSql]`, converting each argument into a
/// [`SqlValue`] before binding.
pub trait ToSql {
    /// Convert this value to a SQL value.
    fn to_sql(&self) -> Result<SqlValue, TypeError>;
}

macro_rules! to_sql_copy {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> Result<SqlValue, TypeError> {
                    Ok(SqlValue::$variant(*self))
                }
            }
        )*
    };
}

to_sql_copy! {
    bool => Bool,
    i8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Double,
}

#[cfg(feature = "decimal")]
to_sql_copy! { rust_decimal::Decimal => Decimal }

#[cfg(feature = "uuid")]
to_sql_copy! { uuid::Uuid => Uuid }

#[cfg(feature = "chrono")]
to_sql_copy! {
    chrono::NaiveDate => Date,
    chrono::NaiveTime => Time,
    chrono::NaiveDateTime => Timestamp,
}

impl ToSql for u32 {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::BigInt(i64::from(*self)))
    }
}

impl ToSql for u64 {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        i64::try_from(*self)
            .map(SqlValue::BigInt)
            .map_err(|_| TypeError::OutOfRange {
                target_type: "BIGINT",
            })
    }
}

impl ToSql for str {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::String(self.to_owned()))
    }
}

impl ToSql for String {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::String(self.clone()))
    }
}

impl ToSql for [u8] {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Binary(Bytes::copy_from_slice(self)))
    }
}

impl ToSql for Vec<u8> {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Binary(Bytes::copy_from_slice(self)))
    }
}

impl ToSql for Bytes {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Binary(self.clone()))
    }
}

#[cfg(feature = "url")]
impl ToSql for url::Url {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Url(self.clone()))
    }
}

#[cfg(feature = "json")]
impl ToSql for serde_json::Value {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Json(self.clone()))
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(self.clone())
    }
}

impl<T: ToSql> ToSql for Option<T> {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        match self {
            Some(v) => v.to_sql(),
            None => Ok(SqlValue::Null),
        }
    }
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        (*self).to_sql()
    }
}

/// Convert a parameter list into owned values, failing on the first
/// conversion error.
pub fn to_values(params: &[&(dyn ToSql + Sync)]) -> Result<Vec<SqlValue>, TypeError> {
    params.iter().map(|p| p.to_sql()).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_to_sql_scalars() {
        assert_eq!(17i32.to_sql().unwrap(), SqlValue::Int(17));
        assert_eq!(5i8.to_sql().unwrap(), SqlValue::TinyInt(5));
        assert_eq!("kiwi".to_sql().unwrap(), SqlValue::String("kiwi".into()));
    }

    #[test]
    fn test_to_sql_option() {
        let none: Option<i32> = None;
        assert_eq!(none.to_sql().unwrap(), SqlValue::Null);
        assert_eq!(Some(3i64).to_sql().unwrap(), SqlValue::BigInt(3));
    }

    #[test]
    fn test_u64_out_of_range() {
        assert!(matches!(
            u64::MAX.to_sql(),
            Err(TypeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_to_values_preserves_order() {
        let values = to_values(&[&"apple", &17i32, &true]).unwrap();
        assert_eq!(
            values,
            vec![
                SqlValue::String("apple".into()),
                SqlValue::Int(17),
                SqlValue::Bool(true)
            ]
        );
    }
}
