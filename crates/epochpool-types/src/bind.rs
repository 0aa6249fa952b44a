//! Positional parameter binding.
//!
//! A statement that accepts parameters implements [`ParamBinder`]. Each
//! [`SqlValue`] variant dispatches to exactly one typed method, so adding a
//! variant forces every dispatch site to be revisited at compile time.
//! Drivers only have to implement [`ParamBinder::bind_null`] and the generic
//! [`ParamBinder::bind_object`] fallback; the typed methods default to the
//! fallback and can be overridden where the driver has a native setter.
//!
//! Placeholders are numbered from 1, left to right.

use bytes::Bytes;

use crate::value::SqlValue;

/// Typed setters for positional statement parameters.
pub trait ParamBinder {
    /// Error produced by the underlying statement.
    type Error;

    /// Bind SQL NULL.
    fn bind_null(&mut self, index: usize) -> Result<(), Self::Error>;

    /// Generic fallback used by every typed setter that is not overridden.
    fn bind_object(&mut self, index: usize, value: &SqlValue) -> Result<(), Self::Error>;

    /// Bind a character string.
    fn bind_string(&mut self, index: usize, value: &str) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::String(value.to_owned()))
    }

    /// Bind a 32-bit integer.
    fn bind_int(&mut self, index: usize, value: i32) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Int(value))
    }

    /// Bind a boolean.
    fn bind_bool(&mut self, index: usize, value: bool) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Bool(value))
    }

    /// Bind a 32-bit float.
    fn bind_float(&mut self, index: usize, value: f32) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Float(value))
    }

    /// Bind a 64-bit integer.
    fn bind_long(&mut self, index: usize, value: i64) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::BigInt(value))
    }

    /// Bind a 64-bit float.
    fn bind_double(&mut self, index: usize, value: f64) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Double(value))
    }

    /// Bind a 16-bit integer.
    fn bind_short(&mut self, index: usize, value: i16) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::SmallInt(value))
    }

    /// Bind a single byte.
    fn bind_byte(&mut self, index: usize, value: i8) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::TinyInt(value))
    }

    /// Bind a byte sequence.
    fn bind_bytes(&mut self, index: usize, value: &Bytes) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Binary(value.clone()))
    }

    /// Bind an arbitrary-precision decimal.
    #[cfg(feature = "decimal")]
    fn bind_decimal(
        &mut self,
        index: usize,
        value: rust_decimal::Decimal,
    ) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Decimal(value))
    }

    /// Bind a UUID.
    #[cfg(feature = "uuid")]
    fn bind_uuid(&mut self, index: usize, value: uuid::Uuid) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Uuid(value))
    }

    /// Bind a calendar date.
    #[cfg(feature = "chrono")]
    fn bind_date(&mut self, index: usize, value: chrono::NaiveDate) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Date(value))
    }

    /// Bind a time of day.
    #[cfg(feature = "chrono")]
    fn bind_time(&mut self, index: usize, value: chrono::NaiveTime) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Time(value))
    }

    /// Bind a timestamp.
    #[cfg(feature = "chrono")]
    fn bind_timestamp(
        &mut self,
        index: usize,
        value: chrono::NaiveDateTime,
    ) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Timestamp(value))
    }

    /// Bind a URL.
    #[cfg(feature = "url")]
    fn bind_url(&mut self, index: usize, value: &url::Url) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Url(value.clone()))
    }

    /// Bind an XML document.
    fn bind_xml(&mut self, index: usize, value: &str) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Xml(value.to_owned()))
    }

    /// Bind an array.
    fn bind_array(&mut self, index: usize, values: &[SqlValue]) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Array(values.to_vec()))
    }

    /// Bind a binary large object.
    fn bind_blob(&mut self, index: usize, value: &Bytes) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Blob(value.clone()))
    }

    /// Bind a character large object.
    fn bind_clob(&mut self, index: usize, value: &str) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Clob(value.to_owned()))
    }

    /// Bind a national character large object.
    fn bind_nclob(&mut self, index: usize, value: &str) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::NClob(value.to_owned()))
    }

    /// Bind a structured-type reference.
    fn bind_ref(&mut self, index: usize, value: &str) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::Ref(value.to_owned()))
    }

    /// Bind a row identifier.
    fn bind_row_id(&mut self, index: usize, value: &Bytes) -> Result<(), Self::Error> {
        self.bind_object(index, &SqlValue::RowId(value.clone()))
    }
}

impl SqlValue {
    /// Bind this value at the 1-based `index` using its typed setter.
    pub fn bind_to<B>(&self, binder: &mut B, index: usize) -> Result<(), B::Error>
    where
        B: ParamBinder + ?Sized,
    {
        match self {
            Self::Null => binder.bind_null(index),
            Self::Bool(v) => binder.bind_bool(index, *v),
            Self::TinyInt(v) => binder.bind_byte(index, *v),
            Self::SmallInt(v) => binder.bind_short(index, *v),
            Self::Int(v) => binder.bind_int(index, *v),
            Self::BigInt(v) => binder.bind_long(index, *v),
            Self::Float(v) => binder.bind_float(index, *v),
            Self::Double(v) => binder.bind_double(index, *v),
            Self::String(v) => binder.bind_string(index, v),
            Self::Binary(v) => binder.bind_bytes(index, v),
            #[cfg(feature = "decimal")]
            Self::Decimal(v) => binder.bind_decimal(index, *v),
            #[cfg(feature = "uuid")]
            Self::Uuid(v) => binder.bind_uuid(index, *v),
            #[cfg(feature = "chrono")]
            Self::Date(v) => binder.bind_date(index, *v),
            #[cfg(feature = "chrono")]
            Self::Time(v) => binder.bind_time(index, *v),
            #[cfg(feature = "chrono")]
            Self::Timestamp(v) => binder.bind_timestamp(index, *v),
            #[cfg(feature = "url")]
            Self::Url(v) => binder.bind_url(index, v),
            Self::Xml(v) => binder.bind_xml(index, v),
            Self::Array(v) => binder.bind_array(index, v),
            Self::Blob(v) => binder.bind_blob(index, v),
            Self::Clob(v) => binder.bind_clob(index, v),
            Self::NClob(v) => binder.bind_nclob(index, v),
            Self::Ref(v) => binder.bind_ref(index, v),
            Self::RowId(v) => binder.bind_row_id(index, v),
            #[cfg(feature = "json")]
            Self::Json(_) => binder.bind_object(index, self),
        }
    }
}

/// Bind `params` to placeholders `1..=params.len()` in order.
pub fn bind_all<B>(binder: &mut B, params: &[SqlValue]) -> Result<(), B::Error>
where
    B: ParamBinder + ?Sized,
{
    for (offset, param) in params.iter().enumerate() {
        param.bind_to(binder, offset + 1)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Records which setter was used for each placeholder.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<(usize, &'static str)>,
    }

    impl ParamBinder for Recorder {
        type Error = std::convert::Infallible;

        fn bind_null(&mut self, index: usize) -> Result<(), Self::Error> {
            self.calls.push((index, "null"));
            Ok(())
        }

        fn bind_object(&mut self, index: usize, _value: &SqlValue) -> Result<(), Self::Error> {
            self.calls.push((index, "object"));
            Ok(())
        }

        fn bind_string(&mut self, index: usize, _value: &str) -> Result<(), Self::Error> {
            self.calls.push((index, "string"));
            Ok(())
        }

        fn bind_int(&mut self, index: usize, _value: i32) -> Result<(), Self::Error> {
            self.calls.push((index, "int"));
            Ok(())
        }

        fn bind_row_id(&mut self, index: usize, _value: &Bytes) -> Result<(), Self::Error> {
            self.calls.push((index, "row_id"));
            Ok(())
        }
    }

    #[test]
    fn test_binding_is_one_indexed_in_order() {
        let mut rec = Recorder::default();
        bind_all(
            &mut rec,
            &[SqlValue::from("apple"), SqlValue::Int(17), SqlValue::Null],
        )
        .unwrap();

        assert_eq!(rec.calls, vec![(1, "string"), (2, "int"), (3, "null")]);
    }

    #[test]
    fn test_unoverridden_setters_fall_back_to_object() {
        let mut rec = Recorder::default();
        bind_all(
            &mut rec,
            &[
                SqlValue::Double(1.5),
                SqlValue::Clob("text".into()),
                SqlValue::RowId(Bytes::from_static(b"AAAx")),
            ],
        )
        .unwrap();

        assert_eq!(rec.calls, vec![(1, "object"), (2, "object"), (3, "row_id")]);
    }

    #[test]
    fn test_empty_params_bind_nothing() {
        let mut rec = Recorder::default();
        bind_all(&mut rec, &[]).unwrap();
        assert!(rec.calls.is_empty());
    }
}
