//! Trait for converting Rust types to request parameters.

use bytes::Bytes;
use tds_protocol::{ParamType, ParamValue, RpcParam};

use crate::error::TypeError;

/// Trait for types that can be bound as parameters.
///
/// `to_sql` returns `None` for SQL NULL. The trait is object safe so a
/// statement can take `&[&dyn ToSql]`.
pub trait ToSql {
    /// Convert this value to a parameter value.
    fn to_sql(&self) -> Result<Option<ParamValue>, TypeError>;

    /// Declared SQL type of this value.
    fn param_type(&self) -> ParamType;

    /// Build a named input parameter.
    fn to_param(&self, name: String) -> Result<RpcParam, TypeError> {
        Ok(match self.to_sql()? {
            Some(value) => RpcParam {
                sql_type: self.param_type(),
                ..RpcParam::input(name, value)
            },
            None => RpcParam::null(name, self.param_type()),
        })
    }
}

/// Types with a SQL type known without a value, so `None::<T>` can be typed.
pub trait SqlTyped {
    /// Type used for NULL values of `Self`.
    const PARAM_TYPE: ParamType;
}

macro_rules! scalar_to_sql {
    ($ty:ty, $param:ident, |$v:ident| $conv:expr) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> Result<Option<ParamValue>, TypeError> {
                let $v = self;
                Ok(Some($conv))
            }

            fn param_type(&self) -> ParamType {
                ParamType::$param
            }
        }

        impl SqlTyped for $ty {
            const PARAM_TYPE: ParamType = ParamType::$param;
        }
    };
}

scalar_to_sql!(bool, Bit, |v| ParamValue::Bit(*v));
scalar_to_sql!(u8, Int, |v| ParamValue::Int(i32::from(*v)));
scalar_to_sql!(i16, Int, |v| ParamValue::Int(i32::from(*v)));
scalar_to_sql!(i32, Int, |v| ParamValue::Int(*v));
scalar_to_sql!(i64, BigInt, |v| ParamValue::BigInt(*v));
scalar_to_sql!(f32, Float, |v| ParamValue::Float(f64::from(*v)));
scalar_to_sql!(f64, Float, |v| ParamValue::Float(*v));
scalar_to_sql!(String, NVarChar, |v| ParamValue::String(v.clone()));
scalar_to_sql!(&str, NVarChar, |v| ParamValue::String((*v).to_owned()));
scalar_to_sql!(Vec<u8>, VarBinary, |v| ParamValue::Binary(Bytes::copy_from_slice(v)));
scalar_to_sql!(&[u8], VarBinary, |v| ParamValue::Binary(Bytes::copy_from_slice(v)));
scalar_to_sql!(Bytes, VarBinary, |v| ParamValue::Binary(v.clone()));

#[cfg(feature = "uuid")]
scalar_to_sql!(uuid::Uuid, Guid, |v| ParamValue::Guid(v.to_bytes_le()));

impl ToSql for u32 {
    fn to_sql(&self) -> Result<Option<ParamValue>, TypeError> {
        Ok(Some(ParamValue::BigInt(i64::from(*self))))
    }

    fn param_type(&self) -> ParamType {
        ParamType::BigInt
    }
}

impl ToSql for u64 {
    fn to_sql(&self) -> Result<Option<ParamValue>, TypeError> {
        i64::try_from(*self)
            .map(|v| Some(ParamValue::BigInt(v)))
            .map_err(|_| TypeError::OutOfRange {
                target_type: "BIGINT",
            })
    }

    fn param_type(&self) -> ParamType {
        ParamType::BigInt
    }
}

impl<T: ToSql + SqlTyped> ToSql for Option<T> {
    fn to_sql(&self) -> Result<Option<ParamValue>, TypeError> {
        match self {
            Some(v) => v.to_sql(),
            None => Ok(None),
        }
    }

    fn param_type(&self) -> ParamType {
        T::PARAM_TYPE
    }
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn to_sql(&self) -> Result<Option<ParamValue>, TypeError> {
        (**self).to_sql()
    }

    fn param_type(&self) -> ParamType {
        (**self).param_type()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_to_sql() {
        assert_eq!(42i32.to_sql().unwrap(), Some(ParamValue::Int(42)));
        assert_eq!(7u8.param_type(), ParamType::Int);
        assert_eq!(
            "hi".to_sql().unwrap(),
            Some(ParamValue::String("hi".into()))
        );
        assert!(u64::MAX.to_sql().is_err());
    }

    #[test]
    fn test_null_param_keeps_type() {
        let param = None::<i64>.to_param("@id".into()).unwrap();
        assert_eq!(param.sql_type, ParamType::BigInt);
        assert!(param.value.is_none());
        assert!(!param.output);
    }

    #[test]
    fn test_dyn_params() {
        let a = 1i32;
        let b = String::from("x");
        let params: [&dyn ToSql; 2] = [&a, &b];
        let types: Vec<_> = params.iter().map(|p| p.param_type()).collect();
        assert_eq!(types, vec![ParamType::Int, ParamType::NVarChar]);
    }
}
