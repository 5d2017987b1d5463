//! Type conversion edge case tests.
//!
//! Tests edge cases for:
//! - NULL handling
//! - Unicode and single-byte text in large objects
//! - Integer widening and narrowing

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use proptest::prelude::*;
use tds_protocol::{ColumnValue, LobKind, LobValue, ParamType, ParamValue};
use tds_types::{FromSql, ToSql, TypeError};

mod null_handling {
    use super::*;

    #[test]
    fn test_null_to_option_string() {
        let result = Option::<String>::from_sql(&ColumnValue::Null).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_null_to_string_fails() {
        assert!(matches!(
            String::from_sql(&ColumnValue::Null),
            Err(TypeError::UnexpectedNull)
        ));
    }

    #[test]
    fn test_option_none_to_sql() {
        let none_value: Option<i32> = None;
        assert!(none_value.to_sql().unwrap().is_none());
        assert_eq!(none_value.param_type(), ParamType::Int);
    }

    #[test]
    fn test_option_some_to_sql() {
        assert_eq!(Some(42i32).to_sql().unwrap(), Some(ParamValue::Int(42)));
    }

    #[test]
    fn test_null_lob_is_not_empty_lob() {
        let empty = ColumnValue::Lob(LobValue::new(LobKind::Unicode, Vec::new()));
        assert_eq!(Option::<String>::from_sql(&empty).unwrap(), Some(String::new()));
    }
}

mod text {
    use super::*;

    fn utf16_chunks(s: &str, split_at: usize) -> LobValue {
        let bytes: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let split_at = split_at.min(bytes.len());
        LobValue::new(
            LobKind::Unicode,
            vec![
                Bytes::copy_from_slice(&bytes[..split_at]),
                Bytes::copy_from_slice(&bytes[split_at..]),
            ],
        )
    }

    #[test]
    fn test_surrogate_pair_split_across_chunks() {
        let lob = utf16_chunks("a😀b", 3);
        assert_eq!(String::from_sql(&ColumnValue::Lob(lob)).unwrap(), "a😀b");
    }

    #[test]
    fn test_unpaired_surrogate_is_an_encoding_error() {
        let lob = LobValue::new(LobKind::Unicode, vec![Bytes::from_static(&[0x00, 0xD8])]);
        assert!(matches!(
            String::from_sql(&ColumnValue::Lob(lob)),
            Err(TypeError::InvalidEncoding(_))
        ));
    }

    proptest! {
        #[test]
        fn unicode_lob_round_trips_any_split(s in "\\PC{0,64}", split in 0usize..200) {
            let lob = utf16_chunks(&s, split);
            prop_assert_eq!(String::from_sql(&ColumnValue::Lob(lob)).unwrap(), s);
        }
    }
}

mod integers {
    use super::*;

    #[test]
    fn test_widening() {
        assert_eq!(i64::from_sql(&ColumnValue::SmallInt(-3)).unwrap(), -3);
        assert_eq!(i16::from_sql(&ColumnValue::TinyInt(255)).unwrap(), 255);
    }

    #[test]
    fn test_bool_from_int() {
        assert!(bool::from_sql(&ColumnValue::Int(2)).unwrap());
        assert!(!bool::from_sql(&ColumnValue::TinyInt(0)).unwrap());
    }

    proptest! {
        #[test]
        fn bigint_narrowing_matches_try_from(v in any::<i64>()) {
            let converted = i32::from_sql(&ColumnValue::BigInt(v)).ok();
            prop_assert_eq!(converted, i32::try_from(v).ok());
        }
    }
}
