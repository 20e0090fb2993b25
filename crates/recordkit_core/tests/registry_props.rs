//! Property-based checks for registry field access.

use std::collections::BTreeMap;

use proptest::prelude::*;
use recordkit_core::{FieldRegistry, Value};

#[derive(Debug, Clone, Default, PartialEq)]
struct Sample {
    name: String,
    count: i64,
    extra: BTreeMap<String, Value>,
}

fn registry() -> FieldRegistry<Sample> {
    FieldRegistry::builder("sample")
        .field(
            "name",
            |s: &Sample| s.name.clone(),
            |s, v: String| s.name = v,
        )
        .field("count", |s: &Sample| s.count, |s, v: i64| s.count = v)
        .field(
            "extra",
            |s: &Sample| s.extra.clone(),
            |s, v: BTreeMap<String, Value>| s.extra = v,
        )
        .build()
}

proptest! {
    #[test]
    fn set_then_get_returns_the_value(text in ".*", n in any::<i64>()) {
        let reg = registry();
        let mut s = Sample::default();
        reg.set(&mut s, "name", Value::Text(text.clone())).unwrap();
        reg.set(&mut s, "count", Value::Int(n)).unwrap();
        prop_assert_eq!(reg.get(&s, "name").unwrap(), Value::Text(text));
        prop_assert_eq!(reg.get(&s, "count").unwrap(), Value::Int(n));
    }

    #[test]
    fn row_encode_decode_round_trips(text in ".*", n in any::<i64>()) {
        let reg = registry();
        let s = Sample {
            name: text,
            count: n,
            extra: BTreeMap::new(),
        };
        let row = reg.to_row(&s);
        let mut decoded = Sample::default();
        reg.apply_row(&mut decoded, &row).unwrap();
        prop_assert_eq!(decoded, s);
    }

    #[test]
    fn dotted_path_set_then_get(key in "[a-z]{1,8}", n in any::<i64>()) {
        let reg = registry();
        let mut s = Sample::default();
        let path = format!("extra.{key}");
        reg.set_path(&mut s, &path, Value::Int(n)).unwrap();
        prop_assert_eq!(reg.get_path(&s, &path).unwrap(), Value::Int(n));
    }
}
