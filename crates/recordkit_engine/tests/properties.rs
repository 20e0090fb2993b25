//! Property-based checks for value comparison and filter evaluation.

use proptest::prelude::*;
use recordkit_engine::{CmpOp, Filter, Row, Value};

proptest! {
    #[test]
    fn int_comparison_agrees_with_i64_ordering(a in any::<i64>(), b in any::<i64>()) {
        prop_assert_eq!(Value::Int(a).compare(&Value::Int(b)), Some(a.cmp(&b)));
    }

    #[test]
    fn bare_percent_matches_any_text(s in ".*") {
        prop_assert!(Value::Text(s).like(&Value::Text("%".into())));
    }

    #[test]
    fn text_matches_itself_without_wildcards(s in "[a-zA-Z0-9 ]{0,32}") {
        prop_assert!(Value::Text(s.clone()).like(&Value::Text(s)));
    }

    #[test]
    fn eq_filter_matches_stored_int(n in any::<i64>()) {
        let mut row = Row::new();
        row.insert("total".to_owned(), Value::Int(n));
        let filter = Filter::Cmp { field: "total".into(), op: CmpOp::Eq, param: 0 };
        prop_assert!(filter.matches(&row, &[Value::Int(n)]).unwrap());
    }

    #[test]
    fn total_cmp_is_antisymmetric(a in any::<i64>(), b in any::<i64>()) {
        let (va, vb) = (Value::Int(a), Value::Int(b));
        prop_assert_eq!(va.total_cmp(&vb), vb.total_cmp(&va).reverse());
    }
}
