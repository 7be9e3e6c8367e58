//! Property tests for the stratified sampler and entry identity.

use crawlaudit::checkable::{COLUMNS, TABLE};
use crawlaudit::{Checkable, Dimension, EntryKind};
use crawlaudit_db::DbConnection;
use proptest::prelude::*;

fn kind_strategy() -> impl Strategy<Value = EntryKind> {
    prop_oneof![Just(EntryKind::File), Just(EntryKind::Directory)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Sample percentages always add up to 100 once anything was sampled.
    #[test]
    fn test_addone_percentages_sum_to_100(categories in prop::collection::vec("[a-e]{1,2}", 1..60)) {
        let mut dim = Dimension::new("cos");
        for category in &categories {
            dim.addone(category);
        }
        let total: f64 = dim.s_sum.values().map(|s| s.pct).sum();
        prop_assert!((total - 100.0).abs() < 1e-6, "pct sum was {}", total);

        let count: u64 = dim.s_sum.values().map(|s| s.count).sum();
        prop_assert_eq!(count as usize, categories.len());
    }

    /// Never-sampled categories always get a vote; blank ones never do.
    #[test]
    fn test_vote_for_unsampled_category(
        sampled in prop::collection::vec("[a-e]", 0..20),
        fresh in "[f-z]{1,3}",
    ) {
        let mut dim = Dimension::new("cos");
        for category in &sampled {
            dim.addone(category);
        }
        prop_assert_eq!(dim.vote(Some(fresh.as_str())), 1);
        prop_assert_eq!(dim.vote(Some("")), 0);
        prop_assert_eq!(dim.vote(None), 0);
    }

    /// Entries are equal exactly when path and type match.
    #[test]
    fn test_equality_is_path_and_type(
        path_a in "/[a-c]{1,3}",
        path_b in "/[a-c]{1,3}",
        kind_a in kind_strategy(),
        kind_b in kind_strategy(),
        cos in "[0-9]{0,4}",
        last_check in 0i64..1_000_000,
        fails in 0i64..10,
    ) {
        let a = Checkable::new(path_a.clone(), kind_a);
        let mut b = Checkable::new(path_b.clone(), kind_b);
        b.cos = cos;
        b.last_check = last_check;
        b.fails = fails;
        b.rowid = Some(last_check);

        prop_assert_eq!(a == b, path_a == path_b && kind_a == kind_b);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// After a load every population category has a sample figure.
    #[test]
    fn test_load_aligns_keys(
        rows in prop::collection::vec(
            (prop::sample::select(vec!["", "a", "b", "c"]), 0i64..3, any::<bool>(), kind_strategy()),
            0..40,
        ),
    ) {
        let conn = DbConnection::open_in_memory().unwrap();
        conn.make_table(TABLE, COLUMNS).unwrap();
        for (i, (cos, last_check, checksum, kind)) in rows.iter().enumerate() {
            conn.execute(
                "INSERT INTO checkables (path, type, cos, last_check, checksum) VALUES (?, ?, ?, ?, ?)",
                &[
                    format!("/p/{}", i).into(),
                    kind.as_str().into(),
                    (*cos).into(),
                    (*last_check).into(),
                    (*checksum).into(),
                ],
            )
            .unwrap();
        }

        let mut dim = Dimension::new("cos");
        dim.load(&conn);

        for category in dim.p_sum.keys() {
            prop_assert!(dim.s_sum.contains_key(category), "{} missing from s_sum", category);
        }
        prop_assert!(!dim.p_sum.contains_key(""));
        if !dim.p_sum.is_empty() {
            let total: f64 = dim.p_sum.values().map(|s| s.pct).sum();
            prop_assert!((total - 100.0).abs() < 1e-6);
        }
        let sampled: u64 = dim.s_sum.values().map(|s| s.count).sum();
        let population: u64 = dim.p_sum.values().map(|s| s.count).sum();
        prop_assert!(sampled <= population);
    }
}
