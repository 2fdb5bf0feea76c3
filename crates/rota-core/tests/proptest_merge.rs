use proptest::prelude::*;
use rota_core::compare::{compare, merge};
use rota_core::schema::{into_raw, migrate};
use rota_core::snapshot::{Snapshot, compare_timestamps};

#[path = "generators.rs"]
mod generators;
use generators::*;

const NAMES: [&str; 3] = ["spells", "potions", "runes"];

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(2000))]

    #[test]
    fn merge_posted_is_union(a in arb_snapshot(), b in arb_snapshot()) {
        let merged = merge(&a, &b);
        for name in NAMES {
            let expected: std::collections::BTreeSet<String> =
                posted_of(&a, name).union(&posted_of(&b, name)).cloned().collect();
            prop_assert_eq!(posted_of(&merged, name), expected);
        }
    }

    #[test]
    fn merge_cycle_count_is_max(a in arb_snapshot(), b in arb_snapshot()) {
        let merged = merge(&a, &b);
        for name in NAMES {
            if a.category(name).is_some() || b.category(name).is_some() {
                let expected = match (a.category(name), b.category(name)) {
                    (Some(x), Some(y)) => x.cycle_count.max(y.cycle_count),
                    (Some(only), None) | (None, Some(only)) => only.cycle_count,
                    (None, None) => unreachable!(),
                };
                prop_assert_eq!(cycle_of(&merged, name), expected);
            }
        }
    }

    #[test]
    fn merge_sets_and_counts_commute(a in arb_snapshot(), b in arb_snapshot()) {
        let ab = merge(&a, &b);
        let ba = merge(&b, &a);
        for name in NAMES {
            prop_assert_eq!(posted_of(&ab, name), posted_of(&ba, name));
            prop_assert_eq!(cycle_of(&ab, name), cycle_of(&ba, name));
        }
    }

    #[test]
    fn merge_is_idempotent(a in arb_snapshot()) {
        prop_assert_eq!(merge(&a, &a), a);
    }

    #[test]
    fn merge_keeps_newest_timestamp(a in arb_snapshot(), b in arb_snapshot()) {
        let merged = merge(&a, &b);
        prop_assert_ne!(
            compare_timestamps(&merged.last_updated, &a.last_updated),
            std::cmp::Ordering::Less
        );
        prop_assert_ne!(
            compare_timestamps(&merged.last_updated, &b.last_updated),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn merged_snapshot_has_no_conflict_with_either_side(a in arb_snapshot(), b in arb_snapshot()) {
        let merged = merge(&a, &b);
        prop_assert!(!compare(&merged, &a).has_conflict);
        prop_assert!(!compare(&merged, &b).has_conflict);
    }

    #[test]
    fn compare_is_symmetric(a in arb_snapshot(), b in arb_snapshot()) {
        let ab = compare(&a, &b);
        let ba = compare(&b, &a);
        prop_assert_eq!(ab.is_identical, ba.is_identical);
        prop_assert_eq!(ab.has_conflict, ba.has_conflict);
        for (category, diff) in &ab.posted_diff {
            let mirrored = &ba.posted_diff[category];
            prop_assert_eq!(&diff.only_in_a, &mirrored.only_in_b);
            prop_assert_eq!(&diff.only_in_b, &mirrored.only_in_a);
        }
    }

    #[test]
    fn compare_with_self_is_identical(a in arb_snapshot()) {
        prop_assert!(compare(&a, &a).is_identical);
    }

    #[test]
    fn migrate_is_idempotent(a in arb_snapshot()) {
        let cats = categories();
        let raw = into_raw(a.to_document()).expect("object");
        let once = migrate(raw, &cats);
        let twice = migrate(once.clone(), &cats);
        prop_assert_eq!(&once, &twice);

        let decoded = Snapshot::decode(once, &cats).expect("decodes");
        for name in NAMES {
            prop_assert_eq!(posted_of(&decoded, name), posted_of(&a, name));
        }
    }
}
