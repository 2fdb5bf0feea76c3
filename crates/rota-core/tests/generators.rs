#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rota_core::category::Category;
use rota_core::snapshot::{CategoryState, LastPosted, Snapshot, format_timestamp};

pub fn categories() -> Vec<Category> {
    vec![
        Category::new("spells", "spell"),
        Category::new("potions", "potion"),
        Category::new("runes", "rune"),
    ]
}

pub fn arb_timestamp() -> impl Strategy<Value = String> + Clone {
    (1_600_000_000i64..1_800_000_000, 0u32..1_000_000).prop_map(|(secs, micros)| {
        format_timestamp(
            Utc.timestamp_opt(secs, micros * 1000)
                .single()
                .unwrap_or_default(),
        )
    })
}

fn arb_id() -> impl Strategy<Value = String> + Clone {
    prop::sample::select(vec![
        "lumos", "nox", "accio", "alohomora", "expelliarmus", "reparo", "silencio", "tergeo",
    ])
    .prop_map(str::to_string)
}

pub fn arb_category_state(singular: &'static str) -> impl Strategy<Value = CategoryState> + Clone {
    (
        prop::collection::btree_set(arb_id(), 0..6),
        prop::option::of((arb_id(), arb_timestamp())),
        0i64..5,
    )
        .prop_map(move |(posted, last, cycle_count)| CategoryState {
            singular: singular.to_string(),
            posted,
            last_posted: last.map(|(id, timestamp)| LastPosted { id, timestamp }),
            cycle_count,
        })
}

pub fn arb_snapshot() -> impl Strategy<Value = Snapshot> + Clone {
    (
        prop::option::of(arb_category_state("spell")),
        prop::option::of(arb_category_state("potion")),
        prop::option::of(arb_category_state("rune")),
        arb_timestamp(),
    )
        .prop_map(|(spells, potions, runes, last_updated)| {
            let mut categories = BTreeMap::new();
            for (name, state) in [("spells", spells), ("potions", potions), ("runes", runes)] {
                if let Some(state) = state {
                    categories.insert(name.to_string(), state);
                }
            }
            Snapshot {
                categories,
                last_updated,
                extra: BTreeMap::new(),
                extra_cycle_counts: BTreeMap::new(),
            }
        })
}

pub fn posted_of(snapshot: &Snapshot, category: &str) -> BTreeSet<String> {
    snapshot
        .category(category)
        .map(|s| s.posted.clone())
        .unwrap_or_default()
}

pub fn cycle_of(snapshot: &Snapshot, category: &str) -> i64 {
    snapshot.category(category).map_or(0, |s| s.cycle_count)
}
