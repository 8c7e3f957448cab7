//! Property tests for prefix matching and rule fixup

use proptest::prelude::*;

use carrier_router::routing::{
    weight_to_dice, MatchMode, PrefixTrie, RouteSnapshot, RouteSpec, RuleGroup, SnapshotBuilder,
};

fn digits(max_len: usize) -> impl Strategy<Value = String> {
    proptest::collection::vec(0u8..10, 0..=max_len)
        .prop_map(|ds| ds.into_iter().map(|d| char::from(b'0' + d)).collect())
}

fn build_group(weights: &[u32], explicit_indices: Option<Vec<u32>>) -> RouteSnapshot {
    let mut b = SnapshotBuilder::new(MatchMode::Digits);
    let c = b.add_carrier("default");
    let d = b.add_domain(c, "proxy").unwrap();
    for (i, w) in weights.iter().enumerate() {
        let mut spec = RouteSpec::new(c, d, "1", format!("gw{i}")).with_weight(f64::from(*w) / 100.0);
        if let Some(indices) = &explicit_indices {
            spec = spec.with_hash_index(indices[i]);
        }
        b.add_route(spec).unwrap();
    }
    b.build().unwrap()
}

fn group(snapshot: &RouteSnapshot) -> RuleGroup {
    let carrier = snapshot.default_carrier().unwrap();
    carrier.domain(1).unwrap().routes().get("1").unwrap().groups()[0].clone()
}

proptest! {
    #[test]
    fn prop_longest_match_is_longest_stored_prefix(
        prefixes in proptest::collection::hash_set(digits(5), 1..20),
        key in digits(8),
    ) {
        let mut trie = PrefixTrie::new(MatchMode::Digits);
        for prefix in &prefixes {
            *trie.insert(prefix, String::new).unwrap() = prefix.clone();
        }

        let expected = prefixes
            .iter()
            .filter(|p| key.starts_with(p.as_str()))
            .max_by_key(|p| p.len());
        let found = trie.longest_match_with_len(&key, false);

        match expected {
            Some(p) => {
                let (payload, len) = found.unwrap();
                prop_assert_eq!(payload, p);
                prop_assert_eq!(len, p.len());
            }
            None => prop_assert!(found.is_none()),
        }
    }

    #[test]
    fn prop_leading_non_digits_are_skipped(
        prefix in digits(4),
        rest in digits(4),
        noise in "[+#*]{0,3}",
    ) {
        let mut trie = PrefixTrie::new(MatchMode::Digits);
        trie.insert(&prefix, || 1u32).unwrap();

        let key = format!("{noise}{prefix}{rest}");
        prop_assert_eq!(trie.longest_match(&key, true), Some(&1));
    }

    #[test]
    fn prop_fixup_assigns_a_hash_permutation(
        weights in proptest::collection::vec(0u32..=100, 1..12),
    ) {
        let snapshot = build_group(&weights, None);
        let group = group(&snapshot);
        let n = u32::try_from(weights.len()).unwrap();

        let mut indices: Vec<u32> = group.rules().iter().map(|r| r.hash_index).collect();
        indices.sort_unstable();
        prop_assert_eq!(indices, (1..=n).collect::<Vec<_>>());
        for i in 1..=n {
            prop_assert_eq!(group.rule_by_hash(i).unwrap().hash_index, i);
        }
    }

    #[test]
    fn prop_fixup_keeps_explicit_indices(
        weights in proptest::collection::vec(0u32..=100, 1..12),
        shift in any::<usize>(),
    ) {
        let n = u32::try_from(weights.len()).unwrap();
        let mut indices: Vec<u32> = (1..=n).rev().collect();
        indices.rotate_left(shift % weights.len());

        let snapshot = build_group(&weights, Some(indices.clone()));
        let group = group(&snapshot);
        for (i, index) in indices.iter().enumerate() {
            prop_assert_eq!(&group.rule_by_hash(*index).unwrap().host, &format!("gw{i}"));
        }
    }

    #[test]
    fn prop_dice_thresholds_accumulate_weights(
        weights in proptest::collection::vec(0u32..=100, 1..12),
    ) {
        let snapshot = build_group(&weights, None);
        let group = group(&snapshot);

        let mut previous = 0;
        for rule in group.rules() {
            prop_assert!(rule.dice_to >= previous);
            previous = rule.dice_to;
        }
        let total: u32 = group.rules().iter().map(|r| weight_to_dice(r.weight)).sum();
        prop_assert_eq!(group.dice_max(), total);
        prop_assert_eq!(previous, total);
    }

    #[test]
    fn prop_fixup_is_idempotent(
        weights in proptest::collection::vec(0u32..=100, 1..12),
    ) {
        let mut snapshot = build_group(&weights, None);
        let before = group(&snapshot);
        snapshot.fixup().unwrap();
        prop_assert_eq!(group(&snapshot), before);
    }
}
