use proptest::prelude::*;
use shepherd::core::bluegreen::{BlueGreenRole, RoutingControl, RoutingEntry};
use shepherd::core::host::availability::ExponentialBackoffAvailabilityStrategy;
use shepherd::core::plugin::registry::sort_plugin_codes;
use shepherd::core::storage::cache::ExpirationCache;
use std::time::Duration;

const KNOWN_CODES: &[&str] = &[
    "initialConnection",
    "staleDns",
    "bluegreen",
    "readWriteSplitting",
    "failover",
    "iam",
    "secretsManager",
    "federatedAuth",
    "okta",
];

const STICKY_CODES: &[&str] = &["connectTime", "executeTime"];

fn code_list() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(
        prop_oneof![
            proptest::sample::select(KNOWN_CODES).prop_map(|c| c.to_string()),
            proptest::sample::select(STICKY_CODES).prop_map(|c| c.to_string()),
        ],
        0..8,
    )
}

proptest! {
    /// Sorting never loses or invents codes.
    #[test]
    fn sorted_chain_is_a_permutation(codes in code_list()) {
        let mut sorted = sort_plugin_codes(&codes, true);
        let mut input = codes.clone();
        sorted.sort();
        input.sort();
        prop_assert_eq!(sorted, input);
    }

    /// A sticky code always sits directly behind the plugin it followed in
    /// the input list.
    #[test]
    fn sticky_codes_follow_their_predecessor(
        codes in proptest::collection::vec(
            proptest::sample::select(KNOWN_CODES).prop_map(|c| c.to_string()),
            1..5,
        ),
        sticker in proptest::sample::select(STICKY_CODES).prop_map(|c| c.to_string()),
        position in 1usize..5,
    ) {
        let mut input = codes.clone();
        let at = position.min(input.len());
        input.insert(at, sticker.clone());
        let predecessor = input[at - 1].clone();

        let sorted = sort_plugin_codes(&input, true);
        let sticker_at = sorted.iter().position(|c| *c == sticker).unwrap();
        prop_assert!(sticker_at > 0);
        prop_assert_eq!(&sorted[sticker_at - 1], &predecessor);
    }

    /// With sorting disabled the input order is untouched.
    #[test]
    fn unsorted_chain_keeps_user_order(codes in code_list()) {
        prop_assert_eq!(sort_plugin_codes(&codes, false), codes);
    }

    /// The retry window doubles with every consecutive failure.
    #[test]
    fn backoff_window_doubles(initial in 1u64..60, count in 0u32..20) {
        let strategy = ExponentialBackoffAvailabilityStrategy::new(5, initial).unwrap();
        let current = strategy.retry_delay(count);
        let next = strategy.retry_delay(count + 1);
        prop_assert!(next >= current);
        if next < Duration::MAX {
            prop_assert_eq!(next, current * 2);
        }
    }

    /// Wildcard matchers match everything of the right kind; concrete
    /// matchers only match themselves.
    #[test]
    fn routing_match_semantics(
        host in "[a-z]{1,12}",
        other in "[a-z]{1,12}",
        role_source in proptest::bool::ANY,
    ) {
        let role = if role_source { BlueGreenRole::Source } else { BlueGreenRole::Target };
        let wildcard = RoutingEntry::new(None, None, RoutingControl::PassThrough);
        prop_assert!(wildcard.matches(&host, Some(role)));
        prop_assert!(wildcard.matches(&host, None));

        let concrete = RoutingEntry::new(Some(host.clone()), Some(role), RoutingControl::Suspend);
        prop_assert!(concrete.matches(&host, Some(role)));
        prop_assert!(!concrete.matches(&host, None));
        if host != other {
            prop_assert!(!concrete.matches(&other, Some(role)));
        }
    }

    /// A value stored under a generous TTL is always readable back.
    #[test]
    fn cache_get_within_ttl(key in "[a-z]{1,16}", value in 0i64..1_000_000) {
        let cache: ExpirationCache<String, i64> =
            ExpirationCache::new(Duration::from_secs(600), false);
        cache.put(key.clone(), value);
        prop_assert_eq!(cache.get(&key), Some(value));
    }
}
