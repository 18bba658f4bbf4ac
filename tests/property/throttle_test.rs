// tests/property/throttle_test.rs

//! Property-based tests for the throttle guard window.

use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use worldgate::core::throttle::{ThrottleDecision, ThrottleGuard};

fn non_loopback_v4() -> impl Strategy<Value = IpAddr> {
    (1u8..=223, any::<u8>(), any::<u8>(), 1u8..=254)
        .prop_filter("not loopback", |(a, ..)| *a != 127)
        .prop_map(|(a, b, c, d)| IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_second_attempt_follows_window(
        ip in non_loopback_v4(),
        window_ms in 1u64..10_000,
        delta_ms in 0u64..20_000,
    ) {
        let guard = ThrottleGuard::new(Some(Duration::from_millis(window_ms)));
        let t0 = Instant::now();

        prop_assert_eq!(guard.check_and_record(ip, t0), ThrottleDecision::Allowed);
        let second = guard.check_and_record(ip, t0 + Duration::from_millis(delta_ms));

        if delta_ms < window_ms {
            prop_assert_eq!(second, ThrottleDecision::Rejected);
        } else {
            prop_assert_eq!(second, ThrottleDecision::Allowed);
        }
    }

    #[test]
    fn test_loopback_is_never_rejected(
        window_ms in 1u64..10_000,
        gaps in proptest::collection::vec(0u64..100, 1..20),
    ) {
        let guard = ThrottleGuard::new(Some(Duration::from_millis(window_ms)));
        let mut now = Instant::now();
        for gap in gaps {
            now += Duration::from_millis(gap);
            prop_assert_eq!(
                guard.check_and_record(IpAddr::V4(Ipv4Addr::LOCALHOST), now),
                ThrottleDecision::Allowed
            );
        }
    }

    #[test]
    fn test_sweep_never_keeps_expired_entries(
        ips in proptest::collection::hash_set(non_loopback_v4(), 1..50),
        window_ms in 1u64..1_000,
    ) {
        let window = Duration::from_millis(window_ms);
        let guard = ThrottleGuard::with_sweep_interval(Some(window), u64::MAX);
        let t0 = Instant::now();
        for ip in &ips {
            guard.check_and_record(*ip, t0);
        }
        prop_assert_eq!(guard.len(), ips.len());

        let evicted = guard.sweep(t0 + window + Duration::from_millis(1));
        prop_assert_eq!(evicted, ips.len());
        prop_assert!(guard.is_empty());
    }
}
