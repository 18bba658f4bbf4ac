// tests/property/phase_test.rs

//! Property-based tests for phase ordering and username validation.

use proptest::prelude::*;
use worldgate::core::handler::validate_username;
use worldgate::core::protocol::PhaseKind;

fn phase() -> impl Strategy<Value = PhaseKind> {
    prop_oneof![
        Just(PhaseKind::Handshake),
        Just(PhaseKind::Status),
        Just(PhaseKind::Login),
        Just(PhaseKind::Play),
    ]
}

fn rank(phase: PhaseKind) -> u8 {
    match phase {
        PhaseKind::Handshake => 0,
        PhaseKind::Status | PhaseKind::Login => 1,
        PhaseKind::Play => 2,
    }
}

proptest! {
    /// Any sequence the transition rule accepts is a prefix of
    /// HANDSHAKE, {STATUS | LOGIN}, [PLAY].
    #[test]
    fn test_accepted_walks_are_valid_prefixes(steps in proptest::collection::vec(phase(), 0..8)) {
        let mut walk = vec![PhaseKind::Handshake];
        for next in steps {
            let current = *walk.last().unwrap();
            if current.can_advance_to(next) {
                walk.push(next);
            }
        }

        prop_assert!(walk.len() <= 3);
        for pair in walk.windows(2) {
            prop_assert_eq!(rank(pair[1]), rank(pair[0]) + 1);
            prop_assert!(pair[1] != PhaseKind::Handshake);
        }
        if walk.len() == 3 {
            prop_assert_eq!(walk[1], PhaseKind::Login);
            prop_assert_eq!(walk[2], PhaseKind::Play);
        }
    }

    #[test]
    fn test_no_phase_is_revisited(a in phase(), b in phase()) {
        if a.can_advance_to(b) {
            prop_assert!(!b.can_advance_to(a));
            prop_assert!(a != b);
        }
    }

    #[test]
    fn test_well_formed_usernames_are_accepted(name in "[A-Za-z0-9_]{1,16}") {
        prop_assert!(validate_username(&name).is_ok());
    }

    #[test]
    fn test_usernames_with_other_characters_are_rejected(
        prefix in "[A-Za-z0-9_]{0,7}",
        bad in "[^A-Za-z0-9_]",
        suffix in "[A-Za-z0-9_]{0,7}",
    ) {
        let name = format!("{prefix}{bad}{suffix}");
        prop_assert!(validate_username(&name).is_err());
    }
}
