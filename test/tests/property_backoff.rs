/// PROPERTY-BASED TESTS: backoff invariants
///
/// Key invariants:
/// 1. Every delay stays within [63ms, 300000ms] while online
/// 2. Consecutive delays never shrink until a success resets them
/// 3. Going offline pins the delay; coming back online restarts small

use std::time::Duration;

use apilane_client::{Backoff, BackoffConfig, RetryCause};
use proptest::prelude::*;

fn cause_strategy() -> impl Strategy<Value = RetryCause> {
    prop_oneof![Just(RetryCause::Transient), Just(RetryCause::RateLimited)]
}

proptest! {
    #[test]
    fn prop_delays_are_bounded_and_non_decreasing(
        causes in prop::collection::vec(cause_strategy(), 1..60),
    ) {
        let config = BackoffConfig::default();
        let mut backoff = Backoff::new(config.clone());
        let mut previous = Duration::ZERO;

        for cause in causes {
            let delay = backoff.next_delay(cause, true);
            prop_assert!(delay >= config.floor);
            prop_assert!(delay <= config.ceiling);
            prop_assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn prop_reset_restarts_from_the_initial_range(
        failures in 1usize..40,
    ) {
        let mut backoff = Backoff::new(BackoffConfig::default());
        for _ in 0..failures {
            backoff.next_delay(RetryCause::Transient, true);
        }
        backoff.reset();

        let delay = backoff.next_delay(RetryCause::Transient, true);
        prop_assert!(delay >= Duration::from_millis(192));
        prop_assert!(delay <= Duration::from_millis(448));
    }

    #[test]
    fn prop_offline_pins_until_back_online(
        failures in 0usize..20,
    ) {
        let config = BackoffConfig::default();
        let mut backoff = Backoff::new(config.clone());
        for _ in 0..failures {
            backoff.next_delay(RetryCause::Transient, true);
        }

        prop_assert_eq!(backoff.next_delay(RetryCause::Transient, false), config.offline_pin);
        prop_assert!(backoff.is_stalled());

        let delay = backoff.next_delay(RetryCause::Transient, true);
        prop_assert!(delay <= config.initial_max);
    }
}
