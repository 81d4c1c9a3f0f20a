//! Property-based tests for circuit breaker counting.
//!
//! **Property: Consecutive Failure Trip**
//!
//! For any sequence of call outcomes, a closed breaker opens exactly when
//! the failure threshold is reached by consecutive failures, and from then
//! on no operation is invoked until the cool-down elapses.

use crudstream_api::{CircuitBreaker, CircuitBreakerConfig};
use crudstream_core::{CircuitState, CrudError, DependencyError, EntityKind};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    /// The dependency answered "no such row"; not a failure.
    NotFound,
    Failure,
}

fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        2 => Just(Outcome::Success),
        1 => Just(Outcome::NotFound),
        3 => Just(Outcome::Failure),
    ]
}

fn config(threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: threshold,
        cool_down: Duration::from_secs(60),
        interval: None,
        ..CircuitBreakerConfig::default()
    }
}

/// Index of the call that trips the breaker, if any.
fn expected_trip(outcomes: &[Outcome], threshold: u32) -> Option<usize> {
    let mut consecutive = 0;
    for (i, outcome) in outcomes.iter().enumerate() {
        match outcome {
            Outcome::Failure => {
                consecutive += 1;
                if consecutive >= threshold {
                    return Some(i);
                }
            }
            _ => consecutive = 0,
        }
    }
    None
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_breaker_trips_on_consecutive_failures(
        outcomes in prop::collection::vec(outcome_strategy(), 0..40),
        threshold in 1u32..8,
    ) {
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))?;
        rt.block_on(async {
            let breaker = CircuitBreaker::new("prop", config(threshold));
            let invoked = AtomicUsize::new(0);
            let trip = expected_trip(&outcomes, threshold);

            for (i, outcome) in outcomes.iter().copied().enumerate() {
                let result = breaker
                    .execute(|| async {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        match outcome {
                            Outcome::Success => Ok(()),
                            Outcome::NotFound => Err(CrudError::not_found(EntityKind::User, 1)),
                            Outcome::Failure => Err(CrudError::call_failed("prop", "down")),
                        }
                    })
                    .await;

                if trip.is_some_and(|t| i > t) {
                    let rejected = matches!(
                        result,
                        Err(CrudError::Unavailable(DependencyError::CircuitOpen { .. }))
                    );
                    prop_assert!(rejected);
                }
            }

            let expected_calls = trip.map_or(outcomes.len(), |t| t + 1);
            prop_assert_eq!(invoked.load(Ordering::SeqCst), expected_calls);

            let expected_state = if trip.is_some() {
                CircuitState::Open
            } else {
                CircuitState::Closed
            };
            prop_assert_eq!(breaker.state(), expected_state);

            // Opening starts a new generation with cleared counts.
            let expected_requests = if trip.is_some() { 0 } else { outcomes.len() };
            prop_assert_eq!(breaker.counts().requests as usize, expected_requests);
            Ok(())
        })?;
    }
}
