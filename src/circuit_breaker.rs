use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Circuit breaker guarding the upstream EPC service.
pub type EpcCircuitBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Consecutive upstream failures (transport errors or non-200) that open the breaker.
pub const FAILURE_THRESHOLD: u32 = 5;

/// Creates the breaker wrapped around upstream EPC searches.
///
/// - **CLOSED**: requests pass through to the rate limiter and the network.
/// - **OPEN**: after 5 consecutive failures calls are rejected immediately,
///   without waiting on the rate limiter.
/// - **HALF_OPEN**: after an exponential backoff (10s growing to 60s) one
///   call is let through to probe the service.
pub fn create_epc_circuit_breaker() -> EpcCircuitBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));

    let failure_policy = failure_policy::consecutive_failures(FAILURE_THRESHOLD, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_epc_circuit_breaker();

        for _ in 0..FAILURE_THRESHOLD {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("503"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = create_epc_circuit_breaker();

        for _ in 0..FAILURE_THRESHOLD - 1 {
            let _: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("timeout"));
        }
        let ok: Result<i32, Error<&str>> = cb.call(|| Ok::<i32, &str>(1));
        assert_eq!(ok.unwrap(), 1);

        let _: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("timeout"));
        assert!(cb.is_call_permitted());
    }
}
