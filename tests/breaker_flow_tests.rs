use drover::breaker::{BreakerFleet, CircuitBreakerConfig, CircuitBreakerState};
use drover::error::{DroverError, DroverResult};
use std::time::Duration;
use tokio::time::sleep;

fn flow_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 3,
        error_rate_threshold: 0.5,
        open_timeout_s: 1,
        half_open_max_calls: 2,
        min_request_count: 100,
    }
}

const BACKEND: &str = "http://localhost:8080";

/// Full open → half-open → closed cycle driven through the fleet
mod breaker_flow_tests {
    use super::*;

    #[tokio::test]
    async fn test_open_then_half_open_then_closed() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let fleet = BreakerFleet::new(flow_config());

            // Three consecutive failures trip the breaker.
            for _ in 0..3 {
                let _: DroverResult<()> = fleet
                    .execute_with(BACKEND, || async {
                        Err(DroverError::upstream_status(BACKEND, 500))
                    })
                    .await;
            }
            assert_eq!(
                fleet.breaker(BACKEND).await.state().await,
                CircuitBreakerState::Open
            );

            // While open, admission is denied and the eligible set is empty.
            assert!(!fleet.can_execute(BACKEND).await);
            assert!(fleet
                .available(&[BACKEND.to_string()])
                .await
                .is_empty());

            // After the open timeout the next admission check probes.
            sleep(Duration::from_millis(1100)).await;
            assert!(fleet.can_execute(BACKEND).await);
            assert_eq!(
                fleet.breaker(BACKEND).await.state().await,
                CircuitBreakerState::HalfOpen
            );

            // Two successful probe calls close the circuit.
            let _: DroverResult<()> =
                fleet.execute_with(BACKEND, || async { Ok(()) }).await;
            assert_eq!(
                fleet.breaker(BACKEND).await.state().await,
                CircuitBreakerState::HalfOpen
            );
            let _: DroverResult<()> =
                fleet.execute_with(BACKEND, || async { Ok(()) }).await;
            assert_eq!(
                fleet.breaker(BACKEND).await.state().await,
                CircuitBreakerState::Closed
            );
        })
        .await
        .expect("test_open_then_half_open_then_closed timed out");
    }

    #[tokio::test]
    async fn test_half_open_failure_restarts_the_wait() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let fleet = BreakerFleet::new(flow_config());

            for _ in 0..3 {
                fleet.on_failure(BACKEND).await;
            }
            sleep(Duration::from_millis(1100)).await;
            assert!(fleet.can_execute(BACKEND).await);

            // The probe fails: straight back to OPEN with a fresh timeout.
            let _: DroverResult<()> = fleet
                .execute_with(BACKEND, || async {
                    Err(DroverError::network("connection reset"))
                })
                .await;
            assert_eq!(
                fleet.breaker(BACKEND).await.state().await,
                CircuitBreakerState::Open
            );
            assert!(!fleet.can_execute(BACKEND).await);
        })
        .await
        .expect("test_half_open_failure_restarts_the_wait timed out");
    }

    #[tokio::test]
    async fn test_admin_reset_reopens_traffic() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let fleet = BreakerFleet::new(flow_config());

            for _ in 0..3 {
                fleet.on_failure(BACKEND).await;
            }
            assert!(!fleet.can_execute(BACKEND).await);

            let decision = fleet.reset(BACKEND).await;
            assert_eq!(decision.url, BACKEND);
            assert!(fleet.can_execute(BACKEND).await);

            let stats = fleet.all_stats().await;
            assert_eq!(stats[BACKEND].total_calls, 0);
            assert_eq!(stats[BACKEND].failure_count, 0);
        })
        .await
        .expect("test_admin_reset_reopens_traffic timed out");
    }

    #[tokio::test]
    async fn test_breakers_are_independent_per_backend() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let fleet = BreakerFleet::new(flow_config());
            let other = "http://localhost:8081";

            for _ in 0..3 {
                fleet.on_failure(BACKEND).await;
            }

            let backends = vec![BACKEND.to_string(), other.to_string()];
            assert_eq!(fleet.available(&backends).await, vec![other.to_string()]);
        })
        .await
        .expect("test_breakers_are_independent_per_backend timed out");
    }
}
