use drover::monitor::HealthMonitor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn monitor_for(urls: Vec<String>, timeout: Duration) -> Arc<HealthMonitor> {
    Arc::new(HealthMonitor::new(
        &urls,
        Duration::from_secs(1),
        0.3,
        timeout,
    ))
}

/// Test health monitor behaviour against mock upstreams
mod monitor_integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_healthy_backend_is_marked_alive() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/health"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;

            let monitor = monitor_for(vec![server.uri()], Duration::from_secs(2));
            monitor.poll_once().await;

            let snapshot = monitor.snapshot().await;
            assert_eq!(snapshot.len(), 1);
            assert!(snapshot[0].alive);
            assert_eq!(snapshot[0].error_rate, 0.0);
            assert!(!snapshot[0].last_checked.is_empty());
            assert_eq!(monitor.alive_urls().await, vec![server.uri()]);
        })
        .await
        .expect("test_healthy_backend_is_marked_alive timed out");
    }

    #[tokio::test]
    async fn test_non_200_status_marks_backend_dead() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/health"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;

            let monitor = monitor_for(vec![server.uri()], Duration::from_secs(2));
            monitor.poll_once().await;

            let snapshot = monitor.snapshot().await;
            assert!(!snapshot[0].alive);
            // First error observation seeds the error EMA at 1.0.
            assert_eq!(snapshot[0].error_rate, 1.0);
            assert!(monitor.alive_urls().await.is_empty());
        })
        .await
        .expect("test_non_200_status_marks_backend_dead timed out");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_dead() {
        tokio::time::timeout(Duration::from_secs(10), async {
            // Port 1 on loopback refuses connections.
            let monitor = monitor_for(
                vec!["http://127.0.0.1:1".to_string()],
                Duration::from_millis(500),
            );
            monitor.poll_once().await;

            let snapshot = monitor.snapshot().await;
            assert!(!snapshot[0].alive);
            assert_eq!(snapshot[0].error_rate, 1.0);
        })
        .await
        .expect("test_unreachable_backend_is_dead timed out");
    }

    #[tokio::test]
    async fn test_recovery_flips_alive_immediately() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/health"))
                .respond_with(ResponseTemplate::new(500))
                .up_to_n_times(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/health"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;

            let monitor = monitor_for(vec![server.uri()], Duration::from_secs(2));

            monitor.poll_once().await;
            assert!(!monitor.snapshot().await[0].alive);

            monitor.poll_once().await;
            let snapshot = monitor.snapshot().await;
            assert!(snapshot[0].alive, "alive flag is taken from the latest probe");
            // The smoothed error rate decays but is still nonzero.
            assert!(snapshot[0].error_rate > 0.0);
            assert!(snapshot[0].error_rate < 1.0);
        })
        .await
        .expect("test_recovery_flips_alive_immediately timed out");
    }

    #[tokio::test]
    async fn test_probes_run_in_parallel_within_a_tick() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let mut urls = Vec::new();
            let mut servers = Vec::new();
            for _ in 0..3 {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .and(path("/health"))
                    .respond_with(
                        ResponseTemplate::new(200).set_delay(Duration::from_millis(500)),
                    )
                    .mount(&server)
                    .await;
                urls.push(server.uri());
                servers.push(server);
            }

            let monitor = monitor_for(urls, Duration::from_secs(2));

            let started = Instant::now();
            monitor.poll_once().await;
            let elapsed = started.elapsed();

            // Three 500 ms probes must overlap, not run back to back.
            assert!(
                elapsed < Duration::from_millis(900),
                "tick took {:?}, probes appear serialized",
                elapsed
            );
            assert_eq!(monitor.alive_urls().await.len(), 3);
        })
        .await
        .expect("test_probes_run_in_parallel_within_a_tick timed out");
    }

    #[tokio::test]
    async fn test_snapshot_is_published_on_the_updates_channel() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/health"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;

            let monitor = monitor_for(vec![server.uri()], Duration::from_secs(2));
            let mut updates = monitor.take_updates().expect("updates receiver");

            monitor.poll_once().await;

            let published = updates.recv().await.expect("published snapshot");
            assert_eq!(published.len(), 1);
            assert!(published[0].alive);
        })
        .await
        .expect("test_snapshot_is_published_on_the_updates_channel timed out");
    }

    #[tokio::test]
    async fn test_full_channel_drops_snapshots_without_blocking() {
        tokio::time::timeout(Duration::from_secs(30), async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/health"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;

            let monitor = monitor_for(vec![server.uri()], Duration::from_secs(2));
            // Nobody consumes the channel; capacity is 10. More ticks than
            // capacity must still complete promptly.
            for _ in 0..15 {
                monitor.poll_once().await;
            }

            let mut updates = monitor.take_updates().expect("updates receiver");
            let mut received = 0;
            while updates.try_recv().is_ok() {
                received += 1;
            }
            assert_eq!(received, 10, "channel holds at most its capacity");
        })
        .await
        .expect("test_full_channel_drops_snapshots_without_blocking timed out");
    }

    #[tokio::test]
    async fn test_probe_keeps_explicit_path() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let server = MockServer::start().await;
            // Only /status/ping answers 200; /health does not exist.
            Mock::given(method("GET"))
                .and(path("/status/ping"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;

            let url = format!("{}/status/ping", server.uri());
            let monitor = monitor_for(vec![url], Duration::from_secs(2));
            monitor.poll_once().await;

            assert!(monitor.snapshot().await[0].alive);
        })
        .await
        .expect("test_probe_keeps_explicit_path timed out");
    }
}
