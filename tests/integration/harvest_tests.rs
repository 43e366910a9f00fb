//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for the target site and run full
//! harvests end-to-end with tiny delays.

use prompt_harvest::config::{Config, TargetEntry};
use prompt_harvest::control::BreakerState;
use prompt_harvest::output::TargetStatus;
use prompt_harvest::{CacheKey, Harvester, HealthStatus};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a fast test configuration with its cache and summary in `dir`
fn create_test_config(dir: &TempDir, cache_file: &str) -> Config {
    let mut config = Config::default();
    config.run.workers = 1;
    config.run.max_retries = 3;
    config.run.request_timeout_secs = 5;
    config.run.summary_path = dir.path().join("summary.md").display().to_string();
    config.delay.min_delay_secs = 0.001;
    config.delay.max_delay_secs = 0.01;
    config.delay.error_backoff_base_secs = 0.002;
    config.health.monitor_interval_secs = 0.05;
    config.cache.path = dir.path().join(cache_file).display().to_string();
    config
}

fn target(category: &str, url: String) -> TargetEntry {
    TargetEntry {
        category: category.to_string(),
        url,
    }
}

#[tokio::test]
async fn test_successful_run_caches_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prompts/marketing"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<ul><li>Write a tagline</li></ul>")
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "cache.json");
    let url = format!("{}/prompts/marketing", server.uri());
    config.targets.push(target("Marketing", url.clone()));

    let harvester = Harvester::new(config, false).unwrap();
    let summary = harvester.run_until(std::future::pending()).await;

    assert_eq!(summary.targets.len(), 1);
    let outcome = &summary.targets[0];
    assert_eq!(outcome.status, TargetStatus::Harvested);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.items, 1);

    assert_eq!(summary.control.metrics.successful_requests, 1);
    assert_ne!(summary.control.metrics.status, HealthStatus::Blocked);

    let key = CacheKey::new("Marketing", &url).unwrap();
    let cached = harvester.controller().cached(&key).unwrap();
    assert_eq!(cached["body"], "<ul><li>Write a tagline</li></ul>");

    assert!(dir.path().join("cache.json").exists());
    let report = std::fs::read_to_string(dir.path().join("summary.md")).unwrap();
    assert!(report.contains("- **Harvested**: 1"));
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prompts/sales"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Draft a cold email</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "cache.json");
    config
        .targets
        .push(target("Sales", format!("{}/prompts/sales", server.uri())));

    let first = Harvester::new(config.clone(), false)
        .unwrap()
        .run_until(std::future::pending())
        .await;
    assert_eq!(first.targets[0].status, TargetStatus::Harvested);

    let second = Harvester::new(config, false)
        .unwrap()
        .run_until(std::future::pending())
        .await;
    assert_eq!(second.targets[0].status, TargetStatus::Cached);
    assert_eq!(second.targets[0].attempts, 0);
    assert_eq!(second.control.metrics.total_requests, 0);
    assert_eq!(second.control.cache.hits, 1);
}

#[tokio::test]
async fn test_fresh_run_ignores_sqlite_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prompts/hr"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Write a job ad</p>"))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "cache.db");
    config
        .targets
        .push(target("HR", format!("{}/prompts/hr", server.uri())));

    let first = Harvester::new(config.clone(), false)
        .unwrap()
        .run_until(std::future::pending())
        .await;
    assert_eq!(first.targets[0].status, TargetStatus::Harvested);
    assert!(first
        .control
        .cache
        .backend
        .as_deref()
        .unwrap()
        .starts_with("sqlite:"));

    let second = Harvester::new(config, true)
        .unwrap()
        .run_until(std::future::pending())
        .await;
    assert_eq!(second.targets[0].status, TargetStatus::Harvested);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prompts/finance"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prompts/finance"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Summarize a report</p>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "cache.json");
    config
        .targets
        .push(target("Finance", format!("{}/prompts/finance", server.uri())));

    let summary = Harvester::new(config, false)
        .unwrap()
        .run_until(std::future::pending())
        .await;

    let outcome = &summary.targets[0];
    assert_eq!(outcome.status, TargetStatus::Harvested);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(summary.control.metrics.failed_requests, 1);
    assert_eq!(summary.control.metrics.consecutive_failures, 0);
}

#[tokio::test]
async fn test_rate_limit_raises_blocking_alert() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "cache.json");
    config.run.max_retries = 1;
    config
        .targets
        .push(target("Legal", format!("{}/prompts/legal", server.uri())));

    let harvester = Harvester::new(config, false).unwrap();
    let summary = harvester.run_until(std::future::pending()).await;

    let outcome = &summary.targets[0];
    assert_eq!(outcome.status, TargetStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("429"));

    assert_eq!(harvester.controller().policy().multiplier(), 8.0);
    assert_eq!(summary.control.delay_multiplier, 8.0);
    assert!(summary
        .control
        .alerts_by_kind
        .contains_key("blocking_suspected"));
    assert_eq!(summary.control.cache.entries, 0);
}

#[tokio::test]
async fn test_captcha_page_counts_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<h1>Please complete the CAPTCHA</h1>"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "cache.json");
    config.run.max_retries = 2;
    config
        .targets
        .push(target("Support", format!("{}/prompts/support", server.uri())));

    let summary = Harvester::new(config, false)
        .unwrap()
        .run_until(std::future::pending())
        .await;

    let outcome = &summary.targets[0];
    assert_eq!(outcome.status, TargetStatus::Failed);
    assert_eq!(outcome.attempts, 2);
    assert!(outcome.error.as_deref().unwrap().contains("captcha"));
    assert_eq!(summary.control.metrics.failed_requests, 2);
    assert!(summary
        .control
        .alerts_by_kind
        .contains_key("blocking_suspected"));
}

#[tokio::test]
async fn test_open_breaker_stops_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "cache.json");
    config.run.max_retries = 2;
    config.breaker.failure_threshold = 2;
    config.breaker.recovery_timeout_secs = 60.0;
    config
        .targets
        .push(target("Design", format!("{}/prompts/design", server.uri())));
    config
        .targets
        .push(target("Travel", format!("{}/prompts/travel", server.uri())));

    let harvester = Harvester::new(config, false).unwrap();
    let summary = harvester
        .run_until(tokio::time::sleep(Duration::from_millis(500)))
        .await;

    assert!(summary.interrupted);
    assert_eq!(summary.control.breaker_state, BreakerState::Open);
    assert_eq!(summary.control.metrics.total_requests, 2);

    assert_eq!(summary.targets[0].status, TargetStatus::Failed);
    assert_eq!(summary.targets[0].attempts, 2);

    // Rejected by the open breaker, then interrupted while waiting
    assert_eq!(summary.targets[1].status, TargetStatus::Skipped);
    assert_eq!(summary.targets[1].attempts, 0);
}

#[tokio::test]
async fn test_workers_share_the_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>prompt</p>"))
        .expect(6)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "cache.json");
    config.run.workers = 3;
    for i in 0..6 {
        config
            .targets
            .push(target(&format!("Cat{}", i), format!("{}/prompts/{}", server.uri(), i)));
    }

    let summary = Harvester::new(config, false)
        .unwrap()
        .run_until(std::future::pending())
        .await;

    assert_eq!(summary.count(TargetStatus::Harvested), 6);
    let indices: Vec<_> = summary.targets.iter().map(|t| t.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(summary.control.cache.entries, 6);
}
