use crate::config::Config;
use crate::ratelimit::RateLimitManager;

fn manager(requests: u32, enabled: bool) -> RateLimitManager {
    let mut config = Config::for_tests();
    config.rate_limit_enabled = enabled;
    config.rate_limit_requests = requests;
    config.rate_limit_window = std::time::Duration::from_secs(60);
    RateLimitManager::new(&config)
}

#[tokio::test]
async fn burst_is_the_window_budget() {
    let limits = manager(3, true);

    // First three requests from the same (ip, user) pass, the fourth is
    // rejected before the window refills anything meaningful.
    assert!(limits.allow("203.0.113.5:alice").await);
    assert!(limits.allow("203.0.113.5:alice").await);
    assert!(limits.allow("203.0.113.5:alice").await);
    assert!(!limits.allow("203.0.113.5:alice").await);
}

#[tokio::test]
async fn keys_are_isolated() {
    let limits = manager(1, true);

    assert!(limits.allow("203.0.113.5:alice").await);
    assert!(!limits.allow("203.0.113.5:alice").await);

    // Same IP, different user: separate bucket.
    assert!(limits.allow("203.0.113.5:bob").await);
    // Same user, different IP: separate bucket.
    assert!(limits.allow("198.51.100.9:alice").await);
}

#[tokio::test]
async fn disabled_limiter_allows_everything() {
    let limits = manager(1, false);
    for _ in 0..100 {
        assert!(limits.allow("203.0.113.5:alice").await);
    }
}

#[tokio::test]
async fn sweep_drops_idle_buckets_only() {
    let limits = manager(3, true);

    // "active" has spent a token and sits below burst; "idle" still holds
    // its full budget, which is the sweep's definition of unused.
    assert!(limits.allow("203.0.113.5:active").await);
    limits.touch_without_spending("203.0.113.5:idle").await;
    assert_eq!(limits.bucket_count().await, 2);

    limits.sweep().await;

    assert_eq!(limits.bucket_count().await, 1);
    // A swept key simply gets a fresh bucket on its next request.
    assert!(limits.allow("203.0.113.5:idle").await);
}
