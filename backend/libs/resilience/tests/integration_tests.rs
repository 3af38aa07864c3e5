/// Integration tests for resilience library
use resilience::{
    presets,
    timeout::{with_timeout_result, TimeoutError},
    ExponentialBackoff,
};
use std::time::Duration;

// ==================== Backoff Tests ====================

#[test]
fn test_backoff_schedule_first_five_attempts() {
    let backoff = ExponentialBackoff::new(Duration::from_millis(1000), Duration::from_millis(30000), 10);

    for attempt in 0..5u32 {
        let expected = (1000.0 * 1.5f64.powi(attempt as i32)).min(30000.0) as u64;
        assert_eq!(backoff.base_delay_for(attempt), Duration::from_millis(expected));
    }
}

#[test]
fn test_backoff_refuses_tenth_retry() {
    let backoff = presets::realtime_transport_config().reconnect;
    let scheduled = (0..20).take_while(|attempt| backoff.allows(*attempt)).count();
    assert_eq!(scheduled, 10);
}

// ==================== Timeout Tests ====================

#[tokio::test(start_paused = true)]
async fn test_connect_deadline_from_preset() {
    let config = presets::realtime_transport_config();

    let result = with_timeout_result(config.connect_timeout.duration, async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<_, String>(())
    })
    .await;

    assert!(matches!(result, Err(TimeoutError::Elapsed(d)) if d == Duration::from_secs(10)));
}
