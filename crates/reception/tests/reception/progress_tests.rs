use super::*;

#[test]
fn unknown_total_should_report_indeterminate_progress() {
    let mut tracker = ProgressTracker::new(0, 1000, 5);
    tracker.content_received(512, 0, 0);
    assert_eq!(tracker.current_progress(), None);

    tracker.content_received(1024, 4096, 10);
    assert_eq!(tracker.current_progress(), Some(25));
}

#[test]
fn announced_total_should_be_used_when_callback_reports_zero() {
    let mut tracker = ProgressTracker::new(1000, 1000, 5);
    tracker.content_received(500, 0, 0);
    assert_eq!(tracker.current_progress(), Some(50));
    assert_eq!(tracker.total_expected(), 1000);
}

#[test]
fn should_notify_at_most_once_per_bucket() {
    let mut tracker = ProgressTracker::new(10_000, 1000, 5);
    assert!(!tracker.content_received(0, 10_000, 0));
    assert!(!tracker.content_received(100, 10_000, 500));
    assert!(tracker.content_received(1000, 10_000, 1000));
    assert!(!tracker.content_received(1500, 10_000, 1200));
    assert!(!tracker.content_received(2000, 10_000, 5000));

    tracker.notified(5000);
    assert!(!tracker.content_received(2500, 10_000, 5500));
    assert!(tracker.content_received(4000, 10_000, 6000));
}

#[test]
fn average_speed_should_cover_last_window_buckets() {
    let mut tracker = ProgressTracker::new(1_000_000, 1000, 2);
    tracker.content_received(0, 1_000_000, 0);

    // bucket 1: 1000 B/s, bucket 2: 3000 B/s, bucket 3: 5000 B/s
    let mut bytes = 0;
    let mut now = 0;
    for rate in [1000u64, 3000, 5000] {
        bytes += rate;
        now += 1000;
        assert!(tracker.content_received(bytes, 1_000_000, now));
        tracker.notified(now);
    }

    assert_eq!(tracker.average_speed(), 4000);
    let eta = tracker.time_remaining().expect("eta");
    assert_eq!(eta, Duration::from_secs((1_000_000 - 9000u64).div_ceil(4000)));
}

#[test]
fn progress_should_be_monotonic_and_bounded() {
    let mut tracker = ProgressTracker::new(0, 50, 5);
    let mut last = 0u8;
    for (step, bytes) in [0u64, 10, 10, 400, 999, 1000, 1500].into_iter().enumerate() {
        tracker.content_received(bytes, 1000, step as i64 * 10);
        let percent = tracker.current_progress().expect("known total");
        assert!(percent >= last);
        assert!(percent <= 100);
        last = percent;
    }
    assert_eq!(last, 100);

    // stale callbacks and a larger revised total never move it backwards
    tracker.content_received(10, 5000, 100);
    assert_eq!(tracker.current_progress(), Some(100));
}

#[test]
fn time_remaining_should_be_none_without_speed() {
    let tracker = ProgressTracker::new(1000, 1000, 5);
    assert_eq!(tracker.time_remaining(), None);
    assert_eq!(tracker.average_speed(), 0);
}
