use deferlog::clock::{format_time, now_ns, raw_timestamp, TIME_WIDTH};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[test]
fn test_raw_timestamp_monotonicity() {
    let mut prev = raw_timestamp();
    for _ in 0..1000 {
        let current = raw_timestamp();
        assert!(current >= prev, "raw timestamps should be monotonically increasing");
        prev = current;
    }
}

#[test]
fn test_now_ns_monotonicity() {
    let mut prev = now_ns();
    for _ in 0..1000 {
        let current = now_ns();
        assert!(current >= prev, "calibrated timestamps should not go backwards");
        prev = current;
    }
}

#[test]
fn test_now_ns_advances_with_wall_time() {
    let start = now_ns();
    thread::sleep(Duration::from_millis(5));
    let end = now_ns();

    let elapsed = end - start;
    assert!(elapsed >= 4_000_000, "5ms sleep measured as {}ns", elapsed);
    assert!(elapsed < 1_000_000_000, "5ms sleep measured as {}ns", elapsed);
}

#[test]
fn test_now_ns_tracks_wall_clock() {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let ours = now_ns();

    let skew = wall.abs_diff(ours);
    assert!(
        skew < 100_000_000,
        "calibrated clock skew vs wall clock too large: {}ns",
        skew
    );
}

#[test]
fn test_format_time_known_values() {
    let mut buf = [0u8; TIME_WIDTH];

    assert_eq!(format_time(0, &mut buf), "00:00:00.000");

    // 12:34:56.789
    let ns = ((12 * 3600 + 34 * 60 + 56) * 1_000 + 789) * 1_000_000;
    assert_eq!(format_time(ns, &mut buf), "12:34:56.789");

    // Sub-millisecond precision is truncated, not rounded.
    assert_eq!(format_time(999_999, &mut buf), "00:00:00.000");
    assert_eq!(format_time(1_000_000, &mut buf), "00:00:00.001");
}

#[test]
fn test_format_time_wraps_at_day_boundary() {
    let mut buf = [0u8; TIME_WIDTH];

    let one_day_ns = 86_400u64 * 1_000_000_000;
    assert_eq!(format_time(one_day_ns, &mut buf), "00:00:00.000");
    assert_eq!(
        format_time(one_day_ns + 3_600_000_000_000, &mut buf),
        "01:00:00.000"
    );

    let just_before_midnight = one_day_ns - 1_000_000;
    assert_eq!(format_time(just_before_midnight, &mut buf), "23:59:59.999");
}

#[test]
fn test_format_time_shape() {
    let mut buf = [0u8; TIME_WIDTH];
    let formatted = format_time(now_ns(), &mut buf);

    let bytes = formatted.as_bytes();
    assert_eq!(bytes.len(), TIME_WIDTH);
    assert_eq!(bytes[2], b':');
    assert_eq!(bytes[5], b':');
    assert_eq!(bytes[8], b'.');
    for &i in &[0, 1, 3, 4, 6, 7, 9, 10, 11] {
        assert!(bytes[i].is_ascii_digit(), "position {} should be a digit", i);
    }
}
