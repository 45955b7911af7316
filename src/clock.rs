//! Timestamping for log records.
//!
//! The hot path samples the CPU cycle counter (`rdtsc` on x86_64,
//! `cntvct_el0` on aarch64) and converts it to wall-clock nanoseconds with a
//! ratio measured once per process, so a timestamp costs a counter read and
//! a multiply instead of a syscall. On other architectures the raw sample is
//! already a `SystemTime` reading and the conversion is the identity.
//!
//! Timestamps are monotonic within a thread to the extent the counter is;
//! no cross-thread barrier is imposed.

use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::_rdtsc;

use lazy_static::lazy_static;

/// How long the one-time calibration samples the counter against the wall
/// clock. Paid once, by the first caller of [`now_ns`].
const CALIBRATION_WINDOW_MS: u64 = 10;

/// Returns a raw timestamp with the highest precision available for the
/// architecture.
#[inline(always)]
pub fn raw_timestamp() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        _rdtsc()
    }

    #[cfg(target_arch = "aarch64")]
    unsafe {
        let mut value: u64;
        std::arch::asm!("mrs {}, cntvct_el0", out(reg) value);
        value
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        wall_clock_ns()
    }
}

fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Anchor mapping raw counter values to wall-clock nanoseconds.
struct Calibration {
    anchor_ticks: u64,
    anchor_ns: u64,
    ns_per_tick: f64,
}

impl Calibration {
    fn measure() -> Self {
        let start_ns = wall_clock_ns();
        let start_ticks = raw_timestamp();

        std::thread::sleep(std::time::Duration::from_millis(CALIBRATION_WINDOW_MS));

        let end_ns = wall_clock_ns();
        let end_ticks = raw_timestamp();

        let tick_delta = end_ticks.wrapping_sub(start_ticks);
        let ns_per_tick = if tick_delta == 0 {
            1.0
        } else {
            (end_ns.saturating_sub(start_ns)) as f64 / tick_delta as f64
        };

        Self {
            anchor_ticks: end_ticks,
            anchor_ns: end_ns,
            ns_per_tick,
        }
    }
}

lazy_static! {
    static ref CALIBRATION: Calibration = Calibration::measure();
}

/// Forces the one-time calibration to run now rather than on the first log
/// call. The backend calls this at construction.
pub fn calibrate() {
    lazy_static::initialize(&CALIBRATION);
}

/// Current wall-clock time in nanoseconds since the UNIX epoch, derived from
/// the calibrated cycle counter.
#[inline(always)]
pub fn now_ns() -> u64 {
    let cal = &*CALIBRATION;
    // Counters sampled on a different core can land slightly behind the
    // anchor; clamp instead of wrapping around.
    let delta = cal.anchor_ticks.wrapping_sub(raw_timestamp()) as i64;
    let ns = cal.anchor_ns as i64 - (delta as f64 * cal.ns_per_tick) as i64;
    ns.max(0) as u64
}

/// Two-digit lookup table: entry `n` holds the ASCII digits of `n` (0..=99).
const DIGIT_PAIRS: [[u8; 2]; 100] = {
    let mut table = [[0u8; 2]; 100];
    let mut n = 0;
    while n < 100 {
        table[n] = [b'0' + (n / 10) as u8, b'0' + (n % 10) as u8];
        n += 1;
    }
    table
};

/// Length of the formatted time string, `HH:MM:SS.mmm`.
pub const TIME_WIDTH: usize = 12;

/// Renders a nanosecond timestamp as `HH:MM:SS.mmm` into `buf` without
/// allocating. The day component is discarded (time of day, UTC).
pub fn format_time(timestamp_ns: u64, buf: &mut [u8; TIME_WIDTH]) -> &str {
    let total_ms = timestamp_ns / 1_000_000;
    let millis = (total_ms % 1_000) as usize;
    let total_seconds = (total_ms / 1_000) % 86_400;

    let hours = (total_seconds / 3_600) as usize;
    let minutes = (total_seconds / 60 % 60) as usize;
    let seconds = (total_seconds % 60) as usize;

    buf[0..2].copy_from_slice(&DIGIT_PAIRS[hours]);
    buf[2] = b':';
    buf[3..5].copy_from_slice(&DIGIT_PAIRS[minutes]);
    buf[5] = b':';
    buf[6..8].copy_from_slice(&DIGIT_PAIRS[seconds]);
    buf[8] = b'.';
    buf[9] = b'0' + (millis / 100) as u8;
    buf[10..12].copy_from_slice(&DIGIT_PAIRS[millis % 100]);

    // The buffer holds only ASCII written above.
    std::str::from_utf8(buf).expect("time buffer is ASCII")
}
