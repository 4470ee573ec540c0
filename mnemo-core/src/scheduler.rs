//! SM-2 scheduling.
//!
//! A pass (quality >= 3) grows the interval 1 -> 6 -> interval * ef; a fail resets it to one day.
//! The easiness factor is adjusted on every rating and never drops below [`EF_MIN`]. Intervals
//! are capped at [`MAX_INTERVAL_DAYS`].

use crate::{Card, CoreError, MemoryState, Quality, EF_MIN};
use chrono::{DateTime, Duration, Utc};

/// Float noise allowance when truncating `interval * ef` to whole days.
const INTERVAL_EPSILON: f64 = 1e-9;

/// Longest interval the scheduler hands out, roughly a hundred years.
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduleOutcome {
    pub state: MemoryState,
    pub due_at: DateTime<Utc>,
}

fn next_ef(ef: f64, q: u8) -> f64 {
    let miss = (5 - q) as f64;
    let delta = 0.1 - miss * (0.08 + miss * 0.02);
    (ef + delta).max(EF_MIN)
}

/// Truncates toward zero; `6 * 1.3 = 7.8` gives 7. Saturates at [`MAX_INTERVAL_DAYS`].
fn grown_interval(interval_days: u32, ef: f64) -> u32 {
    let days = (interval_days as f64 * ef + INTERVAL_EPSILON).trunc();
    if days.is_nan() {
        return MAX_INTERVAL_DAYS;
    }
    days.clamp(0.0, MAX_INTERVAL_DAYS as f64) as u32
}

fn due_after(now: DateTime<Utc>, interval_days: u32) -> DateTime<Utc> {
    now.checked_add_signed(Duration::days(interval_days as i64))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn schedule_quality(state: MemoryState, quality: Quality, now: DateTime<Utc>) -> ScheduleOutcome {
    let (reps, interval_days) = if quality.is_pass() {
        let interval = match state.reps {
            0 => 1,
            1 => 6,
            _ => grown_interval(state.interval_days, state.ef),
        };
        (state.reps + 1, interval)
    } else {
        (0, 1)
    };

    let state = MemoryState {
        ef: next_ef(state.ef, quality.value()),
        interval_days,
        reps,
    };
    ScheduleOutcome {
        state,
        due_at: due_after(now, interval_days),
    }
}

/// Raw-integer entry point; out-of-range ratings are rejected, never clamped.
pub fn schedule(state: MemoryState, quality: i32, now: DateTime<Utc>) -> Result<ScheduleOutcome, CoreError> {
    let quality = Quality::try_from(quality)?;
    Ok(schedule_quality(state, quality, now))
}

/// Returns `card` with the scheduled state written onto it. Nothing is persisted.
pub fn apply_quality(mut card: Card, quality: Quality, now: DateTime<Utc>) -> Card {
    let out = schedule_quality(card.memory_state(), quality, now);
    card.ef = out.state.ef;
    card.interval_days = out.state.interval_days;
    card.reps = out.state.reps;
    card.due_at = out.due_at;
    card.last_reviewed_at = Some(now);
    card
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grown_interval_truncates() {
        assert_eq!(grown_interval(6, 1.3), 7);
        assert_eq!(grown_interval(6, 2.5), 15);
        assert_eq!(grown_interval(0, 2.5), 0);
    }

    #[test]
    fn grown_interval_saturates() {
        assert_eq!(grown_interval(100_000_000, 2.5), MAX_INTERVAL_DAYS);
        assert_eq!(grown_interval(u32::MAX, f64::MAX), MAX_INTERVAL_DAYS);
        assert_eq!(grown_interval(20_000, 1.3), 26_000);
    }

    #[test]
    fn due_date_never_overflows() {
        let near_end = DateTime::<Utc>::MAX_UTC - Duration::days(10);
        assert_eq!(due_after(near_end, MAX_INTERVAL_DAYS), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn grown_interval_absorbs_float_noise() {
        assert_eq!(grown_interval(6, 2.4999999999999996), 15);
    }

    #[test]
    fn ef_deltas_per_quality() {
        let expected = [-0.8, -0.54, -0.32, -0.14, 0.0, 0.1];
        for (q, delta) in expected.iter().enumerate() {
            let got = next_ef(2.5, q as u8) - 2.5;
            assert!((got - delta).abs() < 1e-9, "q={q} got={got}");
        }
    }
}
