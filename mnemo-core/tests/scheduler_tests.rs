use chrono::{Duration, TimeZone, Utc};
use mnemo_core::{apply_quality, schedule, Card, CoreError, MemoryState, Quality, EF_MIN, MAX_INTERVAL_DAYS};

fn at_noon() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 11, 12, 0, 0).unwrap()
}

fn state(ef: f64, interval_days: u32, reps: u32) -> MemoryState {
    MemoryState { ef, interval_days, reps }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn first_pass_gives_one_day() {
    for q in 3..=5 {
        let out = schedule(state(2.5, 0, 0), q, at_noon()).unwrap();
        assert_eq!(out.state.interval_days, 1, "q={q}");
        assert_eq!(out.state.reps, 1, "q={q}");
        assert_eq!(out.due_at, at_noon() + Duration::days(1));
    }
}

#[test]
fn second_pass_gives_six_days() {
    for q in 3..=5 {
        let out = schedule(state(2.5, 1, 1), q, at_noon()).unwrap();
        assert_eq!(out.state.interval_days, 6, "q={q}");
        assert_eq!(out.state.reps, 2, "q={q}");
    }
}

#[test]
fn fail_resets_regardless_of_history() {
    for q in 0..=2 {
        for prior in [state(2.5, 0, 0), state(2.1, 6, 2), state(1.3, 120, 9)] {
            let out = schedule(prior, q, at_noon()).unwrap();
            assert_eq!(out.state.reps, 0);
            assert_eq!(out.state.interval_days, 1);
            assert_eq!(out.due_at, at_noon() + Duration::days(1));
        }
    }
}

#[test]
fn ef_never_drops_below_floor() {
    for q in 0..=5 {
        for ef in [1.3, 1.35, 1.5, 2.0, 2.5, 3.1] {
            let out = schedule(state(ef, 10, 3), q, at_noon()).unwrap();
            assert!(out.state.ef >= EF_MIN, "ef={ef} q={q} -> {}", out.state.ef);
        }
    }
    let out = schedule(state(1.3, 1, 0), 0, at_noon()).unwrap();
    assert!(close(out.state.ef, EF_MIN));
}

#[test]
fn later_passes_multiply_by_prior_ef() {
    let out = schedule(state(2.5, 6, 2), 5, at_noon()).unwrap();
    assert_eq!(out.state.interval_days, 15);
    assert_eq!(out.state.reps, 3);
    assert!(close(out.state.ef, 2.6));
}

#[test]
fn interval_product_is_truncated() {
    // 6 * 1.3 = 7.8
    let out = schedule(state(1.3, 6, 2), 3, at_noon()).unwrap();
    assert_eq!(out.state.interval_days, 7);
    // 7 * 1.5 = 10.5
    let out = schedule(state(1.5, 7, 4), 4, at_noon()).unwrap();
    assert_eq!(out.state.interval_days, 10);
}

#[test]
fn out_of_range_quality_is_rejected() {
    for q in [-1, 6, 42, i32::MIN] {
        match schedule(MemoryState::default(), q, at_noon()) {
            Err(CoreError::InvalidQuality(got)) => assert_eq!(got, q),
            other => panic!("expected InvalidQuality for {q}, got {other:?}"),
        }
    }
    assert!(Quality::try_from(6).is_err());
    assert_eq!(Quality::all().count(), 6);
}

#[test]
fn rating_sequence_a_b_c() {
    let now = at_noon();
    let card = Card::new("hola", "hello", now);
    assert_eq!(card.memory_state(), MemoryState::default());

    // A: quality 4 on a fresh card. The formula's delta for 4 is zero.
    let a = apply_quality(card, Quality::try_from(4).unwrap(), now);
    assert_eq!(a.interval_days, 1);
    assert_eq!(a.reps, 1);
    assert!(close(a.ef, 2.5));
    assert_eq!(a.last_reviewed_at, Some(now));

    // B: quality 5 with one prior pass.
    let b = apply_quality(a, Quality::try_from(5).unwrap(), now);
    assert_eq!(b.interval_days, 6);
    assert_eq!(b.reps, 2);
    assert!(close(b.ef, 2.6));
    assert_eq!(b.due_at, now + Duration::days(6));

    // C: a fail.
    let c = apply_quality(b, Quality::try_from(1).unwrap(), now);
    assert_eq!(c.reps, 0);
    assert_eq!(c.interval_days, 1);
    assert!(close(c.ef, 2.06));
}

#[test]
fn huge_prior_interval_is_capped() {
    let out = schedule(state(2.5, 100_000_000, 5), 5, at_noon()).unwrap();
    assert_eq!(out.state.interval_days, MAX_INTERVAL_DAYS);
    assert_eq!(out.due_at, at_noon() + Duration::days(MAX_INTERVAL_DAYS as i64));
}

#[test]
fn repeated_perfect_ratings_level_off() {
    let mut card = Card::new("f", "b", at_noon());
    let mut prev = 0;
    for _ in 0..60 {
        let due = card.due_at;
        card = apply_quality(card, Quality::try_from(5).unwrap(), due);
        assert!(card.interval_days >= prev);
        assert!(card.interval_days <= MAX_INTERVAL_DAYS);
        prev = card.interval_days;
    }
    assert_eq!(card.interval_days, MAX_INTERVAL_DAYS);
}
