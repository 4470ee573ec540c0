use chrono::{Duration, Utc};
use mnemo_core::memory::MemoryRepo;
use mnemo_core::tags::delete_card;
use mnemo_core::{create_card, CardDraft, CoreError, Progress, Repository, SessionState, StudySession};
use std::sync::Arc;

async fn seeded(n: usize) -> Arc<MemoryRepo> {
    let repo = Arc::new(MemoryRepo::new());
    let base = Utc::now() - Duration::days(2);
    for i in 0..n {
        let created = base + Duration::minutes(i as i64);
        create_card(&*repo, CardDraft::new(format!("q{i}"), format!("a{i}")), created)
            .await
            .unwrap();
    }
    repo
}

#[tokio::test]
async fn empty_due_set_completes_immediately() {
    let repo = Arc::new(MemoryRepo::new());
    let mut s = StudySession::new(repo);
    assert_eq!(s.state(), SessionState::NotStarted);
    assert_eq!(s.start(Utc::now()).await.unwrap(), SessionState::Completed);
    assert!(s.current_card().is_none());
    assert_eq!(s.progress(), Progress { current_index: 0, total: 0 });
}

#[tokio::test]
async fn walks_due_cards_in_due_order() {
    let repo = seeded(3).await;
    let mut s = StudySession::new(repo.clone());
    s.start(Utc::now()).await.unwrap();

    let order: Vec<String> = s.snapshot().iter().map(|c| c.front.clone()).collect();
    assert_eq!(order, ["q0", "q1", "q2"]);
    assert_eq!(s.state(), SessionState::InProgress { answer_shown: false });
    assert_eq!(s.current_card().unwrap().front, "q0");
}

#[tokio::test]
async fn rating_requires_revealed_answer() {
    let repo = seeded(1).await;
    let mut s = StudySession::new(repo);
    s.start(Utc::now()).await.unwrap();

    let err = s.rate(4, Utc::now()).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidState(_)));
    assert_eq!(s.progress().current_index, 0);

    assert!(s.toggle_answer().unwrap());
    assert!(!s.toggle_answer().unwrap());
    s.reveal().unwrap();
    assert_eq!(s.state(), SessionState::InProgress { answer_shown: true });
}

#[tokio::test]
async fn invalid_quality_changes_nothing() {
    let repo = seeded(1).await;
    let mut s = StudySession::new(repo.clone());
    s.start(Utc::now()).await.unwrap();
    s.reveal().unwrap();

    let before = repo.list_cards().await.unwrap();
    assert!(matches!(s.rate(7, Utc::now()).await, Err(CoreError::InvalidQuality(7))));
    assert!(matches!(s.rate(-1, Utc::now()).await, Err(CoreError::InvalidQuality(-1))));
    assert_eq!(repo.list_cards().await.unwrap(), before);
    assert_eq!(s.state(), SessionState::InProgress { answer_shown: true });
    assert_eq!(s.rated_count(), 0);
}

#[tokio::test]
async fn rating_all_completes_and_restart_excludes_future_cards() {
    let repo = seeded(3).await;
    let mut s = StudySession::new(repo.clone());
    let now = Utc::now();
    s.start(now).await.unwrap();

    // Pass the first two, fail the third.
    for (i, q) in [5, 3, 1].into_iter().enumerate() {
        assert_eq!(s.progress(), Progress { current_index: i, total: 3 });
        s.reveal().unwrap();
        let saved = s.rate(q, now).await.unwrap();
        assert_eq!(saved.interval_days, 1);
        assert_eq!(saved.last_reviewed_at, Some(now));
    }
    assert_eq!(s.state(), SessionState::Completed);
    assert_eq!(s.progress(), Progress { current_index: 3, total: 3 });
    assert_eq!(s.rated_count(), 3);
    assert!(matches!(s.reveal(), Err(CoreError::InvalidState(_))));

    // Everything is due tomorrow now.
    assert_eq!(s.restart(now).await.unwrap(), SessionState::Completed);
    assert_eq!(s.progress().total, 0);

    // Two days on, all three are back.
    let later = now + Duration::days(2);
    assert!(matches!(s.restart(later).await.unwrap(), SessionState::InProgress { .. }));
    assert_eq!(s.progress().total, 3);
    assert_eq!(s.rated_count(), 0);
}

#[tokio::test]
async fn restart_mid_session_rebuilds_snapshot() {
    let repo = seeded(3).await;
    let mut s = StudySession::new(repo.clone());
    let now = Utc::now();
    s.start(now).await.unwrap();
    s.reveal().unwrap();
    s.rate(4, now).await.unwrap();

    s.restart(now).await.unwrap();
    let fronts: Vec<&str> = s.snapshot().iter().map(|c| c.front.as_str()).collect();
    assert_eq!(fronts, ["q1", "q2"]);
    assert_eq!(s.state(), SessionState::InProgress { answer_shown: false });
}

#[tokio::test]
async fn snapshot_is_stable_against_external_changes() {
    let repo = seeded(2).await;
    let mut s = StudySession::new(repo.clone());
    let now = Utc::now();
    s.start(now).await.unwrap();

    // New due card and an edit arrive mid-session.
    create_card(&*repo, CardDraft::new("late", "x"), now - Duration::days(5)).await.unwrap();
    let mut first = repo.get_card(s.current_card().unwrap().id).await.unwrap();
    first.back = "edited".into();
    repo.update_card(&first).await.unwrap();

    assert_eq!(s.progress().total, 2);
    s.reveal().unwrap();
    let saved = s.rate(5, now).await.unwrap();
    // The rating is applied on top of the edit rather than the stale copy.
    assert_eq!(saved.back, "edited");
    assert_eq!(saved.reps, 1);
}

#[tokio::test]
async fn deleted_card_can_be_skipped() {
    let repo = seeded(2).await;
    let mut s = StudySession::new(repo.clone());
    let now = Utc::now();
    s.start(now).await.unwrap();

    let gone = s.current_card().unwrap().id;
    delete_card(&*repo, gone).await.unwrap();
    s.reveal().unwrap();
    assert!(matches!(s.rate(4, now).await, Err(CoreError::NotFound(_))));
    assert_eq!(s.progress().current_index, 0);

    s.skip().unwrap();
    assert_eq!(s.current_card().unwrap().front, "q1");
    assert_eq!(s.state(), SessionState::InProgress { answer_shown: false });
}

#[tokio::test]
async fn lifecycle_guards() {
    let repo = seeded(1).await;
    let mut s = StudySession::new(repo);
    assert!(matches!(s.reveal(), Err(CoreError::InvalidState(_))));
    assert!(matches!(s.skip(), Err(CoreError::InvalidState(_))));
    assert!(matches!(s.restart(Utc::now()).await, Err(CoreError::InvalidState(_))));
    s.start(Utc::now()).await.unwrap();
    assert!(matches!(s.start(Utc::now()).await, Err(CoreError::InvalidState(_))));
}
