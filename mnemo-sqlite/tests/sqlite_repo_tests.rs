use chrono::{Duration, Utc};
use mnemo_core::tags::{attach_or_create_tag, delete_card, detach_tag};
use mnemo_core::{create_card, filter_cards, CardDraft, CardFilter, CoreError, Repository, StudySession};
use mnemo_sqlite::SqliteRepo;
use std::sync::Arc;

#[tokio::test]
async fn hydrates_tags_from_join_table() {
    let repo = SqliteRepo::open_memory().await.unwrap();
    let card = create_card(&repo, CardDraft::new("hola", "hello").with_tags(["Greetings", "es"]), Utc::now())
        .await
        .unwrap();
    assert_eq!(card.tags.len(), 2);

    let loaded = repo.get_card(card.id).await.unwrap();
    assert_eq!(loaded.tags, card.tags);
    let listed = repo.list_cards().await.unwrap();
    assert_eq!(listed[0].tags, card.tags);

    let tag = repo.find_tag_by_name("#greetings").await.unwrap().unwrap();
    let hits = filter_cards(&listed, &CardFilter::default().with_tag(tag.id), Utc::now());
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn delete_removes_links_and_orphans_together() {
    let repo = SqliteRepo::open_memory().await.unwrap();
    let a = create_card(&repo, CardDraft::new("a", "b").with_tags(["solo", "pair"]), Utc::now())
        .await
        .unwrap();
    let b = create_card(&repo, CardDraft::new("c", "d").with_tags(["pair"]), Utc::now())
        .await
        .unwrap();

    let deletion = delete_card(&repo, a.id).await.unwrap();
    assert_eq!(deletion.removed_tags.len(), 1);
    assert!(deletion.pending_tags.is_empty());

    let names: Vec<String> = repo.list_tags().await.unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(names, ["#pair"]);
    let pair = repo.find_tag_by_name("#pair").await.unwrap().unwrap();
    assert_eq!(repo.tag_ref_count(pair.id).await.unwrap(), 1);
    assert!(repo.orphan_tags().await.unwrap().is_empty());
    assert!(matches!(repo.get_card(a.id).await, Err(CoreError::NotFound(_))));
    assert!(matches!(delete_card(&repo, a.id).await, Err(CoreError::NotFound(_))));

    let rec = detach_tag(&repo, b.id, pair.id).await.unwrap();
    assert_eq!(rec.removed, vec![pair.id]);
    assert!(repo.list_tags().await.unwrap().is_empty());
}

#[tokio::test]
async fn referenced_tag_cannot_be_deleted() {
    let repo = SqliteRepo::open_memory().await.unwrap();
    let card = create_card(&repo, CardDraft::new("a", "b"), Utc::now()).await.unwrap();
    let tag = attach_or_create_tag(&repo, "Busy", card.id).await.unwrap();
    assert!(matches!(repo.delete_tag(tag.id).await, Err(CoreError::Conflict(_))));
    assert!(matches!(repo.insert_tag("#busy").await, Err(CoreError::Conflict(_))));
    assert!(!repo.attach_tag(card.id, tag.id).await.unwrap());
}

#[tokio::test]
async fn survives_reopen_and_keeps_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mnemo.db");
    let now = Utc::now();

    let id = {
        let repo = Arc::new(SqliteRepo::open_file(&path).await.unwrap());
        let card = create_card(&*repo, CardDraft::new("perro", "dog").with_image(vec![7, 7, 7]), now - Duration::hours(1))
            .await
            .unwrap();
        let mut s = StudySession::new(repo.clone());
        s.start(now).await.unwrap();
        s.reveal().unwrap();
        let saved = s.rate(4, now).await.unwrap();
        assert_eq!(saved.interval_days, 1);
        card.id
    };

    let repo = SqliteRepo::open_file(&path).await.unwrap();
    let card = repo.get_card(id).await.unwrap();
    assert_eq!(card.reps, 1);
    assert_eq!(card.interval_days, 1);
    assert_eq!(card.last_reviewed_at, Some(now));
    assert_eq!(card.due_at, now + Duration::days(1));
    assert_eq!(card.image.as_deref(), Some(&[7u8, 7, 7][..]));
}
