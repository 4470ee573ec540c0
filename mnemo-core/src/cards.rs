//! Card create/edit requests coming from the presentation layer.

use crate::repo::Repository;
use crate::tags::{self, Reconciliation};
use crate::{Card, CardId, CoreError, Tag, TagId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default)]
pub struct CardDraft {
    pub front: String,
    pub back: String,
    pub image: Option<Vec<u8>>,
    pub tag_names: Vec<String>,
}

impl CardDraft {
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }
}

/// Partial update. `None` leaves a field alone; `tag_names` replaces the whole tag set.
#[derive(Clone, Debug, Default)]
pub struct CardEdit {
    pub front: Option<String>,
    pub back: Option<String>,
    pub image: Option<Option<Vec<u8>>>,
    pub tag_names: Option<Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct EditOutcome {
    pub card: Card,
    pub reconciliation: Reconciliation,
}

fn validate_content(front: &str, back: &str) -> Result<(), CoreError> {
    if front.trim().is_empty() {
        return Err(CoreError::Invalid("front text is empty"));
    }
    if back.trim().is_empty() {
        return Err(CoreError::Invalid("back text is empty"));
    }
    Ok(())
}

/// Normalized, de-duplicated, in first-seen order.
fn normalize_all(names: &[String]) -> Result<Vec<String>, CoreError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(names.len());
    for raw in names {
        let name = tags::normalize_tag_name(raw)?;
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    Ok(out)
}

pub async fn create_card<R: Repository + ?Sized>(
    repo: &R,
    draft: CardDraft,
    now: DateTime<Utc>,
) -> Result<Card, CoreError> {
    validate_content(&draft.front, &draft.back)?;
    let names = normalize_all(&draft.tag_names)?;

    let mut created: Vec<TagId> = Vec::new();
    let mut card = Card::new(draft.front, draft.back, now);
    card.image = draft.image;
    for name in &names {
        match tags::ensure_tag(repo, name).await {
            Ok((tag, fresh)) => {
                if fresh {
                    created.push(tag.id);
                }
                card.tags.insert(tag.id);
            }
            Err(e) => {
                tags::reconcile(repo, &created).await;
                return Err(e);
            }
        }
    }

    match repo.insert_card(&card).await {
        Ok(card) => {
            info!(card = %card.id, tags = card.tags.len(), "created card");
            Ok(card)
        }
        Err(e) => {
            // Tags made for this card would otherwise be left unreferenced.
            tags::reconcile(repo, &created).await;
            Err(e)
        }
    }
}

/// Applies content and tag changes as one unit.
///
/// Links are added, then removed, then the content is written. If any step fails the links are
/// put back and tags created for the edit are dropped, so the caller sees either the whole edit
/// or none of it. Tags the edit leaves unreferenced are reconciled only after everything landed.
pub async fn edit_card<R: Repository + ?Sized>(
    repo: &R,
    id: CardId,
    edit: CardEdit,
) -> Result<EditOutcome, CoreError> {
    let mut card = repo.get_card(id).await?;
    if let Some(front) = edit.front {
        card.front = front;
    }
    if let Some(back) = edit.back {
        card.back = back;
    }
    if let Some(image) = edit.image {
        card.image = image;
    }
    validate_content(&card.front, &card.back)?;
    let wanted = edit.tag_names.as_deref().map(normalize_all).transpose()?;

    let mut changes = LinkChanges::default();
    if let Err(e) = apply_edit(repo, &card, wanted.as_deref(), &mut changes).await {
        undo_links(repo, id, &changes).await;
        return Err(e);
    }

    let reconciliation = tags::reconcile(repo, &changes.detached).await;
    let card = repo.get_card(id).await?;
    info!(card = %card.id, "edited card");
    Ok(EditOutcome { card, reconciliation })
}

#[derive(Default)]
struct LinkChanges {
    created: Vec<TagId>,
    attached: Vec<TagId>,
    detached: Vec<TagId>,
}

async fn apply_edit<R: Repository + ?Sized>(
    repo: &R,
    card: &Card,
    wanted: Option<&[String]>,
    changes: &mut LinkChanges,
) -> Result<(), CoreError> {
    if let Some(wanted) = wanted {
        let held = tag_names_of(repo, card).await?;
        for name in wanted.iter().filter(|n| !held.contains_key(*n)) {
            let (tag, fresh) = tags::ensure_tag(repo, name).await?;
            if fresh {
                changes.created.push(tag.id);
            }
            if repo.attach_tag(card.id, tag.id).await? {
                changes.attached.push(tag.id);
            }
        }
        for (name, tag_id) in held.iter().filter(|(n, _)| !wanted.contains(*n)) {
            debug!(card = %card.id, tag = %name, "removing tag from card");
            if repo.detach_tag(card.id, *tag_id).await? {
                changes.detached.push(*tag_id);
            }
        }
    }
    repo.update_card(card).await?;
    Ok(())
}

async fn undo_links<R: Repository + ?Sized>(repo: &R, card_id: CardId, changes: &LinkChanges) {
    for &tag_id in &changes.detached {
        if let Err(e) = repo.attach_tag(card_id, tag_id).await {
            warn!(card = %card_id, tag = %tag_id, error = %e, "could not restore tag link");
        }
    }
    for &tag_id in &changes.attached {
        if let Err(e) = repo.detach_tag(card_id, tag_id).await {
            warn!(card = %card_id, tag = %tag_id, error = %e, "could not drop tag link");
        }
    }
    tags::reconcile(repo, &changes.created).await;
}

async fn tag_names_of<R: Repository + ?Sized>(repo: &R, card: &Card) -> Result<BTreeMap<String, TagId>, CoreError> {
    let mut out = BTreeMap::new();
    for &tag_id in &card.tags {
        let tag = repo.get_tag(tag_id).await?;
        out.insert(tag.name, tag.id);
    }
    Ok(out)
}

/// Resolves a card's tag ids to tags, sorted by name.
pub async fn tags_of<R: Repository + ?Sized>(repo: &R, card: &Card) -> Result<Vec<Tag>, CoreError> {
    let mut v = Vec::with_capacity(card.tags.len());
    for &tag_id in &card.tags {
        v.push(repo.get_tag(tag_id).await?);
    }
    v.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(v)
}
