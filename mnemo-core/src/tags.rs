//! Tag lifecycle: name normalization, lazy creation, and garbage collection of tags that no
//! card references any more.
//!
//! Every path that removes a card/tag link goes through here so an unreferenced tag never
//! outlives the operation that orphaned it. When cleanup fails after the link is already gone,
//! the tag id is reported as pending and [`sweep_orphans`] picks it up later.

use crate::{repo::Repository, CardId, CoreError, Tag, TagId};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const TAG_MARKER: char = '#';

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub removed: Vec<TagId>,
    /// Orphans whose deletion failed.
    pub pending: Vec<TagId>,
}

impl Reconciliation {
    pub fn is_clean(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CardDeletion {
    pub card_id: CardId,
    pub removed_tags: Vec<TagId>,
    pub pending_tags: Vec<TagId>,
}

/// Trims, lower-cases and prefixes `#`. `" Rust "` and `"#rust"` both become `"#rust"`.
pub fn normalize_tag_name(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim().to_lowercase();
    let name = if trimmed.starts_with(TAG_MARKER) {
        trimmed
    } else {
        format!("{TAG_MARKER}{trimmed}")
    };
    if name.chars().count() <= 1 {
        return Err(CoreError::Invalid("empty tag name"));
    }
    Ok(name)
}

/// Looks up or creates the tag for `name` without attaching it anywhere.
pub async fn ensure_tag<R: Repository + ?Sized>(repo: &R, name: &str) -> Result<(Tag, bool), CoreError> {
    let name = normalize_tag_name(name)?;
    if let Some(tag) = repo.find_tag_by_name(&name).await? {
        return Ok((tag, false));
    }
    let tag = repo.insert_tag(&name).await?;
    info!(tag = %tag.name, id = %tag.id, "created tag");
    Ok((tag, true))
}

pub async fn attach_or_create_tag<R: Repository + ?Sized>(
    repo: &R,
    name: &str,
    card_id: CardId,
) -> Result<Tag, CoreError> {
    // Surface a missing card before a tag row gets created for it.
    repo.get_card(card_id).await?;
    let (tag, created) = ensure_tag(repo, name).await?;
    if let Err(e) = repo.attach_tag(card_id, tag.id).await {
        if created {
            reconcile(repo, &[tag.id]).await;
        }
        return Err(e);
    }
    debug!(card = %card_id, tag = %tag.name, "attached tag");
    Ok(tag)
}

pub async fn detach_tag<R: Repository + ?Sized>(
    repo: &R,
    card_id: CardId,
    tag_id: TagId,
) -> Result<Reconciliation, CoreError> {
    if !repo.detach_tag(card_id, tag_id).await? {
        return Ok(Reconciliation::default());
    }
    debug!(card = %card_id, tag = %tag_id, "detached tag");
    Ok(reconcile(repo, &[tag_id]).await)
}

/// Deletes each listed tag that no card references. Never fails; failures land in `pending`.
pub async fn reconcile<R: Repository + ?Sized>(repo: &R, tag_ids: &[TagId]) -> Reconciliation {
    let mut out = Reconciliation::default();
    for &tag_id in tag_ids {
        match remove_if_orphan(repo, tag_id).await {
            Ok(true) => {
                info!(tag = %tag_id, "deleted orphaned tag");
                out.removed.push(tag_id);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(tag = %tag_id, error = %e, "orphan cleanup failed; left for a later sweep");
                out.pending.push(tag_id);
            }
        }
    }
    out
}

async fn remove_if_orphan<R: Repository + ?Sized>(repo: &R, tag_id: TagId) -> Result<bool, CoreError> {
    if repo.tag_ref_count(tag_id).await? > 0 {
        return Ok(false);
    }
    match repo.delete_tag(tag_id).await {
        Ok(()) => Ok(true),
        // Already gone.
        Err(CoreError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Deletes the card and reconciles the tags it held.
pub async fn delete_card<R: Repository + ?Sized>(repo: &R, card_id: CardId) -> Result<CardDeletion, CoreError> {
    let deletion = repo.delete_card_with_orphans(card_id).await?;
    if !deletion.pending_tags.is_empty() {
        warn!(
            card = %card_id,
            pending = deletion.pending_tags.len(),
            "card deleted but some orphaned tags remain"
        );
    }
    info!(card = %card_id, removed_tags = deletion.removed_tags.len(), "deleted card");
    Ok(deletion)
}

/// Best-effort pass over every tag in the store.
pub async fn sweep_orphans<R: Repository + ?Sized>(repo: &R) -> Result<Reconciliation, CoreError> {
    let ids: Vec<TagId> = repo.orphan_tags().await?.into_iter().map(|t| t.id).collect();
    if ids.is_empty() {
        return Ok(Reconciliation::default());
    }
    Ok(reconcile(repo, &ids).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_variants() {
        assert_eq!(normalize_tag_name("Rust").unwrap(), "#rust");
        assert_eq!(normalize_tag_name("  #Rust ").unwrap(), "#rust");
        assert_eq!(normalize_tag_name("#rust").unwrap(), "#rust");
        assert_eq!(normalize_tag_name("Two Words").unwrap(), "#two words");
    }

    #[test]
    fn normalize_rejects_empty() {
        assert!(matches!(normalize_tag_name(""), Err(CoreError::Invalid(_))));
        assert!(matches!(normalize_tag_name("   "), Err(CoreError::Invalid(_))));
        assert!(matches!(normalize_tag_name("#"), Err(CoreError::Invalid(_))));
        assert!(matches!(normalize_tag_name(" # "), Err(CoreError::Invalid(_))));
    }
}
