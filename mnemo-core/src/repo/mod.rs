use crate::tags::{self, CardDeletion};
use crate::{Card, CardId, CoreError, Tag, TagId};
use async_trait::async_trait;

pub mod memory;

/// The card store. Cards, tags and the card/tag join relation.
///
/// `Card::tags` on returned cards is hydrated from the relation. Writes that take a `&Card`
/// ignore its `tags` field except [`Repository::insert_card`], which links the new card to
/// every listed (already existing) tag.
#[async_trait]
pub trait Repository: Send + Sync {
    // Cards
    async fn insert_card(&self, card: &Card) -> Result<Card, CoreError>;
    async fn get_card(&self, id: CardId) -> Result<Card, CoreError>;
    async fn list_cards(&self) -> Result<Vec<Card>, CoreError>;
    async fn update_card(&self, card: &Card) -> Result<Card, CoreError>;
    /// Removes the card and its links. Returns the tags it held; they may now be orphaned.
    async fn delete_card(&self, id: CardId) -> Result<Vec<TagId>, CoreError>;

    // Tags
    async fn insert_tag(&self, name: &str) -> Result<Tag, CoreError>;
    async fn get_tag(&self, id: TagId) -> Result<Tag, CoreError>;
    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>, CoreError>;
    async fn list_tags(&self) -> Result<Vec<Tag>, CoreError>;
    /// Fails with `Conflict` while any card still references the tag.
    async fn delete_tag(&self, id: TagId) -> Result<(), CoreError>;

    // Card <-> Tag
    /// Returns false when the link already existed.
    async fn attach_tag(&self, card_id: CardId, tag_id: TagId) -> Result<bool, CoreError>;
    /// Returns false when there was no link.
    async fn detach_tag(&self, card_id: CardId, tag_id: TagId) -> Result<bool, CoreError>;
    async fn tag_ref_count(&self, tag_id: TagId) -> Result<usize, CoreError>;
    async fn orphan_tags(&self) -> Result<Vec<Tag>, CoreError>;

    /// Deletes a card and every tag it leaves unreferenced.
    ///
    /// Backends with transactions override this so both steps commit or roll back together.
    /// This fallback runs them in sequence; tags it fails to clean up come back in
    /// `pending_tags` while the card deletion stands.
    async fn delete_card_with_orphans(&self, id: CardId) -> Result<CardDeletion, CoreError> {
        let held = self.delete_card(id).await?;
        let rec = tags::reconcile(self, &held).await;
        Ok(CardDeletion {
            card_id: id,
            removed_tags: rec.removed,
            pending_tags: rec.pending,
        })
    }
}
