use crate::tags::CardDeletion;
use crate::{Card, CardId, CoreError, Tag, TagId};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One row of the card/tag join relation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Link {
    pub card_id: CardId,
    pub tag_id: TagId,
}

/// Plain in-process tables. Shared by [`MemoryRepo`] and file-backed stores that keep their
/// working set in memory.
#[derive(Clone, Debug, Default)]
pub struct Tables {
    cards: HashMap<CardId, Card>,
    tags: HashMap<TagId, Tag>,
    links: BTreeSet<Link>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds tables from persisted rows. Links pointing at missing rows are dropped.
    pub fn from_parts(cards: Vec<Card>, tags: Vec<Tag>, links: Vec<Link>) -> Self {
        let cards: HashMap<CardId, Card> = cards
            .into_iter()
            .map(|mut c| {
                c.tags.clear();
                (c.id, c)
            })
            .collect();
        let tags: HashMap<TagId, Tag> = tags.into_iter().map(|t| (t.id, t)).collect();
        let links = links
            .into_iter()
            .filter(|l| cards.contains_key(&l.card_id) && tags.contains_key(&l.tag_id))
            .collect();
        Self { cards, tags, links }
    }

    pub fn links(&self) -> Vec<Link> {
        self.links.iter().copied().collect()
    }

    fn hydrate(&self, card: &Card) -> Card {
        let mut c = card.clone();
        c.tags = self
            .links
            .iter()
            .filter(|l| l.card_id == card.id)
            .map(|l| l.tag_id)
            .collect();
        c
    }

    pub fn insert_card(&mut self, card: &Card) -> Result<Card, CoreError> {
        if self.cards.contains_key(&card.id) {
            return Err(CoreError::Conflict("card id already exists"));
        }
        if card.tags.iter().any(|t| !self.tags.contains_key(t)) {
            return Err(CoreError::NotFound("tag"));
        }
        let mut stored = card.clone();
        stored.tags.clear();
        self.cards.insert(card.id, stored);
        for &tag_id in &card.tags {
            self.links.insert(Link { card_id: card.id, tag_id });
        }
        Ok(card.clone())
    }

    pub fn get_card(&self, id: CardId) -> Result<Card, CoreError> {
        self.cards
            .get(&id)
            .map(|c| self.hydrate(c))
            .ok_or(CoreError::NotFound("card"))
    }

    /// Oldest first, ties by id.
    pub fn list_cards(&self) -> Vec<Card> {
        let mut v: Vec<Card> = self.cards.values().map(|c| self.hydrate(c)).collect();
        v.sort_by_key(|c| (c.created_at, c.id));
        v
    }

    pub fn update_card(&mut self, card: &Card) -> Result<Card, CoreError> {
        let Some(slot) = self.cards.get_mut(&card.id) else {
            return Err(CoreError::NotFound("card"));
        };
        let mut stored = card.clone();
        stored.tags.clear();
        *slot = stored;
        self.get_card(card.id)
    }

    pub fn delete_card(&mut self, id: CardId) -> Result<Vec<TagId>, CoreError> {
        if self.cards.remove(&id).is_none() {
            return Err(CoreError::NotFound("card"));
        }
        let held: Vec<Link> = self.links.iter().filter(|l| l.card_id == id).copied().collect();
        for l in &held {
            self.links.remove(l);
        }
        Ok(held.into_iter().map(|l| l.tag_id).collect())
    }

    pub fn insert_tag(&mut self, name: &str) -> Result<Tag, CoreError> {
        if self.tags.values().any(|t| t.name == name) {
            return Err(CoreError::Conflict("tag name already exists"));
        }
        let tag = Tag::new(name);
        self.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    pub fn get_tag(&self, id: TagId) -> Result<Tag, CoreError> {
        self.tags.get(&id).cloned().ok_or(CoreError::NotFound("tag"))
    }

    pub fn find_tag_by_name(&self, name: &str) -> Option<Tag> {
        self.tags.values().find(|t| t.name == name).cloned()
    }

    /// Sorted by name.
    pub fn list_tags(&self) -> Vec<Tag> {
        let mut v: Vec<Tag> = self.tags.values().cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    pub fn delete_tag(&mut self, id: TagId) -> Result<(), CoreError> {
        if !self.tags.contains_key(&id) {
            return Err(CoreError::NotFound("tag"));
        }
        if self.ref_count(id) > 0 {
            return Err(CoreError::Conflict("tag still referenced"));
        }
        self.tags.remove(&id);
        Ok(())
    }

    pub fn attach_tag(&mut self, card_id: CardId, tag_id: TagId) -> Result<bool, CoreError> {
        if !self.cards.contains_key(&card_id) {
            return Err(CoreError::NotFound("card"));
        }
        if !self.tags.contains_key(&tag_id) {
            return Err(CoreError::NotFound("tag"));
        }
        Ok(self.links.insert(Link { card_id, tag_id }))
    }

    pub fn detach_tag(&mut self, card_id: CardId, tag_id: TagId) -> Result<bool, CoreError> {
        if !self.cards.contains_key(&card_id) {
            return Err(CoreError::NotFound("card"));
        }
        Ok(self.links.remove(&Link { card_id, tag_id }))
    }

    pub fn ref_count(&self, tag_id: TagId) -> usize {
        self.links.iter().filter(|l| l.tag_id == tag_id).count()
    }

    pub fn orphan_tags(&self) -> Vec<Tag> {
        self.list_tags()
            .into_iter()
            .filter(|t| self.ref_count(t.id) == 0)
            .collect()
    }

    /// Card removal and orphan cleanup in one step; nothing changes on error.
    pub fn delete_card_with_orphans(&mut self, id: CardId) -> Result<CardDeletion, CoreError> {
        let held = self.delete_card(id)?;
        let mut removed_tags = Vec::new();
        for tag_id in held {
            if self.ref_count(tag_id) == 0 && self.tags.remove(&tag_id).is_some() {
                removed_tags.push(tag_id);
            }
        }
        Ok(CardDeletion {
            card_id: id,
            removed_tags,
            pending_tags: Vec::new(),
        })
    }
}

#[derive(Default)]
pub struct MemoryRepo {
    tables: RwLock<Tables>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl crate::repo::Repository for MemoryRepo {
    async fn insert_card(&self, card: &Card) -> Result<Card, CoreError> {
        self.tables.write().insert_card(card)
    }

    async fn get_card(&self, id: CardId) -> Result<Card, CoreError> {
        self.tables.read().get_card(id)
    }

    async fn list_cards(&self) -> Result<Vec<Card>, CoreError> {
        Ok(self.tables.read().list_cards())
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        self.tables.write().update_card(card)
    }

    async fn delete_card(&self, id: CardId) -> Result<Vec<TagId>, CoreError> {
        self.tables.write().delete_card(id)
    }

    async fn insert_tag(&self, name: &str) -> Result<Tag, CoreError> {
        self.tables.write().insert_tag(name)
    }

    async fn get_tag(&self, id: TagId) -> Result<Tag, CoreError> {
        self.tables.read().get_tag(id)
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>, CoreError> {
        Ok(self.tables.read().find_tag_by_name(name))
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, CoreError> {
        Ok(self.tables.read().list_tags())
    }

    async fn delete_tag(&self, id: TagId) -> Result<(), CoreError> {
        self.tables.write().delete_tag(id)
    }

    async fn attach_tag(&self, card_id: CardId, tag_id: TagId) -> Result<bool, CoreError> {
        self.tables.write().attach_tag(card_id, tag_id)
    }

    async fn detach_tag(&self, card_id: CardId, tag_id: TagId) -> Result<bool, CoreError> {
        self.tables.write().detach_tag(card_id, tag_id)
    }

    async fn tag_ref_count(&self, tag_id: TagId) -> Result<usize, CoreError> {
        Ok(self.tables.read().ref_count(tag_id))
    }

    async fn orphan_tags(&self) -> Result<Vec<Tag>, CoreError> {
        Ok(self.tables.read().orphan_tags())
    }

    async fn delete_card_with_orphans(&self, id: CardId) -> Result<CardDeletion, CoreError> {
        self.tables.write().delete_card_with_orphans(id)
    }
}
