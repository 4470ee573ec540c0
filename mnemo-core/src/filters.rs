use crate::{Card, TagId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    Any,
    DueOnly,
}

/// Conjunction of optional predicates. The default value keeps every card.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardFilter {
    pub status: Option<StatusFilter>,
    pub tag: Option<TagId>,
    pub query: Option<String>,
}

impl CardFilter {
    pub fn due() -> Self {
        Self {
            status: Some(StatusFilter::DueOnly),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: TagId) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Case-insensitive substring match on front or back. The query is used as given, spaces
/// included; a blank query keeps every card.
pub fn filter_by_text(cards: &[Card], query: &str) -> Vec<Card> {
    if query.trim().is_empty() {
        return cards.to_vec();
    }
    let q = query.to_lowercase();
    cards
        .iter()
        .filter(|c| c.front.to_lowercase().contains(&q) || c.back.to_lowercase().contains(&q))
        .cloned()
        .collect()
}

pub fn filter_by_tag(cards: &[Card], tag: TagId) -> Vec<Card> {
    cards.iter().filter(|c| c.has_tag(tag)).cloned().collect()
}

pub fn filter_by_due(cards: &[Card], now: DateTime<Utc>) -> Vec<Card> {
    cards.iter().filter(|c| c.is_due(now)).cloned().collect()
}

/// Applies status, then tag, then text. Input order is preserved.
pub fn filter_cards(cards: &[Card], filter: &CardFilter, now: DateTime<Utc>) -> Vec<Card> {
    let mut out = match filter.status {
        Some(StatusFilter::DueOnly) => filter_by_due(cards, now),
        Some(StatusFilter::Any) | None => cards.to_vec(),
    };
    if let Some(tag) = filter.tag {
        out = filter_by_tag(&out, tag);
    }
    if let Some(q) = filter.query.as_deref() {
        out = filter_by_text(&out, q);
    }
    out
}

/// Due cards ordered oldest-due first, ties broken by id.
pub fn due_queue(cards: &[Card], now: DateTime<Utc>) -> Vec<Card> {
    let mut pool = filter_cards(cards, &CardFilter::due(), now);
    pool.sort_by_key(|c| (c.due_at, c.id));
    pool
}
