use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::CoreError;

pub type CardId = Uuid;
pub type TagId = Uuid;

pub const EF_MIN: f64 = 1.3;
pub const EF_DEFAULT: f64 = 2.5;

/// Self-rated recall score, 0 (blackout) to 5 (perfect).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "i32", into = "i32")]
pub struct Quality(u8);

impl Quality {
    pub const MAX: u8 = 5;

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_pass(self) -> bool {
        self.0 >= 3
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            0 => "Again",
            1 => "Hard",
            2 => "Okay",
            3 => "Good",
            4 => "Easy",
            _ => "Perfect",
        }
    }

    pub fn all() -> impl Iterator<Item = Quality> {
        (0..=Self::MAX).map(Quality)
    }
}

impl TryFrom<i32> for Quality {
    type Error = CoreError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        if (0..=Self::MAX as i32).contains(&v) {
            Ok(Quality(v as u8))
        } else {
            Err(CoreError::InvalidQuality(v))
        }
    }
}

impl From<Quality> for i32 {
    fn from(q: Quality) -> Self {
        q.0 as i32
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.label())
    }
}

/// The SM-2 memory-strength triple carried by every card.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct MemoryState {
    pub ef: f64,
    pub interval_days: u32,
    pub reps: u32,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            ef: EF_DEFAULT,
            interval_days: 0,
            reps: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
}

impl Tag {
    /// `name` must already be normalized; see [`crate::tags::normalize_tag_name`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub id: CardId,
    pub front: String,
    pub back: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
    /// Hydrated from the card/tag relation by the store; not the source of truth.
    #[serde(default)]
    pub tags: BTreeSet<TagId>,

    pub ef: f64,
    pub interval_days: u32,
    pub reps: u32,
    pub due_at: DateTime<Utc>,
    pub last_reviewed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Card {
    /// A fresh card is due immediately.
    pub fn new(front: impl Into<String>, back: impl Into<String>, now: DateTime<Utc>) -> Self {
        let state = MemoryState::default();
        Self {
            id: Uuid::new_v4(),
            front: front.into(),
            back: back.into(),
            image: None,
            tags: BTreeSet::new(),
            ef: state.ef,
            interval_days: state.interval_days,
            reps: state.reps,
            due_at: now,
            last_reviewed_at: None,
            created_at: now,
        }
    }

    pub fn memory_state(&self) -> MemoryState {
        MemoryState {
            ef: self.ef,
            interval_days: self.interval_days,
            reps: self.reps,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }

    pub fn has_tag(&self, tag: TagId) -> bool {
        self.tags.contains(&tag)
    }
}
