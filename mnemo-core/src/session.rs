//! Study session state machine.
//!
//! ```text
//! NotStarted --start--> InProgress{hidden} --reveal--> InProgress{shown} --rate--> next | Completed
//!                         ^                                                          |
//!                         +------------------------- restart ------------------------+
//! ```
//!
//! The due set is copied once at start and walked in order; edits made to the store during the
//! pass never change which cards are in it. Nothing is written until a rating is applied, so a
//! session can be dropped at any point.

use crate::filters::due_queue;
use crate::repo::Repository;
use crate::scheduler::apply_quality;
use crate::{Card, CoreError, Quality};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SessionState {
    NotStarted,
    InProgress { answer_shown: bool },
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current_index: usize,
    pub total: usize,
}

pub struct StudySession<R: Repository + ?Sized> {
    repo: Arc<R>,
    cards: Vec<Card>,
    current: usize,
    answer_shown: bool,
    started: bool,
    rated: usize,
}

impl<R: Repository + ?Sized> StudySession<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            cards: Vec::new(),
            current: 0,
            answer_shown: false,
            started: false,
            rated: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        if !self.started {
            SessionState::NotStarted
        } else if self.current >= self.cards.len() {
            SessionState::Completed
        } else {
            SessionState::InProgress {
                answer_shown: self.answer_shown,
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state() == SessionState::Completed
    }

    pub fn progress(&self) -> Progress {
        Progress {
            current_index: self.current,
            total: self.cards.len(),
        }
    }

    /// Cards rated during the current pass.
    pub fn rated_count(&self) -> usize {
        self.rated
    }

    /// The point-in-time copy being walked.
    pub fn snapshot(&self) -> &[Card] {
        &self.cards
    }

    pub fn current_card(&self) -> Option<&Card> {
        match self.state() {
            SessionState::InProgress { .. } => self.cards.get(self.current),
            _ => None,
        }
    }

    fn require_in_progress(&self) -> Result<(), CoreError> {
        match self.state() {
            SessionState::InProgress { .. } => Ok(()),
            SessionState::NotStarted => Err(CoreError::InvalidState("session not started")),
            SessionState::Completed => Err(CoreError::InvalidState("session completed")),
        }
    }

    /// Snapshots the due set. An empty set completes the session immediately.
    pub async fn start(&mut self, now: DateTime<Utc>) -> Result<SessionState, CoreError> {
        if self.started {
            return Err(CoreError::InvalidState("session already started"));
        }
        let all = self.repo.list_cards().await?;
        self.cards = due_queue(&all, now);
        self.current = 0;
        self.answer_shown = false;
        self.rated = 0;
        self.started = true;
        info!(due = self.cards.len(), "study session started");
        Ok(self.state())
    }

    pub fn reveal(&mut self) -> Result<(), CoreError> {
        self.require_in_progress()?;
        self.answer_shown = true;
        Ok(())
    }

    pub fn toggle_answer(&mut self) -> Result<bool, CoreError> {
        self.require_in_progress()?;
        self.answer_shown = !self.answer_shown;
        Ok(self.answer_shown)
    }

    /// Schedules and persists the current card, then moves on.
    ///
    /// On any error the cursor and the answer flag are left untouched so the caller can retry.
    pub async fn rate(&mut self, quality: i32, now: DateTime<Utc>) -> Result<Card, CoreError> {
        self.require_in_progress()?;
        if !self.answer_shown {
            return Err(CoreError::InvalidState("answer not revealed"));
        }
        let quality = Quality::try_from(quality)?;
        let id = self.cards[self.current].id;

        // Schedule from the stored row so edits made since the snapshot survive.
        let live = self.repo.get_card(id).await?;
        let updated = apply_quality(live, quality, now);
        let saved = self.repo.update_card(&updated).await?;
        debug!(
            card = %id,
            quality = quality.value(),
            interval_days = saved.interval_days,
            ef = saved.ef,
            "rated card"
        );

        self.rated += 1;
        self.advance();
        Ok(saved)
    }

    /// Moves past the current card without rating it.
    pub fn skip(&mut self) -> Result<(), CoreError> {
        self.require_in_progress()?;
        debug!(card = %self.cards[self.current].id, "skipped card");
        self.advance();
        Ok(())
    }

    /// Drops the current snapshot and builds a new one from the live due set.
    pub async fn restart(&mut self, now: DateTime<Utc>) -> Result<SessionState, CoreError> {
        if !self.started {
            return Err(CoreError::InvalidState("session not started"));
        }
        self.started = false;
        self.cards.clear();
        self.start(now).await
    }

    fn advance(&mut self) {
        self.answer_shown = false;
        self.current += 1;
        if self.current >= self.cards.len() {
            info!(rated = self.rated, total = self.cards.len(), "study session completed");
        }
    }
}
