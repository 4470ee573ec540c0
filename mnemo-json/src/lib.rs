use chrono::{DateTime, Utc};
use mnemo_core::memory::{Link, Tables};
use mnemo_core::{repo::Repository, Card, CardDeletion, CardId, CoreError, Tag, TagId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::task;
use tracing::{debug, info, instrument, warn};

pub mod paths;

const FILE_VERSION: u32 = 1;

#[derive(Clone, Serialize, Deserialize)]
struct FileImage {
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cards: Vec<Card>,
    tags: Vec<Tag>,
    links: Vec<Link>,
}

#[derive(Clone)]
struct State {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    tables: Tables,
}

impl State {
    fn new_empty() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            tables: Tables::new(),
        }
    }

    fn to_image(&self) -> FileImage {
        let cards = self
            .tables
            .list_cards()
            .into_iter()
            .map(|mut c| {
                // The link list is the only copy of the relation on disk.
                c.tags.clear();
                c
            })
            .collect();
        FileImage {
            version: FILE_VERSION,
            created_at: self.created_at,
            updated_at: self.updated_at,
            cards,
            tags: self.tables.list_tags(),
            links: self.tables.links(),
        }
    }

    fn from_image(img: FileImage) -> Self {
        Self {
            created_at: img.created_at,
            updated_at: img.updated_at,
            tables: Tables::from_parts(img.cards, img.tags, img.links),
        }
    }
}

/// Card store kept in memory and written through to one JSON file.
///
/// Each mutation rewrites the file atomically and drops a timestamped copy into the backups
/// directory. If the store file cannot be written the in-memory tables are rolled back, so a
/// mutation either lands in both places or in neither. Backups are best effort.
pub struct JsonStore {
    path: PathBuf,
    backups_dir: PathBuf,
    max_backups: usize,
    state: RwLock<State>,
}

impl JsonStore {
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn open_with(path: PathBuf, backups_dir: PathBuf, max_backups: usize) -> Result<Self, CoreError> {
        ensure_parent_dirs(&path)?;
        if ensure_dir(&backups_dir).is_err() {
            warn!(dir = %backups_dir.display(), "backups directory unavailable");
        }
        let max_backups = max_backups.max(1);
        let state = load_or_init(&path, &backups_dir, max_backups).await?;
        info!(
            cards = state.tables.list_cards().len(),
            tags = state.tables.list_tags().len(),
            "opened json store"
        );
        Ok(Self {
            path,
            backups_dir,
            max_backups,
            state: RwLock::new(state),
        })
    }

    async fn save(&self, snapshot: FileImage) -> Result<(), CoreError> {
        let path = self.path.clone();
        let backups = self.backups_dir.clone();
        let keep = self.max_backups;

        task::spawn_blocking(move || write_with_backup(&path, &backups, keep, &snapshot))
            .await
            .map_err(|_| CoreError::Storage("io"))?
            .map_err(|e| {
                warn!(error = %e, "json store write failed");
                CoreError::Storage("io")
            })
    }

    /// Applies `op` to the tables and persists the result, restoring the previous tables if
    /// the write fails.
    async fn mutate<T, F>(&self, op: F) -> Result<T, CoreError>
    where
        T: Send,
        F: FnOnce(&mut Tables) -> Result<T, CoreError>,
    {
        let (out, before, image) = {
            let mut s = self.state.write();
            let before = s.tables.clone();
            let out = op(&mut s.tables)?;
            s.updated_at = Utc::now();
            (out, before, s.to_image())
        };
        if let Err(e) = self.save(image).await {
            self.state.write().tables = before;
            return Err(e);
        }
        Ok(out)
    }
}

fn ensure_parent_dirs(path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(())
}

fn ensure_dir(path: &Path) -> Result<(), CoreError> {
    fs::create_dir_all(path).map_err(|_| CoreError::Storage("io"))
}

async fn load_or_init(path: &Path, backups_dir: &Path, keep: usize) -> Result<State, CoreError> {
    if path.exists() {
        let p = path.to_path_buf();
        let img: FileImage = task::spawn_blocking(move || {
            let mut f = fs::File::open(&p)?;
            let mut buf = String::new();
            f.read_to_string(&mut buf)?;
            let v = serde_json::from_str::<FileImage>(&buf)?;
            Ok::<FileImage, std::io::Error>(v)
        })
        .await
        .map_err(|_| CoreError::Storage("io"))
        .and_then(|r| r.map_err(|_| CoreError::Storage("unreadable store file")))?;
        if img.version != FILE_VERSION {
            return Err(CoreError::Storage("unsupported store file version"));
        }
        Ok(State::from_image(img))
    } else {
        debug!("no store file yet; creating an empty one");
        let st = State::new_empty();
        let img = st.to_image();
        write_with_backup(path, backups_dir, keep, &img).map_err(|_| CoreError::Storage("io"))?;
        Ok(st)
    }
}

/// Persists the primary file, then drops a backup copy. Once the primary file is in place the
/// write counts as done; a failed backup or rotation is only logged.
fn write_with_backup(path: &Path, backups_dir: &Path, max_backups: usize, img: &FileImage) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec_pretty(img)?;
    let mut tmp = NamedTempFile::new_in(path.parent().unwrap_or_else(|| Path::new(".")))?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;

    if let Err(e) = write_backup(backups_dir, max_backups, &json) {
        warn!(error = %e, dir = %backups_dir.display(), "store saved but backup failed");
    }
    Ok(())
}

fn write_backup(backups_dir: &Path, max_backups: usize, json: &[u8]) -> Result<(), std::io::Error> {
    fs::create_dir_all(backups_dir)?;
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
    let backup_path = backups_dir.join(format!("mnemo-{ts}.json"));
    let mut btmp = NamedTempFile::new_in(backups_dir)?;
    btmp.write_all(json)?;
    btmp.flush()?;
    btmp.persist(&backup_path).map_err(|e| e.error)?;

    rotate_backups(backups_dir, max_backups)
}

fn rotate_backups(dir: &Path, keep: usize) -> Result<(), std::io::Error> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    // Names embed the timestamp, so lexical order is age order.
    entries.sort_by_key(|e| e.file_name());
    if entries.len() > keep {
        for e in &entries[0..entries.len() - keep] {
            let _ = fs::remove_file(e.path());
        }
    }
    Ok(())
}

use async_trait::async_trait;

#[async_trait]
impl Repository for JsonStore {
    async fn insert_card(&self, card: &Card) -> Result<Card, CoreError> {
        self.mutate(|t| t.insert_card(card)).await
    }

    async fn get_card(&self, id: CardId) -> Result<Card, CoreError> {
        self.state.read().tables.get_card(id)
    }

    async fn list_cards(&self) -> Result<Vec<Card>, CoreError> {
        Ok(self.state.read().tables.list_cards())
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        self.mutate(|t| t.update_card(card)).await
    }

    async fn delete_card(&self, id: CardId) -> Result<Vec<TagId>, CoreError> {
        self.mutate(|t| t.delete_card(id)).await
    }

    async fn insert_tag(&self, name: &str) -> Result<Tag, CoreError> {
        self.mutate(|t| t.insert_tag(name)).await
    }

    async fn get_tag(&self, id: TagId) -> Result<Tag, CoreError> {
        self.state.read().tables.get_tag(id)
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>, CoreError> {
        Ok(self.state.read().tables.find_tag_by_name(name))
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, CoreError> {
        Ok(self.state.read().tables.list_tags())
    }

    async fn delete_tag(&self, id: TagId) -> Result<(), CoreError> {
        self.mutate(|t| t.delete_tag(id)).await
    }

    async fn attach_tag(&self, card_id: CardId, tag_id: TagId) -> Result<bool, CoreError> {
        self.mutate(|t| t.attach_tag(card_id, tag_id)).await
    }

    async fn detach_tag(&self, card_id: CardId, tag_id: TagId) -> Result<bool, CoreError> {
        self.mutate(|t| t.detach_tag(card_id, tag_id)).await
    }

    async fn tag_ref_count(&self, tag_id: TagId) -> Result<usize, CoreError> {
        Ok(self.state.read().tables.ref_count(tag_id))
    }

    async fn orphan_tags(&self) -> Result<Vec<Tag>, CoreError> {
        Ok(self.state.read().tables.orphan_tags())
    }

    async fn delete_card_with_orphans(&self, id: CardId) -> Result<CardDeletion, CoreError> {
        self.mutate(|t| t.delete_card_with_orphans(id)).await
    }
}
