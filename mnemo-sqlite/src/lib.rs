use chrono::{DateTime, SecondsFormat, Utc};
use mnemo_core::{repo::Repository, Card, CardDeletion, CardId, CoreError, Tag, TagId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

/// Card store on an embedded SQLite database.
///
/// The card/tag relation lives in `card_tags`; multi-statement operations run in one
/// transaction.
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(storage("sqlite connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        info!("opened sqlite store");
        Ok(repo)
    }

    pub async fn open_memory() -> Result<Self, CoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(storage("sqlite connect"))?
            .foreign_keys(true);
        // Every connection to :memory: is a separate database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(storage("sqlite connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        const STMT: &str = r#"
        CREATE TABLE IF NOT EXISTS cards (
          id                TEXT PRIMARY KEY,
          front             TEXT NOT NULL,
          back              TEXT NOT NULL,
          image             BLOB,
          ef                REAL    NOT NULL DEFAULT 2.5,
          interval_days     INTEGER NOT NULL DEFAULT 0,
          reps              INTEGER NOT NULL DEFAULT 0,
          due_at            TEXT    NOT NULL,
          last_reviewed_at  TEXT,
          created_at        TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tags (
          id    TEXT PRIMARY KEY,
          name  TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS card_tags (
          card_id  TEXT NOT NULL,
          tag_id   TEXT NOT NULL,
          PRIMARY KEY (card_id, tag_id),
          FOREIGN KEY(card_id) REFERENCES cards(id) ON DELETE CASCADE,
          FOREIGN KEY(tag_id)  REFERENCES tags(id)
        );

        CREATE INDEX IF NOT EXISTS idx_cards_due ON cards (due_at);
        CREATE INDEX IF NOT EXISTS idx_card_tags_tag ON card_tags (tag_id);
        "#;

        // Execute statements one by one for compatibility.
        for chunk in STMT.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(storage("sqlite schema"))?;
        }
        Ok(())
    }
}

const CARD_COLUMNS: &str =
    "id,front,back,image,ef,interval_days,reps,due_at,last_reviewed_at,created_at";

#[async_trait::async_trait]
impl Repository for SqliteRepo {
    // ===== Cards =====
    async fn insert_card(&self, card: &Card) -> Result<Card, CoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("tx"))?;

        for tag_id in &card.tags {
            if !tag_exists(&mut tx, *tag_id).await? {
                tx.rollback().await.ok();
                return Err(CoreError::NotFound("tag"));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO cards (id,front,back,image,ef,interval_days,reps,due_at,last_reviewed_at,created_at)
            VALUES (?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(card.id.to_string())
        .bind(&card.front)
        .bind(&card.back)
        .bind(card.image.clone())
        .bind(card.ef)
        .bind(card.interval_days as i64)
        .bind(card.reps as i64)
        .bind(dt_to_str(card.due_at))
        .bind(card.last_reviewed_at.map(dt_to_str))
        .bind(dt_to_str(card.created_at))
        .execute(&mut *tx)
        .await
        .map_err(storage("insert card"))?;

        for tag_id in &card.tags {
            sqlx::query("INSERT INTO card_tags (card_id,tag_id) VALUES (?,?)")
                .bind(card.id.to_string())
                .bind(tag_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(storage("insert card tag"))?;
        }

        tx.commit().await.map_err(storage("tx commit"))?;
        debug!(card = %card.id, "inserted card");
        Ok(card.clone())
    }

    async fn get_card(&self, id: CardId) -> Result<Card, CoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage("acquire"))?;
        load_card(&mut conn, id).await
    }

    async fn list_cards(&self) -> Result<Vec<Card>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM cards ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage("list cards"))?;

        let links = sqlx::query("SELECT card_id,tag_id FROM card_tags")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list card tags"))?;
        let mut by_card: HashMap<CardId, BTreeSet<TagId>> = HashMap::new();
        for row in links {
            let card_id = uuid_from_str(row.get::<String, _>("card_id"))?;
            let tag_id = uuid_from_str(row.get::<String, _>("tag_id"))?;
            by_card.entry(card_id).or_default().insert(tag_id);
        }

        let mut v = Vec::with_capacity(rows.len());
        for row in rows {
            let mut card = row_into_card(row)?;
            card.tags = by_card.remove(&card.id).unwrap_or_default();
            v.push(card);
        }
        Ok(v)
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        let res = sqlx::query(
            r#"
            UPDATE cards SET
              front=?, back=?, image=?, ef=?, interval_days=?, reps=?, due_at=?, last_reviewed_at=?
            WHERE id=?
            "#,
        )
        .bind(&card.front)
        .bind(&card.back)
        .bind(card.image.clone())
        .bind(card.ef)
        .bind(card.interval_days as i64)
        .bind(card.reps as i64)
        .bind(dt_to_str(card.due_at))
        .bind(card.last_reviewed_at.map(dt_to_str))
        .bind(card.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage("update card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        self.get_card(card.id).await
    }

    async fn delete_card(&self, id: CardId) -> Result<Vec<TagId>, CoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("tx"))?;
        let held = held_tags(&mut tx, id).await?;
        if !remove_card_rows(&mut tx, id).await? {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("card"));
        }
        tx.commit().await.map_err(storage("tx commit"))?;
        Ok(held)
    }

    // ===== Tags =====
    async fn insert_tag(&self, name: &str) -> Result<Tag, CoreError> {
        if self.find_tag_by_name(name).await?.is_some() {
            return Err(CoreError::Conflict("tag name already exists"));
        }
        let tag = Tag::new(name);
        sqlx::query("INSERT INTO tags (id,name) VALUES (?,?)")
            .bind(tag.id.to_string())
            .bind(&tag.name)
            .execute(&self.pool)
            .await
            .map_err(storage("insert tag"))?;
        Ok(tag)
    }

    async fn get_tag(&self, id: TagId) -> Result<Tag, CoreError> {
        let row = sqlx::query("SELECT id,name FROM tags WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("read tag"))?;
        row_into_tag(row.ok_or(CoreError::NotFound("tag"))?)
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>, CoreError> {
        let row = sqlx::query("SELECT id,name FROM tags WHERE name=?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("read tag"))?;
        row.map(row_into_tag).transpose()
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, CoreError> {
        let rows = sqlx::query("SELECT id,name FROM tags ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list tags"))?;
        rows.into_iter().map(row_into_tag).collect()
    }

    async fn delete_tag(&self, id: TagId) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("tx"))?;
        if ref_count(&mut tx, id).await? > 0 {
            tx.rollback().await.ok();
            return Err(CoreError::Conflict("tag still referenced"));
        }
        let res = sqlx::query("DELETE FROM tags WHERE id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage("del tag"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("tag"));
        }
        tx.commit().await.map_err(storage("tx commit"))
    }

    // ===== Card <-> Tag =====
    async fn attach_tag(&self, card_id: CardId, tag_id: TagId) -> Result<bool, CoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage("acquire"))?;
        if !card_exists(&mut conn, card_id).await? {
            return Err(CoreError::NotFound("card"));
        }
        if !tag_exists(&mut conn, tag_id).await? {
            return Err(CoreError::NotFound("tag"));
        }
        let res = sqlx::query("INSERT OR IGNORE INTO card_tags (card_id,tag_id) VALUES (?,?)")
            .bind(card_id.to_string())
            .bind(tag_id.to_string())
            .execute(&mut *conn)
            .await
            .map_err(storage("attach tag"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn detach_tag(&self, card_id: CardId, tag_id: TagId) -> Result<bool, CoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage("acquire"))?;
        if !card_exists(&mut conn, card_id).await? {
            return Err(CoreError::NotFound("card"));
        }
        let res = sqlx::query("DELETE FROM card_tags WHERE card_id=? AND tag_id=?")
            .bind(card_id.to_string())
            .bind(tag_id.to_string())
            .execute(&mut *conn)
            .await
            .map_err(storage("detach tag"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn tag_ref_count(&self, tag_id: TagId) -> Result<usize, CoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage("acquire"))?;
        ref_count(&mut conn, tag_id).await
    }

    async fn orphan_tags(&self) -> Result<Vec<Tag>, CoreError> {
        let rows = sqlx::query(
            r#"SELECT t.id, t.name FROM tags t
               WHERE NOT EXISTS (SELECT 1 FROM card_tags ct WHERE ct.tag_id = t.id)
               ORDER BY t.name ASC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage("list orphan tags"))?;
        rows.into_iter().map(row_into_tag).collect()
    }

    async fn delete_card_with_orphans(&self, id: CardId) -> Result<CardDeletion, CoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("tx"))?;
        let held = held_tags(&mut tx, id).await?;
        if !remove_card_rows(&mut tx, id).await? {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("card"));
        }

        let mut removed_tags = Vec::new();
        for tag_id in held {
            if ref_count(&mut tx, tag_id).await? > 0 {
                continue;
            }
            sqlx::query("DELETE FROM tags WHERE id=?")
                .bind(tag_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(storage("del orphan tag"))?;
            removed_tags.push(tag_id);
        }

        tx.commit().await.map_err(storage("tx commit"))?;
        Ok(CardDeletion {
            card_id: id,
            removed_tags,
            pending_tags: Vec::new(),
        })
    }
}

// ===== Helpers =====
fn storage(ctx: &'static str) -> impl FnOnce(sqlx::Error) -> CoreError {
    move |e| {
        warn!(error = %e, "{ctx}");
        CoreError::Storage(ctx)
    }
}

async fn load_card(conn: &mut SqliteConnection, id: CardId) -> Result<Card, CoreError> {
    let row = sqlx::query(&format!("SELECT {CARD_COLUMNS} FROM cards WHERE id=?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage("read card"))?;
    let mut card = row_into_card(row.ok_or(CoreError::NotFound("card"))?)?;
    card.tags = held_tags(conn, id).await?.into_iter().collect();
    Ok(card)
}

async fn held_tags(conn: &mut SqliteConnection, card_id: CardId) -> Result<Vec<TagId>, CoreError> {
    let rows = sqlx::query("SELECT tag_id FROM card_tags WHERE card_id=?")
        .bind(card_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(storage("read card tags"))?;
    rows.into_iter()
        .map(|r| uuid_from_str(r.get::<String, _>("tag_id")))
        .collect()
}

/// Deletes the card row and its links. False when there was no such card.
async fn remove_card_rows(conn: &mut SqliteConnection, id: CardId) -> Result<bool, CoreError> {
    // Explicit so it does not depend on PRAGMA foreign_keys.
    sqlx::query("DELETE FROM card_tags WHERE card_id=?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(storage("del card tags"))?;
    let res = sqlx::query("DELETE FROM cards WHERE id=?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(storage("del card"))?;
    Ok(res.rows_affected() > 0)
}

async fn ref_count(conn: &mut SqliteConnection, tag_id: TagId) -> Result<usize, CoreError> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM card_tags WHERE tag_id=?")
        .bind(tag_id.to_string())
        .fetch_one(&mut *conn)
        .await
        .map_err(storage("count tag refs"))?;
    Ok(n as usize)
}

async fn card_exists(conn: &mut SqliteConnection, id: CardId) -> Result<bool, CoreError> {
    Ok(sqlx::query("SELECT 1 FROM cards WHERE id=? LIMIT 1")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage("read card"))?
        .is_some())
}

async fn tag_exists(conn: &mut SqliteConnection, id: TagId) -> Result<bool, CoreError> {
    Ok(sqlx::query("SELECT 1 FROM tags WHERE id=? LIMIT 1")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage("read tag"))?
        .is_some())
}

fn uuid_from_str(s: String) -> Result<uuid::Uuid, CoreError> {
    uuid::Uuid::parse_str(&s).map_err(|_| CoreError::Invalid("uuid"))
}

/// Fixed-width so the text columns sort chronologically.
fn dt_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn dt_from_str(s: String) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(&s)
        .map_err(|_| CoreError::Invalid("datetime"))
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_into_tag(row: sqlx::sqlite::SqliteRow) -> Result<Tag, CoreError> {
    Ok(Tag {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        name: row.get::<String, _>("name"),
    })
}

fn row_into_card(row: sqlx::sqlite::SqliteRow) -> Result<Card, CoreError> {
    Ok(Card {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        front: row.get::<String, _>("front"),
        back: row.get::<String, _>("back"),
        image: row.get::<Option<Vec<u8>>, _>("image"),
        tags: BTreeSet::new(),
        ef: row.get::<f64, _>("ef"),
        interval_days: row.get::<i64, _>("interval_days") as u32,
        reps: row.get::<i64, _>("reps") as u32,
        due_at: dt_from_str(row.get::<String, _>("due_at"))?,
        last_reviewed_at: row
            .get::<Option<String>, _>("last_reviewed_at")
            .map(dt_from_str)
            .transpose()?,
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_round_trip_and_sort() {
        let a = Utc.with_ymd_and_hms(2024, 7, 11, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1500);
        assert_eq!(dt_from_str(dt_to_str(a)).unwrap(), a);
        assert!(dt_to_str(a) < dt_to_str(b));
    }
}
