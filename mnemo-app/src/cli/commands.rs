use crate::cli::opts::*;
use crate::config::AppConfig;

use anyhow::{anyhow, Result};
use chrono::Utc;
use mnemo_core::tags::{self, normalize_tag_name};
use mnemo_core::{
    create_card, edit_card, filter_cards, tags_of, Card, CardDraft, CardFilter, CoreError, Quality, Repository,
    SessionState, StudySession, TagId,
};
use mnemo_json::paths::{data_root, default_store_file};
use mnemo_json::JsonStore;
use mnemo_sqlite::SqliteRepo;
use std::collections::HashMap;
use std::io::{stdin, stdout, BufRead, Write};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub async fn run_cli(args: Cli, cfg: AppConfig) -> Result<()> {
    let repo = open_repo(&cfg).await?;
    match args.cmd {
        Command::Card(cmd) => card_cmd(repo, cmd).await,
        Command::Tag(cmd) => tag_cmd(repo, cmd).await,
        Command::Study => study_cmd(repo).await,
    }
}

pub async fn open_repo(cfg: &AppConfig) -> Result<Arc<dyn Repository>> {
    match cfg.store() {
        StoreKind::Json => {
            let (file, backups) = default_store_file();
            let s = JsonStore::open_with(file, backups, cfg.json_backups()).await?;
            Ok(Arc::new(s))
        }
        StoreKind::Sqlite => {
            let p = cfg.db_path.clone().unwrap_or_else(|| data_root().join("mnemo.sqlite3"));
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let s = SqliteRepo::open_file(&p).await?;
            Ok(Arc::new(s))
        }
    }
}

async fn card_cmd(repo: Arc<dyn Repository>, cmd: CardCmd) -> Result<()> {
    match cmd {
        CardCmd::Add(a) => {
            let mut draft = CardDraft::new(a.front, a.back).with_tags(a.tags);
            if let Some(p) = a.image {
                draft = draft.with_image(std::fs::read(&p)?);
            }
            let c = create_card(&*repo, draft, Utc::now()).await?;
            println!("{}", c.id);
        }
        CardCmd::List(l) => {
            let now = Utc::now();
            let mut filter = if l.due { CardFilter::due() } else { CardFilter::default() };
            if let Some(q) = l.query {
                filter = filter.with_query(q);
            }
            if let Some(name) = l.tag {
                match repo.find_tag_by_name(&normalize_tag_name(&name)?).await? {
                    Some(t) => filter = filter.with_tag(t.id),
                    // An unknown tag matches nothing.
                    None => return Ok(()),
                }
            }

            let names = tag_names(&*repo).await?;
            let cards = repo.list_cards().await?;
            for c in filter_cards(&cards, &filter, now) {
                print_card(&c, &names);
            }
        }
        CardCmd::Edit(e) => {
            let id = parse_uuid(&e.card_id)?;
            let card = repo.get_card(id).await?;

            let image = if e.clear_image {
                Some(None)
            } else if let Some(p) = e.image {
                Some(Some(std::fs::read(&p)?))
            } else {
                None
            };

            let tag_names = if !e.add_tags.is_empty() || !e.rm_tags.is_empty() {
                let mut names: Vec<String> = tags_of(&*repo, &card).await?.into_iter().map(|t| t.name).collect();
                for t in &e.add_tags {
                    let n = normalize_tag_name(t)?;
                    if !names.contains(&n) {
                        names.push(n);
                    }
                }
                for t in &e.rm_tags {
                    let n = normalize_tag_name(t)?;
                    names.retain(|x| *x != n);
                }
                Some(names)
            } else {
                None
            };

            let out = edit_card(
                &*repo,
                id,
                mnemo_core::CardEdit {
                    front: e.front,
                    back: e.back,
                    image,
                    tag_names,
                },
            )
            .await?;
            println!("ok");
            report_orphans(out.reconciliation.removed.len(), out.reconciliation.pending.len());
        }
        CardCmd::Rm { card_id } => {
            let id = parse_uuid(&card_id)?;
            let card = repo.get_card(id).await?;
            let held: HashMap<TagId, String> =
                tags_of(&*repo, &card).await?.into_iter().map(|t| (t.id, t.name)).collect();

            let deletion = tags::delete_card(&*repo, id).await?;
            println!("ok");
            for t in &deletion.removed_tags {
                if let Some(name) = held.get(t) {
                    println!("removed tag {name}");
                }
            }
            report_orphans(0, deletion.pending_tags.len());
        }
    }
    Ok(())
}

async fn tag_cmd(repo: Arc<dyn Repository>, cmd: TagCmd) -> Result<()> {
    match cmd {
        TagCmd::List => {
            for t in repo.list_tags().await? {
                let n = repo.tag_ref_count(t.id).await?;
                println!("{}\t{}\tcards={}", t.id, t.name, n);
            }
        }
        TagCmd::Sweep => {
            let rec = tags::sweep_orphans(&*repo).await?;
            println!("removed {} orphaned tag(s)", rec.removed.len());
            report_orphans(0, rec.pending.len());
        }
    }
    Ok(())
}

async fn study_cmd(repo: Arc<dyn Repository>) -> Result<()> {
    study_loop(StudySession::new(repo), &mut stdin().lock(), &mut stdout()).await
}

/// Drives one study session from line-based input until the user quits or input ends.
async fn study_loop<R, I, O>(mut session: StudySession<R>, input: &mut I, out: &mut O) -> Result<()>
where
    R: Repository + ?Sized,
    I: BufRead,
    O: Write,
{
    loop {
        match session.state() {
            SessionState::NotStarted => {
                session.start(Utc::now()).await?;
            }
            SessionState::Completed => {
                let p = session.progress();
                if p.total == 0 {
                    writeln!(out, "no cards due")?;
                } else {
                    writeln!(out, "\nsession complete: rated {} of {}", session.rated_count(), p.total)?;
                }
                match read_line(input, out, "[r=restart, q=quit]> ")?.as_deref().map(str::trim) {
                    Some("r") => {
                        session.restart(Utc::now()).await?;
                    }
                    _ => return Ok(()),
                }
            }
            SessionState::InProgress { answer_shown: false } => {
                let card = current(&session)?;
                let p = session.progress();
                writeln!(out, "\n[{}/{}] {}", p.current_index + 1, p.total, card.id)?;
                writeln!(out, "Q: {}", card.front)?;
                match read_line(input, out, "[enter=show, s=skip, q=quit]> ")?.as_deref().map(str::trim) {
                    None | Some("q") => return Ok(()),
                    Some("") => session.reveal()?,
                    Some("s") => session.skip()?,
                    Some(_) => writeln!(out, "press enter, s, or q")?,
                }
            }
            SessionState::InProgress { answer_shown: true } => {
                let card = current(&session)?;
                writeln!(out, "A: {}", card.back)?;
                if let Some(img) = &card.image {
                    writeln!(out, "(image, {} bytes)", img.len())?;
                }
                let scale: Vec<String> = Quality::all().map(|q| q.to_string()).collect();
                writeln!(out, "[{}]", scale.join(", "))?;
                let line = match read_line(input, out, "quality (s=skip, q=quit)> ")? {
                    Some(l) => l,
                    None => return Ok(()),
                };
                match line.trim() {
                    "q" => return Ok(()),
                    "s" => session.skip()?,
                    "" => {
                        session.toggle_answer()?;
                    }
                    other => {
                        let Ok(q) = other.parse::<i32>() else {
                            writeln!(out, "enter 0-5, s, or q")?;
                            continue;
                        };
                        match session.rate(q, Utc::now()).await {
                            Ok(saved) => writeln!(out, "-> next due in {} day(s)", saved.interval_days)?,
                            Err(e) if e.is_input_error() => writeln!(out, "{e}")?,
                            Err(CoreError::NotFound(_)) => writeln!(out, "card was deleted; press s to skip it")?,
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
            }
        }
    }
}

// ===== Helpers =====
fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|_| anyhow!("invalid uuid"))
}

fn current<R: Repository + ?Sized>(session: &StudySession<R>) -> Result<Card> {
    session.current_card().cloned().ok_or_else(|| anyhow!("no current card"))
}

async fn tag_names<R: Repository + ?Sized>(repo: &R) -> Result<HashMap<TagId, String>> {
    Ok(repo.list_tags().await?.into_iter().map(|t| (t.id, t.name)).collect())
}

fn print_card(c: &Card, names: &HashMap<TagId, String>) {
    let tags: Vec<&str> = c.tags.iter().filter_map(|t| names.get(t).map(String::as_str)).collect();
    let tags = if tags.is_empty() { "-".to_string() } else { tags.join(";") };
    println!(
        "{}\t{}\t{}\tdue={}\treps={}\tef={:.2}\ttags={}",
        c.id,
        c.front,
        c.back,
        c.due_at.format("%Y-%m-%d %H:%M"),
        c.reps,
        c.ef,
        tags
    );
}

fn report_orphans(removed: usize, pending: usize) {
    debug!(removed, pending, "tag reconciliation");
    if pending > 0 {
        eprintln!("{pending} orphaned tag(s) could not be removed; run `mnemo tag sweep` later");
    }
}

/// `None` on end of input.
fn read_line<I: BufRead, O: Write>(input: &mut I, out: &mut O, prompt: &str) -> Result<Option<String>> {
    write!(out, "{prompt}")?;
    out.flush().ok();
    let mut s = String::new();
    if input.read_line(&mut s)? == 0 {
        return Ok(None);
    }
    Ok(Some(s))
}
