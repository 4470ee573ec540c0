use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Json,
    Sqlite,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "mnemo", version, about = "Mnemo spaced-repetition flashcards")]
pub struct Cli {
    /// Storage backend (overrides the config file; default json)
    #[arg(long, value_enum)]
    pub store: Option<StoreKind>,

    /// SQLite DB path when --store sqlite (defaults to app data dir)
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Config file (defaults to config.toml in the app config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `mnemo_core=trace`
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Card operations
    #[command(subcommand)]
    Card(CardCmd),
    /// Tag operations
    #[command(subcommand)]
    Tag(TagCmd),
    /// Study the cards that are due now
    Study,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CardCmd {
    Add(CardAdd),
    List(CardList),
    Edit(CardEdit),
    Rm { card_id: String },
}

#[derive(Debug, Args, Clone)]
pub struct CardAdd {
    #[arg(long)]
    pub front: String,
    #[arg(long)]
    pub back: String,
    /// Image file stored with the card
    #[arg(long)]
    pub image: Option<PathBuf>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CardList {
    /// Only cards due now
    #[arg(long)]
    pub due: bool,
    #[arg(long)]
    pub tag: Option<String>,
    /// Case-insensitive match on front or back
    #[arg(long)]
    pub query: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CardEdit {
    pub card_id: String,
    #[arg(long)]
    pub front: Option<String>,
    #[arg(long)]
    pub back: Option<String>,
    #[arg(long, conflicts_with = "clear_image")]
    pub image: Option<PathBuf>,
    #[arg(long)]
    pub clear_image: bool,
    #[arg(long = "add-tag")]
    pub add_tags: Vec<String>,
    #[arg(long = "rm-tag")]
    pub rm_tags: Vec<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum TagCmd {
    /// Tags with the number of cards holding them
    List,
    /// Delete tags no card holds any more
    Sweep,
}
