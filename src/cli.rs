use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply pending schema migrations.
    Migrate(MigrateArgs),
    /// Discover a user's curated lists and register them for scraping.
    Lists(ListsArgs),
    /// Scrape registered lists: volumes, parent titles, memberships.
    Publications(PublicationsArgs),
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// SQLite database path.
    #[arg(long, default_value = "databases/publications.db")]
    pub db: String,

    /// Directory holding versioned migration files (`NNN_name.sql`).
    #[arg(long, default_value = "migrations")]
    pub dir: String,
}

#[derive(Debug, Args)]
pub struct ListsArgs {
    /// SQLite database path.
    #[arg(long, default_value = "databases/publications.db")]
    pub db: String,

    /// Profile lists page URL, e.g. `https://www.whakoom.com/deirdre/lists`.
    #[arg(long)]
    pub url: String,
}

#[derive(Debug, Args)]
pub struct PublicationsArgs {
    /// SQLite database path.
    #[arg(long, default_value = "databases/publications.db")]
    pub db: String,

    /// Re-scrape every registered list, not just the pending ones.
    #[arg(long)]
    pub all: bool,
}
