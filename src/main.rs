use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    whakoom_scrape::logging::init().context("init logging")?;

    let cli = whakoom_scrape::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        whakoom_scrape::cli::Command::Migrate(args) => {
            whakoom_scrape::migrate::run(args).await.context("migrate")?;
        }
        whakoom_scrape::cli::Command::Lists(args) => {
            whakoom_scrape::lists::run(args).await.context("lists")?;
        }
        whakoom_scrape::cli::Command::Publications(args) => {
            whakoom_scrape::publications::run(args)
                .await
                .context("publications")?;
        }
    }

    Ok(())
}
