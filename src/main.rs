use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use clap::{Parser, Subcommand};
use pagescrape::config::{FetchMode, ScrapeConfig};
use pagescrape::process::{run_details, run_probe, run_results, run_selector_test};
use pagescrape::{error_time, info_time, Result};

#[derive(Debug, Parser)]
#[command(name = "pagescrape", version, about = "Scrape listing and detail pages into CSV files")]
struct Cli {
    /// JSON run configuration. Defaults to `pagescrape.json` when present.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// How pages are fetched. `probe` and `test-selectors` default to http, crawls to the config.
    #[arg(long, value_enum, global = true)]
    mode: Option<FetchMode>,

    /// Remote debugging endpoint of the running browser.
    #[arg(long, value_name = "URL", global = true)]
    cdp_url: Option<String>,

    #[arg(long, value_name = "DIR", global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch one page and print its first <p>, to check that scraping works at all.
    Probe {
        #[arg(value_name = "URL")]
        url: String,
    },
    /// Walk the result pages of every configured area into the results CSV.
    Results,
    /// Scrape every item of the results CSV into the details CSV, skipping finished ones.
    Details,
    /// Run detail selectors against a saved HTML file.
    TestSelectors {
        #[arg(value_name = "HTML_FILE")]
        html_file: PathBuf,

        /// Selector file; defaults to the configured detail selectors.
        #[arg(short, long, value_name = "FILE")]
        selectors: Option<PathBuf>,
    },
}

impl Cli {
    fn title(&self) -> &'static str {
        match self.command {
            Command::Probe { .. } => "Probe",
            Command::Results => "Results Crawl",
            Command::Details => "Details Crawl",
            Command::TestSelectors { .. } => "Selector Test",
        }
    }

    fn resolve_config(&self) -> Result<ScrapeConfig> {
        let mut config = ScrapeConfig::load(self.config.as_deref())?;
        config.mode = match (&self.command, self.mode) {
            (_, Some(mode)) => mode,
            (Command::Probe { .. } | Command::TestSelectors { .. }, None) => FetchMode::Http,
            (_, None) => config.mode,
        };
        if let Some(cdp_url) = &self.cdp_url {
            config.cdp_url = cdp_url.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        Ok(config)
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = cli.resolve_config()?;
    match &cli.command {
        Command::Probe { url } => {
            run_probe(&config, url).await?;
        }
        Command::Results => {
            run_results(&config).await?;
        }
        Command::Details => {
            run_details(&config).await?;
        }
        Command::TestSelectors {
            html_file,
            selectors,
        } => {
            let selectors = selectors.as_ref().unwrap_or(&config.detail_selectors);
            run_selector_test(&config, html_file, selectors).await?;
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let start_time = Local::now();

    println!("{}", "=".repeat(60));
    println!("{}", cli.title());
    println!("{}", "=".repeat(60));

    match run(&cli).await {
        Ok(()) => {
            info_time!(start_time, "SUCCESS: {} completed", cli.title());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error_time!("{}", e);
            ExitCode::FAILURE
        }
    }
}
