use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use url::Url;

use crate::browser::{BrowserFetcher, BrowserSession, BrowserTab};
use crate::config::{FetchMode, ScrapeConfig};
use crate::dom::{Dom, PageSource, StaticPage};
use crate::extract::{extract_fields, extract_required, Fields};
use crate::output::{details_header, read_results, CsvAppender, DetailRow, ResultRow, RESULTS_HEADER};
use crate::paginate::{walk_area, Area};
use crate::request::HttpFetcher;
use crate::selectors::{
    load_field_selectors, load_results_selectors, load_selectors, ResultsSelectors, SelectorExpr, SelectorMap,
};
use crate::{error_time, info_time, Error, Result};

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsSummary {
    pub per_area: Vec<(String, usize)>,
    pub failed_areas: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailsSummary {
    pub appended: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// The fetcher picked by [`FetchMode`]. Browser mode borrows a session from [`connect`].
pub enum Fetcher<'a> {
    Http(HttpFetcher),
    Browser(BrowserFetcher<'a>),
}

pub enum FetchedPage {
    Static(StaticPage),
    Tab(BrowserTab),
}

/// Attaches to the configured browser when the run needs one.
pub async fn connect(config: &ScrapeConfig) -> Result<Option<BrowserSession>> {
    match config.mode {
        FetchMode::Http => Ok(None),
        FetchMode::Browser => BrowserSession::connect(&config.cdp_url).await.map(Some),
    }
}

/// Browser fetcher on `session` when there is one, plain HTTP otherwise.
pub fn fetcher<'a>(config: &ScrapeConfig, session: Option<&'a BrowserSession>) -> Result<Fetcher<'a>> {
    Ok(match session {
        Some(session) => Fetcher::Browser(BrowserFetcher::with_timings(
            session,
            config.timeout(),
            config.settle_delay(),
        )),
        None => Fetcher::Http(HttpFetcher::with_timeout(config.timeout())?),
    })
}

impl PageSource for Fetcher<'_> {
    type Page = FetchedPage;

    async fn load(&self, url: &str) -> Result<FetchedPage> {
        match self {
            Fetcher::Http(http) => http.load(url).await.map(FetchedPage::Static),
            Fetcher::Browser(browser) => browser.load(url).await.map(FetchedPage::Tab),
        }
    }

    async fn release(&self, page: FetchedPage) {
        match (self, page) {
            (Fetcher::Http(http), FetchedPage::Static(page)) => http.release(page).await,
            (Fetcher::Browser(browser), FetchedPage::Tab(tab)) => browser.release(tab).await,
            _ => {}
        }
    }
}

impl Dom for FetchedPage {
    async fn values(&self, fields: &[&SelectorExpr]) -> Result<Vec<Option<String>>> {
        match self {
            FetchedPage::Static(page) => page.values(fields).await,
            FetchedPage::Tab(tab) => tab.values(fields).await,
        }
    }

    async fn card_values(
        &self,
        card: &SelectorExpr,
        fields: &[&SelectorExpr],
    ) -> Result<Vec<Vec<Option<String>>>> {
        match self {
            FetchedPage::Static(page) => page.card_values(card, fields).await,
            FetchedPage::Tab(tab) => tab.card_values(card, fields).await,
        }
    }
}

/// Walks every area in order and appends its result rows to `out`.
/// A failing area is reported and the next one runs; fatal errors end the crawl.
pub async fn crawl_results<S: PageSource>(
    source: &S,
    areas: &[Area],
    selectors: &ResultsSelectors,
    cap: usize,
    out: &mut CsvAppender,
) -> Result<ResultsSummary> {
    let mut summary = ResultsSummary::default();

    for area in areas {
        info_time!("Scraping area: {}", area.name);
        let start_time = Local::now();
        match walk_area(source, area, selectors, cap, |row| out.append(&row)).await {
            Ok(count) => {
                info_time!(start_time, "Collected {} items for {}", count, area.name);
                summary.per_area.push((area.name.clone(), count));
                summary.total += count;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error_time!("area {} aborted: {}", area.name, e);
                summary.failed_areas.push(area.name.clone());
            }
        }
    }

    Ok(summary)
}

/// Visits every not yet scraped item of `results` and appends its fields to `out`.
///
/// Items whose URL already appears in `out` are skipped, so an interrupted crawl can
/// simply be started again. A failing item is reported and the next one runs.
pub async fn crawl_details<S: PageSource>(
    source: &S,
    results: &[ResultRow],
    selectors: &SelectorMap,
    out: &mut CsvAppender,
) -> Result<DetailsSummary> {
    let mut done: HashSet<String> = out.done_set("item_url")?;
    let mut summary = DetailsSummary::default();

    for row in results {
        let url = row.item_url.trim();
        if url.is_empty() || done.contains(url) {
            summary.skipped += 1;
            continue;
        }

        info_time!("Scraping details: {}", url);
        match scrape_detail(source, url, selectors).await {
            Ok(fields) => {
                out.append(&DetailRow {
                    area: row.area.clone(),
                    item_url: url.to_string(),
                    fields,
                })?;
                done.insert(url.to_string());
                summary.appended += 1;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error_time!("{} skipped: {}", url, e);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

async fn scrape_detail<S: PageSource>(source: &S, url: &str, selectors: &SelectorMap) -> Result<Fields> {
    let page = source.load(url).await?;
    let fields = extract_fields(&page, selectors).await;
    source.release(page).await;
    fields
}

/// Loads `url` and returns the text of its first `<p>`, a quick check that scraping works.
pub async fn probe_page<S: PageSource>(source: &S, url: &str) -> Result<String> {
    let page = source.load(url).await?;
    info_time!("Searching for first <p> element...");
    let text = extract_required(&page, "p", &SelectorExpr::parse("p")).await;
    source.release(page).await;

    let text = text?;
    info_time!("Found <p> element with text: {}", preview(&text, 100));
    Ok(text)
}

/// Results crawl: every configured area, up to `max_per_area` items each.
pub async fn run_results(config: &ScrapeConfig) -> Result<ResultsSummary> {
    let selectors = load_results_selectors(&config.results_selectors)?;
    let areas = config.require_areas()?;
    let mut out = CsvAppender::open(config.results_path(), &RESULTS_HEADER)?;

    let session = connect(config).await?;
    let fetcher = fetcher(config, session.as_ref())?;
    let summary = crawl_results(&fetcher, areas, &selectors, config.max_per_area, &mut out).await?;

    info_time!(
        "Done. Total items collected: {}. Saved to {}",
        summary.total,
        out.path().display()
    );
    Ok(summary)
}

/// Details crawl over the rows of the results file, resuming where the details file ends.
pub async fn run_details(config: &ScrapeConfig) -> Result<DetailsSummary> {
    let selectors = load_field_selectors(&config.detail_selectors)?;
    let results_path = config.results_path();
    if !results_path.exists() {
        return Err(Error::Config(format!(
            "{} not found; run the results crawl first",
            results_path.display()
        )));
    }
    let results = read_results(&results_path)?;

    let mut out = CsvAppender::open(config.details_path(), &details_header(&selectors))?;
    let unknown = out.unknown_columns(selectors.fields());
    if !unknown.is_empty() {
        error_time!(
            "{} has no columns for [{}]; those fields are not saved",
            out.path().display(),
            unknown.join(", ")
        );
    }

    let session = connect(config).await?;
    let fetcher = fetcher(config, session.as_ref())?;
    let summary = crawl_details(&fetcher, &results, &selectors, &mut out).await?;

    info_time!(
        "Done. {} appended, {} skipped, {} failed. Saved to {}",
        summary.appended,
        summary.skipped,
        summary.failed,
        out.path().display()
    );
    Ok(summary)
}

/// Probes `url` and, for plain HTTP, saves the text to a timestamped CSV in the output directory.
pub async fn run_probe(config: &ScrapeConfig, url: &str) -> Result<String> {
    let session = connect(config).await?;
    let fetcher = fetcher(config, session.as_ref())?;
    let text = probe_page(&fetcher, url).await?;
    if let Fetcher::Http(_) = fetcher {
        let path = save_probe_csv(&config.output_dir, &text)?;
        info_time!("Data saved to {}", path.display());
    }

    println!("\nExtracted content preview:\n{}", preview(&text, PREVIEW_CHARS));
    Ok(text)
}

/// Writes `<dir>/<timestamp>_test_output.csv` with a single `p` column.
pub fn save_probe_csv(dir: &Path, text: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{timestamp}_test_output.csv"));

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(["p"])?;
    writer.write_record([text])?;
    writer.flush()?;
    Ok(path)
}

/// Extracts `selectors_path` from a saved HTML file and writes the values to
/// `<output_dir>/test_details_extract.csv`.
pub async fn run_selector_test(
    config: &ScrapeConfig,
    html_file: &Path,
    selectors_path: &Path,
) -> Result<Fields> {
    let selectors = load_selectors(selectors_path)?;

    let session = connect(config).await?;
    let fields = match fetcher(config, session.as_ref())? {
        Fetcher::Http(_) => {
            let page = HttpFetcher::load_file(html_file)?;
            extract_fields(&page, &selectors).await?
        }
        browser @ Fetcher::Browser(_) => {
            let absolute = fs::canonicalize(html_file)?;
            let url = Url::from_file_path(&absolute).map_err(|_| {
                Error::Config(format!("{} is not a valid file path", absolute.display()))
            })?;
            scrape_detail(&browser, url.as_str(), &selectors).await?
        }
    };

    println!("Extracted fields:");
    for (field, value) in fields.iter() {
        println!("- {field}: {value}");
    }

    fs::create_dir_all(&config.output_dir)?;
    let path = config.output_dir.join("test_details_extract.csv");
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(fields.iter().map(|(field, _)| field))?;
    writer.write_record(fields.iter().map(|(_, value)| value))?;
    writer.flush()?;
    info_time!("Saved to {}", path.display());

    Ok(fields)
}

/// First `max` characters of `text`, with `...` when something was cut.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
