//! PAGE SCRAPER
//! Listing pages → item URLs → detail fields, appended to CSV files.
//! Pages come either from plain HTTP requests or from tabs of a browser that is
//! already running with remote debugging enabled.

use std::time::Duration;

pub mod browser;
pub mod config;
pub mod dom;
mod error;
pub mod extract;
mod macros;
pub mod output;
pub mod paginate;
pub mod process;
pub mod request;
pub mod selectors;

pub use error::{Error, Result};

pub const START_PAGE: usize = 1;
/// Default item budget per area of a results crawl.
pub const MAX_PER_AREA: usize = 50;
pub const DEFAULT_CDP_URL: &str = "http://localhost:9222";
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Extra wait after the network went idle, for late scripts.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

pub const DEFAULT_CONFIG_FILE: &str = "pagescrape.json";
pub const OUTPUT_DIR: &str = "csv_output";
pub const RESULTS_FILE: &str = "results.csv";
pub const DETAILS_FILE: &str = "details.csv";
pub const RESULTS_SELECTORS_FILE: &str = "results_fields.json";
pub const DETAIL_SELECTORS_FILE: &str = "detail_fields.txt";

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";
