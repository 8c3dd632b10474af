use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::paginate::Area;
use crate::{
    Error, Result, DEFAULT_CDP_URL, DEFAULT_CONFIG_FILE, DETAILS_FILE, DETAIL_SELECTORS_FILE,
    MAX_PER_AREA, NAVIGATION_TIMEOUT, OUTPUT_DIR, RESULTS_FILE, RESULTS_SELECTORS_FILE,
    SETTLE_DELAY,
};

/// How pages are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Drive tabs of a running browser over CDP. Needed for pages rendered by JavaScript.
    Browser,
    /// Plain HTTP requests. Enough for server-rendered pages.
    Http,
}

/// Run configuration. Every field is optional in the JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrapeConfig {
    pub cdp_url: String,
    pub mode: FetchMode,
    pub output_dir: PathBuf,
    pub results_file: String,
    pub details_file: String,
    pub results_selectors: PathBuf,
    pub detail_selectors: PathBuf,
    pub max_per_area: usize,
    pub timeout_secs: u64,
    pub settle_ms: u64,
    pub areas: Vec<Area>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            cdp_url: DEFAULT_CDP_URL.to_string(),
            mode: FetchMode::Browser,
            output_dir: PathBuf::from(OUTPUT_DIR),
            results_file: RESULTS_FILE.to_string(),
            details_file: DETAILS_FILE.to_string(),
            results_selectors: PathBuf::from(RESULTS_SELECTORS_FILE),
            detail_selectors: PathBuf::from(DETAIL_SELECTORS_FILE),
            max_per_area: MAX_PER_AREA,
            timeout_secs: NAVIGATION_TIMEOUT.as_secs(),
            settle_ms: SETTLE_DELAY.as_millis() as u64,
            areas: Vec::new(),
        }
    }
}

impl ScrapeConfig {
    /// Reads `path`, or `pagescrape.json` in the working directory when no path is given.
    /// Without an explicit path a missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("unable to read {}: {e}", path.display())))?;
        Self::from_json(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => Error::Config(format!("{}: {other}", path.display())),
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: ScrapeConfig = serde_json::from_str(text)?;
        for area in &config.areas {
            area.validate()?;
        }
        Ok(config)
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(&self.results_file)
    }

    pub fn details_path(&self) -> PathBuf {
        self.output_dir.join(&self.details_file)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// The areas of a results crawl; there has to be at least one.
    pub fn require_areas(&self) -> Result<&[Area]> {
        if self.areas.is_empty() {
            return Err(Error::Config(
                "no areas configured; add `areas` with `name` and `url_template` to the config".into(),
            ));
        }
        Ok(&self.areas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = ScrapeConfig::from_json("{}").unwrap();
        assert_eq!(config, ScrapeConfig::default());
        assert_eq!(config.max_per_area, 50);
        assert_eq!(config.results_path(), Path::new("csv_output/results.csv"));
        assert!(config.require_areas().is_err());
    }

    #[test]
    fn areas_keep_their_order() {
        let config = ScrapeConfig::from_json(
            r#"{
                "mode": "http",
                "max_per_area": 10,
                "areas": [
                    {"name": "London", "url_template": "https://x.test/London/{page}"},
                    {"name": "Birmingham", "url_template": "https://x.test/Birmingham/{page}"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.mode, FetchMode::Http);
        let names: Vec<_> = config.require_areas().unwrap().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["London", "Birmingham"]);
    }

    #[test]
    fn template_without_placeholder_is_config_error() {
        let err = ScrapeConfig::from_json(
            r#"{"areas": [{"name": "London", "url_template": "https://x.test/London"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ScrapeConfig::from_json(r#"{"max_per_aera": 10}"#).is_err());
    }

    #[test]
    fn explicit_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScrapeConfig::load(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
