use serde::Deserialize;
use url::Url;

use crate::dom::{Dom, PageSource};
use crate::output::ResultRow;
use crate::selectors::ResultsSelectors;
use crate::{info_time, Error, Result, START_PAGE};

/// Placeholder in an area's URL template that is replaced by the page number.
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// A named search whose result pages are reachable by page number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Area {
    pub name: String,
    pub url_template: String,
}

impl Area {
    pub fn new(name: impl Into<String>, url_template: impl Into<String>) -> Result<Self> {
        let area = Area {
            name: name.into(),
            url_template: url_template.into(),
        };
        area.validate()?;
        Ok(area)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.url_template.contains(PAGE_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "URL template for area `{}` has no {PAGE_PLACEHOLDER} placeholder",
                self.name
            )));
        }
        Ok(())
    }

    pub fn page_url(&self, page_num: usize) -> String {
        self.url_template
            .replace(PAGE_PLACEHOLDER, &page_num.to_string())
    }
}

/// Reads the (title, url) pairs on one results page. Cards without a title element or
/// with an empty link are skipped; a title element without text gives an empty title.
pub async fn parse_results_page<D: Dom>(
    page: &D,
    page_url: &str,
    selectors: &ResultsSelectors,
) -> Result<Vec<(String, String)>> {
    let cards = page
        .card_values(&selectors.item, &[&selectors.title, &selectors.url])
        .await?;

    Ok(cards
        .into_iter()
        .filter_map(|card| {
            let mut card = card.into_iter();
            let title = card.next().flatten()?;
            let href = card.next().flatten().filter(|h| !h.is_empty())?;
            Some((title, absolute_url(page_url, &href)))
        })
        .collect())
}

/// Resolves `href` against the page it was found on; leaves it as is when that fails.
fn absolute_url(page_url: &str, href: &str) -> String {
    Url::parse(page_url)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

/// Walks the result pages of `area` from the first page on, handing every row to `sink`.
///
/// Stops at the first page without results or once `cap` rows were collected; the
/// last page is trimmed to the remaining budget. Returns the number of rows collected.
/// A failing page aborts the walk; rows already handed to `sink` stay there.
pub async fn walk_area<S, F>(
    source: &S,
    area: &Area,
    selectors: &ResultsSelectors,
    cap: usize,
    mut sink: F,
) -> Result<usize>
where
    S: PageSource,
    F: FnMut(ResultRow) -> Result<()>,
{
    let mut collected = 0;
    let mut page_num = START_PAGE;

    while collected < cap {
        let url = area.page_url(page_num);
        let page = source.load(&url).await?;
        let items = parse_results_page(&page, &url, selectors).await;
        source.release(page).await;
        let mut items = items?;

        if items.is_empty() {
            info_time!("found EMPTY page {} for {}", page_num, area.name);
            break;
        }

        items.truncate(cap - collected);
        for (title, item_url) in items {
            sink(ResultRow {
                area: area.name.clone(),
                title,
                item_url,
                results_page_url: url.clone(),
            })?;
            collected += 1;
        }
        page_num += 1;
    }

    Ok(collected)
}
