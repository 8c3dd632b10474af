//! Field selector definitions.
//!
//! Two on-disk formats are understood:
//! - flat text, one `field: selector` per line (`#` comments and blank lines ignored),
//! - a JSON object of `"field": "selector"` pairs.
//!
//! A selector is CSS unless it looks like XPath (leading `/`, `./`, `..` or `(`).
//! A trailing `@name` reads the attribute `name` instead of the element text,
//! e.g. `header a@href` or `//header/a/@href`.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::{Error, Result};

/// Keys every results-page selector file has to define.
pub const RESULTS_REQUIRED_KEYS: [&str; 3] = ["item_selector", "item_title", "item_url"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Css,
    XPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorExpr {
    pub dialect: Dialect,
    pub query: String,
    pub attribute: Option<String>,
}

impl SelectorExpr {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let dialect = if raw.starts_with('/') || raw.starts_with("./") || raw.starts_with("..") || raw.starts_with('(') {
            Dialect::XPath
        } else {
            Dialect::Css
        };

        let (query, attribute) = match split_attribute(raw, dialect) {
            Some((query, attr)) => (query.to_string(), Some(attr.to_string())),
            None => (raw.to_string(), None),
        };

        SelectorExpr {
            dialect,
            query,
            attribute,
        }
    }

    /// The query to run inside a card element. XPath starting at the document root
    /// (`/…`, `//…`) is made relative to the card; anything else is returned unchanged.
    pub fn scoped_query(&self) -> Cow<'_, str> {
        match self.dialect {
            Dialect::XPath if self.query.starts_with('/') => Cow::Owned(format!(".{}", self.query)),
            _ => Cow::Borrowed(&self.query),
        }
    }

    /// Same selector, reading `attr` when no attribute was designated explicitly.
    pub fn or_attribute(mut self, attr: &str) -> Self {
        if self.attribute.is_none() {
            self.attribute = Some(attr.to_string());
        }
        self
    }
}

/// Splits `query@attr` (CSS) or `query/@attr` (XPath) into its parts.
fn split_attribute(raw: &str, dialect: Dialect) -> Option<(&str, &str)> {
    let (head, attr) = raw.rsplit_once('@')?;
    let valid_attr = !attr.is_empty()
        && attr
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'));
    if !valid_attr {
        return None;
    }

    let head = match dialect {
        Dialect::XPath => head.strip_suffix('/')?,
        Dialect::Css => head.trim_end(),
    };
    if head.is_empty() {
        return None;
    }
    Some((head, attr))
}

/// Field name → selector, kept in definition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorMap {
    entries: Vec<(String, SelectorExpr)>,
}

impl SelectorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `field`; a replaced field keeps its original position.
    pub fn insert(&mut self, field: impl Into<String>, selector: &str) {
        let field = field.into();
        let expr = SelectorExpr::parse(selector);
        match self.entries.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = expr,
            None => self.entries.push((field, expr)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&SelectorExpr> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, expr)| expr)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SelectorExpr)> {
        self.entries.iter().map(|(name, expr)| (name.as_str(), expr))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Selectors for a search results page: one card per result, title and link inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsSelectors {
    pub item: SelectorExpr,
    pub title: SelectorExpr,
    pub url: SelectorExpr,
}

impl TryFrom<&SelectorMap> for ResultsSelectors {
    type Error = Error;

    fn try_from(map: &SelectorMap) -> Result<Self> {
        let missing: Vec<&str> = RESULTS_REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| map.get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(missing_keys(missing));
        }

        let get = |key: &str| map.get(key).cloned().ok_or_else(|| missing_keys([key]));
        Ok(ResultsSelectors {
            item: get("item_selector")?,
            title: get("item_title")?,
            url: get("item_url")?.or_attribute("href"),
        })
    }
}

fn missing_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Error {
    let sorted: BTreeSet<&str> = keys.into_iter().collect();
    Error::Config(format!(
        "Missing selector keys: {}",
        sorted.into_iter().collect::<Vec<_>>().join(", ")
    ))
}

/// Parses `field: selector` lines. Splits on the first colon only, so selectors may contain colons.
pub fn parse_field_selectors(text: &str) -> SelectorMap {
    let mut map = SelectorMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((field, selector)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        map.insert(field, selector.trim());
    }
    map
}

/// Parses a JSON object of string selectors, keeping key order.
pub fn parse_json_selectors(text: &str) -> Result<SelectorMap> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(object) = value else {
        return Err(Error::Config("selector file must contain a JSON object".into()));
    };

    let mut map = SelectorMap::new();
    for (field, selector) in object {
        let Value::String(selector) = selector else {
            return Err(Error::Config(format!("selector for `{field}` must be a string")));
        };
        map.insert(field, &selector);
    }
    Ok(map)
}

/// Loads a `field: selector` text file or a JSON file, picked by extension.
pub fn load_selectors(path: impl AsRef<Path>) -> Result<SelectorMap> {
    let path = path.as_ref();
    let text = read_selector_file(path)?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let map = if is_json {
        parse_json_selectors(&text)?
    } else {
        parse_field_selectors(&text)
    };
    if map.is_empty() {
        return Err(Error::Config(format!(
            "no selectors defined in {}",
            path.display()
        )));
    }
    Ok(map)
}

/// Loads the detail page field selectors.
pub fn load_field_selectors(path: impl AsRef<Path>) -> Result<SelectorMap> {
    load_selectors(path)
}

/// Loads the results page selectors and checks the mandatory keys.
pub fn load_results_selectors(path: impl AsRef<Path>) -> Result<ResultsSelectors> {
    let path = path.as_ref();
    let text = read_selector_file(path)?;
    let map = parse_json_selectors(&text)?;
    ResultsSelectors::try_from(&map)
}

fn read_selector_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("unable to read {}: {e}", path.display())))
}
