use crate::dom::Dom;
use crate::selectors::{SelectorExpr, SelectorMap};
use crate::{Error, Result};

/// Extracted values in `SelectorMap` order. A selector that matched nothing gives `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    values: Vec<(String, String)>,
}

impl Fields {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Runs every selector of `selectors` against `dom`. Misses are data, not errors.
pub async fn extract_fields<D: Dom>(dom: &D, selectors: &SelectorMap) -> Result<Fields> {
    let exprs: Vec<&SelectorExpr> = selectors.iter().map(|(_, expr)| expr).collect();
    let found = dom.values(&exprs).await?;

    let values = selectors
        .fields()
        .zip(found)
        .map(|(field, value)| (field.to_string(), value.unwrap_or_default()))
        .collect();
    Ok(Fields { values })
}

/// Like [`extract_fields`] for a single field, but a miss or an empty value is an error.
pub async fn extract_required<D: Dom>(dom: &D, field: &str, selector: &SelectorExpr) -> Result<String> {
    let value = dom.values(&[selector]).await?.pop().flatten();
    match value {
        None => Err(Error::Extraction {
            field: field.to_string(),
            reason: format!("unable to locate `{}` on the page", selector.query),
        }),
        Some(v) if v.is_empty() => Err(Error::Extraction {
            field: field.to_string(),
            reason: format!("found `{}` but it contains no text", selector.query),
        }),
        Some(v) => Ok(v),
    }
}
