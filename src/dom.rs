//! The two seams every fetcher plugs into: a queryable page ([`Dom`]) and
//! something that produces pages for URLs ([`PageSource`]).
#![allow(async_fn_in_trait)]

use scraper::{ElementRef, Html, Selector};
use sxd_document::Package;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value, XPath};

use crate::selectors::{Dialect, SelectorExpr};
use crate::{Error, Result};

/// A loaded page that can be queried with selectors.
///
/// A selector that matches nothing yields `None`; only unusable selectors or a
/// broken page connection are errors.
pub trait Dom {
    /// First match of every selector in `fields`, searched in the whole document.
    async fn values(&self, fields: &[&SelectorExpr]) -> Result<Vec<Option<String>>>;

    /// For each element matching `card`, the first match of every selector in `fields` inside it.
    async fn card_values(
        &self,
        card: &SelectorExpr,
        fields: &[&SelectorExpr],
    ) -> Result<Vec<Vec<Option<String>>>>;
}

/// Produces pages for URLs. `release` must be called for every page `load` returned.
pub trait PageSource {
    type Page: Dom;

    async fn load(&self, url: &str) -> Result<Self::Page>;

    async fn release(&self, _page: Self::Page) {}
}

/// Collapses whitespace runs to single spaces and trims the ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Turns a raw match into the stored value: normalized text, or a trimmed attribute.
pub(crate) fn finish_value(raw: Option<String>, expr: &SelectorExpr) -> Option<String> {
    let raw = raw?;
    Some(match expr.attribute {
        Some(_) => raw.trim().to_string(),
        None => normalize_text(&raw),
    })
}

/// A parsed HTML document, from an HTTP response or a file on disk.
///
/// CSS runs on the `scraper` tree. XPath runs on a second tree built from the same
/// body with `sxd_html`, only when an XPath selector is used.
pub struct StaticPage {
    url: String,
    body: String,
    html: Html,
}

impl StaticPage {
    pub fn parse(url: impl Into<String>, body: &str) -> Self {
        StaticPage {
            url: url.into(),
            body: body.to_string(),
            html: Html::parse_document(body),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    fn xpath_tree(&self) -> Package {
        sxd_html::parse_html(&self.body)
    }
}

impl Dom for StaticPage {
    async fn values(&self, fields: &[&SelectorExpr]) -> Result<Vec<Option<String>>> {
        let root = self.html.root_element();
        let mut tree: Option<Package> = None;

        let mut values = Vec::with_capacity(fields.len());
        for expr in fields {
            let raw = match expr.dialect {
                Dialect::Css => css_first(root, expr, &create_selector(expr)?),
                Dialect::XPath => {
                    let xpath = create_xpath(expr, &expr.query)?;
                    let document = tree.get_or_insert_with(|| self.xpath_tree()).as_document();
                    xpath_first(&Context::new(), document.root().into(), expr, &xpath)?
                }
            };
            values.push(finish_value(raw, expr));
        }
        Ok(values)
    }

    async fn card_values(
        &self,
        card: &SelectorExpr,
        fields: &[&SelectorExpr],
    ) -> Result<Vec<Vec<Option<String>>>> {
        if let Some(other) = fields.iter().find(|f| f.dialect != card.dialect) {
            return Err(Error::Config(format!(
                "`{}` and card selector `{}` must both be CSS or both be XPath",
                other.query, card.query
            )));
        }

        match card.dialect {
            Dialect::Css => {
                let card_selector = create_selector(card)?;
                let compiled = fields
                    .iter()
                    .map(|expr| create_selector(expr))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self
                    .html
                    .select(&card_selector)
                    .map(|card| {
                        fields
                            .iter()
                            .zip(&compiled)
                            .map(|(expr, selector)| finish_value(css_first(card, expr, selector), expr))
                            .collect()
                    })
                    .collect())
            }
            Dialect::XPath => {
                let card_xpath = create_xpath(card, &card.query)?;
                let compiled = fields
                    .iter()
                    .map(|expr| create_xpath(expr, &expr.scoped_query()))
                    .collect::<Result<Vec<_>>>()?;

                let tree = self.xpath_tree();
                let document = tree.as_document();
                let context = Context::new();
                let cards = match card_xpath.evaluate(&context, document.root()) {
                    Ok(Value::Nodeset(nodes)) => nodes.document_order(),
                    Ok(_) => {
                        return Err(Error::Config(format!(
                            "card selector `{}` does not select elements",
                            card.query
                        )))
                    }
                    Err(e) => return Err(xpath_failed(card, e)),
                };

                let mut rows = Vec::with_capacity(cards.len());
                for node in cards {
                    let mut row = Vec::with_capacity(fields.len());
                    for (expr, xpath) in fields.iter().zip(&compiled) {
                        row.push(finish_value(xpath_first(&context, node, expr, xpath)?, expr));
                    }
                    rows.push(row);
                }
                Ok(rows)
            }
        }
    }
}

fn css_first(scope: ElementRef<'_>, expr: &SelectorExpr, selector: &Selector) -> Option<String> {
    scope.select(selector).next().and_then(|el| match &expr.attribute {
        Some(attr) => el.value().attr(attr).map(str::to_string),
        None => Some(el.text().collect::<String>()),
    })
}

fn xpath_first<'d>(
    context: &Context<'d>,
    scope: Node<'d>,
    expr: &SelectorExpr,
    xpath: &XPath,
) -> Result<Option<String>> {
    let value = xpath
        .evaluate(context, scope)
        .map_err(|e| xpath_failed(expr, e))?;

    Ok(match value {
        Value::Nodeset(nodes) => nodes
            .document_order_first()
            .and_then(|node| match (&expr.attribute, node) {
                (Some(attr), Node::Element(el)) => el.attribute_value(attr.as_str()).map(str::to_string),
                (Some(_), _) => None,
                (None, node) => Some(node.string_value()),
            }),
        Value::String(text) => Some(text),
        Value::Number(n) => Some(n.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
    })
}

fn xpath_failed(expr: &SelectorExpr, e: impl std::fmt::Debug) -> Error {
    Error::Config(format!("XPath selector `{}` failed: {e:?}", expr.query))
}

#[inline]
fn create_selector(expr: &SelectorExpr) -> Result<Selector> {
    Selector::parse(&expr.query)
        .map_err(|_| Error::Config(format!("invalid CSS selector `{}`", expr.query)))
}

fn create_xpath(expr: &SelectorExpr, query: &str) -> Result<XPath> {
    Factory::new()
        .build(query)
        .map_err(|e| Error::Config(format!("invalid XPath selector `{}`: {e:?}", expr.query)))?
        .ok_or_else(|| Error::Config(format!("empty XPath selector `{}`", expr.query)))
}
