//! Pages rendered by a browser that is already running with remote debugging enabled
//! (e.g. `chrome --remote-debugging-port=9222`).
//!
//! The browser belongs to the user. A [`BrowserSession`] only attaches to it, and a
//! [`BrowserFetcher`] only opens and closes its own tabs.

use std::time::Duration;

use chromiumoxide::{Browser, Handler, Page};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::dom::{finish_value, Dom, PageSource};
use crate::selectors::{Dialect, SelectorExpr};
use crate::{error_time, info_time, Error, Result, NAVIGATION_TIMEOUT, SETTLE_DELAY};

/// Quiet period without new network requests after which a page counts as idle.
const NETWORK_IDLE_MS: u64 = 500;
/// Upper bound for the in-page idle poll; stays below the CDP request timeout.
const NETWORK_IDLE_MAX_WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: String,
}

#[derive(Debug, Deserialize)]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
}

/// A CDP connection to an externally managed browser.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl BrowserSession {
    /// Attaches to the browser listening at `endpoint` (e.g. `http://localhost:9222`).
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/');
        info_time!("Connecting to browser at {}...", endpoint);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let version: VersionInfo = client
            .get(format!("{endpoint}/json/version"))
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| Error::Connection(not_reachable(endpoint, e)))?
            .json()
            .await
            .map_err(|e| Error::Connection(format!("unexpected /json/version reply: {e}")))?;

        let targets: Vec<TargetInfo> = client
            .get(format!("{endpoint}/json/list"))
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| Error::Connection(not_reachable(endpoint, e)))?
            .json()
            .await
            .map_err(|e| Error::Connection(format!("unexpected /json/list reply: {e}")))?;
        if !targets.iter().any(|t| t.kind == "page") {
            return Err(Error::Connection(
                "No browser contexts available. Please ensure browser is running.".into(),
            ));
        }

        let (browser, handler) = Browser::connect(version.ws_url)
            .await
            .map_err(|e| Error::Connection(format!("CDP connect failed: {e}")))?;
        let handler_task = spawn_handler_task(handler);

        Ok(BrowserSession {
            browser,
            handler_task,
        })
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }
}

impl Drop for BrowserSession {
    /// Drops the connection only. The browser and the user's tabs stay open.
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

fn not_reachable(endpoint: &str, e: reqwest::Error) -> String {
    format!("Is it running with --remote-debugging-port? {endpoint}: {e}")
}

fn spawn_handler_task(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                error_time!("browser connection event: {}", e);
            }
        }
    })
}

/// Opens a fresh tab per page load in a borrowed [`BrowserSession`].
pub struct BrowserFetcher<'a> {
    session: &'a BrowserSession,
    timeout: Duration,
    settle: Duration,
}

impl<'a> BrowserFetcher<'a> {
    pub fn new(session: &'a BrowserSession) -> Self {
        Self::with_timings(session, NAVIGATION_TIMEOUT, SETTLE_DELAY)
    }

    pub fn with_timings(session: &'a BrowserSession, timeout: Duration, settle: Duration) -> Self {
        BrowserFetcher {
            session,
            timeout,
            settle,
        }
    }

    async fn navigate(&self, page: &Page, url: &str) -> Result<()> {
        match tokio::time::timeout(self.timeout, page.goto(url)).await {
            Ok(res) => {
                res?;
            }
            Err(_) => {
                return Err(Error::Fetch(format!(
                    "{url}: navigation timed out after {} ms",
                    self.timeout.as_millis()
                )))
            }
        }

        wait_for_network_idle(page, self.timeout.min(NETWORK_IDLE_MAX_WAIT)).await?;
        info_time!("Waiting for content to load...");
        tokio::time::sleep(self.settle).await;
        Ok(())
    }
}

impl PageSource for BrowserFetcher<'_> {
    type Page = BrowserTab;

    async fn load(&self, url: &str) -> Result<BrowserTab> {
        info_time!("Loading page: {}", url);
        let page = self
            .session
            .browser
            .new_page("about:blank")
            .await?;

        if let Err(e) = self.navigate(&page, url).await {
            close_tab(page).await;
            return Err(e);
        }
        Ok(BrowserTab { page })
    }

    async fn release(&self, tab: BrowserTab) {
        close_tab(tab.page).await;
    }
}

async fn close_tab(page: Page) {
    if let Err(e) = page.close().await {
        error_time!("unable to close tab: {}", e);
    }
}

/// Polls the resource timing buffer until no new requests were made for
/// `NETWORK_IDLE_MS`, or `timeout` runs out.
async fn wait_for_network_idle(page: &Page, timeout: Duration) -> Result<()> {
    let js = format!(
        r#"(async () => {{
            const timeoutMs = {timeout_ms};
            const idleMs = {idle_ms};
            const interval = 100;
            const start = Date.now();
            const count = () => {{
                try {{ return performance.getEntriesByType('resource').length; }} catch (_) {{ return 0; }}
            }};
            let last = count();
            let stable = 0;
            while (Date.now() - start < timeoutMs) {{
                await new Promise(r => setTimeout(r, interval));
                const cur = count();
                if (document.readyState === 'complete' && cur === last) {{
                    stable += interval;
                    if (stable >= idleMs) return true;
                }} else {{
                    stable = 0;
                }}
                last = cur;
            }}
            return false;
        }})()"#,
        timeout_ms = timeout.as_millis(),
        idle_ms = NETWORK_IDLE_MS,
    );

    let idle: bool = page.evaluate(js).await?.into_value()?;
    if !idle {
        return Err(Error::Fetch(format!(
            "network did not go idle within {} ms",
            timeout.as_millis()
        )));
    }
    Ok(())
}

/// A browser tab holding a loaded page. Hand it back to [`BrowserFetcher::release`].
pub struct BrowserTab {
    page: Page,
}

impl BrowserTab {
    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn query(
        &self,
        card: Option<&SelectorExpr>,
        fields: &[&SelectorExpr],
    ) -> Result<Vec<Vec<Option<String>>>> {
        let reply: QueryReply = self
            .page
            .evaluate(query_script(card, fields))
            .await?
            .into_value()?;

        Ok(reply
            .into_rows()?
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(fields)
                    .map(|(value, expr)| finish_value(value, expr))
                    .collect()
            })
            .collect())
    }
}

impl Dom for BrowserTab {
    async fn values(&self, fields: &[&SelectorExpr]) -> Result<Vec<Option<String>>> {
        let mut rows = self.query(None, fields).await?;
        Ok(rows.pop().unwrap_or_else(|| vec![None; fields.len()]))
    }

    async fn card_values(
        &self,
        card: &SelectorExpr,
        fields: &[&SelectorExpr],
    ) -> Result<Vec<Vec<Option<String>>>> {
        self.query(Some(card), fields).await
    }
}

/// What the in-page query hands back: the rows, or the message of the selector that threw.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryReply {
    #[serde(default)]
    rows: Vec<Vec<Option<String>>>,
    selector_error: Option<String>,
}

impl QueryReply {
    fn into_rows(self) -> Result<Vec<Vec<Option<String>>>> {
        match self.selector_error {
            Some(msg) => Err(Error::Config(format!("invalid selector: {msg}"))),
            None => Ok(self.rows),
        }
    }
}

fn selector_json(expr: &SelectorExpr, in_card: bool) -> serde_json::Value {
    let query = if in_card {
        expr.scoped_query()
    } else {
        expr.query.as_str().into()
    };
    json!({
        "xpath": expr.dialect == Dialect::XPath,
        "query": query,
        "attribute": expr.attribute,
    })
}

/// Builds the in-page query. Selectors travel as JSON so no quoting is needed.
/// A selector the page cannot parse comes back as `selectorError`.
fn query_script(card: Option<&SelectorExpr>, fields: &[&SelectorExpr]) -> String {
    let spec = json!({
        "card": card.map(|c| selector_json(c, false)),
        "fields": fields
            .iter()
            .map(|f| selector_json(f, card.is_some()))
            .collect::<Vec<_>>(),
    });

    format!(
        r#"(() => {{
            const spec = {spec};
            const first = (scope, s) => {{
                if (s.xpath) {{
                    return document.evaluate(s.query, scope, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
                }}
                return scope.querySelector(s.query);
            }};
            const all = (s) => {{
                if (s.xpath) {{
                    const snap = document.evaluate(s.query, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                    const out = [];
                    for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
                    return out;
                }}
                return Array.from(document.querySelectorAll(s.query));
            }};
            const value = (node, s) => {{
                if (!node) return null;
                if (s.attribute) return node.getAttribute ? node.getAttribute(s.attribute) : null;
                return node.textContent;
            }};
            const pick = (scope) => spec.fields.map(s => value(first(scope, s), s));
            try {{
                if (spec.card) return {{ rows: all(spec.card).map(pick) }};
                return {{ rows: [pick(document)] }};
            }} catch (e) {{
                return {{ selectorError: String(e && e.message ? e.message : e) }};
            }}
        }})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_script_embeds_selectors_as_json() {
        let card = SelectorExpr::parse(".sr");
        let title = SelectorExpr::parse(r#"a[title="x"]"#);
        let href = SelectorExpr::parse(".//header/a/@href");
        let script = query_script(Some(&card), &[&title, &href]);
        assert!(script.contains(r#""query":".sr""#), "{script}");
        assert!(script.contains(r#""query":"a[title=\"x\"]""#), "{script}");
        assert!(script.contains(r#""attribute":"href""#), "{script}");
        assert!(script.contains(r#""xpath":true"#), "{script}");
    }

    #[test]
    fn root_xpath_fields_stay_inside_the_card() {
        let card = SelectorExpr::parse("//div[@class='sr']");
        let title = SelectorExpr::parse("//header/a");
        let script = query_script(Some(&card), &[&title]);
        assert!(script.contains(r#""query":"//div[@class='sr']""#), "{script}");
        assert!(script.contains(r#""query":".//header/a""#), "{script}");

        let page_level = query_script(None, &[&title]);
        assert!(page_level.contains(r#""query":"//header/a""#), "{page_level}");
    }

    #[test]
    fn selector_error_reply_is_config_error() {
        let reply: QueryReply = serde_json::from_str(
            r#"{"selectorError": "Failed to execute 'querySelector' on 'Element': 'div[[' is not a valid selector."}"#,
        )
        .unwrap();
        let err = reply.into_rows().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.is_fatal());

        let reply: QueryReply = serde_json::from_str(r#"{"rows": [["a", null]]}"#).unwrap();
        assert_eq!(reply.into_rows().unwrap(), [[Some("a".to_string()), None]]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connection_error() {
        let err = BrowserSession::connect("http://127.0.0.1:1").await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)), "{err}");
    }

    #[tokio::test]
    async fn endpoint_without_pages_is_connection_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/json/version")
            .with_status(200)
            .with_body(r#"{"webSocketDebuggerUrl": "ws://127.0.0.1:1/devtools/browser/x"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/json/list")
            .with_status(200)
            .with_body(r#"[{"type": "service_worker"}]"#)
            .create_async()
            .await;

        let err = BrowserSession::connect(&server.url()).await.err().unwrap();
        match err {
            Error::Connection(msg) => assert!(msg.contains("No browser contexts"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
