use std::path::Path;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;

use crate::dom::{PageSource, StaticPage};
use crate::{info_time, Error, Result, BROWSER_USER_AGENT, NAVIGATION_TIMEOUT};

/// Fetches pages with plain HTTP GET requests. Suited to server-rendered pages.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(NAVIGATION_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .default_headers(browser_headers())
            .timeout(timeout)
            .build()?;
        Ok(HttpFetcher { client })
    }

    /// Requests a page and returns the HTML body. Non-2xx responses are errors.
    pub async fn request_page_html(&self, url: &str) -> Result<String> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;

        let status = res.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("{url}: HTTP status {status}")));
        }

        res.text()
            .await
            .map_err(|e| Error::Fetch(format!("{url}: unable to read body: {e}")))
    }

    /// Parses a saved HTML file, e.g. a page stored from the browser for selector testing.
    pub fn load_file(path: impl AsRef<Path>) -> Result<StaticPage> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path)?;
        Ok(StaticPage::parse(path.display().to_string(), &body))
    }
}

impl PageSource for HttpFetcher {
    type Page = StaticPage;

    async fn load(&self, url: &str) -> Result<StaticPage> {
        info_time!("Fetching page: {}", url);
        let html = self.request_page_html(url).await?;
        Ok(StaticPage::parse(url, &html))
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Dom;
    use crate::selectors::SelectorExpr;

    #[tokio::test]
    async fn sends_browser_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/page")
            .match_header("user-agent", BROWSER_USER_AGENT)
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body><h1>Title</h1></body></html>")
            .create_async()
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher.load(&format!("{}/page", server.url())).await.unwrap();
        let h1 = SelectorExpr::parse("h1");
        assert_eq!(page.values(&[&h1]).await.unwrap(), [Some("Title".to_string())]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_fetch_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher
            .load(&format!("{}/missing", server.url()))
            .await
            .err()
            .unwrap();
        match err {
            Error::Fetch(msg) => assert!(msg.contains("404"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_fetch_error() {
        let fetcher = HttpFetcher::with_timeout(Duration::from_secs(2)).unwrap();
        let err = fetcher.request_page_html("http://127.0.0.1:1/").await.unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
    }
}
