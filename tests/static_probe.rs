use std::fs;

use pagescrape::config::{FetchMode, ScrapeConfig};
use pagescrape::process::{probe_page, run_probe, run_selector_test};
use pagescrape::request::HttpFetcher;
use pagescrape::Error;

#[tokio::test]
async fn first_paragraph_of_static_fixture() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/nursery")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body("<html><head><title>T</title></head><body><p>Hello world</p></body></html>")
        .create_async()
        .await;

    let fetcher = HttpFetcher::new().unwrap();
    let text = probe_page(&fetcher, &format!("{}/nursery", server.url()))
        .await
        .unwrap();

    assert_eq!(text, "Hello world");
    mock.assert_async().await;
}

#[tokio::test]
async fn static_probe_saves_csv() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(200)
        .with_body("<p>Hello world</p>")
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();
    let config = ScrapeConfig {
        mode: FetchMode::Http,
        output_dir: dir.path().join("csv_output"),
        ..ScrapeConfig::default()
    };

    let text = run_probe(&config, &format!("{}/", server.url())).await.unwrap();
    assert_eq!(text, "Hello world");

    let saved: Vec<_> = fs::read_dir(&config.output_dir).unwrap().collect();
    assert_eq!(saved.len(), 1);
    let content = fs::read_to_string(saved[0].as_ref().unwrap().path()).unwrap();
    assert_eq!(content, "p\nHello world\n");
}

#[tokio::test]
async fn server_error_fails_the_probe() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/").with_status(503).create_async().await;

    let fetcher = HttpFetcher::new().unwrap();
    let err = probe_page(&fetcher, &format!("{}/", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Fetch(_)), "{err}");
}

#[tokio::test]
async fn selector_test_on_saved_file() {
    let dir = tempfile::tempdir().unwrap();
    let html = dir.path().join("page.html");
    let selectors = dir.path().join("fields.txt");
    fs::write(
        &html,
        r#"<html><body><h1 class="name">Bright
             Horizons</h1><a class="web" href="https://bh.example">site</a></body></html>"#,
    )
    .unwrap();
    fs::write(&selectors, "# detail fields\nname: h1.name\nwebsite: a.web@href\nofsted: .ofsted\n").unwrap();

    let config = ScrapeConfig {
        mode: FetchMode::Http,
        output_dir: dir.path().join("out"),
        ..ScrapeConfig::default()
    };
    let fields = run_selector_test(&config, &html, &selectors).await.unwrap();

    assert_eq!(fields.get("name"), Some("Bright Horizons"));
    assert_eq!(fields.get("website"), Some("https://bh.example"));
    assert_eq!(fields.get("ofsted"), Some(""));
    assert_eq!(
        fs::read_to_string(dir.path().join("out/test_details_extract.csv")).unwrap(),
        "name,website,ofsted\nBright Horizons,https://bh.example,\n"
    );
}

#[tokio::test]
async fn xpath_selector_file_on_saved_file() {
    let dir = tempfile::tempdir().unwrap();
    let html = dir.path().join("page.html");
    let selectors = dir.path().join("fields.txt");
    fs::write(
        &html,
        r#"<html><body><div id="contact"><a href="tel:0113 496 0000">Call</a>
             <a href="mailto:hi@acorns.example">Email</a></div><h1>Acorns</h1></body></html>"#,
    )
    .unwrap();
    fs::write(
        &selectors,
        "name: //h1\nphone: //div[@id='contact']//a[starts-with(@href,'tel:')]/@href\nfax: //a[@class='fax']\n",
    )
    .unwrap();

    let config = ScrapeConfig {
        mode: FetchMode::Http,
        output_dir: dir.path().join("out"),
        ..ScrapeConfig::default()
    };
    let fields = run_selector_test(&config, &html, &selectors).await.unwrap();

    assert_eq!(fields.get("name"), Some("Acorns"));
    assert_eq!(fields.get("phone"), Some("tel:0113 496 0000"));
    assert_eq!(fields.get("fax"), Some(""));
}
