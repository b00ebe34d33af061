//! Integration tests for the orchestrator
//!
//! These tests use wiremock to create mock HTTP servers and drive whole
//! crawls through registered steps, the cursor and the scheduler.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stepcrawl::browser::{Artifact, Browser, BrowserError};
use stepcrawl::config::Config;
use stepcrawl::crawler::{parse_page, HttpClient};
use stepcrawl::{Args, Chain, CrawlError, Orchestrator};
use tokio::time::Instant;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration without a response cache
fn create_test_config(workers: usize, interval_ms: u64) -> Config {
    let mut config = Config::default();
    config.scheduler.workers = workers;
    config.scheduler.interval_ms = interval_ms;
    config.http.user_agent = "TestBot/1.0".to_string();
    config.http.cache_dir = None;
    config
}

/// Start times recorded by steps
#[derive(Default)]
struct Starts(Mutex<Vec<Instant>>);

#[tokio::test]
async fn test_fetch_steps_are_spaced_by_interval() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let crawler = Orchestrator::from_config(&create_test_config(2, 100)).unwrap();
    crawler.bind(Starts::default()).await.unwrap();

    crawler.register_step(
        "fetch",
        |http: Arc<HttpClient>, starts: Arc<Starts>, url: Arc<String>| async move {
            starts.0.lock().unwrap().push(Instant::now());
            let page = http.fetch(&url).await?;
            assert_eq!(page.status, 200);
            Ok::<(), CrawlError>(())
        },
    );

    let url = format!("{}/page", mock_server.uri());
    let called_at = Instant::now();

    let mut assigned = Vec::new();
    for _ in 0..3 {
        let args = Args::new().with(url.clone());
        assigned.push(crawler.next("fetch", args).await.unwrap());
    }

    crawler.wait().await;

    // Everything scheduled has run once wait returns
    let starts = crawler.resolve::<Starts>().unwrap();
    let starts = starts.0.lock().unwrap().clone();
    assert_eq!(starts.len(), 3);

    assert!(assigned[0] >= called_at);
    for pair in assigned.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(100));
    }

    // Steps never start before their eligible time
    let mut starts = starts;
    starts.sort();
    for (start, eligible) in starts.iter().zip(&assigned) {
        assert!(start >= eligible);
    }
    assert!(starts[2] - called_at >= Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_next_calls_count_exactly() {
    let crawler = Orchestrator::new(4);
    crawler.bind(AtomicU32::new(0)).await.unwrap();

    // Read, yield, then write: only correct if invocations never overlap
    crawler.register_step("bump", |counter: Arc<AtomicU32>| async move {
        let seen = counter.load(Ordering::SeqCst);
        tokio::task::yield_now().await;
        counter.store(seen + 1, Ordering::SeqCst);
    });

    let mut handles = Vec::new();
    for _ in 0..8 {
        let crawler = crawler.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                crawler.next("bump", Args::new()).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    crawler.wait().await;

    let counter = crawler.resolve::<AtomicU32>().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 40);
}

#[tokio::test]
async fn test_chain_follows_links() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><a href="/a">A</a><a href="/b">B</a></html>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<html><a href="/">Home</a></html>"#),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>leaf</html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = Orchestrator::from_config(&create_test_config(2, 0)).unwrap();
    crawler.bind(Mutex::new(HashSet::<Url>::new())).await.unwrap();

    crawler.register_step(
        "crawl",
        |http: Arc<HttpClient>,
         seen: Arc<Mutex<HashSet<Url>>>,
         target: Arc<Url>,
         chain: Chain| async move {
            let page = http.fetch(target.as_str()).await?;
            let parsed = parse_page(&page.body, &target);

            for link in parsed.links {
                if seen.lock().unwrap().insert(link.clone()) {
                    chain.next("crawl", Args::new().with(link))?;
                }
            }
            Ok::<(), CrawlError>(())
        },
    );

    let root = Url::parse(&format!("{}/", mock_server.uri())).unwrap();
    crawler
        .resolve::<Mutex<HashSet<Url>>>()
        .unwrap()
        .lock()
        .unwrap()
        .insert(root.clone());
    crawler.next("crawl", Args::new().with(root)).await.unwrap();

    crawler.wait().await;

    let seen = crawler.resolve::<Mutex<HashSet<Url>>>().unwrap();
    let mut paths: Vec<String> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|url| url.path().to_string())
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["/", "/a", "/b"]);
}

#[tokio::test]
async fn test_cookie_jar_is_shared_across_steps() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=abc; Path=/"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = Orchestrator::from_config(&create_test_config(1, 0)).unwrap();

    crawler.register_step(
        "profile",
        |http: Arc<HttpClient>, base: Arc<String>| async move {
            let page = http.fetch(&format!("{}/profile", base)).await?;
            assert_eq!(page.body, "welcome");
            Ok::<(), CrawlError>(())
        },
    );

    crawler.register_step(
        "login",
        |http: Arc<HttpClient>, base: Arc<String>, chain: Chain| async move {
            http.fetch(&format!("{}/login", base)).await?;
            chain.next("profile", Args::new().with(base.to_string()))?;
            Ok::<(), CrawlError>(())
        },
    );

    crawler
        .next("login", Args::new().with(mock_server.uri()))
        .await
        .unwrap();
    crawler.wait().await;

    let jar = crawler.cookie_jar().unwrap();
    let url = Url::parse(&mock_server.uri()).unwrap();
    let cookies = reqwest::cookie::CookieStore::cookies(jar.as_ref(), &url).unwrap();
    assert_eq!(cookies.to_str().unwrap(), "session=abc");
}

struct FakeBrowser;

impl Browser for FakeBrowser {
    fn fetch_rendered_html<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, BrowserError>> {
        async move { Ok(format!("<html>{url}</html>").into_bytes()) }.boxed()
    }

    fn render_pdf<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, BrowserError>> {
        async { Ok(b"%PDF-1.7".to_vec()) }.boxed()
    }

    fn capture_screenshot<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, BrowserError>> {
        async move {
            Err(BrowserError::Navigation {
                url: url.to_string(),
                message: "no display".to_string(),
            })
        }
        .boxed()
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), BrowserError>> {
        async { Ok(()) }.boxed()
    }
}

/// Artifacts collected by browser steps
#[derive(Default)]
struct Captures(Mutex<Vec<Vec<u8>>>);

#[tokio::test]
async fn test_steps_resolve_browser_trait_object() {
    let crawler = Orchestrator::new(1);
    crawler
        .bind_arc::<dyn Browser>(Arc::new(FakeBrowser))
        .await
        .unwrap();
    crawler.bind(Captures::default()).await.unwrap();

    crawler.register_step(
        "render",
        |browser: Arc<dyn Browser>, captures: Arc<Captures>, artifact: Arc<Artifact>| async move {
            let bytes = browser.capture(*artifact, "https://example.com/").await?;
            captures.0.lock().unwrap().push(bytes);
            Ok::<(), BrowserError>(())
        },
    );

    for artifact in [Artifact::Html, Artifact::Screenshot, Artifact::Pdf] {
        crawler
            .next("render", Args::new().with(artifact))
            .await
            .unwrap();
    }
    crawler.wait().await;

    // The screenshot failure is logged and the crawl carries on
    let captures = crawler.resolve::<Captures>().unwrap();
    let captures = captures.0.lock().unwrap();
    assert_eq!(captures.len(), 2);
    assert_eq!(captures[0], b"<html>https://example.com/</html>");
    assert_eq!(captures[1], b"%PDF-1.7");

    crawler
        .resolve::<dyn Browser>()
        .unwrap()
        .shutdown()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_panicking_step_does_not_stop_later_steps() {
    let crawler = Orchestrator::new(1);
    crawler.bind(AtomicU32::new(0)).await.unwrap();

    crawler.register_step("boom", || async {
        if true {
            panic!("step exploded");
        }
    });
    crawler.register_step("count", |counter: Arc<AtomicU32>| async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    crawler.next("count", Args::new()).await.unwrap();
    crawler.next("boom", Args::new()).await.unwrap();
    crawler.next("count", Args::new()).await.unwrap();
    crawler.wait().await;

    let counter = crawler.resolve::<AtomicU32>().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    // The execution lock was released by the panicking step
    crawler.next("count", Args::new()).await.unwrap();
    crawler.wait().await;
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_error_responses_are_not_cached() {
    let mock_server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(1, 0);
    config.http.cache_dir = Some(cache_dir.path().to_path_buf());
    let crawler = Orchestrator::from_config(&config).unwrap();
    crawler.bind(Mutex::new(Vec::<u16>::new())).await.unwrap();

    crawler.register_step(
        "fetch",
        |http: Arc<HttpClient>, statuses: Arc<Mutex<Vec<u16>>>, url: Arc<String>| async move {
            let page = http.fetch(&url).await?;
            statuses.lock().unwrap().push(page.status);
            Ok::<(), CrawlError>(())
        },
    );

    let url = format!("{}/flaky", mock_server.uri());
    crawler.next("fetch", Args::new().with(url.clone())).await.unwrap();
    crawler.next("fetch", Args::new().with(url)).await.unwrap();
    crawler.wait().await;

    let statuses = crawler.resolve::<Mutex<Vec<u16>>>().unwrap();
    assert_eq!(*statuses.lock().unwrap(), vec![503, 503]);
}
