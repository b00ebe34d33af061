//! HTTP client collaborator
//!
//! This module handles all HTTP traffic for crawl steps, including:
//! - Building a `reqwest` client with the configured user agent and timeout
//! - A cookie jar shared by every request the client makes
//! - An on-disk cache of successful GET responses, keyed by URL hash

use crate::config::HttpConfig;
use crate::{CrawlError, Result};
use reqwest::cookie::Jar;
use reqwest::{Client, Method, RequestBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A fetched page
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects (the requested URL for cache hits)
    pub url: String,

    /// HTTP status code
    pub status: u16,

    /// Response body
    pub body: String,

    /// Whether the body came from the on-disk cache
    pub from_cache: bool,
}

impl Page {
    /// Returns whether the status code is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Content-addressed response cache on disk
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    /// Creates a cache rooted at `dir` (created lazily on first store)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file a URL's body is cached under
    pub fn path_for(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        self.dir.join(hex::encode(hasher.finalize()))
    }

    /// Loads a cached body, or `None` on a miss
    pub async fn load(&self, url: &str) -> std::io::Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(url)).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stores a body for `url`
    pub async fn store(&self, url: &str, body: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(url), body).await
    }
}

/// HTTP client bound into the registry for steps to use
///
/// Cloning is cheap; clones share the connection pool, the cookie jar and
/// the cache directory.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    jar: Arc<Jar>,
    cache: Option<ResponseCache>,
}

impl HttpClient {
    /// Builds an HTTP client with proper configuration
    ///
    /// # Arguments
    ///
    /// * `config` - User agent, timeout and cache settings
    ///
    /// # Returns
    ///
    /// * `Ok(HttpClient)` - Successfully built client
    /// * `Err(CrawlError)` - Failed to build the underlying `reqwest` client
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_provider(jar.clone())
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            jar,
            cache: config.cache_dir.as_ref().map(ResponseCache::new),
        })
    }

    /// Starts building a request; cookies from the shared jar are attached
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Returns the cookie jar shared by all requests
    pub fn cookie_jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    /// Returns the response cache, if caching is enabled
    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// Fetches `url` with GET, serving from and filling the on-disk cache
    ///
    /// Only 2xx responses are cached. Non-2xx responses are returned as a
    /// [`Page`] so the caller can decide what a 404 means for its crawl.
    ///
    /// # Errors
    ///
    /// * [`CrawlError::Http`] - the request or body download failed
    /// * [`CrawlError::Io`] - the cache could not be read
    pub async fn fetch(&self, url: &str) -> Result<Page> {
        if let Some(cache) = &self.cache {
            if let Some(body) = cache.load(url).await? {
                tracing::debug!("Cache hit for {}", url);
                return Ok(Page {
                    url: url.to_string(),
                    status: 200,
                    body,
                    from_cache: true,
                });
            }
        }

        let http_error = |source| CrawlError::Http {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(http_error)?;
        let status = response.status();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(http_error)?;

        tracing::debug!("Fetched {} ({})", url, status);

        if status.is_success() {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.store(url, &body).await {
                    tracing::warn!("Failed to cache response for {}: {}", url, e);
                }
            }
        }

        Ok(Page {
            url: final_url,
            status: status.as_u16(),
            body,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(cache_dir: Option<PathBuf>) -> HttpConfig {
        HttpConfig {
            user_agent: "TestCrawler/1.0".to_string(),
            timeout_secs: 5,
            cache_dir,
        }
    }

    #[test]
    fn test_build_http_client() {
        let client = HttpClient::new(&create_test_config(None));
        assert!(client.is_ok());
        assert!(client.unwrap().cache().is_none());
    }

    #[test]
    fn test_cache_path_is_url_hash() {
        let cache = ResponseCache::new("/tmp/cache");
        let a = cache.path_for("https://example.com/a");
        let b = cache.path_for("https://example.com/b");

        assert_ne!(a, b);
        assert_eq!(a, cache.path_for("https://example.com/a"));
        // SHA-256 produces 64 hex characters
        assert_eq!(a.file_name().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_fetch_fills_and_uses_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>cached</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = HttpClient::new(&create_test_config(Some(dir.path().to_path_buf()))).unwrap();
        let url = format!("{}/page", server.uri());

        let first = client.fetch(&url).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.status, 200);

        let second = client.fetch(&url).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.body, "<html>cached</html>");
    }

    #[tokio::test]
    async fn test_fetch_does_not_cache_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = HttpClient::new(&create_test_config(Some(dir.path().to_path_buf()))).unwrap();
        let url = format!("{}/missing", server.uri());

        let page = client.fetch(&url).await.unwrap();
        assert_eq!(page.status, 404);
        assert!(!page.is_success());

        let again = client.fetch(&url).await.unwrap();
        assert!(!again.from_cache);
    }

    #[tokio::test]
    async fn test_cookies_are_kept_in_shared_jar() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=abc123"))
            .mount(&server)
            .await;

        let client = HttpClient::new(&create_test_config(None)).unwrap();
        let url = format!("{}/login", server.uri());
        client.fetch(&url).await.unwrap();

        let cookies = client
            .cookie_jar()
            .cookies(&url::Url::parse(&url).unwrap())
            .expect("cookie should be stored");
        assert!(cookies.to_str().unwrap().contains("session=abc123"));
    }
}
