//! Headless-browser collaborator boundary
//!
//! The crate ships no browser driver. Implement [`Browser`] over whichever
//! automation backend you use and bind it as a trait object:
//!
//! ```ignore
//! crawler.bind_arc::<dyn Browser>(Arc::new(MyChrome::launch()?)).await?;
//! crawler.register_step("render", |browser: Arc<dyn Browser>, url: Arc<String>| async move {
//!     let html = browser.fetch_rendered_html(&url).await?;
//!     Ok::<(), BrowserError>(())
//! });
//! ```
//!
//! Shutting the browser down is the caller's job; the orchestrator never
//! calls [`Browser::shutdown`].

use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a [`Browser`] implementation
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to navigate to {url}: {message}")]
    Navigation { url: String, message: String },

    #[error("Failed to render {artifact:?} for {url}: {message}")]
    Render {
        url: String,
        artifact: Artifact,
        message: String,
    },

    #[error("Browser shutdown failed: {0}")]
    Shutdown(String),
}

/// What to extract from a rendered page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Html,
    Pdf,
    Screenshot,
}

/// Rendering settings an implementation is expected to honor
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Browser window size in pixels
    pub window: (u32, u32),

    /// How long to let the page settle before a PDF or screenshot
    pub settle: Duration,

    /// PDF margins in inches (top, right, bottom, left)
    pub pdf_margins: [f64; 4],

    pub pdf_landscape: bool,
    pub pdf_print_background: bool,
    pub pdf_prefer_css_page_size: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            window: (1920, 1080),
            settle: Duration::from_secs(2),
            pdf_margins: [0.01; 4],
            pdf_landscape: true,
            pdf_print_background: true,
            pdf_prefer_css_page_size: true,
        }
    }
}

/// Headless-browser automation
///
/// Each method navigates to `url`, waits for rendering as described by
/// [`RenderOptions`], and returns the requested artifact.
pub trait Browser: Send + Sync {
    /// Returns the outer HTML of the rendered document
    fn fetch_rendered_html<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, BrowserError>>;

    /// Prints the rendered page to PDF
    fn render_pdf<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, BrowserError>>;

    /// Captures a PNG screenshot of the rendered page
    fn capture_screenshot<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, BrowserError>>;

    /// Shuts the browser down and waits for it to exit
    fn shutdown(&self) -> BoxFuture<'_, Result<(), BrowserError>>;

    /// Dispatches to the method producing `artifact`
    fn capture<'a>(
        &'a self,
        artifact: Artifact,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, BrowserError>> {
        match artifact {
            Artifact::Html => self.fetch_rendered_html(url),
            Artifact::Pdf => self.render_pdf(url),
            Artifact::Screenshot => self.capture_screenshot(url),
        }
    }
}
