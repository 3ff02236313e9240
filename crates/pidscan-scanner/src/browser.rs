use anyhow::Result;
use async_trait::async_trait;
use url::Url;

/// The rendered state of the live page at one point in time
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub url: Url,
    pub html: String,
}

impl Snapshot {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
        }
    }
}

/// The single live page the scanner navigates
///
/// `navigate` and `reload` return once the new page has loaded, which is the
/// load event the controller reacts to.
#[async_trait]
pub trait Browser: Send {
    async fn navigate(&mut self, url: &Url) -> Result<()>;

    async fn reload(&mut self) -> Result<()>;

    async fn current_url(&mut self) -> Result<Url>;

    async fn snapshot(&mut self) -> Result<Snapshot>;

    /// Clicks the first visible element matching `selector`, returns whether
    /// anything was clicked
    async fn click(&mut self, selector: &str) -> Result<bool>;
}
