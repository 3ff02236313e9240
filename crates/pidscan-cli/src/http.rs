use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pidscan_scanner::{Browser, ScannerConfig, Snapshot};
use reqwest::{Client, StatusCode};
use url::Url;

/// Fetches pages without running their scripts
///
/// Only useful for catalogs that render server side. Error statuses are
/// surfaced through the page title the way a browser shows them.
pub struct HttpBrowser {
    client: Client,
    page: Option<(Url, String)>,
}

impl HttpBrowser {
    pub fn new(settings: &ScannerConfig) -> Result<Self> {
        let client = Client::builder().user_agent(&settings.user_agent).build()?;
        Ok(Self { client, page: None })
    }

    async fn fetch(&mut self, url: &Url) -> Result<()> {
        let res = self.client.get(url.clone()).send().await?;
        let status = res.status();
        let final_url = res.url().clone();
        let body = res.text().await?;
        log::debug!("GET {final_url} -> {status}");
        self.page = Some((final_url, with_status_title(status, body)));
        Ok(())
    }

    fn current(&self) -> Result<&(Url, String)> {
        self.page.as_ref().ok_or_else(|| anyhow!("No page loaded yet"))
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn navigate(&mut self, url: &Url) -> Result<()> {
        self.fetch(url).await
    }

    async fn reload(&mut self) -> Result<()> {
        let url = self.current()?.0.clone();
        self.fetch(&url).await
    }

    async fn current_url(&mut self) -> Result<Url> {
        Ok(self.current()?.0.clone())
    }

    async fn snapshot(&mut self) -> Result<Snapshot> {
        let (url, html) = self.current()?;
        Ok(Snapshot::new(url.clone(), html.clone()))
    }

    async fn click(&mut self, _selector: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Error bodies without a title get one naming the status
pub(crate) fn with_status_title(status: StatusCode, body: String) -> String {
    if status.is_success() || body.to_ascii_lowercase().contains("<title") {
        return body;
    }
    format!("<html><head><title>{status}</title></head><body>{body}</body></html>")
}
