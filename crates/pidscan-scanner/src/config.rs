use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::records::PageId;

/// The scan range and per-step behaviour, persisted in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    #[serde(default = "default_start_id", alias = "scannerStartPid")]
    pub start_id: PageId,

    #[serde(default = "default_end_id", alias = "scannerEndPid")]
    pub end_id: PageId,

    #[serde(default = "default_check_interval_ms", alias = "scannerCheckInterval")]
    pub check_interval_ms: u64,

    #[serde(default, alias = "scannerGetPrice")]
    pub collect_price: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            start_id: default_start_id(),
            end_id: default_end_id(),
            check_interval_ms: default_check_interval_ms(),
            collect_price: false,
        }
    }
}

impl ScanConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Number of ids in the range, zero when the range is inverted
    pub fn len(&self) -> u64 {
        self.end_id.saturating_add(1).saturating_sub(self.start_id)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Progress of `cursor` through the range, clamped to 0..=100
    pub fn progress(&self, cursor: PageId) -> u8 {
        let total = self.len();
        if total == 0 {
            return 100;
        }
        let current = cursor.saturating_add(1).saturating_sub(self.start_id);
        let percent = (current as f64 / total as f64 * 100.0).round();
        percent.clamp(0.0, 100.0) as u8
    }

    /// Whether switching to `other` invalidates the current cursor
    pub fn resets_cursor(&self, other: &ScanConfig) -> bool {
        self.start_id != other.start_id
            || self.end_id != other.end_id
            || self.check_interval_ms != other.check_interval_ms
    }
}

fn default_start_id() -> PageId {
    1850
}

fn default_end_id() -> PageId {
    1900
}

fn default_check_interval_ms() -> u64 {
    500
}

/// Runtime settings of the scanner, never written to the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerConfig {
    #[serde(default = "default_url_template")]
    pub url_template: String,

    #[serde(default = "default_id_param")]
    pub id_param: String,

    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default)]
    pub browser: BrowserKind,

    #[serde(default = "default_webdriver_endpoint")]
    pub webdriver_endpoint: String,

    #[serde(default = "default_headless")]
    pub headless: bool,

    #[serde(default = "default_handle_sigint")]
    pub handle_sigint: bool,

    #[serde(default)]
    pub timings: Timings,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
            id_param: default_id_param(),
            store_path: default_store_path(),
            user_agent: default_user_agent(),
            backend: Backend::default(),
            browser: BrowserKind::default(),
            webdriver_endpoint: default_webdriver_endpoint(),
            headless: default_headless(),
            handle_sigint: default_handle_sigint(),
            timings: Timings::default(),
        }
    }
}

impl ScannerConfig {
    pub fn page_url(&self, id: PageId) -> anyhow::Result<Url> {
        let raw = self.url_template.replace("{id}", &id.to_string());
        Url::parse(&raw).with_context(|| format!("Invalid page url {raw}"))
    }

    pub fn id_from_url(&self, url: &Url) -> Option<PageId> {
        url.query_pairs()
            .find(|(key, _)| key == self.id_param.as_str())
            .and_then(|(_, value)| value.trim().parse().ok())
    }
}

fn default_url_template() -> String {
    String::from("https://www.szhdy.com/cart?action=configureproduct&pid={id}")
}

fn default_id_param() -> String {
    String::from("pid")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("pidscan-state.json")
}

fn default_user_agent() -> String {
    String::from("Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0")
}

fn default_webdriver_endpoint() -> String {
    String::from("http://localhost:4444")
}

fn default_headless() -> bool {
    true
}

fn default_handle_sigint() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum Backend {
    /// Drive a real browser through a WebDriver endpoint
    #[default]
    Webdriver,
    /// Plain HTTP fetches, no script execution
    Http,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum BrowserKind {
    #[default]
    Firefox,
    Chrome,
}

/// Cooperative waits inserted around each page evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_marker_timeout_ms")]
    pub marker_timeout_ms: u64,

    #[serde(default = "default_marker_poll_ms")]
    pub marker_poll_ms: u64,

    #[serde(default = "default_render_settle_ms")]
    pub render_settle_ms: u64,

    #[serde(default = "default_resume_delay_ms")]
    pub resume_delay_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            marker_timeout_ms: default_marker_timeout_ms(),
            marker_poll_ms: default_marker_poll_ms(),
            render_settle_ms: default_render_settle_ms(),
            resume_delay_ms: default_resume_delay_ms(),
        }
    }
}

impl Timings {
    pub fn zero() -> Self {
        Self {
            settle_ms: 0,
            marker_timeout_ms: 0,
            marker_poll_ms: 0,
            render_settle_ms: 0,
            resume_delay_ms: 0,
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn marker_timeout(&self) -> Duration {
        Duration::from_millis(self.marker_timeout_ms)
    }

    pub fn marker_poll(&self) -> Duration {
        Duration::from_millis(self.marker_poll_ms)
    }

    pub fn render_settle(&self) -> Duration {
        Duration::from_millis(self.render_settle_ms)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }
}

fn default_settle_ms() -> u64 {
    500
}

fn default_marker_timeout_ms() -> u64 {
    3000
}

fn default_marker_poll_ms() -> u64 {
    200
}

fn default_render_settle_ms() -> u64 {
    1000
}

fn default_resume_delay_ms() -> u64 {
    1000
}
