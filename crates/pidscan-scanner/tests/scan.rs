use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use pidscan_scanner::anyhow::{self, anyhow};
use pidscan_scanner::{
    scan_range, Browser, Controller, FailureCode, FailureRecord, LoadEvent, MemoryStore,
    PageClassifier, PageId, Phase, ScanConfig, ScanEvent, ScanStore, ScannerConfig, Snapshot,
    SuccessRecord, Summary, Timings,
};
use tokio::sync::mpsc;
use url::Url;

/// Pages are written as `product:<title>|<price>`, `error:<code>` or
/// anything else for a page that is neither
struct MarkupClassifier;

impl PageClassifier for MarkupClassifier {
    type Document = String;

    fn parse(&self, snapshot: &Snapshot) -> String {
        snapshot.html.clone()
    }

    fn is_loaded(&self, doc: &String) -> bool {
        doc.starts_with("product:")
    }

    fn detect_transient_error(&self, doc: &String) -> Option<FailureCode> {
        doc.strip_prefix("error:").map(FailureCode::from)
    }

    fn is_valid_page(&self, doc: &String) -> bool {
        doc.starts_with("product:")
    }

    fn extract_title(&self, doc: &String) -> Option<String> {
        let body = doc.strip_prefix("product:")?;
        Some(body.split('|').next().unwrap_or_default().to_string())
    }

    fn extract_price(&self, doc: &String) -> Option<String> {
        doc.split_once('|').map(|(_, price)| price.to_string())
    }
}

/// Serves scripted pages per id, the last scripted page of an id repeats
struct FakeBrowser {
    settings: ScannerConfig,
    pages: HashMap<PageId, VecDeque<String>>,
    current: Option<Url>,
    html: String,
    navigations: Vec<PageId>,
    loads: Vec<PageId>,
    /// Pauses the scan as soon as this id is evaluated
    pause_on: Option<(PageId, ScanStore<MemoryStore>)>,
}

impl FakeBrowser {
    fn new(settings: &ScannerConfig, pages: &[(PageId, &[&str])]) -> Self {
        let pages = pages
            .iter()
            .map(|(id, htmls)| (*id, htmls.iter().map(|h| h.to_string()).collect()))
            .collect();
        Self {
            settings: settings.clone(),
            pages,
            current: None,
            html: String::new(),
            navigations: Vec::new(),
            loads: Vec::new(),
            pause_on: None,
        }
    }

    fn load(&mut self, url: Url) {
        let id = self.settings.id_from_url(&url).unwrap_or_default();
        self.html = match self.pages.get_mut(&id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => String::new(),
        };
        self.loads.push(id);
        self.current = Some(url);
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn navigate(&mut self, url: &Url) -> anyhow::Result<()> {
        let id = self.settings.id_from_url(url).unwrap_or_default();
        self.navigations.push(id);
        self.load(url.clone());
        Ok(())
    }

    async fn reload(&mut self) -> anyhow::Result<()> {
        let url = self.current.clone().ok_or_else(|| anyhow!("Nothing to reload"))?;
        self.load(url);
        Ok(())
    }

    async fn current_url(&mut self) -> anyhow::Result<Url> {
        self.current.clone().ok_or_else(|| anyhow!("No page loaded"))
    }

    async fn snapshot(&mut self) -> anyhow::Result<Snapshot> {
        let url = self.current_url().await?;
        // Simulates the user pausing while this page is being evaluated
        if let Some((pause_id, store)) = &self.pause_on {
            if self.settings.id_from_url(&url) == Some(*pause_id) {
                store.pause()?;
            }
        }
        Ok(Snapshot::new(url, self.html.clone()))
    }

    async fn click(&mut self, _selector: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
}

fn settings() -> ScannerConfig {
    ScannerConfig {
        url_template: String::from("https://shop.test/cart?action=configureproduct&pid={id}"),
        handle_sigint: false,
        timings: Timings::zero(),
        ..Default::default()
    }
}

fn store_with_range(start_id: PageId, end_id: PageId) -> ScanStore<MemoryStore> {
    let store = ScanStore::new(MemoryStore::new());
    store
        .save_config(&ScanConfig {
            start_id,
            end_id,
            check_interval_ms: 0,
            collect_price: false,
        })
        .unwrap();
    store
}

fn record(id: PageId, title: &str, price: &str) -> SuccessRecord {
    SuccessRecord {
        id,
        title: title.to_string(),
        price: price.to_string(),
    }
}

#[tokio::test]
async fn scan_retries_once_then_records_failure() {
    let settings = settings();
    let store = store_with_range(10, 12);
    let mut browser = FakeBrowser::new(
        &settings,
        &[
            (10, &["product:A"]),
            (11, &["error:404", "error:404"]),
            (12, &["product:C"]),
        ],
    );
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = scan_range(&settings, &mut browser, &MarkupClassifier, &store, Some(tx))
        .await
        .unwrap();

    assert_eq!(outcome.phase, Phase::Halted);
    assert_eq!(
        outcome.summary,
        Summary {
            successes: 2,
            failures: 1
        }
    );
    assert_eq!(store.successes(), vec![record(10, "A", ""), record(12, "C", "")]);
    assert_eq!(
        store.failures(),
        vec![FailureRecord {
            id: 11,
            code: FailureCode::NotFound
        }]
    );
    assert!(!store.is_running());
    assert!(!store.retry_flag(11));
    assert_eq!(browser.loads, vec![10, 11, 11, 12]);

    let mut completed = None;
    while let Ok(event) = rx.try_recv() {
        if let ScanEvent::Completed(summary) = event {
            completed = Some(summary);
        }
    }
    assert_eq!(
        completed.map(|s| s.to_string()).as_deref(),
        Some("Scan complete: 2 valid product pages found, 1 failed.")
    );
}

#[tokio::test]
async fn transient_error_recovered_by_reload() {
    let settings = settings();
    let store = store_with_range(1, 1);
    let mut browser = FakeBrowser::new(&settings, &[(1, &["error:502", "product:B"])]);

    scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    assert_eq!(store.successes(), vec![record(1, "B", "")]);
    assert!(store.failures().is_empty());
    assert!(!store.retry_flag(1));
    assert_eq!(browser.loads, vec![1, 1]);
}

#[tokio::test]
async fn miss_after_reload_is_recorded() {
    let settings = settings();
    let store = store_with_range(1, 1);
    let mut browser = FakeBrowser::new(&settings, &[(1, &["error:503", "sidebar only"])]);

    scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    assert_eq!(
        store.failures(),
        vec![FailureRecord {
            id: 1,
            code: FailureCode::ClassifyFailed
        }]
    );
    assert!(store.successes().is_empty());
}

#[tokio::test]
async fn first_pass_miss_is_skipped() {
    let settings = settings();
    let store = store_with_range(1, 3);
    let mut browser = FakeBrowser::new(
        &settings,
        &[(1, &["sidebar only"]), (2, &["product:X"]), (3, &[""])],
    );
    let (tx, mut rx) = mpsc::unbounded_channel();

    scan_range(&settings, &mut browser, &MarkupClassifier, &store, Some(tx))
        .await
        .unwrap();

    assert_eq!(store.successes(), vec![record(2, "X", "")]);
    assert!(store.failures().is_empty());
    assert_eq!(browser.loads, vec![1, 2, 3]);

    let mut misses = vec![];
    while let Ok(event) = rx.try_recv() {
        if let ScanEvent::Miss { id } = event {
            misses.push(id);
        }
    }
    assert_eq!(misses, vec![1, 3]);
}

#[tokio::test]
async fn price_is_collected_when_enabled() {
    let settings = settings();
    let store = store_with_range(7, 8);
    let mut config = store.config();
    config.collect_price = true;
    store.save_config(&config).unwrap();
    let mut browser = FakeBrowser::new(
        &settings,
        &[(7, &["product:Cloud VPS|¥1200.00"]), (8, &["product:Bare"])],
    );

    scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    assert_eq!(
        store.successes(),
        vec![record(7, "Cloud VPS", "¥1200.00"), record(8, "Bare", "")]
    );
}

#[tokio::test]
async fn reevaluating_recorded_id_keeps_record() {
    let settings = settings();
    let store = store_with_range(1, 2);
    store.record_success(record(1, "Original", "¥1")).unwrap();
    store
        .record_failure(FailureRecord {
            id: 2,
            code: FailureCode::BadGateway,
        })
        .unwrap();
    let mut browser = FakeBrowser::new(
        &settings,
        &[(1, &["product:Renamed"]), (2, &["product:Now fine"])],
    );

    scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    assert_eq!(store.successes(), vec![record(1, "Original", "¥1")]);
    assert_eq!(store.failures().len(), 1);
    assert!(!store.has_success(2));
}

#[tokio::test]
async fn pause_finishes_current_page_then_resume_continues() {
    let settings = settings();
    let store = store_with_range(1, 4);
    let pages: &[(PageId, &[&str])] = &[
        (1, &["product:One"]),
        (2, &["product:Two"]),
        (3, &["product:Three"]),
        (4, &["product:Four"]),
    ];
    let mut browser = FakeBrowser::new(&settings, pages);
    browser.pause_on = Some((2, store.clone()));

    let outcome = scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    assert_eq!(outcome.phase, Phase::Idle);
    assert!(!store.is_running());
    assert_eq!(store.cursor(), 3);
    assert_eq!(browser.navigations, vec![1, 2]);
    assert_eq!(
        store.successes(),
        vec![record(1, "One", ""), record(2, "Two", "")]
    );

    browser.pause_on = None;
    let outcome = scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    assert_eq!(outcome.phase, Phase::Halted);
    assert_eq!(browser.navigations, vec![1, 2, 3, 4]);
    assert_eq!(outcome.summary.successes, 4);
}

#[tokio::test]
async fn pause_during_retry_wait_still_reloads() {
    let settings = settings();
    let store = store_with_range(1, 1);
    let mut browser = FakeBrowser::new(&settings, &[(1, &["error:502", "product:B"])]);
    browser.pause_on = Some((1, store.clone()));

    let outcome = scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    assert_eq!(outcome.phase, Phase::Idle);
    assert_eq!(browser.loads, vec![1, 1]);
    assert!(store.retry_flag(1));
    assert!(store.failures().is_empty());

    browser.pause_on = None;
    let outcome = scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    assert_eq!(outcome.phase, Phase::Halted);
    assert_eq!(browser.loads, vec![1, 1]);
    assert_eq!(store.successes(), vec![record(1, "B", "")]);
    assert!(store.failures().is_empty());
    assert!(!store.retry_flag(1));
}

#[tokio::test]
async fn range_edit_drops_retry_flag_of_paused_id() {
    let settings = settings();
    let store = store_with_range(1, 1);
    let mut browser = FakeBrowser::new(
        &settings,
        &[
            (1, &["error:502", "error:502", "product:B"]),
            (2, &["product:C"]),
        ],
    );
    browser.pause_on = Some((1, store.clone()));

    scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();
    assert!(store.retry_flag(1));

    let mut config = store.config();
    config.end_id = 2;
    store.update_config(&config).unwrap();
    assert_eq!(store.cursor(), 1);
    assert!(!store.retry_flag(1));

    browser.pause_on = None;
    let outcome = scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    assert_eq!(outcome.phase, Phase::Halted);
    assert_eq!(browser.loads, vec![1, 1, 1, 2]);
    assert_eq!(
        store.successes(),
        vec![record(1, "B", ""), record(2, "C", "")]
    );
    assert!(store.failures().is_empty());
}

#[tokio::test]
async fn scan_ending_at_largest_id_halts() {
    let settings = settings();
    let store = store_with_range(u64::MAX, u64::MAX);
    let mut browser = FakeBrowser::new(&settings, &[(u64::MAX, &["product:Last"])]);

    let outcome = scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    assert_eq!(outcome.phase, Phase::Halted);
    assert_eq!(store.successes(), vec![record(u64::MAX, "Last", "")]);
    assert!(!store.is_running());
}

#[tokio::test]
async fn start_on_matching_page_evaluates_without_navigation() {
    let settings = settings();
    let store = store_with_range(5, 5);
    let mut browser = FakeBrowser::new(&settings, &[(5, &["product:Here"])]);
    browser.load(settings.page_url(5).unwrap());

    let phase = Controller::new(&settings, &mut browser, &MarkupClassifier, &store)
        .start()
        .await
        .unwrap();

    assert_eq!(phase, Phase::Halted);
    assert!(browser.navigations.is_empty());
    assert_eq!(store.successes(), vec![record(5, "Here", "")]);
}

#[tokio::test]
async fn start_past_end_halts() {
    let settings = settings();
    let store = store_with_range(5, 6);
    store.set_cursor(7).unwrap();
    let mut browser = FakeBrowser::new(&settings, &[]);

    let phase = Controller::new(&settings, &mut browser, &MarkupClassifier, &store)
        .start()
        .await
        .unwrap();

    assert_eq!(phase, Phase::Halted);
    assert!(!store.is_running());
    assert!(browser.loads.is_empty());
}

#[tokio::test]
async fn unexpected_load_is_ignored() {
    let settings = settings();
    let store = store_with_range(10, 20);
    store.set_running(true).unwrap();
    store.set_cursor(12).unwrap();
    let mut browser = FakeBrowser::new(&settings, &[(99, &["product:Stale"])]);
    let url = settings.page_url(99).unwrap();
    browser.load(url.clone());

    let phase = Controller::new(&settings, &mut browser, &MarkupClassifier, &store)
        .on_load(LoadEvent { url })
        .await
        .unwrap();

    assert_eq!(phase, Phase::Idle);
    assert_eq!(store.cursor(), 12);
    assert!(store.successes().is_empty());
    assert!(store.is_running());
}

#[tokio::test]
async fn load_while_paused_does_nothing() {
    let settings = settings();
    let store = store_with_range(10, 20);
    let mut browser = FakeBrowser::new(&settings, &[(10, &["product:A"])]);
    let url = settings.page_url(10).unwrap();
    browser.load(url.clone());

    let phase = Controller::new(&settings, &mut browser, &MarkupClassifier, &store)
        .on_load(LoadEvent { url })
        .await
        .unwrap();

    assert_eq!(phase, Phase::Idle);
    assert!(store.successes().is_empty());
    assert_eq!(store.cursor(), 10);
}

#[tokio::test]
async fn cursor_only_repeats_for_the_retry_reload() {
    let settings = settings();
    let store = store_with_range(1, 6);
    let mut browser = FakeBrowser::new(
        &settings,
        &[
            (1, &["error:500", "product:A"]),
            (2, &["nothing"]),
            (3, &["error:EMPTY", "error:EMPTY"]),
            (4, &["error:403", "nothing"]),
            (5, &["product:E"]),
            (6, &["error:404", "product:F"]),
        ],
    );

    scan_range(&settings, &mut browser, &MarkupClassifier, &store, None)
        .await
        .unwrap();

    for pair in browser.loads.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
    for id in 1..=6 {
        let loads = browser.loads.iter().filter(|l| **l == id).count();
        assert!(loads <= 2, "id {id} loaded {loads} times");
    }
    for record in store.successes() {
        assert!(!store.has_failure(record.id));
    }
    assert_eq!(
        store.summary(),
        Summary {
            successes: 3,
            failures: 2
        }
    );
}
