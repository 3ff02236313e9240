use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, Instant};
use url::Url;

use crate::browser::Browser;
use crate::classifier::{PageClassifier, Verdict};
use crate::config::{ScanConfig, ScannerConfig};
use crate::records::{FailureCode, FailureRecord, PageId, SuccessRecord, Summary};
use crate::store::{KvStore, ScanStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not running, or the loaded page is not the one being waited for
    Idle,
    /// A navigation or reload was issued and has loaded
    AwaitingPage,
    /// Classifying the live page
    Evaluating,
    /// The range is exhausted
    Halted,
}

#[derive(Debug, Clone)]
pub struct LoadEvent {
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Evaluating { id: PageId, retrying: bool },
    Retrying { id: PageId, code: FailureCode },
    Success(SuccessRecord),
    Failure(FailureRecord),
    Miss { id: PageId },
    Completed(Summary),
}

/// Everything the controller knows, rebuilt from the store on every load
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub config: ScanConfig,
    pub running: bool,
    pub cursor: PageId,
}

impl ScanContext {
    pub fn load<S: KvStore>(store: &ScanStore<S>) -> Self {
        Self {
            config: store.config(),
            running: store.is_running(),
            cursor: store.cursor(),
        }
    }
}

pub struct Controller<'a, B, C, S> {
    settings: &'a ScannerConfig,
    browser: &'a mut B,
    classifier: &'a C,
    store: &'a ScanStore<S>,
    events: Option<UnboundedSender<ScanEvent>>,
    context: ScanContext,
}

impl<'a, B, C, S> Controller<'a, B, C, S>
where
    B: Browser,
    C: PageClassifier,
    S: KvStore,
{
    pub fn new(
        settings: &'a ScannerConfig,
        browser: &'a mut B,
        classifier: &'a C,
        store: &'a ScanStore<S>,
    ) -> Self {
        Self {
            settings,
            browser,
            classifier,
            store,
            events: None,
            context: ScanContext::load(store),
        }
    }

    pub fn with_events(mut self, events: Option<UnboundedSender<ScanEvent>>) -> Self {
        self.events = events;
        self
    }

    /// Starts or resumes the scan at the persisted cursor
    pub async fn start(&mut self) -> Result<Phase> {
        self.store.set_running(true)?;
        let cursor = self.store.cursor();
        self.store.set_cursor(cursor)?;
        self.context = ScanContext::load(self.store);

        if cursor > self.context.config.end_id {
            return self.halt();
        }

        let live = match self.browser.current_url().await {
            Ok(url) => self.settings.id_from_url(&url),
            Err(e) => {
                log::debug!("No live page: {e}");
                None
            }
        };
        if live == Some(cursor) {
            self.evaluate().await
        } else {
            self.navigate_to(cursor).await?;
            Ok(Phase::AwaitingPage)
        }
    }

    pub async fn on_load(&mut self, event: LoadEvent) -> Result<Phase> {
        if !self.context.running {
            return Ok(Phase::Idle);
        }
        match self.settings.id_from_url(&event.url) {
            Some(id) if id == self.context.cursor => self.evaluate().await,
            loaded => {
                log::warn!(
                    "Ignoring load of {} (id {loaded:?}), waiting for id {}",
                    event.url,
                    self.context.cursor
                );
                Ok(Phase::Idle)
            }
        }
    }

    async fn evaluate(&mut self) -> Result<Phase> {
        let id = self.context.cursor;
        let config = self.context.config.clone();
        if id > config.end_id {
            return self.halt();
        }

        let retrying = self.store.retry_flag(id);
        if retrying {
            log::info!("Evaluating id {id} (retry)");
        } else {
            log::info!("Evaluating id {id}");
        }
        self.emit(ScanEvent::Evaluating { id, retrying });

        let timings = self.settings.timings.clone();
        sleep(timings.settle()).await;
        self.dismiss_popup().await;
        if !self.wait_for_marker().await {
            log::info!(
                "Id {id}: no content marker after {:?}, classifying anyway",
                timings.marker_timeout()
            );
        }
        sleep(timings.render_settle()).await;

        let snapshot = self.browser.snapshot().await?;
        let verdict = {
            let doc = self.classifier.parse(&snapshot);
            self.classifier.classify(&doc, config.collect_price)
        };

        match verdict {
            Verdict::TransientError(code) if !retrying => {
                log::warn!("Id {id}: transient error {code}, reloading once");
                self.store.set_retry_flag(id)?;
                self.emit(ScanEvent::Retrying { id, code });
                sleep(config.check_interval()).await;
                // Part of this id's evaluation, a pause waits for the reload
                self.browser.reload().await?;
                return Ok(Phase::AwaitingPage);
            }
            Verdict::TransientError(code) => {
                log::warn!("Id {id}: still {code} after reload");
                self.record_failure(id, code)?;
                self.store.clear_retry_flag(id)?;
            }
            Verdict::Valid { title, price } => {
                self.store.clear_retry_flag(id)?;
                self.record_success(SuccessRecord { id, title, price })?;
            }
            Verdict::Invalid => {
                self.store.clear_retry_flag(id)?;
                if retrying {
                    log::warn!("Id {id}: not recognized after reload");
                    self.record_failure(id, FailureCode::ClassifyFailed)?;
                } else {
                    log::info!("Id {id}: not a product page");
                    self.emit(ScanEvent::Miss { id });
                }
            }
        }

        self.advance().await
    }

    async fn advance(&mut self) -> Result<Phase> {
        let Some(next) = self.context.cursor.checked_add(1) else {
            return self.halt();
        };
        self.store.set_cursor(next)?;
        self.context.cursor = next;

        if next > self.context.config.end_id {
            return self.halt();
        }

        sleep(self.context.config.check_interval()).await;
        if !self.store.is_running() {
            self.context.running = false;
            log::info!("Scan paused, next id {next}");
            return Ok(Phase::Idle);
        }
        self.navigate_to(next).await?;
        Ok(Phase::AwaitingPage)
    }

    fn halt(&mut self) -> Result<Phase> {
        self.store.set_running(false)?;
        self.context.running = false;
        let summary = self.store.summary();
        log::info!("{summary}");
        self.emit(ScanEvent::Completed(summary));
        Ok(Phase::Halted)
    }

    async fn navigate_to(&mut self, id: PageId) -> Result<()> {
        let url = self.settings.page_url(id)?;
        log::debug!("Navigating to {url}");
        self.browser.navigate(&url).await
    }

    async fn dismiss_popup(&mut self) {
        let classifier = self.classifier;
        let Some(selector) = classifier.popup_selector() else {
            return;
        };
        match self.browser.click(selector).await {
            Ok(true) => log::info!("Dismissed popup"),
            Ok(false) => (),
            Err(e) => log::warn!("Couldn't dismiss popup: {e}"),
        }
    }

    /// Polls until a loaded marker shows up, false on timeout
    async fn wait_for_marker(&mut self) -> bool {
        let timings = &self.settings.timings;
        let deadline = Instant::now() + timings.marker_timeout();
        loop {
            let loaded = match self.browser.snapshot().await {
                Ok(snapshot) => {
                    let doc = self.classifier.parse(&snapshot);
                    self.classifier.is_loaded(&doc)
                }
                Err(e) => {
                    log::debug!("Snapshot failed while waiting for page: {e}");
                    false
                }
            };
            if loaded {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(timings.marker_poll()).await;
        }
    }

    fn record_success(&self, record: SuccessRecord) -> Result<()> {
        let id = record.id;
        if self.store.has_success(id) {
            log::info!("Id {id} already recorded");
            return Ok(());
        }
        if self.store.record_success(record.clone())? {
            log::info!("Id {id} is a product page: {}", record.to_line());
            self.emit(ScanEvent::Success(record));
        } else {
            log::info!("Id {id} already recorded as failed, keeping that record");
        }
        Ok(())
    }

    fn record_failure(&self, id: PageId, code: FailureCode) -> Result<()> {
        let record = FailureRecord { id, code };
        if self.store.record_failure(record.clone())? {
            log::warn!("Id {id} failed: {}", record.code);
            self.emit(ScanEvent::Failure(record));
        }
        Ok(())
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(tx) = &self.events {
            tx.send(event).ok();
        }
    }
}
