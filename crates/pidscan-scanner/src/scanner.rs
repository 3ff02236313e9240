use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;

use crate::browser::Browser;
use crate::classifier::PageClassifier;
use crate::config::ScannerConfig;
use crate::controller::{Controller, LoadEvent, Phase, ScanEvent};
use crate::records::Summary;
use crate::store::{KvStore, ScanStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub phase: Phase,
    pub summary: Summary,
}

/// Starts (or resumes) the scan and keeps feeding page loads to a freshly
/// built controller until it stops asking for the next page
pub async fn scan_range<B, C, S>(
    settings: &ScannerConfig,
    browser: &mut B,
    classifier: &C,
    store: &ScanStore<S>,
    events: Option<UnboundedSender<ScanEvent>>,
) -> Result<ScanOutcome>
where
    B: Browser,
    C: PageClassifier,
    S: KvStore + Clone + Send + Sync + 'static,
{
    // Ctrl-C pauses, the in-flight page is still finished

    let sigint = settings.handle_sigint.then(|| {
        let store = store.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, pausing after the current page");
                if let Err(e) = store.pause() {
                    log::error!("Couldn't pause scan: {e}");
                }
            }
        })
    });

    let res = drive(settings, browser, classifier, store, events).await;

    if let Some(handle) = sigint {
        handle.abort();
    }

    let phase = res?;
    if phase == Phase::Idle && store.is_running() {
        log::warn!(
            "Scan stopped on an unexpected page, run it again to resume at id {}",
            store.cursor()
        );
    }

    Ok(ScanOutcome {
        phase,
        summary: store.summary(),
    })
}

async fn drive<B, C, S>(
    settings: &ScannerConfig,
    browser: &mut B,
    classifier: &C,
    store: &ScanStore<S>,
    events: Option<UnboundedSender<ScanEvent>>,
) -> Result<Phase>
where
    B: Browser,
    C: PageClassifier,
    S: KvStore,
{
    let mut phase = Controller::new(settings, browser, classifier, store)
        .with_events(events.clone())
        .start()
        .await?;

    while phase == Phase::AwaitingPage {
        sleep(settings.timings.resume_delay()).await;
        let url = browser.current_url().await?;
        phase = Controller::new(settings, browser, classifier, store)
            .with_events(events.clone())
            .on_load(LoadEvent { url })
            .await?;
    }

    Ok(phase)
}
