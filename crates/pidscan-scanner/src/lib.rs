mod browser;
mod classifier;
mod config;
mod controller;
mod records;
mod scanner;
pub mod store;

pub use browser::{Browser, Snapshot};
pub use classifier::{PageClassifier, Verdict};
pub use config::{Backend, BrowserKind, ScanConfig, ScannerConfig, Timings};
pub use controller::{Controller, LoadEvent, Phase, ScanContext, ScanEvent};
pub use records::{FailureCode, FailureRecord, PageId, SuccessRecord, Summary};
pub use scanner::{scan_range, ScanOutcome};
pub use store::{FileStore, KvStore, MemoryStore, ScanStore};

pub use anyhow;
