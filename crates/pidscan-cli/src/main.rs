mod http;
mod webdriver;

use std::fs::{self, File};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use pidscan_scanner::{
    scan_range, Backend, BrowserKind, FileStore, PageClassifier, ScanEvent, ScanStore,
    ScannerConfig, Snapshot, Verdict,
};
use pidscan_site::CatalogClassifier;
use tokio::runtime;
use tokio::sync::mpsc;
use url::Url;

use crate::http::HttpBrowser;
use crate::webdriver::WebDriverBrowser;

const DEFAULT_LOG_FILTER: &str = "pidscan=info,pidscan_scanner=info,pidscan_site=info";

/// Product id range scanner
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum SubCommand {
    Scan(ScanArgs),
    /// Pause the scan after the page in progress
    Pause(StoreArgs),
    /// Show progress and both result lists
    Status(StoreArgs),
    /// Empty the valid id list and rewind to the first id
    ClearSuccess(ClearArgs),
    /// Empty the failed id list
    ClearFailures(ClearArgs),
    Export(ExportArgs),
    Config(ConfigArgs),
    Classify(ClassifyArgs),
    #[command(hide = true)]
    Completion,
}

/// Where the scan state lives
#[derive(Debug, clap::Args)]
pub struct StoreArgs {
    /// Optional scanner yaml configuration file
    #[arg(env = "PIDSCAN_CONFIG", long)]
    pub scanner_config: Option<PathBuf>,
    /// Override the path of the state file
    #[arg(long)]
    pub store: Option<PathBuf>,
}

impl TryFrom<&StoreArgs> for ScannerConfig {
    type Error = anyhow::Error;

    fn try_from(args: &StoreArgs) -> Result<Self, Self::Error> {
        let mut conf = if let Some(path) = &args.scanner_config {
            let file = File::open(path)
                .with_context(|| format!("Couldn't open {}", path.display()))?;
            serde_yaml::from_reader(file)?
        } else {
            ScannerConfig::default()
        };
        if let Some(store) = &args.store {
            conf.store_path = store.clone();
        }
        Ok(conf)
    }
}

impl StoreArgs {
    fn open(&self) -> anyhow::Result<ScanStore<FileStore>> {
        let conf = ScannerConfig::try_from(self)?;
        open_store(&conf)
    }
}

fn open_store(conf: &ScannerConfig) -> anyhow::Result<ScanStore<FileStore>> {
    Ok(ScanStore::new(FileStore::open(&conf.store_path)?))
}

/// Start or resume the scan
#[derive(Debug, clap::Args)]
pub struct ScanArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Override the page url template, `{id}` is replaced by the id
    #[arg(long)]
    pub url_template: Option<String>,
    /// Override the query parameter carrying the id
    #[arg(long)]
    pub id_param: Option<String>,
    /// Override the user agent
    #[arg(long)]
    pub user_agent: Option<String>,
    /// Override how pages are loaded
    #[arg(value_enum, long)]
    pub backend: Option<Backend>,
    /// Override the browser driven through WebDriver
    #[arg(value_enum, long)]
    pub browser: Option<BrowserKind>,
    /// Override the WebDriver endpoint
    #[arg(long)]
    pub webdriver: Option<String>,
    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
    /// No SIGINT handling, Ctrl-C aborts instead of pausing
    #[arg(long)]
    pub no_sigint: bool,
    /// When quiet no logs are outputted
    #[arg(long, short)]
    pub quiet: bool,
}

impl TryFrom<&ScanArgs> for ScannerConfig {
    type Error = anyhow::Error;

    fn try_from(args: &ScanArgs) -> Result<Self, Self::Error> {
        let mut conf = ScannerConfig::try_from(&args.store)?;
        if let Some(url_template) = &args.url_template {
            conf.url_template = url_template.to_string();
        }
        if let Some(id_param) = &args.id_param {
            conf.id_param = id_param.to_string();
        }
        if let Some(user_agent) = &args.user_agent {
            conf.user_agent = user_agent.to_string();
        }
        if let Some(backend) = args.backend {
            conf.backend = backend;
        }
        if let Some(browser) = args.browser {
            conf.browser = browser;
        }
        if let Some(endpoint) = &args.webdriver {
            conf.webdriver_endpoint = endpoint.to_string();
        }
        if args.headed {
            conf.headless = false;
        }
        if args.no_sigint {
            conf.handle_sigint = false;
        }
        Ok(conf)
    }
}

pub fn scan(args: ScanArgs) -> anyhow::Result<()> {
    let conf: ScannerConfig = (&args).try_into()?;
    let store = open_store(&conf)?;
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(run_scan(&conf, &store))
}

async fn run_scan(conf: &ScannerConfig, store: &ScanStore<FileStore>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ScanEvent::Success(record) => println!("Found {}", record.to_line()),
                ScanEvent::Failure(record) => println!("Failed {record}"),
                ScanEvent::Completed(summary) => println!("{summary}"),
                _ => {}
            }
        }
    });

    let classifier = CatalogClassifier;
    let outcome = match conf.backend {
        Backend::Webdriver => {
            let mut browser = WebDriverBrowser::connect(conf).await?;
            let res = scan_range(conf, &mut browser, &classifier, store, Some(tx)).await;
            if let Err(e) = browser.quit().await {
                log::warn!("Couldn't close browser session: {e}");
            }
            res?
        }
        Backend::Http => {
            let mut browser = HttpBrowser::new(conf)?;
            scan_range(conf, &mut browser, &classifier, store, Some(tx)).await?
        }
    };
    printer.await?;

    log::info!("Scan stopped in phase {:?}", outcome.phase);
    if store.is_running() {
        store.set_running(false)?;
    } else if store.cursor() <= store.config().end_id {
        println!("Paused at id {}", store.cursor());
    }
    Ok(())
}

pub fn pause(args: StoreArgs) -> anyhow::Result<()> {
    let store = args.open()?;
    store.pause()?;
    println!("Scan paused at id {}", store.cursor());
    Ok(())
}

pub fn status(args: StoreArgs) -> anyhow::Result<()> {
    let store = args.open()?;
    let config = store.config();
    let cursor = store.cursor();
    let state = if store.is_running() { "running" } else { "paused" };

    println!("Status: {state}");
    println!("State file: {}", store.inner().path().display());
    println!(
        "Current id: {cursor} ({}%) of {}..={}",
        config.progress(cursor),
        config.start_id,
        config.end_id
    );
    println!(
        "Interval: {}ms, collect price: {}",
        config.check_interval_ms, config.collect_price
    );

    let successes = store.sorted_successes();
    println!("Valid: {}", successes.len());
    for record in &successes {
        println!("  {}", record.to_line());
    }
    let failures = store.sorted_failures();
    println!("Failed: {}", failures.len());
    for record in &failures {
        println!("  {record}");
    }
    Ok(())
}

#[derive(Debug, clap::Args)]
pub struct ClearArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Don't ask for confirmation
    #[arg(long, short)]
    pub yes: bool,
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub fn clear_success(args: ClearArgs) -> anyhow::Result<()> {
    let store = args.store.open()?;
    if !args.yes && !confirm("Clear all valid ids and restart from the first id?")? {
        return Ok(());
    }
    store.clear_successes()?;
    println!("Valid ids cleared, next scan starts at {}", store.cursor());
    Ok(())
}

pub fn clear_failures(args: ClearArgs) -> anyhow::Result<()> {
    let store = args.store.open()?;
    if !args.yes && !confirm("Clear all failed ids?")? {
        return Ok(());
    }
    store.clear_failures()?;
    println!("Failed ids cleared");
    Ok(())
}

/// Print the valid ids, one `id title price` line each
#[derive(Debug, clap::Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Write to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub fn export(args: ExportArgs) -> anyhow::Result<()> {
    let store = args.store.open()?;
    let text = store.success_text();
    match args.output {
        Some(path) => {
            fs::write(&path, format!("{text}\n"))
                .with_context(|| format!("Couldn't write {}", path.display()))?;
            log::info!("Exported {} ids to {}", store.successes().len(), path.display());
        }
        None if text.is_empty() => {}
        None => println!("{text}"),
    }
    Ok(())
}

/// Show or edit the scan range
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// First id of the range, resets the scan position
    #[arg(long)]
    pub start_id: Option<u64>,
    /// Last id of the range (inclusive), resets the scan position
    #[arg(long)]
    pub end_id: Option<u64>,
    /// Delay between two ids in milliseconds, resets the scan position
    #[arg(long)]
    pub interval: Option<u64>,
    /// Whether prices are extracted from valid pages
    #[arg(long, action = clap::ArgAction::Set)]
    pub collect_price: Option<bool>,
}

pub fn config(args: ConfigArgs) -> anyhow::Result<()> {
    let store = args.store.open()?;
    let mut config = store.config();
    let before = config.clone();

    if let Some(start_id) = args.start_id {
        config.start_id = start_id;
    }
    if let Some(end_id) = args.end_id {
        config.end_id = end_id;
    }
    if let Some(interval) = args.interval {
        config.check_interval_ms = interval;
    }
    if let Some(collect_price) = args.collect_price {
        config.collect_price = collect_price;
    }

    if config != before {
        if config.start_id > config.end_id {
            bail!(
                "Start id {} is after end id {}",
                config.start_id,
                config.end_id
            );
        }
        store.update_config(&config)?;
        if before.resets_cursor(&config) {
            log::info!("Scan position reset to {}", config.start_id);
        }
    }

    println!("Start id: {}", config.start_id);
    println!("End id: {}", config.end_id);
    println!("Interval: {}ms", config.check_interval_ms);
    println!("Collect price: {}", config.collect_price);
    Ok(())
}

/// Classify a single page and print the verdict
#[derive(Debug, clap::Args)]
#[command(group = clap::ArgGroup::new("page").required(true))]
pub struct ClassifyArgs {
    /// A local html page
    #[arg(group = "page", long)]
    pub file: Option<PathBuf>,
    /// A distant html page
    #[arg(group = "page", long)]
    pub url: Option<String>,
    /// Custom user agent to download the page
    #[arg(long, conflicts_with = "file")]
    pub ua: Option<String>,
    /// Also extract the price
    #[arg(long)]
    pub price: bool,
}

pub fn classify(args: ClassifyArgs) -> anyhow::Result<()> {
    let snapshot = if let Some(raw) = args.url {
        let url = Url::parse(&raw)?;
        let mut conf = ScannerConfig::default();
        if let Some(ua) = args.ua {
            conf.user_agent = ua;
        }
        let rt = runtime::Builder::new_current_thread().enable_all().build()?;
        rt.block_on(async {
            use pidscan_scanner::Browser;
            let mut browser = HttpBrowser::new(&conf)?;
            browser.navigate(&url).await?;
            browser.snapshot().await
        })?
    } else if let Some(path) = args.file {
        let html = fs::read_to_string(&path)
            .with_context(|| format!("Couldn't read {}", path.display()))?;
        let url = Url::from_file_path(fs::canonicalize(&path)?)
            .map_err(|_| anyhow::anyhow!("Invalid path {}", path.display()))?;
        Snapshot::new(url, html)
    } else {
        bail!("Missing `url` or `file`");
    };

    let classifier = CatalogClassifier;
    let doc = classifier.parse(&snapshot);
    match classifier.classify(&doc, args.price) {
        Verdict::TransientError(code) => println!("Transient error {code}"),
        Verdict::Invalid => println!("Not a product page"),
        Verdict::Valid { title, price } => {
            println!("Product page");
            println!("  title: {title}");
            if args.price {
                println!("  price: {price}");
            }
        }
    }
    Ok(())
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER))
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let quiet = matches!(&args.cmd, SubCommand::Scan(scan) if scan.quiet);
    if !quiet {
        init_logger();
    }

    match args.cmd {
        SubCommand::Scan(args) => scan(args),
        SubCommand::Pause(args) => pause(args),
        SubCommand::Status(args) => status(args),
        SubCommand::ClearSuccess(args) => clear_success(args),
        SubCommand::ClearFailures(args) => clear_failures(args),
        SubCommand::Export(args) => export(args),
        SubCommand::Config(args) => config(args),
        SubCommand::Classify(args) => classify(args),
        SubCommand::Completion => {
            generate(Shell::Bash, &mut Args::command(), "pidscan", &mut io::stdout());
            Ok(())
        }
    }
}
