use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use pidscan_scanner::{Browser, BrowserKind, ScannerConfig, Snapshot};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const PAGE_SOURCE: &str = "return document.documentElement.outerHTML;";

const CLICK_VISIBLE: &str = r#"
const el = document.querySelector(arguments[0]);
if (!el || el.offsetParent === null) { return false; }
el.click();
return true;
"#;

/// A browser session driven over the W3C WebDriver protocol
pub struct WebDriverBrowser {
    client: Client,
    session: String,
}

impl WebDriverBrowser {
    pub async fn connect(settings: &ScannerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let endpoint = settings.webdriver_endpoint.trim_end_matches('/');
        let caps = capabilities(settings.browser, settings.headless, &settings.user_agent);

        let res = client
            .post(format!("{endpoint}/session"))
            .json(&caps)
            .send()
            .await
            .with_context(|| format!("Couldn't reach WebDriver at {endpoint}"))?;
        let body: Value = res.json().await.context("Invalid session response")?;
        check_error(&body).context("Couldn't create browser session")?;

        let session_id = body
            .pointer("/value/sessionId")
            .or_else(|| body.pointer("/sessionId"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Session response without sessionId: {body}"))?;

        log::info!("Opened {:?} session {session_id}", settings.browser);
        Ok(Self {
            client,
            session: format!("{endpoint}/session/{session_id}"),
        })
    }

    async fn command(&self, method: Method, path: &str, payload: Option<Value>) -> Result<Value> {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.session));
        if let Some(payload) = payload {
            req = req.json(&payload);
        }
        let body: Value = req.send().await?.json().await?;
        check_error(&body).with_context(|| format!("WebDriver command {path} failed"))?;
        Ok(body.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn execute(&self, script: &str, args: Value) -> Result<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    pub async fn quit(self) -> Result<()> {
        self.client.delete(&self.session).send().await?;
        Ok(())
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn navigate(&mut self, url: &Url) -> Result<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url.as_str() })))
            .await?;
        Ok(())
    }

    async fn reload(&mut self) -> Result<()> {
        self.command(Method::POST, "/refresh", Some(json!({}))).await?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<Url> {
        let value = self.command(Method::GET, "/url", None).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| anyhow!("Unexpected url value {value}"))?;
        Ok(Url::parse(raw)?)
    }

    async fn snapshot(&mut self) -> Result<Snapshot> {
        let url = self.current_url().await?;
        let html = self.execute(PAGE_SOURCE, json!([])).await?;
        match html {
            Value::String(html) => Ok(Snapshot::new(url, html)),
            other => bail!("Unexpected page source {other}"),
        }
    }

    async fn click(&mut self, selector: &str) -> Result<bool> {
        let clicked = self.execute(CLICK_VISIBLE, json!([selector])).await?;
        Ok(clicked.as_bool().unwrap_or(false))
    }
}

fn check_error(body: &Value) -> Result<()> {
    if let Some(err_name) = body.pointer("/value/error").and_then(Value::as_str) {
        let message = body
            .pointer("/value/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown webdriver error");
        bail!("{err_name}: {message}");
    }
    Ok(())
}

fn capabilities(browser: BrowserKind, headless: bool, user_agent: &str) -> Value {
    match browser {
        BrowserKind::Firefox => {
            let args = if headless { vec!["-headless"] } else { vec![] };
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "firefox",
                        "acceptInsecureCerts": true,
                        "moz:firefoxOptions": {
                            "args": args,
                            "prefs": { "general.useragent.override": user_agent }
                        }
                    }
                }
            })
        }
        BrowserKind::Chrome => {
            let mut args = vec![
                format!("--user-agent={user_agent}"),
                "--window-size=1400,1200".to_string(),
                "--disable-gpu".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--no-first-run".to_string(),
            ];
            if headless {
                args.push("--headless=new".to_string());
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "chrome",
                        "acceptInsecureCerts": true,
                        "goog:chromeOptions": { "args": args }
                    }
                }
            })
        }
    }
}
