use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use super::{CountUpdate, ReportingClient};
use crate::building::ControlSnapshot;

const CONTROL_PATH: &str = "api/ai/control";
const UPDATE_PATH: &str = "api/ai/update";

#[derive(Clone, Debug)]
pub struct ReportingConfig {
    pub base_url: String,
    /// Bearer credential for update pushes.
    pub auth_token: Option<String>,
    pub control_timeout: Duration,
    pub update_timeout: Duration,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            auth_token: None,
            control_timeout: Duration::from_secs(3),
            update_timeout: Duration::from_secs(10),
        }
    }
}

/// Reporting client for the control backend's REST API.
pub struct HttpReportingClient {
    agent: ureq::Agent,
    control_url: Url,
    update_url: Url,
    auth_header: Option<String>,
    control_timeout: Duration,
    update_timeout: Duration,
}

impl HttpReportingClient {
    pub fn new(config: &ReportingConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .with_context(|| format!("invalid backend url {}", config.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            bail!("backend url must use http or https");
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let control_url = base.join(CONTROL_PATH).context("build control url")?;
        let update_url = base.join(UPDATE_PATH).context("build update url")?;

        let auth_header = config
            .auth_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(|t| format!("Bearer {}", t.trim()));
        if auth_header.is_none() {
            log::warn!("no backend auth token configured; updates are sent unauthenticated");
        }

        Ok(Self {
            agent: ureq::AgentBuilder::new().build(),
            control_url,
            update_url,
            auth_header,
            control_timeout: config.control_timeout,
            update_timeout: config.update_timeout,
        })
    }

    pub fn control_url(&self) -> &str {
        self.control_url.as_str()
    }

    pub fn update_url(&self) -> &str {
        self.update_url.as_str()
    }
}

impl ReportingClient for HttpReportingClient {
    fn fetch_control(&self) -> Result<ControlSnapshot> {
        let response = self
            .agent
            .get(self.control_url.as_str())
            .timeout(self.control_timeout)
            .call()
            .map_err(|err| describe_error("control fetch", err))?;
        let body = response.into_string().context("read control response")?;
        Ok(ControlSnapshot::from_json(body.as_bytes()))
    }

    fn push_update(&self, update: &CountUpdate) -> Result<()> {
        let body = serde_json::to_string(update).context("serialize count update")?;
        let mut request = self
            .agent
            .post(self.update_url.as_str())
            .timeout(self.update_timeout)
            .set("Content-Type", "application/json");
        if let Some(auth) = &self.auth_header {
            request = request.set("Authorization", auth);
        }
        let response = request
            .send_string(&body)
            .map_err(|err| describe_error("count update", err))?;
        if !(200..300).contains(&response.status()) {
            bail!("count update returned status {}", response.status());
        }
        Ok(())
    }
}

fn describe_error(what: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, _) => anyhow!("{} returned status {}", what, code),
        ureq::Error::Transport(transport) => anyhow!("{} failed: {}", what, transport),
    }
}
