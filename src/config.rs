use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::formats::ApiKeys;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub state_dir: PathBuf,
    /// Extraction waits on a slow upstream data source.
    pub extraction_timeout: Duration,
    /// `None` keeps the HTTP client's default (no deadline).
    pub generation_timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str, state_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            state_dir: state_dir.into(),
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
            generation_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

pub fn normalize_base_url(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        anyhow::bail!("backend url is empty");
    }
    let url = Url::parse(trimmed).with_context(|| format!("invalid backend url: {raw:?}"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => anyhow::bail!("backend url must be http/https, got {other}"),
    }
    Ok(trimmed.to_owned())
}

/// Single source of credentials for the remote invoker.
pub trait CredentialProvider: Send + Sync {
    fn api_key(&self, name: &str) -> Option<String>;
    fn all(&self) -> ApiKeys;
}

#[derive(Debug, Default)]
pub struct StaticCredentials {
    keys: RwLock<ApiKeys>,
}

impl StaticCredentials {
    pub fn new(keys: ApiKeys) -> Self {
        Self {
            keys: RwLock::new(keys),
        }
    }

    pub fn replace(&self, keys: ApiKeys) {
        match self.keys.write() {
            Ok(mut guard) => *guard = keys,
            Err(poisoned) => *poisoned.into_inner() = keys,
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn api_key(&self, name: &str) -> Option<String> {
        let keys = self.keys.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        keys.get(name)
            .map(|k| k.trim().to_owned())
            .filter(|k| !k.is_empty())
    }

    fn all(&self) -> ApiKeys {
        self.keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.clone(), v.trim().to_owned()))
            .collect()
    }
}
