use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::config::{ClientConfig, CredentialProvider};
use crate::error::InvokeError;
use crate::formats::{
    ApiKeys, ExtractionResult, ImagesResult, LogEntry, PremisesResult, ScriptsResult, StageKind,
    StageResult, StageResults, TitlesResult, TtsResult, VideoResult, WorkflowConfig,
};
use crate::workflow::request::{StageRequest, TitleMode};

const LOG_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait StageBackend: Send + Sync {
    /// One request/response cycle for one stage. Never panics; every failure
    /// comes back as an `InvokeError`.
    async fn invoke(&self, request: &StageRequest) -> Result<StageResult, InvokeError>;
}

#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch_logs(&self, since: Option<&str>) -> Result<Vec<LogEntry>, InvokeError>;
    async fn clear_logs(&self) -> Result<(), InvokeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Pause,
    Resume,
    Cancel,
}

impl ControlSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlSignal::Pause => "pause",
            ControlSignal::Resume => "resume",
            ControlSignal::Cancel => "cancel",
        }
    }
}

#[async_trait]
pub trait ControlBackend: Send + Sync {
    /// Resolves only once the backend acknowledged the signal.
    async fn signal(&self, signal: ControlSignal) -> Result<(), InvokeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AutomationMode {
    Test,
    Complete,
}

impl AutomationMode {
    fn path(self) -> &'static str {
        match self {
            AutomationMode::Test => "api/workflow/test",
            AutomationMode::Complete => "api/workflow/complete",
        }
    }
}

#[async_trait]
pub trait AutomationBackend: Send + Sync {
    /// Runs the whole pipeline on the backend and returns every stage it
    /// reported as successful.
    async fn run_automation(
        &self,
        config: &WorkflowConfig,
        mode: AutomationMode,
    ) -> Result<StageResults, InvokeError>;
}

pub struct RemoteInvoker {
    client: reqwest::Client,
    config: ClientConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl RemoteInvoker {
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tubeflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn timeout_for(&self, kind: StageKind) -> Option<Duration> {
        match kind {
            StageKind::Extraction => Some(self.config.extraction_timeout),
            _ => self.config.generation_timeout,
        }
    }

    fn require_key(&self, name: &str, purpose: &str) -> Result<String, InvokeError> {
        self.credentials.api_key(name).ok_or_else(|| {
            InvokeError::configuration(format!(
                "{purpose} needs the `{name}` API key; set it with `tubeflow keys set {name}=<key>`"
            ))
        })
    }

    fn stage_call(&self, request: &StageRequest) -> Result<(&'static str, Value), InvokeError> {
        let call = match request {
            StageRequest::Extraction { channel, filters } => (
                "api/automations/extract-youtube",
                json!({
                    "url": channel,
                    "api_key": self.require_key("rapidapi", "channel extraction")?,
                    "config": {
                        "max_titles": filters.max_titles,
                        "min_views": filters.min_views,
                        "max_views": filters.max_views,
                        "days": filters.days,
                    },
                }),
            ),
            StageRequest::Titles {
                source_titles,
                mode: TitleMode::Topic { topic, style },
                count,
                ai_provider,
            } => (
                "api/automations/generate-titles",
                json!({
                    "source_titles": source_titles,
                    "topic": topic,
                    "count": count,
                    "style": style,
                    "ai_provider": ai_provider.as_str(),
                }),
            ),
            StageRequest::Titles {
                source_titles,
                mode: TitleMode::Custom { prompt },
                count,
                ai_provider,
            } => (
                "api/automations/generate-titles-custom",
                json!({
                    "source_titles": source_titles,
                    "custom_prompt": prompt,
                    "count": count,
                    "ai_provider": ai_provider.as_str(),
                }),
            ),
            StageRequest::Premises {
                titles,
                prompt,
                ai_provider,
                model,
            } => (
                "api/premise/generate",
                json!({
                    "titles": titles,
                    "prompt": prompt,
                    "ai_provider": ai_provider.as_str(),
                    "openrouter_model": model,
                    "api_keys": self.credentials.all(),
                }),
            ),
            StageRequest::Scripts {
                title,
                premise,
                ai_provider,
                model,
                chapters,
            } => (
                "api/scripts/generate",
                json!({
                    "title": title,
                    "premise": premise,
                    "ai_provider": ai_provider.as_str(),
                    "openrouter_model": model,
                    "number_of_chapters": chapters,
                    "api_keys": self.credentials.all(),
                }),
            ),
            StageRequest::Tts { text, voice, model } => (
                "api/automations/generate-tts",
                json!({
                    "text": text,
                    "api_key": self.require_key("gemini", "text-to-speech")?,
                    "voice_name": voice,
                    "model": model,
                }),
            ),
            StageRequest::Images {
                script,
                provider,
                style,
                format,
            } => (
                "api/images/generate",
                json!({
                    "script": script,
                    "api_key": self.require_key(provider, "image generation")?,
                    "provider": provider,
                    "style": style,
                    "format": format,
                }),
            ),
        };
        Ok(call)
    }

    async fn post(
        &self,
        path: &str,
        body: &Value,
        timeout: Option<Duration>,
        what: &str,
    ) -> Result<Value, InvokeError> {
        let endpoint = self.config.endpoint(path);
        tracing::debug!(%endpoint, ?timeout, "POST");
        let mut req = self.client.post(&endpoint).json(body);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let response = req
            .send()
            .await
            .map_err(|err| InvokeError::from_reqwest(err, what))?;
        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| InvokeError::from_reqwest(err, what))?;
        read_envelope(what, status, &raw)
    }

    async fn get(&self, url: &str, timeout: Duration, what: &str) -> Result<Value, InvokeError> {
        tracing::debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| InvokeError::from_reqwest(err, what))?;
        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| InvokeError::from_reqwest(err, what))?;
        read_envelope(what, status, &raw)
    }

    pub async fn fetch_api_keys(&self) -> Result<ApiKeys, InvokeError> {
        let value = self
            .get(
                &self.config.endpoint("api/settings/api-keys"),
                CONTROL_TIMEOUT,
                "fetch api keys",
            )
            .await?;
        let keys = value.get("keys").cloned().unwrap_or(Value::Null);
        let keys: ApiKeys = match keys {
            Value::Null => ApiKeys::new(),
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(name, v)| v.as_str().map(|s| (name, s.to_owned())))
                .collect(),
            other => {
                return Err(InvokeError::application(format!(
                    "fetch api keys: unexpected `keys` value: {other}"
                )));
            }
        };
        Ok(keys)
    }

    pub async fn save_api_keys(&self, keys: &ApiKeys) -> Result<(), InvokeError> {
        let body = serde_json::to_value(keys)
            .map_err(|err| InvokeError::configuration(format!("encode api keys: {err}")))?;
        self.post(
            "api/settings/api-keys",
            &body,
            Some(CONTROL_TIMEOUT),
            "save api keys",
        )
        .await?;
        Ok(())
    }

    pub async fn test_api(&self, api_name: &str) -> Result<String, InvokeError> {
        let value = self
            .post(
                "api/settings/test-api",
                &json!({ "api_name": api_name }),
                Some(CONTROL_TIMEOUT),
                "test api",
            )
            .await?;
        Ok(message_of(&value).unwrap_or_else(|| format!("{api_name} responded")))
    }

    pub async fn test_rapidapi(&self) -> Result<String, InvokeError> {
        let api_key = self.require_key("rapidapi", "the RapidAPI test")?;
        let value = self
            .post(
                "api/automations/test-rapidapi",
                &json!({ "api_key": api_key }),
                Some(CONTROL_TIMEOUT),
                "test rapidapi",
            )
            .await?;
        let status = value
            .pointer("/data/status_code")
            .and_then(Value::as_u64)
            .map(|code| format!("upstream answered HTTP {code}"));
        Ok(message_of(&value)
            .or(status)
            .unwrap_or_else(|| "rapidapi responded".to_owned()))
    }
}

#[async_trait]
impl StageBackend for RemoteInvoker {
    async fn invoke(&self, request: &StageRequest) -> Result<StageResult, InvokeError> {
        let kind = request.kind();
        let (path, body) = self.stage_call(request)?;
        let value = self
            .post(path, &body, self.timeout_for(kind), kind.label())
            .await?;
        decode_stage(kind, &value)
    }
}

#[async_trait]
impl LogSource for RemoteInvoker {
    async fn fetch_logs(&self, since: Option<&str>) -> Result<Vec<LogEntry>, InvokeError> {
        let mut url = url::Url::parse(&self.config.endpoint("api/workflow/logs"))
            .map_err(|err| InvokeError::configuration(format!("log endpoint: {err}")))?;
        if let Some(since) = since {
            url.query_pairs_mut().append_pair("since", since);
        }
        let value = self.get(url.as_str(), LOG_POLL_TIMEOUT, "poll logs").await?;
        let logs = value
            .get("logs")
            .or_else(|| value.pointer("/data/logs"))
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(logs)
            .map_err(|err| InvokeError::application(format!("poll logs: malformed entries: {err}")))
    }

    async fn clear_logs(&self) -> Result<(), InvokeError> {
        self.post(
            "api/workflow/logs/clear",
            &json!({}),
            Some(CONTROL_TIMEOUT),
            "clear logs",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ControlBackend for RemoteInvoker {
    async fn signal(&self, signal: ControlSignal) -> Result<(), InvokeError> {
        let what = format!("{} signal", signal.as_str());
        let endpoint = self
            .config
            .endpoint(&format!("api/workflow/{}", signal.as_str()));
        tracing::debug!(%endpoint, "POST");
        let response = self
            .client
            .post(&endpoint)
            .json(&json!({}))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|err| InvokeError::from_reqwest(err, &what))?;
        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| InvokeError::from_reqwest(err, &what))?;
        if raw.trim().is_empty() {
            if status.is_success() {
                return Ok(());
            }
            return Err(InvokeError::application(format!("{what} failed ({status})")));
        }
        read_envelope(&what, status, &raw).map(|_| ())
    }
}

#[async_trait]
impl AutomationBackend for RemoteInvoker {
    async fn run_automation(
        &self,
        config: &WorkflowConfig,
        mode: AutomationMode,
    ) -> Result<StageResults, InvokeError> {
        let mut body = config.automation_payload();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("api_keys".to_owned(), json!(self.credentials.all()));
        }
        let value = self
            .post(
                mode.path(),
                &body,
                self.config.generation_timeout,
                "full automation",
            )
            .await?;
        decode_bundle(&value)
    }
}

fn message_of(value: &Value) -> Option<String> {
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn truncate(raw: &str) -> String {
    const LIMIT: usize = 300;
    let raw = raw.trim();
    match raw.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}…", &raw[..idx]),
        None => raw.to_owned(),
    }
}

/// Splits a backend reply into payload or failure. `success: false` always
/// wins, whatever the HTTP status.
pub(crate) fn read_envelope(what: &str, status: StatusCode, raw: &str) -> Result<Value, InvokeError> {
    let parsed: Option<Value> = serde_json::from_str(raw).ok();
    match parsed {
        Some(value) if value.get("success").and_then(Value::as_bool) == Some(false) => {
            let message = message_of(&value).unwrap_or_else(|| format!("{what} failed"));
            Err(InvokeError::application(message))
        }
        Some(value) if status.is_success() => Ok(value),
        Some(value) => {
            let detail = message_of(&value).unwrap_or_else(|| truncate(raw));
            Err(InvokeError::application(format!("{what} failed ({status}): {detail}")))
        }
        None if status.is_success() => Err(InvokeError::application(format!(
            "{what}: response is not JSON: {}",
            truncate(raw)
        ))),
        None => Err(InvokeError::application(format!(
            "{what} failed ({status}): {}",
            truncate(raw)
        ))),
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    kind: StageKind,
    value: Option<&Value>,
) -> Result<T, InvokeError> {
    let value = value.ok_or_else(|| {
        InvokeError::application(format!("malformed {kind} response: payload is missing"))
    })?;
    serde_json::from_value(value.clone())
        .map_err(|err| InvokeError::application(format!("malformed {kind} response: {err}")))
}

/// Decodes a successful stage envelope into its typed result.
pub(crate) fn decode_stage(kind: StageKind, value: &Value) -> Result<StageResult, InvokeError> {
    let data_or_self = value.get("data").unwrap_or(value);
    let result = match kind {
        StageKind::Extraction => {
            StageResult::Extraction(decode::<ExtractionResult>(kind, value.get("data"))?)
        }
        StageKind::Titles => StageResult::Titles(decode::<TitlesResult>(kind, value.get("data"))?),
        StageKind::Premises => StageResult::Premises(decode::<PremisesResult>(kind, Some(value))?),
        StageKind::Scripts => {
            StageResult::Scripts(decode::<ScriptsResult>(kind, value.get("scripts"))?)
        }
        StageKind::Tts => StageResult::Tts(decode::<TtsResult>(kind, Some(data_or_self))?),
        StageKind::Images => StageResult::Images(decode::<ImagesResult>(kind, Some(value))?),
        StageKind::Video => StageResult::Video(decode::<VideoResult>(kind, Some(data_or_self))?),
    };
    Ok(result)
}

/// Decodes `{results: {<stage>: <stage envelope>, ...}}`. Entries the backend
/// marked as failed are skipped.
pub(crate) fn decode_bundle(value: &Value) -> Result<StageResults, InvokeError> {
    let Some(entries) = value.get("results").and_then(Value::as_object) else {
        return Err(InvokeError::application(
            "full automation: response has no `results` object",
        ));
    };
    let mut results = StageResults::default();
    for kind in StageKind::ALL {
        let Some(entry) = entries.get(kind.as_str()) else {
            continue;
        };
        if entry.is_null() || entry.get("success").and_then(Value::as_bool) == Some(false) {
            tracing::warn!(stage = %kind, "backend reported the stage as failed; skipping");
            continue;
        }
        results.insert(decode_stage(kind, entry)?);
    }
    Ok(results)
}
