use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::InvokeError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    Auto,
    Openai,
    Gemini,
    Openrouter,
    Claude,
}

impl AiProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            AiProvider::Auto => "auto",
            AiProvider::Openai => "openai",
            AiProvider::Gemini => "gemini",
            AiProvider::Openrouter => "openrouter",
            AiProvider::Claude => "claude",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Extraction,
    Titles,
    Premises,
    Scripts,
    Tts,
    Images,
    Video,
}

impl StageKind {
    pub const ALL: [StageKind; 7] = [
        StageKind::Extraction,
        StageKind::Titles,
        StageKind::Premises,
        StageKind::Scripts,
        StageKind::Tts,
        StageKind::Images,
        StageKind::Video,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Extraction => "extraction",
            StageKind::Titles => "titles",
            StageKind::Premises => "premises",
            StageKind::Scripts => "scripts",
            StageKind::Tts => "tts",
            StageKind::Images => "images",
            StageKind::Video => "video",
        }
    }

    /// Human-readable label shown while the stage runs.
    pub fn label(self) -> &'static str {
        match self {
            StageKind::Extraction => "extracting channel videos",
            StageKind::Titles => "generating titles",
            StageKind::Premises => "generating premises",
            StageKind::Scripts => "generating scripts",
            StageKind::Tts => "synthesizing narration",
            StageKind::Images => "generating images",
            StageKind::Video => "assembling video",
        }
    }

    /// Durable storage key holding the latest result of this stage.
    pub fn cache_key(self) -> &'static str {
        match self {
            StageKind::Extraction => "extracted_titles",
            StageKind::Titles => "generated_titles",
            StageKind::Premises => "generated_premises",
            StageKind::Scripts => "generated_scripts",
            StageKind::Tts => "generated_audio",
            StageKind::Images => "generated_images",
            StageKind::Video => "generated_video",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionFilters {
    pub max_titles: u32,
    pub min_views: u64,
    /// Zero disables the upper bound.
    pub max_views: u64,
    pub days: u32,
}

impl Default for ExtractionFilters {
    fn default() -> Self {
        Self {
            max_titles: 5,
            min_views: 1000,
            max_views: 0,
            days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaSettings {
    pub tts_voice: String,
    pub tts_model: String,
    pub image_provider: String,
    pub image_style: String,
    pub image_format: String,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            tts_voice: "Kore".to_owned(),
            tts_model: "gemini-2.5-flash-preview-tts".to_owned(),
            image_provider: "together".to_owned(),
            image_style: "cinematic, high detail, 4k".to_owned(),
            image_format: "1024x1024".to_owned(),
        }
    }
}

/// Parameters of one workflow run. Built before the run starts and never
/// mutated while it is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    channel: String,
    filters: ExtractionFilters,
    ai_provider: AiProvider,
    model: Option<String>,
    titles_count: u32,
    chapters: u32,
    use_custom_prompt: bool,
    custom_prompt: String,
    auto_select_best: bool,
    topic: Option<String>,
    title_style: String,
    premise_prompt: String,
    media: MediaSettings,
}

impl WorkflowConfig {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            filters: ExtractionFilters::default(),
            ai_provider: AiProvider::Auto,
            model: None,
            titles_count: 5,
            chapters: 8,
            use_custom_prompt: false,
            custom_prompt: String::new(),
            auto_select_best: true,
            topic: None,
            title_style: "viral".to_owned(),
            premise_prompt: String::new(),
            media: MediaSettings::default(),
        }
    }

    pub fn with_filters(mut self, filters: ExtractionFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_ai_provider(mut self, provider: AiProvider) -> Self {
        self.ai_provider = provider;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn with_titles_count(mut self, count: u32) -> Self {
        self.titles_count = count;
        self
    }

    pub fn with_chapters(mut self, chapters: u32) -> Self {
        self.chapters = chapters;
        self
    }

    /// Switches to custom-prompt title generation. `None` switches back to
    /// the topic/style mode.
    pub fn with_custom_prompt(mut self, prompt: Option<String>) -> Self {
        match prompt {
            Some(prompt) => {
                self.use_custom_prompt = true;
                self.custom_prompt = prompt;
            }
            None => {
                self.use_custom_prompt = false;
                self.custom_prompt.clear();
            }
        }
        self
    }

    pub fn with_auto_select_best(mut self, enabled: bool) -> Self {
        self.auto_select_best = enabled;
        self
    }

    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic;
        self
    }

    pub fn with_title_style(mut self, style: impl Into<String>) -> Self {
        self.title_style = style.into();
        self
    }

    pub fn with_premise_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.premise_prompt = prompt.into();
        self
    }

    pub fn with_media(mut self, media: MediaSettings) -> Self {
        self.media = media;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn filters(&self) -> &ExtractionFilters {
        &self.filters
    }

    pub fn ai_provider(&self) -> AiProvider {
        self.ai_provider
    }

    /// Model id forwarded to the backend; `auto` when none was chosen.
    pub fn model_or_auto(&self) -> &str {
        self.model.as_deref().unwrap_or("auto")
    }

    pub fn titles_count(&self) -> u32 {
        self.titles_count
    }

    pub fn chapters(&self) -> u32 {
        self.chapters
    }

    pub fn custom_prompt(&self) -> Option<&str> {
        self.use_custom_prompt.then_some(self.custom_prompt.as_str())
    }

    pub fn auto_select_best(&self) -> bool {
        self.auto_select_best
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn title_style(&self) -> &str {
        &self.title_style
    }

    pub fn premise_prompt(&self) -> &str {
        &self.premise_prompt
    }

    pub fn media(&self) -> &MediaSettings {
        &self.media
    }

    /// Checks everything that can be rejected before touching the network.
    pub fn validate(&self) -> Result<(), InvokeError> {
        if self.channel.trim().is_empty() {
            return Err(InvokeError::configuration("channel URL or id is required"));
        }
        if self.use_custom_prompt && self.custom_prompt.trim().is_empty() {
            return Err(InvokeError::configuration(
                "custom prompt mode is enabled but the prompt is empty",
            ));
        }
        if self.titles_count == 0 {
            return Err(InvokeError::configuration("titles count must be at least 1"));
        }
        if self.chapters == 0 {
            return Err(InvokeError::configuration("chapter count must be at least 1"));
        }
        if self.filters.max_views > 0 && self.filters.min_views > self.filters.max_views {
            return Err(InvokeError::configuration(format!(
                "min views ({}) exceeds max views ({})",
                self.filters.min_views, self.filters.max_views
            )));
        }
        Ok(())
    }

    /// Request body of the backend-driven full automation endpoints.
    pub fn automation_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "channel_url": self.channel,
            "config": {
                "extraction": {
                    "max_titles": self.filters.max_titles,
                    "min_views": self.filters.min_views,
                    "max_views": self.filters.max_views,
                    "days_back": self.filters.days,
                },
                "titles": {
                    "provider": self.ai_provider.as_str(),
                    "custom_prompt": self.use_custom_prompt,
                    "custom_instructions": self.custom_prompt,
                    "count": self.titles_count,
                    "style": self.title_style,
                },
                "premises": {
                    "provider": self.ai_provider.as_str(),
                    "custom_prompt": !self.premise_prompt.is_empty(),
                    "custom_instructions": self.premise_prompt,
                },
                "scripts": {
                    "chapters": self.chapters,
                },
            },
            "ai_provider": self.ai_provider.as_str(),
            "openrouter_model": self.model_or_auto(),
            "auto_select_best": self.auto_select_best,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub title: String,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub total_videos: u64,
    #[serde(default)]
    pub total_views: u64,
    #[serde(default)]
    pub total_likes: u64,
    #[serde(default)]
    pub videos: Vec<Video>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "RawTitle")]
pub struct GeneratedTitle {
    pub title: String,
    pub score: Option<f64>,
    pub reasoning: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTitle {
    Plain(String),
    Scored {
        title: String,
        #[serde(default)]
        score: Option<f64>,
        #[serde(default)]
        reasoning: Option<String>,
    },
}

impl From<RawTitle> for GeneratedTitle {
    fn from(raw: RawTitle) -> Self {
        match raw {
            RawTitle::Plain(title) => Self {
                title,
                score: None,
                reasoning: None,
            },
            RawTitle::Scored {
                title,
                score,
                reasoning,
            } => Self {
                title,
                score,
                reasoning,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TitlesResult {
    pub generated_titles: Vec<GeneratedTitle>,
    #[serde(default)]
    pub ai_provider_used: Option<String>,
    #[serde(default)]
    pub source_titles_count: u64,
    #[serde(default)]
    pub patterns_analysis: Option<serde_json::Value>,
    #[serde(default)]
    pub custom_prompt_used: Option<String>,
}

impl TitlesResult {
    /// Highest score wins; earliest title on ties or when nothing is scored.
    pub fn best(&self) -> Option<&GeneratedTitle> {
        let mut best: Option<&GeneratedTitle> = None;
        for title in &self.generated_titles {
            best = match best {
                None => Some(title),
                Some(current) if title.score.unwrap_or(f64::MIN) > current.score.unwrap_or(f64::MIN) => {
                    Some(title)
                }
                keep => keep,
            };
        }
        best
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Premise {
    pub title: String,
    pub premise: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PremisesResult {
    pub premises: Vec<Premise>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chapter {
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptsResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub premise: Option<String>,
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub total_words: Option<u64>,
}

impl ScriptsResult {
    pub fn full_text(&self) -> String {
        self.chapters
            .iter()
            .map(|chapter| chapter.content.trim())
            .filter(|content| !content.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TtsResult {
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImagesResult {
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoResult {
    #[serde(default)]
    pub video_path: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub resolution: Option<String>,
}

/// Output of one successful stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageResult {
    Extraction(ExtractionResult),
    Titles(TitlesResult),
    Premises(PremisesResult),
    Scripts(ScriptsResult),
    Tts(TtsResult),
    Images(ImagesResult),
    Video(VideoResult),
}

impl StageResult {
    pub fn kind(&self) -> StageKind {
        match self {
            StageResult::Extraction(_) => StageKind::Extraction,
            StageResult::Titles(_) => StageKind::Titles,
            StageResult::Premises(_) => StageKind::Premises,
            StageResult::Scripts(_) => StageKind::Scripts,
            StageResult::Tts(_) => StageKind::Tts,
            StageResult::Images(_) => StageKind::Images,
            StageResult::Video(_) => StageKind::Video,
        }
    }
}

/// Accumulated results of a run, one slot per stage kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub titles: Option<TitlesResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premises: Option<PremisesResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<ScriptsResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<ImagesResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoResult>,
    /// Source titles supplied by hand when extraction found nothing usable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manual_source_titles: Vec<String>,
}

impl StageResults {
    pub fn insert(&mut self, result: StageResult) {
        match result {
            StageResult::Extraction(r) => self.extraction = Some(r),
            StageResult::Titles(r) => self.titles = Some(r),
            StageResult::Premises(r) => self.premises = Some(r),
            StageResult::Scripts(r) => self.scripts = Some(r),
            StageResult::Tts(r) => self.tts = Some(r),
            StageResult::Images(r) => self.images = Some(r),
            StageResult::Video(r) => self.video = Some(r),
        }
    }

    pub fn get(&self, kind: StageKind) -> Option<StageResult> {
        match kind {
            StageKind::Extraction => self.extraction.clone().map(StageResult::Extraction),
            StageKind::Titles => self.titles.clone().map(StageResult::Titles),
            StageKind::Premises => self.premises.clone().map(StageResult::Premises),
            StageKind::Scripts => self.scripts.clone().map(StageResult::Scripts),
            StageKind::Tts => self.tts.clone().map(StageResult::Tts),
            StageKind::Images => self.images.clone().map(StageResult::Images),
            StageKind::Video => self.video.clone().map(StageResult::Video),
        }
    }

    pub fn has(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::Extraction => self.extraction.is_some(),
            StageKind::Titles => self.titles.is_some(),
            StageKind::Premises => self.premises.is_some(),
            StageKind::Scripts => self.scripts.is_some(),
            StageKind::Tts => self.tts.is_some(),
            StageKind::Images => self.images.is_some(),
            StageKind::Video => self.video.is_some(),
        }
    }

    /// Titles the titles stage works from: extracted videos first, manual
    /// titles otherwise.
    pub fn source_titles(&self) -> Vec<String> {
        let extracted: Vec<String> = self
            .extraction
            .iter()
            .flat_map(|r| r.videos.iter())
            .map(|v| v.title.trim().to_owned())
            .filter(|t| !t.is_empty())
            .collect();
        if !extracted.is_empty() {
            return extracted;
        }
        self.manual_source_titles
            .iter()
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Success,
    Warning,
    Error,
    #[serde(other)]
    Other,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// ISO-8601 timestamp from the backend clock; entries sort lexically.
    pub timestamp: String,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

pub type ApiKeys = BTreeMap<String, String>;
