use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{ClientConfig, DEFAULT_BACKEND_URL};
use crate::formats::{AiProvider, ExtractionFilters, MediaSettings, StageKind, WorkflowConfig};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Base URL of the production backend.
    #[arg(long, global = true, env = "TUBEFLOW_BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
    pub backend_url: String,

    /// Directory holding cached results and API keys.
    #[arg(long, global = true, env = "TUBEFLOW_STATE_DIR", default_value = ".tubeflow")]
    pub state_dir: PathBuf,

    /// Deadline for the channel extraction call.
    #[arg(long, global = true, env = "TUBEFLOW_EXTRACTION_TIMEOUT_SECS", default_value_t = 120)]
    pub extraction_timeout_secs: u64,

    /// Deadline for generation calls (default: none).
    #[arg(long, global = true, env = "TUBEFLOW_GENERATION_TIMEOUT_SECS")]
    pub generation_timeout_secs: Option<u64>,

    /// How often the backend log is polled while a run is active.
    #[arg(long, global = true, env = "TUBEFLOW_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,
}

impl GlobalArgs {
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::new(&self.backend_url, &self.state_dir)?;
        config.extraction_timeout = Duration::from_secs(self.extraction_timeout_secs);
        config.generation_timeout = self.generation_timeout_secs.map(Duration::from_secs);
        config.poll_interval = Duration::from_millis(self.poll_interval_ms.max(10));
        Ok(config)
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the stage plan from this client, one stage at a time.
    Run(RunArgs),
    /// Let the backend run the whole pipeline in one call.
    Automate(AutomateArgs),
    /// Re-run a single stage on top of cached results.
    Stage(StageArgs),
    /// Send pause/resume/cancel to the backend pipeline.
    Control {
        #[arg(value_enum)]
        signal: SignalArg,
    },
    Logs {
        #[command(subcommand)]
        command: LogsCommand,
    },
    /// Print cached stage results.
    Results(ResultsArgs),
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SignalArg {
    Pause,
    Resume,
    Cancel,
}

#[derive(Debug, Args)]
pub struct WorkflowArgs {
    /// Channel URL, @handle or channel id.
    #[arg(long)]
    pub channel: String,

    /// Maximum number of videos to extract.
    #[arg(long, default_value_t = 5)]
    pub max_titles: u32,

    #[arg(long, default_value_t = 1000)]
    pub min_views: u64,

    /// Upper view bound (0 disables it).
    #[arg(long, default_value_t = 0)]
    pub max_views: u64,

    /// Only videos published in the last N days.
    #[arg(long, default_value_t = 30)]
    pub days: u32,

    #[arg(long, value_enum, default_value_t = AiProvider::Auto)]
    pub ai_provider: AiProvider,

    /// Model id for providers that take one (default: auto).
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, default_value_t = 5)]
    pub titles_count: u32,

    #[arg(long, default_value_t = 8)]
    pub chapters: u32,

    /// Generate titles from this prompt instead of topic/style.
    #[arg(long)]
    pub custom_prompt: Option<String>,

    /// Topic for title generation (default: channel name).
    #[arg(long)]
    pub topic: Option<String>,

    #[arg(long, default_value = "viral")]
    pub title_style: String,

    /// Extra instructions for premise generation.
    #[arg(long, default_value = "")]
    pub premise_prompt: String,

    /// Request premises for every generated title, not only the best one.
    #[arg(long)]
    pub no_auto_select: bool,

    #[arg(long)]
    pub tts_voice: Option<String>,

    #[arg(long)]
    pub tts_model: Option<String>,

    #[arg(long)]
    pub image_provider: Option<String>,

    #[arg(long)]
    pub image_style: Option<String>,

    #[arg(long)]
    pub image_format: Option<String>,
}

impl WorkflowArgs {
    pub fn to_config(&self) -> WorkflowConfig {
        let defaults = MediaSettings::default();
        let media = MediaSettings {
            tts_voice: self.tts_voice.clone().unwrap_or(defaults.tts_voice),
            tts_model: self.tts_model.clone().unwrap_or(defaults.tts_model),
            image_provider: self.image_provider.clone().unwrap_or(defaults.image_provider),
            image_style: self.image_style.clone().unwrap_or(defaults.image_style),
            image_format: self.image_format.clone().unwrap_or(defaults.image_format),
        };
        WorkflowConfig::new(self.channel.clone())
            .with_filters(ExtractionFilters {
                max_titles: self.max_titles,
                min_views: self.min_views,
                max_views: self.max_views,
                days: self.days,
            })
            .with_ai_provider(self.ai_provider)
            .with_model(self.model.clone())
            .with_titles_count(self.titles_count)
            .with_chapters(self.chapters)
            .with_custom_prompt(self.custom_prompt.clone())
            .with_topic(self.topic.clone())
            .with_title_style(self.title_style.clone())
            .with_premise_prompt(self.premise_prompt.clone())
            .with_auto_select_best(!self.no_auto_select)
            .with_media(media)
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,

    /// Continue with narration and images after scripts.
    #[arg(long)]
    pub extended: bool,

    /// Source title to use when extraction finds nothing (repeatable).
    #[arg(long = "source-title")]
    pub source_titles: Vec<String>,
}

#[derive(Debug, Args)]
pub struct AutomateArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,

    /// Use the backend's quick test pipeline.
    #[arg(long)]
    pub test: bool,
}

#[derive(Debug, Args)]
pub struct StageArgs {
    #[arg(value_enum)]
    pub stage: StageKind,

    #[command(flatten)]
    pub workflow: WorkflowArgs,

    /// Source title to use when extraction finds nothing (repeatable).
    #[arg(long = "source-title")]
    pub source_titles: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// Print the backend log.
    Show {
        /// Only entries after this timestamp.
        #[arg(long)]
        since: Option<String>,

        /// Keep polling until interrupted.
        #[arg(long)]
        follow: bool,
    },
    /// Clear the backend log.
    Clear,
}

#[derive(Debug, Args)]
pub struct ResultsArgs {
    /// Stage to print (default: all).
    #[arg(value_enum)]
    pub stage: Option<StageKind>,
}

#[derive(Debug, Subcommand)]
pub enum KeysCommand {
    /// List locally stored keys (masked).
    Show,
    /// Store keys locally, as NAME=VALUE.
    Set {
        #[arg(required = true, value_parser = parse_key_value)]
        pairs: Vec<(String, String)>,
    },
    /// Upload local keys to the backend.
    Push,
    /// Download the backend's keys into local storage.
    Pull,
    /// Ask the backend to test one provider's key.
    Test { name: String },
    /// Ask the backend to test the RapidAPI key.
    TestRapidapi,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing key name in {raw:?}"));
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}
