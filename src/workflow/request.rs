use crate::formats::{AiProvider, ExtractionFilters, StageKind, StageResults, WorkflowConfig};

/// How the titles stage asks for titles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleMode {
    Topic { topic: String, style: String },
    Custom { prompt: String },
}

/// Everything one stage call needs, derived from the run configuration and
/// the results of earlier stages. Credentials are added by the invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageRequest {
    Extraction {
        channel: String,
        filters: ExtractionFilters,
    },
    Titles {
        source_titles: Vec<String>,
        mode: TitleMode,
        count: u32,
        ai_provider: AiProvider,
    },
    Premises {
        titles: Vec<String>,
        prompt: String,
        ai_provider: AiProvider,
        model: String,
    },
    Scripts {
        title: String,
        premise: String,
        ai_provider: AiProvider,
        model: String,
        chapters: u32,
    },
    Tts {
        text: String,
        voice: String,
        model: String,
    },
    Images {
        script: String,
        provider: String,
        style: String,
        format: String,
    },
}

/// A stage whose prerequisites are missing. Not a failure: the user can fix
/// the inputs and start the stage again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBlocked {
    pub stage: StageKind,
    pub warning: String,
}

impl StageBlocked {
    fn new(stage: StageKind, warning: impl Into<String>) -> Self {
        Self {
            stage,
            warning: warning.into(),
        }
    }
}

impl std::fmt::Display for StageBlocked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} blocked: {}", self.stage, self.warning)
    }
}

impl StageRequest {
    pub fn kind(&self) -> StageKind {
        match self {
            StageRequest::Extraction { .. } => StageKind::Extraction,
            StageRequest::Titles { .. } => StageKind::Titles,
            StageRequest::Premises { .. } => StageKind::Premises,
            StageRequest::Scripts { .. } => StageKind::Scripts,
            StageRequest::Tts { .. } => StageKind::Tts,
            StageRequest::Images { .. } => StageKind::Images,
        }
    }

    pub fn build(
        stage: StageKind,
        config: &WorkflowConfig,
        results: &StageResults,
    ) -> Result<Self, StageBlocked> {
        match stage {
            StageKind::Extraction => Ok(StageRequest::Extraction {
                channel: config.channel().trim().to_owned(),
                filters: config.filters().clone(),
            }),
            StageKind::Titles => {
                let source_titles = results.source_titles();
                if source_titles.is_empty() {
                    let warning = match &results.extraction {
                        Some(_) => {
                            "no videos found, adjust filters and re-run extraction or supply source titles"
                        }
                        None => "run extraction first or supply source titles",
                    };
                    return Err(StageBlocked::new(stage, warning));
                }
                let mode = match config.custom_prompt() {
                    Some(prompt) => TitleMode::Custom {
                        prompt: prompt.to_owned(),
                    },
                    None => TitleMode::Topic {
                        topic: config
                            .topic()
                            .map(str::to_owned)
                            .or_else(|| results.extraction.as_ref().map(|e| e.channel_name.clone()))
                            .unwrap_or_default(),
                        style: config.title_style().to_owned(),
                    },
                };
                Ok(StageRequest::Titles {
                    source_titles,
                    mode,
                    count: config.titles_count(),
                    ai_provider: config.ai_provider(),
                })
            }
            StageKind::Premises => {
                let Some(titles) = results.titles.as_ref() else {
                    return Err(StageBlocked::new(stage, "generate titles first"));
                };
                let selected: Vec<String> = if config.auto_select_best() {
                    titles.best().map(|t| t.title.clone()).into_iter().collect()
                } else {
                    titles
                        .generated_titles
                        .iter()
                        .map(|t| t.title.clone())
                        .collect()
                };
                let selected: Vec<String> = selected
                    .into_iter()
                    .filter(|t| !t.trim().is_empty())
                    .collect();
                if selected.is_empty() {
                    return Err(StageBlocked::new(
                        stage,
                        "title generation returned no titles",
                    ));
                }
                Ok(StageRequest::Premises {
                    titles: selected,
                    prompt: config.premise_prompt().to_owned(),
                    ai_provider: config.ai_provider(),
                    model: config.model_or_auto().to_owned(),
                })
            }
            StageKind::Scripts => {
                let premise = results
                    .premises
                    .as_ref()
                    .and_then(|p| {
                        p.premises
                            .iter()
                            .find(|p| !p.title.trim().is_empty() && !p.premise.trim().is_empty())
                    })
                    .ok_or_else(|| {
                        StageBlocked::new(stage, "a title and a premise are required")
                    })?;
                Ok(StageRequest::Scripts {
                    title: premise.title.clone(),
                    premise: premise.premise.clone(),
                    ai_provider: config.ai_provider(),
                    model: config.model_or_auto().to_owned(),
                    chapters: config.chapters(),
                })
            }
            StageKind::Tts => {
                let text = script_text(results)
                    .ok_or_else(|| StageBlocked::new(stage, "generate scripts first"))?;
                Ok(StageRequest::Tts {
                    text,
                    voice: config.media().tts_voice.clone(),
                    model: config.media().tts_model.clone(),
                })
            }
            StageKind::Images => {
                let script = script_text(results)
                    .ok_or_else(|| StageBlocked::new(stage, "generate scripts first"))?;
                let media = config.media();
                Ok(StageRequest::Images {
                    script,
                    provider: media.image_provider.clone(),
                    style: media.image_style.clone(),
                    format: media.image_format.clone(),
                })
            }
            StageKind::Video => Err(StageBlocked::new(
                stage,
                "video assembly only runs inside backend-driven automation",
            )),
        }
    }
}

fn script_text(results: &StageResults) -> Option<String> {
    let text = results.scripts.as_ref()?.full_text();
    (!text.is_empty()).then_some(text)
}
