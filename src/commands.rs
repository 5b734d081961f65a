use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::{LocalFsResultCache, ResultCache};
use crate::cli::{
    AutomateArgs, GlobalArgs, KeysCommand, LogsCommand, ResultsArgs, RunArgs, SignalArg, StageArgs,
};
use crate::config::{ClientConfig, StaticCredentials};
use crate::error::InvokeError;
use crate::formats::{ApiKeys, StageKind, StageResults};
use crate::invoker::{AutomationMode, ControlBackend, ControlSignal, LogSource, RemoteInvoker};
use crate::store::{API_KEYS_KEY, LocalStore};
use crate::workflow::{
    Collaborators, RunControl, RunHandle, RunOutcome, RunState, StagePlan, WorkflowController,
};

/// Everything a command needs, built once from the global flags.
struct Session {
    client: ClientConfig,
    store: LocalStore,
    invoker: Arc<RemoteInvoker>,
}

impl Session {
    fn open(global: &GlobalArgs) -> anyhow::Result<Self> {
        let client = global.client_config().context("backend config")?;
        let store = LocalStore::new(&client.state_dir);
        let keys: ApiKeys = store
            .read(API_KEYS_KEY)
            .context("load api keys")?
            .unwrap_or_default();
        let credentials = Arc::new(StaticCredentials::new(keys));
        let invoker = Arc::new(RemoteInvoker::new(client.clone(), credentials)?);
        Ok(Self {
            client,
            store,
            invoker,
        })
    }

    fn cache(&self) -> LocalFsResultCache {
        LocalFsResultCache::new(self.store.clone())
    }

    fn controller(&self) -> WorkflowController {
        WorkflowController::new(
            Collaborators::remote(self.invoker.clone()),
            Arc::new(self.cache()),
            self.client.poll_interval,
        )
    }
}

pub async fn run(global: &GlobalArgs, args: RunArgs) -> anyhow::Result<()> {
    let session = Session::open(global)?;
    let controller = session.controller();
    let config = args.workflow.to_config();
    let plan = if args.extended {
        StagePlan::extended()
    } else {
        StagePlan::complete()
    };
    let seed = StageResults {
        manual_source_titles: args.source_titles,
        ..StageResults::default()
    };

    let outcome = drive(&controller, controller.run(&config, plan, seed)).await?;
    report(outcome)
}

pub async fn automate(global: &GlobalArgs, args: AutomateArgs) -> anyhow::Result<()> {
    let session = Session::open(global)?;
    let controller = session.controller();
    let config = args.workflow.to_config();
    let mode = if args.test {
        AutomationMode::Test
    } else {
        AutomationMode::Complete
    };

    let outcome = drive(&controller, controller.run_remote(&config, mode)).await?;
    report(outcome)
}

pub async fn stage(global: &GlobalArgs, args: StageArgs) -> anyhow::Result<()> {
    let session = Session::open(global)?;
    let controller = session.controller();
    let config = args.workflow.to_config();
    let mut seed = controller.cached_results()?;
    if !args.source_titles.is_empty() {
        seed.manual_source_titles = args.source_titles;
    }

    let outcome = drive(
        &controller,
        controller.run(&config, StagePlan::single(args.stage), seed),
    )
    .await?;
    match &outcome {
        RunOutcome::Completed(results) => {
            if let Some(result) = results.get(args.stage) {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Ok(())
        }
        _ => report(outcome),
    }
}

/// Signals go straight to the backend: the pipeline they target may have
/// been started by another client.
pub async fn control(global: &GlobalArgs, signal: SignalArg) -> anyhow::Result<()> {
    let session = Session::open(global)?;
    let signal = match signal {
        SignalArg::Pause => ControlSignal::Pause,
        SignalArg::Resume => ControlSignal::Resume,
        SignalArg::Cancel => ControlSignal::Cancel,
    };
    session.invoker.signal(signal).await.map_err(with_guidance)?;
    println!("{} acknowledged", signal.as_str());
    Ok(())
}

pub async fn logs(global: &GlobalArgs, command: LogsCommand) -> anyhow::Result<()> {
    let session = Session::open(global)?;
    match command {
        LogsCommand::Clear => {
            session.invoker.clear_logs().await.map_err(with_guidance)?;
            println!("backend log cleared");
        }
        LogsCommand::Show { since, follow } => {
            let mut cursor = since;
            loop {
                let entries = session
                    .invoker
                    .fetch_logs(cursor.as_deref())
                    .await
                    .map_err(with_guidance)?;
                for entry in entries {
                    if cursor.as_deref().is_some_and(|c| entry.timestamp.as_str() <= c) {
                        continue;
                    }
                    println!("{}", log_line(&entry));
                    cursor = Some(entry.timestamp);
                }
                if !follow {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(session.client.poll_interval) => {}
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }
    Ok(())
}

pub fn results(global: &GlobalArgs, args: ResultsArgs) -> anyhow::Result<()> {
    let client = global.client_config().context("backend config")?;
    let cache = LocalFsResultCache::new(LocalStore::new(&client.state_dir));
    match args.stage {
        Some(kind) => match cache.load(kind)? {
            Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            None => println!("nothing generated yet for {kind}"),
        },
        None => {
            let results = StageResults::rehydrate(&cache)?;
            if StageKind::ALL.iter().all(|kind| !results.has(*kind)) {
                println!("nothing generated yet");
            } else {
                for line in summarize(&results) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

pub async fn keys(global: &GlobalArgs, command: KeysCommand) -> anyhow::Result<()> {
    let client = global.client_config().context("backend config")?;
    let store = LocalStore::new(&client.state_dir);
    let mut keys: ApiKeys = store
        .read(API_KEYS_KEY)
        .context("load api keys")?
        .unwrap_or_default();

    match command {
        KeysCommand::Show => {
            if keys.is_empty() {
                println!("no api keys stored");
            }
            for (name, value) in &keys {
                println!("{name}: {}", mask(value));
            }
        }
        KeysCommand::Set { pairs } => {
            for (name, value) in pairs {
                if value.is_empty() {
                    keys.remove(&name);
                } else {
                    keys.insert(name, value);
                }
            }
            store.write(API_KEYS_KEY, &keys).context("save api keys")?;
            println!("stored {} api key(s)", keys.len());
        }
        KeysCommand::Push => {
            let session = Session::open(global)?;
            session
                .invoker
                .save_api_keys(&keys)
                .await
                .map_err(with_guidance)?;
            println!("pushed {} api key(s) to the backend", keys.len());
        }
        KeysCommand::Pull => {
            let session = Session::open(global)?;
            let remote = session.invoker.fetch_api_keys().await.map_err(with_guidance)?;
            keys.extend(remote.into_iter().filter(|(_, v)| !v.trim().is_empty()));
            store.write(API_KEYS_KEY, &keys).context("save api keys")?;
            println!("stored {} api key(s)", keys.len());
        }
        KeysCommand::Test { name } => {
            let session = Session::open(global)?;
            let message = session.invoker.test_api(&name).await.map_err(with_guidance)?;
            println!("{name}: {message}");
        }
        KeysCommand::TestRapidapi => {
            let session = Session::open(global)?;
            let message = session.invoker.test_rapidapi().await.map_err(with_guidance)?;
            println!("rapidapi: {message}");
        }
    }
    Ok(())
}

/// Runs `run` while rendering progress to stderr. The first Ctrl-C cancels
/// the run; a second one stops waiting for it. Lines typed on stdin
/// (`pause`, `resume`, `cancel`) drive run control.
async fn drive<F>(controller: &WorkflowController, run: F) -> anyhow::Result<RunOutcome>
where
    F: Future<Output = Result<RunOutcome, InvokeError>>,
{
    let control = controller.run_control();
    let done = CancellationToken::new();
    let renderer = tokio::spawn(render_progress(controller.run_handle(), done.clone()));
    let mut input = spawn_stdin_reader();
    let mut input_open = true;
    let mut interrupts = 0u8;

    tokio::pin!(run);
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome.map_err(with_guidance),
            signal = tokio::signal::ctrl_c(), if interrupts < 2 => {
                if let Err(err) = signal {
                    tracing::warn!(%err, "cannot listen for Ctrl-C");
                    interrupts = 2;
                    continue;
                }
                interrupts += 1;
                if interrupts > 1 {
                    break Err(anyhow::anyhow!("interrupted"));
                }
                eprintln!("cancelling run (press Ctrl-C again to stop waiting)");
                if let Err(err) = control.cancel().await {
                    eprintln!("cancel failed: {err}");
                }
            }
            line = input.recv(), if input_open => match line {
                Some(line) => apply_control_line(&control, &line).await,
                None => input_open = false,
            },
        }
    };

    done.cancel();
    if let Err(err) = renderer.await {
        tracing::warn!(%err, "progress renderer failed");
    }
    outcome
}

async fn apply_control_line(control: &RunControl, line: &str) {
    let result = match line.trim() {
        "" => return,
        "p" | "pause" => control.pause().await,
        "r" | "resume" => control.resume().await,
        "c" | "cancel" => control.cancel().await,
        other => {
            eprintln!("unknown command {other:?} (pause, resume or cancel)");
            return;
        }
    };
    if let Err(err) = result {
        eprintln!("{err}");
    }
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn render_progress(run: RunHandle, done: CancellationToken) {
    let mut rx = run.subscribe();
    let mut view = ProgressView::default();
    loop {
        let state = rx.borrow_and_update().clone();
        for line in view.lines(&state) {
            eprintln!("{line}");
        }
        tokio::select! {
            _ = done.cancelled() => break,
            changed = rx.changed() => if changed.is_err() { break },
        }
    }
    for line in view.lines(&run.snapshot()) {
        eprintln!("{line}");
    }
}

/// Turns successive run states into the lines not shown yet.
#[derive(Debug, Default)]
struct ProgressView {
    printed_logs: usize,
    last_status: String,
}

impl ProgressView {
    fn lines(&mut self, state: &RunState) -> Vec<String> {
        let mut lines = Vec::new();
        if state.log.len() < self.printed_logs {
            self.printed_logs = 0;
        }
        for entry in &state.log[self.printed_logs..] {
            lines.push(log_line(entry));
        }
        self.printed_logs = state.log.len();

        if !state.stage_label.is_empty() {
            let paused = if state.paused { " [paused]" } else { "" };
            let status = format!("==> {} ({}%){paused}", state.stage_label, state.percent());
            if status != self.last_status {
                lines.push(status.clone());
                self.last_status = status;
            }
        }
        lines
    }
}

fn log_line(entry: &crate::formats::LogEntry) -> String {
    let time = entry
        .timestamp
        .split_once('T')
        .map_or(entry.timestamp.as_str(), |(_, t)| t);
    let time = time.split('.').next().unwrap_or(time);
    format!("{time} {:<7} {}", entry.level.as_str(), entry.message)
}

fn report(outcome: RunOutcome) -> anyhow::Result<()> {
    match outcome {
        RunOutcome::Completed(results) => {
            for line in summarize(&results) {
                println!("{line}");
            }
            Ok(())
        }
        RunOutcome::Blocked { blocked, results } => {
            for line in summarize(&results) {
                println!("{line}");
            }
            eprintln!("warning: {blocked}");
            Ok(())
        }
        RunOutcome::Cancelled { .. } => {
            eprintln!("run cancelled");
            Ok(())
        }
        RunOutcome::Halted { stage, error, .. } => {
            let err = with_guidance(error);
            match stage {
                Some(stage) => Err(err.context(format!("{stage} failed"))),
                None => Err(err.context("automation failed")),
            }
        }
    }
}

fn with_guidance(err: InvokeError) -> anyhow::Error {
    match err.guidance() {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => anyhow::Error::new(err),
    }
}

fn summarize(results: &StageResults) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(e) = &results.extraction {
        lines.push(format!(
            "extraction: {} video(s) from {}",
            e.videos.len(),
            e.channel_name
        ));
    }
    if let Some(t) = &results.titles {
        lines.push(format!("titles: {} generated", t.generated_titles.len()));
        if let Some(best) = t.best() {
            lines.push(format!("  best: {}", best.title));
        }
    }
    if let Some(p) = &results.premises {
        lines.push(format!("premises: {}", p.premises.len()));
        for premise in &p.premises {
            lines.push(format!("  {}", premise.title));
        }
    }
    if let Some(s) = &results.scripts {
        lines.push(format!("script: {} ({} chapters)", s.title, s.chapters.len()));
    }
    if let Some(t) = &results.tts {
        lines.push(format!(
            "narration: {}",
            t.audio_url.as_deref().or(t.filename.as_deref()).unwrap_or("ready")
        ));
    }
    if let Some(i) = &results.images {
        lines.push(format!("images: {}", i.image_urls.len()));
    }
    if let Some(v) = &results.video {
        lines.push(format!(
            "video: {}",
            v.video_path.as_deref().or(v.filename.as_deref()).unwrap_or("ready")
        ));
    }
    lines
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
