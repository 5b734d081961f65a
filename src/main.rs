use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use tubeflow::cli::{Cli, Command};
use tubeflow::commands;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    tubeflow::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");
    let global = &cli.global;

    match cli.command {
        Command::Run(args) => commands::run(global, args).await.context("run")?,
        Command::Automate(args) => commands::automate(global, args)
            .await
            .context("automate")?,
        Command::Stage(args) => {
            let stage = args.stage;
            commands::stage(global, args)
                .await
                .with_context(|| format!("stage {stage}"))?;
        }
        Command::Control { signal } => commands::control(global, signal)
            .await
            .context("control")?,
        Command::Logs { command } => commands::logs(global, command).await.context("logs")?,
        Command::Results(args) => commands::results(global, args).context("results")?,
        Command::Keys { command } => commands::keys(global, command).await.context("keys")?,
    }

    Ok(())
}
