mod cli;

use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use tfload::config::LoaderConfig;
use tfload::loader::Loader;
use tfload::state::StateModel;

#[tokio::main]
async fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("TFLOAD_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let command_result = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("Interrupted")),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

async fn run(cli: cli::Cli) -> anyhow::Result<()> {
    enter_directories(&cli.directory)?;

    let mut config = LoaderConfig::new(std::env::current_dir()?);
    if let Some(cache_dir) = cli.cache_dir {
        config = config.with_cache_dir(cache_dir);
    }
    if let Some(fetch_concurrency) = cli.fetch_concurrency {
        config.fetch_concurrency = fetch_concurrency;
    }

    match cli.command {
        cli::Command::Load(load_cli) => load(config, load_cli).await,
        cli::Command::State(state_cli) => state(config, state_cli).await,
    }
}

/// Applies each -C/--directory in order
fn enter_directories(directories: &[PathBuf]) -> anyhow::Result<()> {
    for directory in directories {
        let cwd = directory.canonicalize().with_context(|| {
            format!("Failed to resolve path for -C/--directory {}", directory.display())
        })?;
        std::env::set_current_dir(&cwd)
            .with_context(|| format!("Failed to set work directory to {}", cwd.display()))?;

        tracing::info!(directory=%cwd.display(), "Changed working directory");
    }
    Ok(())
}

#[derive(Serialize)]
struct Summary<'a> {
    files: Vec<&'a str>,
    state: &'a StateModel,
}

async fn load(config: LoaderConfig, cli: cli::LoadCommand) -> anyhow::Result<()> {
    let loader = Loader::new(config);
    let root = loader.config().working_dir.clone();
    tracing::debug!(directory=%root.display(), "loading templates");

    if !cli.modules.is_empty() {
        loader.load_all_templates(&root, &cli.modules).await?;
    } else if cli.no_modules {
        loader.load_directory(&root).await?;
    } else {
        loader.load_project(&root).await?;
    }

    if !cli.no_state {
        // degraded to an empty state, already logged
        let _ = loader.load_state().await;
    }

    let snapshot = loader.snapshot();
    anyhow::ensure!(!snapshot.files.is_empty(), "No files loaded");

    let summary = Summary {
        files: snapshot.files.keys().collect(),
        state: &snapshot.state,
    };
    output(&cli.output, &summary)
}

async fn state(config: LoaderConfig, cli: cli::StateCommand) -> anyhow::Result<()> {
    let loader = Loader::new(config);
    loader.load_state().await?;

    output(&cli.output, loader.snapshot().state.as_ref())
}

fn output(output: &cli::OutputArgs, value: &impl Serialize) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}
