//! tfload cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;
use tfload::source::ModuleReference;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; tfload ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    /// Module cache directory
    #[clap(long = "cache-dir", env = "TFLOAD_CACHE_DIR", global(true))]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of module fetches running at the same time
    #[clap(long = "fetch-concurrency", env = "TFLOAD_FETCH_CONCURRENCY", global(true))]
    pub fetch_concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load templates, modules and state of the work directory
    Load(LoadCommand),

    /// Print the normalized state of the work directory
    State(StateCommand),
}

#[derive(Parser, Debug)]
pub struct LoadCommand {
    /// Load a module in addition to the templates (alias=source)
    ///
    /// Replaces the modules declared in the templates.
    #[clap(short = 'm', long = "module", value_parser = parse_module_reference)]
    pub modules: Vec<ModuleReference>,

    /// Only load the templates of the work directory
    #[clap(long = "no-modules", conflicts_with("modules"))]
    pub no_modules: bool,

    /// Skip loading state
    #[clap(long = "no-state")]
    pub no_state: bool,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct StateCommand {
    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

fn parse_module_reference(value: &str) -> Result<ModuleReference, String> {
    match value.split_once('=') {
        Some((alias, source)) if !alias.is_empty() && !source.is_empty() => {
            Ok(ModuleReference::new(alias, source))
        }
        _ => Err(format!("expected alias=source, got \"{value}\"")),
    }
}
