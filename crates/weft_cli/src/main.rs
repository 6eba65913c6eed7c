//! Command-line interface for the weft fork build pipeline.
//!
//! Provides `weft apply-patches` and `weft rebuild-patches` for working on
//! patch stacks, `weft build` and `weft validate` for whole-project runs,
//! `weft create-launcher`, `weft generate-dev-bundle`, and `weft publish`
//! for distribution, and a few inspection commands.

#![warn(missing_docs)]

mod dist;
mod info;
mod patches;
mod pipeline;

use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Builds a fork as patch stacks layered on an upstream project.
#[derive(Parser, Debug)]
#[command(name = "weft", version, about = "Weft patch-stack fork builder")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `weft.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Maximum number of modules processed concurrently (0 = CPU cores).
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the fork version, or the pinned upstream release or ref.
    PrintVersion {
        /// Print the upstream release the binary artifact resolves to.
        #[arg(long, conflicts_with = "upstream")]
        release: bool,

        /// Print the upstream source ref.
        #[arg(long)]
        upstream: bool,
    },
    /// Apply patch stacks to produce module output directories.
    ApplyPatches {
        /// Module to apply, along with its dependencies. All when omitted.
        module: Option<String>,
    },
    /// Regenerate patch files from hand-edited output directories.
    RebuildPatches(RebuildArgs),
    /// Run the full pipeline over every module.
    Build,
    /// Re-apply stacks in scratch and compare with the recorded outputs.
    Validate {
        /// Module to validate, along with its dependencies. All when omitted.
        module: Option<String>,
    },
    /// Show per-module state and hand-edit drift.
    Status,
    /// Build the launcher artifact.
    CreateLauncher,
    /// Build the dev bundle artifact.
    GenerateDevBundle,
    /// Publish the launcher (and optionally the dev bundle).
    Publish {
        /// Also publish the dev bundle.
        #[arg(long)]
        dev_bundle: bool,
    },
    /// Remove cache entries nothing refers to.
    CleanCache,
}

/// Arguments for the `weft rebuild-patches` subcommand.
#[derive(Parser, Debug)]
pub struct RebuildArgs {
    /// Module whose patches to rebuild. All when omitted.
    pub module: Option<String>,

    /// Discard whitespace-only edits and keep patches whose hunks only moved.
    #[arg(long)]
    pub filter_fuzz: bool,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
    /// Worker limit overriding `[build] jobs`.
    pub jobs: Option<usize>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
        jobs: cli.jobs,
    };
    init_logging(&global);

    let result = match cli.command {
        Command::PrintVersion { release, upstream } => info::print_version(release, upstream, &global),
        Command::ApplyPatches { module } => patches::apply(module, &global),
        Command::RebuildPatches(ref args) => patches::rebuild(args, &global),
        Command::Build => patches::build(&global),
        Command::Validate { module } => patches::validate(module, &global),
        Command::Status => info::status(&global),
        Command::CreateLauncher => dist::create_launcher(&global),
        Command::GenerateDevBundle => dist::generate_dev_bundle(&global),
        Command::Publish { dev_bundle } => dist::publish(dev_bundle, &global),
        Command::CleanCache => info::clean_cache(&global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => process::exit(pipeline::report_error(&e)),
    }
}

/// Installs the stderr log subscriber. `WEFT_LOG` takes precedence over the
/// verbosity flags.
fn init_logging(global: &GlobalArgs) {
    let default = if global.verbose {
        "debug"
    } else if global.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_env("WEFT_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
