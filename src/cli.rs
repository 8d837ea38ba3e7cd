use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::PathBuf;

use crate::commands::{self, merge, replace, status, verify};
use crate::logging;
use crate::pipeline::config::load_config;
use crate::pipeline::paths::resolve_paths;

#[derive(Parser, Debug)]
#[command(
    name = "vmsync",
    version,
    about = "Reconcile video manifests and bulk-replace the video metadata collection"
)]
struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct ManifestArgs {
    /// Canonical video/plan manifest (defaults to manifest.videos_csv)
    #[arg(long)]
    videos: Option<PathBuf>,
    /// Thumbnail URL manifest (defaults to manifest.thumbnails_csv)
    #[arg(long)]
    thumbnails: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Join the manifests and write the merged CSV
    Merge {
        #[command(flatten)]
        manifests: ManifestArgs,
        /// Output path (defaults to manifest.merged_csv)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete every remote document, then insert the reconciled records
    Replace {
        #[command(flatten)]
        manifests: ManifestArgs,
        /// Continue the unfinished run recorded in the checkpoint
        #[arg(long, conflicts_with = "discard_checkpoint")]
        resume: bool,
        /// Drop an unfinished checkpoint and start a new run
        #[arg(long)]
        discard_checkpoint: bool,
    },
    /// Compare remote documents against the manifests
    Verify {
        #[command(flatten)]
        manifests: ManifestArgs,
        /// Number of evenly spaced documents to spot-check
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        sample_size: Option<u64>,
    },
    /// Show resolved configuration and the last replace checkpoint
    Status,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = resolve_paths()?;
    let _log_guard = logging::init(&paths.logs_dir)?;
    let loaded = load_config()?;
    let cfg = &loaded.config;

    let report = match cli.command {
        Command::Merge { manifests, output } => merge::run(
            &merge::MergeOptions {
                videos: manifests.videos,
                thumbnails: manifests.thumbnails,
                output,
            },
            cfg,
        )?,
        Command::Replace {
            manifests,
            resume,
            discard_checkpoint,
        } => {
            let opts = replace::ReplaceOptions {
                videos: manifests.videos,
                thumbnails: manifests.thumbnails,
                resume,
                discard_checkpoint,
            };
            let stdin = io::stdin();
            replace::run(&opts, cfg, &paths, &mut stdin.lock(), &mut io::stderr())?
        }
        Command::Verify {
            manifests,
            sample_size,
        } => verify::run(
            &verify::VerifyOptions {
                videos: manifests.videos,
                thumbnails: manifests.thumbnails,
                sample_size: sample_size.map(|n| n as usize),
            },
            cfg,
            &paths,
        )?,
        Command::Status => status::run(&loaded, &paths)?,
    };

    commands::print_report(&report, cli.json)
}
