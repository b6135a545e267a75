//! dimg - incremental multi-image container builder
//!
//! ## Commands
//!
//! - `build`: build every missing stage layer of the selected images
//! - `stages`: print each stage signature and whether it is cached

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

use dimg_core::{
    init_tracing, BuildReport, Conveyor, ConveyorOptions, Dappfile, DimgError, DockerBackend,
    StageStatus, DEFAULT_PATCH_SIZE_STEP,
};

#[derive(Parser)]
#[command(name = "dimg")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incremental multi-image container builder", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the selected images (all shippable images by default)
    Build {
        #[command(flatten)]
        project: ProjectArgs,

        /// Print the build report as JSON
        #[arg(long)]
        report: bool,
    },

    /// Show stage signatures and cache status without building
    Stages {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

#[derive(Args)]
struct ProjectArgs {
    /// Resolved image configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Project directory (git checkout providing local git artifacts)
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Persistent build cache directory (default: <dir>/.dimg_build)
    #[arg(long, env = "DIMG_BUILD_DIR")]
    build_dir: Option<PathBuf>,

    /// Parent directory for per-run temporary files
    #[arg(long, env = "DIMG_TMP_DIR")]
    tmp_dir: Option<PathBuf>,

    /// Project name used for stage image names (default: directory name)
    #[arg(long)]
    name: Option<String>,

    /// Bucket size in bytes for accumulated git patches
    #[arg(long, env = "DIMG_PATCH_SIZE_STEP", default_value_t = DEFAULT_PATCH_SIZE_STEP)]
    patch_size_step: u64,

    /// Images to process
    names: Vec<String>,
}

impl ProjectArgs {
    fn load(&self) -> Result<(Dappfile, ConveyorOptions)> {
        let raw = std::fs::read_to_string(&self.config)
            .with_context(|| format!("Failed to read config {}", self.config.display()))?;
        let dappfile: Dappfile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", self.config.display()))?;

        let dir = std::fs::canonicalize(&self.dir)
            .with_context(|| format!("Project directory {} not found", self.dir.display()))?;
        let mut options = ConveyorOptions::new(dir);
        if let Some(name) = &self.name {
            options.project_name = name.clone();
        }
        if let Some(build_dir) = &self.build_dir {
            options.build_dir = build_dir.clone();
        }
        options.tmp_dir = self.tmp_dir.clone();
        options.dimg_names = self.names.clone();
        options.patch_size_step = self.patch_size_step;
        Ok((dappfile, options))
    }

    fn conveyor(&self) -> Result<Conveyor> {
        let (dappfile, options) = self.load()?;
        let backend = Arc::new(DockerBackend::new(&options.project_name));
        Ok(Conveyor::new(dappfile, options, backend))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Build { project, report } => cmd_build(&project, report).await,
        Commands::Stages { project } => cmd_stages(&project).await,
    };
    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

/// 2 for configuration problems, 70 for internal errors, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.chain().find_map(|e| e.downcast_ref::<DimgError>()) {
        Some(e) if e.is_configuration() => 2,
        Some(e) if e.is_internal() => 70,
        _ => 1,
    }
}

async fn cmd_build(project: &ProjectArgs, json: bool) -> Result<()> {
    let conveyor = project.conveyor()?;
    let report = conveyor.build().await.context("Build failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(run_id = %report.run_id, "build finished");
    for dimg in report.dimgs.iter().filter(|d| !d.is_artifact) {
        println!("{}\t{}", dimg.name, dimg.image);
    }
    println!(
        "built {} stage(s), {} cached",
        report.count(StageStatus::Built),
        report.count(StageStatus::Cached)
    );
    Ok(())
}

async fn cmd_stages(project: &ProjectArgs) -> Result<()> {
    let conveyor = project.conveyor()?;
    let report = conveyor.plan().await.context("Failed to compute stages")?;
    print_stages(&report);
    Ok(())
}

fn print_stages(report: &BuildReport) {
    for dimg in &report.dimgs {
        let kind = if dimg.is_artifact { "artifact" } else { "dimg" };
        println!("{kind} {}", dimg.name);
        for stage in &dimg.stages {
            let status = match stage.status {
                StageStatus::Cached => "cached",
                StageStatus::Built => "built",
                StageStatus::Skipped => "empty",
                StageStatus::Pending => "not built",
            };
            println!(
                "  {:<30} {:<64} {}",
                stage.stage.as_str(),
                stage.signature.as_deref().unwrap_or("-"),
                status
            );
        }
    }
}
