//! Episode HLS packaging CLI.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use epstream_media::{plan_tiers, probe_source, MediaError};
use epstream_models::TranscodeOptions;
use epstream_worker::{logging, metrics, HlsPipeline, JobRegistry, WorkerConfig, WorkerError};

#[derive(Parser, Debug)]
#[command(author, version, about = "Package uploaded episodes as adaptive HLS", long_about = None)]
struct Cli {
    /// Override EPSTREAM_STORAGE_ROOT
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcode an episode into an HLS package
    Process(ProcessArgs),
    /// Print probed source metadata
    Probe {
        input: PathBuf,
    },
    /// Print the tiers that would be encoded for a source
    Plan {
        input: PathBuf,
        #[command(flatten)]
        qualities: QualityArgs,
    },
    /// Run only the upscaler and print its output path
    Upscale {
        input: PathBuf,
    },
}

#[derive(Args, Debug)]
struct QualityArgs {
    /// Tier to encode; repeat for several (default EPSTREAM_DEFAULT_QUALITIES)
    #[arg(long = "quality", short = 'q')]
    qualities: Vec<String>,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    episode_id: String,
    input: PathBuf,
    #[command(flatten)]
    qualities: QualityArgs,
    /// Run the upscaler on the input first
    #[arg(long)]
    upscale: bool,
    /// Give up after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl QualityArgs {
    fn options(&self, config: &WorkerConfig) -> TranscodeOptions {
        if self.qualities.is_empty() {
            TranscodeOptions::with_qualities(config.default_qualities.clone())
        } else {
            TranscodeOptions::with_qualities(self.qualities.clone())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let cli = Cli::parse();

    let mut config = WorkerConfig::from_env();
    if let Some(root) = cli.storage_root {
        config.storage_root = root;
    }
    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!(%addr, "Prometheus exporter listening");
    }

    match cli.command {
        Commands::Process(args) => process(config, args).await,
        Commands::Probe { input } => {
            let source = probe_source(&config.ffprobe, &input).await?;
            print_json(&source)
        }
        Commands::Plan { input, qualities } => {
            let source = probe_source(&config.ffprobe, &input).await?;
            let tiers = plan_tiers(&qualities.options(&config).effective_qualities(), &source);
            print_json(&tiers)
        }
        Commands::Upscale { input } => {
            let pipeline = HlsPipeline::new(config, JobRegistry::new());
            let run = pipeline.supervisor().spawn(&input).await?;
            let progress = run.finish_with(|p| {
                info!(
                    percent = ?p.percent,
                    "Upscale progress: {}",
                    p.message.as_deref().unwrap_or("")
                )
            });
            let output = tokio::select! {
                result = progress => result?,
                _ = tokio::signal::ctrl_c() => {
                    pipeline.supervisor().cancel().await;
                    anyhow::bail!("interrupted");
                }
            };
            println!("{}", output.display());
            Ok(())
        }
    }
}

async fn process(config: WorkerConfig, args: ProcessArgs) -> anyhow::Result<()> {
    if let Err(e) = config.media_tools().check() {
        warn!("{}", e);
    }
    let options = args.qualities.options(&config);
    let pipeline = HlsPipeline::new(config, JobRegistry::new());

    let job = async {
        if args.upscale {
            pipeline
                .upscale_then_process(&args.episode_id, &args.input, &options)
                .await
        } else {
            pipeline.process(&args.episode_id, &args.input, &options).await
        }
    };

    let deadline = async {
        match args.timeout_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        result = job => result,
        _ = deadline => Err(WorkerError::Timeout(args.timeout_secs.unwrap_or_default())),
        _ = tokio::signal::ctrl_c() => Err(WorkerError::Media(MediaError::Cancelled)),
    };

    match outcome {
        Ok(result) => print_json(&result),
        Err(e) => {
            // The pipeline future may have been dropped mid-step
            if pipeline.supervisor().cancel().await {
                warn!("Cancelled running upscaler");
            }
            pipeline.fail_job(&args.episode_id, &e).await;
            if let Some(record) = pipeline.registry().get(&args.episode_id).await {
                eprintln!("{}", serde_json::to_string_pretty(&record)?);
            }
            Err(e).with_context(|| format!("processing {} failed", args.episode_id))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
