//! Housewatch CLI
//!
//! Command-line surface over the memory pipeline: enrollment, clip
//! scanning, event fusion and persistence, daily summaries, question
//! answering and store maintenance. Exits nonzero on any uncaught failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use housewatch_backend::application::pipeline::{AskPipeline, MemoryPipeline};
use housewatch_backend::application::services::{
    ArbiterConfig, ClipScanner, ContextBuilder, ContextConfig, DailySummarizer,
    EnrollmentService, EventFusion, EventPersister, EventReasoner, EvidenceMaterializer,
    FusionConfig, FusionPolicy, IdentityArbiter, IdentityRefiner, QueryParser, RagSynthesizer,
    RefinerConfig, ResponseValidator, Retriever, RoleClassifier, RoleCueConfig, ScannerConfig,
};
use housewatch_backend::domain::entities::ClipResult;
use housewatch_backend::domain::gateways::{LlmGateway, SnapshotExtractor, VideoSampler, VisionModel};
use housewatch_backend::domain::repositories::{
    EventRepository, PersonRepository, SummaryRepository,
};
use housewatch_backend::infrastructure::database::connection::create_pool;
use housewatch_backend::infrastructure::database::repositories::{
    PgEventRepository, PgPersonRepository, PgSummaryRepository,
};
use housewatch_backend::infrastructure::dataset::load_dataset;
use housewatch_backend::infrastructure::llm::{HttpLlmGateway, LlmConfig};
use housewatch_backend::infrastructure::retry::RetryConfig;
use housewatch_backend::infrastructure::video::{FfmpegSnapshotExtractor, FfmpegVideoSampler};
use housewatch_backend::infrastructure::vision::{HttpVisionClient, VisionConfig};
use housewatch_backend::AppConfig;

#[derive(Parser)]
#[command(name = "housewatch", version, about = "Household surveillance episodic memory pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enroll reference photos as owner persons
    Enroll {
        /// Directory of labelled reference photos
        #[arg(long)]
        dir: PathBuf,
    },
    /// Scan a clip dataset into per-clip detection results
    Scan {
        /// JSON manifest of clip records
        #[arg(long)]
        dataset: PathBuf,
        /// Output file for the scanned clip results
        #[arg(long, default_value = "clip_results.json")]
        out: PathBuf,
    },
    /// Fuse scanned clips into events and persist them
    FuseAndPersist {
        /// Previously scanned clip results (from `scan`)
        #[arg(long, conflicts_with = "dataset")]
        clips: Option<PathBuf>,
        /// Scan this dataset first, then fuse and persist
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
    /// Generate the daily summary for one date
    SummarizeDay {
        /// Date (YYYY-MM-DD)
        date: NaiveDate,
        /// Regenerate even when a summary exists
        #[arg(long)]
        force: bool,
    },
    /// Generate daily summaries for every date with events
    SummarizeAll {
        /// Regenerate summaries that already exist
        #[arg(long)]
        force: bool,
    },
    /// Answer a natural-language question from the store
    Ask {
        /// The question
        question: String,
    },
    /// Delete pipeline data from the store (destructive)
    ClearStore {
        /// Also delete enrolled persons and faces
        #[arg(long)]
        all: bool,
        /// Required confirmation flag
        #[arg(long)]
        confirm: bool,
    },
}

/// Wired repositories and gateways shared by the commands.
struct Services {
    person_repo: Arc<dyn PersonRepository>,
    event_repo: Arc<dyn EventRepository>,
    summary_repo: Arc<dyn SummaryRepository>,
    vision: Arc<dyn VisionModel>,
    llm: Arc<dyn LlmGateway>,
    sampler: Arc<dyn VideoSampler>,
    snapshots: Arc<dyn SnapshotExtractor>,
}

async fn build_services(config: &AppConfig) -> Result<Services> {
    let pool = create_pool(&config.database_url()).await?;

    Ok(Services {
        person_repo: Arc::new(PgPersonRepository::new(pool.clone())),
        event_repo: Arc::new(PgEventRepository::new(pool.clone())),
        summary_repo: Arc::new(PgSummaryRepository::new(pool)),
        vision: Arc::new(HttpVisionClient::new(VisionConfig {
            base_url: config.vision_service_url.clone(),
            retry: RetryConfig::default(),
        })),
        llm: Arc::new(HttpLlmGateway::new(LlmConfig {
            model: config.llm_model.clone(),
            api_key: config.llm_api_key.clone(),
            api_base: None,
            project_id: config.llm_project_id.clone(),
            location: config.llm_location.clone(),
            retry: RetryConfig::default(),
        })),
        sampler: Arc::new(FfmpegVideoSampler::new()),
        snapshots: Arc::new(FfmpegSnapshotExtractor::new()),
    })
}

fn load_cue_config(config: &AppConfig) -> Result<RoleCueConfig> {
    match &config.cue_config_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read cue config {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("cue config {} is not valid JSON", path.display()))
        }
        None => Ok(RoleCueConfig::default()),
    }
}

fn build_memory_pipeline(config: &AppConfig, services: &Services) -> Result<MemoryPipeline> {
    let arbiter = Arc::new(IdentityArbiter::new(
        services.person_repo.clone(),
        ArbiterConfig::default(),
    ));
    let scanner = Arc::new(ClipScanner::new(
        services.sampler.clone(),
        services.vision.clone(),
        arbiter,
        ScannerConfig::default(),
    ));
    let reasoner = EventReasoner::new(
        ContextBuilder::new(ContextConfig::default()),
        ResponseValidator::new(),
        RoleClassifier::new(&load_cue_config(config)?),
        services.llm.clone(),
    );

    Ok(MemoryPipeline::new(
        scanner,
        EventFusion::new(FusionPolicy::new(FusionConfig::default())),
        IdentityRefiner::new(RefinerConfig::default()),
        reasoner,
        EventPersister::new(services.event_repo.clone()),
        config.scan_workers,
    ))
}

fn read_clip_results(path: &Path) -> Result<Vec<ClipResult>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read clip results {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("clip results {} are not valid JSON", path.display()))
}

fn write_clip_results(path: &Path, clips: &[ClipResult]) -> Result<()> {
    let content = serde_json::to_string(clips).context("cannot serialize clip results")?;
    std::fs::write(path, content)
        .with_context(|| format!("cannot write clip results {}", path.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.command {
        Command::Enroll { dir } => {
            let services = build_services(&config).await?;
            let enrollment =
                EnrollmentService::new(services.person_repo.clone(), services.vision.clone());
            let report = enrollment.enroll(&dir).await?;
            println!(
                "Enrolled {} new face(s), {} already present, {} skipped",
                report.enrolled, report.already_enrolled, report.skipped
            );
        }

        Command::Scan { dataset, out } => {
            let services = build_services(&config).await?;
            let pipeline = build_memory_pipeline(&config, &services)?;

            let records = load_dataset(&dataset, &config.video_base_dir)?;
            let clips = pipeline.scan_clips(records).await;
            write_clip_results(&out, &clips)?;
            println!("Scanned {} clip(s) into {}", clips.len(), out.display());
        }

        Command::FuseAndPersist { clips, dataset } => {
            let services = build_services(&config).await?;
            let pipeline = build_memory_pipeline(&config, &services)?;

            let clip_results = match (clips, dataset) {
                (Some(clips_path), None) => read_clip_results(&clips_path)?,
                (None, Some(dataset_path)) => {
                    let records = load_dataset(&dataset_path, &config.video_base_dir)?;
                    pipeline.scan_clips(records).await
                }
                _ => bail!("provide exactly one of --clips or --dataset"),
            };

            let report = pipeline.fuse_and_persist(clip_results).await?;
            println!(
                "Fused {} event(s) from {} clip(s); persisted {}, failed {}",
                report.events_fused,
                report.clips_scanned,
                report.events_persisted.len(),
                report.events_failed
            );
            if report.events_failed > 0 {
                bail!("{} event(s) failed to persist", report.events_failed);
            }
        }

        Command::SummarizeDay { date, force } => {
            let services = build_services(&config).await?;
            let summarizer = DailySummarizer::new(
                services.event_repo.clone(),
                services.summary_repo.clone(),
                services.llm.clone(),
            );
            match summarizer.summarize_date(date, force).await? {
                Some(id) => println!("Daily summary for {date} stored (id {id})"),
                None => println!("No events recorded on {date}"),
            }
        }

        Command::SummarizeAll { force } => {
            let services = build_services(&config).await?;
            let summarizer = DailySummarizer::new(
                services.event_repo.clone(),
                services.summary_repo.clone(),
                services.llm.clone(),
            );
            let report = summarizer.summarize_all(force).await?;
            println!(
                "Summarized {} date(s), skipped {}, failed {}",
                report.summarized.len(),
                report.skipped.len(),
                report.failed.len()
            );
            if !report.failed.is_empty() {
                bail!("{} date(s) failed to summarize", report.failed.len());
            }
        }

        Command::Ask { question } => {
            let services = build_services(&config).await?;
            let ask = AskPipeline::new(
                QueryParser::new(services.person_repo.clone()),
                Retriever::new(services.event_repo.clone(), services.summary_repo.clone()),
                EvidenceMaterializer::new(
                    services.snapshots.clone(),
                    config.video_base_dir.clone(),
                    config.snapshot_dir.clone(),
                ),
                RagSynthesizer::new(services.llm.clone()),
            );

            let answer = ask.answer(&question).await;
            println!("{}", answer.answer);
            println!("\n({} evidence record(s))", answer.evidence_count);
            for image in &answer.images {
                println!("snapshot: {image}");
            }
        }

        Command::ClearStore { all, confirm } => {
            if !confirm {
                bail!("clear-store is destructive; re-run with --confirm");
            }
            let services = build_services(&config).await?;
            services.event_repo.clear_store(all).await?;
            info!(purge_enrollment = all, "Store cleared");
            println!("Store cleared{}", if all { " (including enrollment)" } else { "" });
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "housewatch_backend=info,housewatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
