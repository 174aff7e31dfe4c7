use face_proctor::camera::Camera;
use face_proctor::common::config::DEFAULT_CONFIG_PATH;
use face_proctor::core::LightingAssessor;
use face_proctor::session::{SessionEvent, SessionState, SystemClock, VerificationSession};
use face_proctor::storage::{CachedDescriptorStore, DescriptorStore, FileDescriptorStore};
use face_proctor::supervisor::{DirectorySnapshotSink, SnapshotSink, SnapshotSupervisor, SupervisionReport};
use face_proctor::{Config, DevMode, EnrollMode, Enroller, ProviderHandle, SimilarityEngine};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "faceproctor")]
#[command(about = "Face verification and test integrity supervision for proctored assessments")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 cameras
    DetectCamera,
    /// Register a candidate's reference profile
    Enroll {
        #[arg(short, long)]
        profile: String,
        /// Add samples to the existing profile instead of replacing it
        #[arg(short, long)]
        append: bool,
    },
    /// Run continuous identity verification until failure or Ctrl-C
    Verify {
        #[arg(short, long)]
        profile: String,
    },
    /// Take scheduled snapshots over an assessment and print the verdict
    Supervise {
        #[arg(short, long)]
        profile: String,
        /// Assessment length in seconds
        #[arg(short, long, default_value = "600")]
        duration_secs: u64,
        /// Requested snapshot count, clamped to the configured bounds
        #[arg(short, long, default_value = "15")]
        snapshots: usize,
    },
    /// Assess the lighting of an image file
    Lighting { image: PathBuf },
    /// Compare two enrolled profiles
    Compare { first: String, second: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::DetectCamera => detect_cameras()?,
        Commands::Enroll { profile, append } => {
            let provider = build_provider(&config)?;
            let store = open_store(&dev_mode, &config).await?;
            let mut camera = build_camera(&config)?;

            println!("Enrolling '{}'. Look at the camera and keep still.", profile);
            let mode = if append { EnrollMode::Append } else { EnrollMode::Replace };
            let report = Enroller::new(provider, store, &config)
                .enroll(&profile, camera.as_mut(), mode)
                .await
                .context("Enrollment failed")?;

            println!(
                "Enrolled '{}': {} samples accepted, {} rejected",
                report.profile_id, report.accepted, report.rejected
            );
            println!("  Mean quality: {:.2}", report.mean_quality);
            println!("  Consistency:  {:.2}", report.consistency);
            if report.consistency < 0.5 {
                println!("  Samples vary a lot. Consider enrolling again in better lighting.");
            }
        }
        Commands::Verify { profile } => {
            let provider = build_provider(&config)?;
            let store = open_store(&dev_mode, &config).await?;
            let camera = build_camera(&config)?;

            let (mut session, events) =
                VerificationSession::new(&profile, provider, store, camera, &config, Arc::new(SystemClock));
            let printer = tokio::spawn(print_events(events));
            let cancel = cancel_on_ctrl_c();

            let result = session.run(cancel).await;
            let state = session.state().clone();
            drop(session);
            let _ = printer.await;

            result.context("Verification session could not start")?;
            if let SessionState::Failed { reason } = state {
                anyhow::bail!("Verification failed: {}", reason);
            }
            println!("Verification session ended");
        }
        Commands::Supervise { profile, duration_secs, snapshots } => {
            let provider = build_provider(&config)?;
            let store = open_store(&dev_mode, &config).await?;
            let camera = build_camera(&config)?;

            let mut supervisor =
                SnapshotSupervisor::new(&profile, provider, store, camera, &config, Arc::new(SystemClock));
            let plan = supervisor
                .start(Duration::from_secs(duration_secs), snapshots)
                .await
                .context("Supervisor could not start")?;
            println!(
                "Taking {} snapshots, one every {:.0}s. Press Ctrl-C to finish early.",
                plan.count,
                plan.interval.as_secs_f32()
            );

            supervisor.run(cancel_on_ctrl_c()).await;

            let report = SupervisionReport::from_supervisor(&supervisor);
            let sink = DirectorySnapshotSink::new(dev_mode.snapshots_dir(&config.storage)?);
            sink.persist(&report).await.context("Failed to save snapshots")?;

            println!("{}", serde_json::to_string_pretty(&report.verdict)?);
            println!("Snapshots saved to {}", sink.report_dir(&report).display());
        }
        Commands::Lighting { image } => {
            let frame = image::open(&image).with_context(|| format!("Failed to open {}", image.display()))?;
            let assessment = LightingAssessor::new(config.lighting.clone()).assess(&frame);
            println!("Level: {:.1}/100 ({:?})", assessment.level, assessment.band);
            println!("{}", assessment.message);
        }
        Commands::Compare { first, second } => {
            let store = open_store(&dev_mode, &config).await?;
            let a = store
                .load(&first)
                .await?
                .with_context(|| format!("No profile enrolled for '{}'", first))?;
            let b = store
                .load(&second)
                .await?
                .with_context(|| format!("No profile enrolled for '{}'", second))?;

            let engine = SimilarityEngine::from_config(&config.similarity);
            let references = b.references();
            let mut matched = 0;
            for (i, embedding) in a.references().iter().enumerate() {
                if let Some(outcome) = engine.best_match(embedding, references.as_slice(), true) {
                    println!(
                        "  {}[{}] -> {}[{}]: similarity {:.3} (threshold {:.3}) {}",
                        first,
                        i,
                        second,
                        outcome.reference_index,
                        outcome.similarity,
                        outcome.threshold,
                        if outcome.matched { "MATCH" } else { "no match" }
                    );
                    matched += outcome.matched as usize;
                }
            }
            println!("{}/{} references of '{}' match '{}'", matched, a.references().len(), first, second);
        }
    }

    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}

async fn print_events(mut events: UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::StatusChanged(status) => println!("[{}]", status),
            SessionEvent::Success => println!("Identity verified"),
            SessionEvent::Failure { reason } => println!("Verification failed: {}", reason),
            SessionEvent::MultipleFaces => println!("Multiple faces detected!"),
            SessionEvent::Guidance(hint) => println!("  {}", hint),
        }
    }
}

async fn open_store(dev_mode: &DevMode, config: &Config) -> Result<Arc<dyn DescriptorStore>> {
    let dir = dev_mode.profiles_dir(&config.storage)?;
    let store = FileDescriptorStore::open(&dir)
        .await
        .with_context(|| format!("Failed to open profile store at {}", dir.display()))?;
    Ok(Arc::new(CachedDescriptorStore::new(store)))
}

#[cfg(feature = "onnx")]
fn build_provider(config: &Config) -> Result<Arc<ProviderHandle>> {
    let provider = face_proctor::onnx::OnnxFaceProvider::new(config.models.clone());
    Ok(Arc::new(ProviderHandle::new(Arc::new(provider))))
}

#[cfg(not(feature = "onnx"))]
fn build_provider(_config: &Config) -> Result<Arc<ProviderHandle>> {
    anyhow::bail!("faceproctor was built without the `onnx` feature; no face provider is available")
}

#[cfg(feature = "v4l-camera")]
fn build_camera(config: &Config) -> Result<Box<dyn Camera>> {
    Ok(Box::new(face_proctor::camera::V4lCamera::new(config.camera.clone())))
}

#[cfg(not(feature = "v4l-camera"))]
fn build_camera(_config: &Config) -> Result<Box<dyn Camera>> {
    anyhow::bail!("faceproctor was built without the `v4l-camera` feature")
}

#[cfg(feature = "v4l-camera")]
fn detect_cameras() -> Result<()> {
    println!("🔍 Detecting available cameras...\n");

    let cameras = face_proctor::camera::v4l2::V4lCamera::list_all_cameras()?;
    if cameras.is_empty() {
        println!("❌ No cameras found!");
        println!("\nTroubleshooting:");
        println!("  1. Check if cameras are connected");
        println!("  2. Ensure you have permission to access /dev/video*");
        return Ok(());
    }

    for camera in &cameras {
        println!("📷 Camera {}: {}", camera.index, camera.name);
        for feature in &camera.features {
            println!("   - {}", feature);
        }
    }
    println!("\nSet [camera] device_index in {} to choose a device.", DEFAULT_CONFIG_PATH);
    Ok(())
}

#[cfg(not(feature = "v4l-camera"))]
fn detect_cameras() -> Result<()> {
    anyhow::bail!("faceproctor was built without the `v4l-camera` feature")
}
