//! Warden CLI: drive the upload pipeline and its maintenance tasks locally.
//!
//! Configuration comes from the environment (see `WardenConfig::from_env`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;
use warden_cli::{initialize_pipeline, Pipeline};
use warden_core::models::Actor;
use warden_core::{UploadError, WardenConfig};
use warden_db::UploadRecordStore;
use warden_infra::{init_telemetry, shutdown_telemetry, ErrorResponse};
use warden_services::{HealthReport, UploadRequest};

const CLI_ACTOR: &str = "warden-cli";

#[derive(Parser)]
#[command(name = "warden", about = "Upload security and placement pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Quarantine, validate, scan and store a file
    Upload {
        /// Path to the file to upload
        file: PathBuf,
        /// Upload profile id (see `warden profiles`)
        #[arg(long)]
        profile: String,
        #[arg(long)]
        tenant: String,
        /// Owning entity id, required by some profiles
        #[arg(long)]
        owner: Option<String>,
        /// MIME type claimed by the client
        #[arg(long)]
        mime: Option<String>,
        #[arg(long)]
        correlation_id: Option<String>,
    },
    /// Supersede an upload; the previous file is removed once renditions exist
    Replace {
        #[arg(long)]
        tenant: String,
        /// Upload being replaced
        previous: Uuid,
        /// Upload replacing it
        replacement: Uuid,
    },
    /// Delete an upload and its renditions
    Delete {
        #[arg(long)]
        tenant: String,
        id: Uuid,
    },
    /// Report that a rendition of an upload has been produced
    RenditionComplete {
        /// Upload UUID
        id: Uuid,
    },
    /// Force-dispatch stale cleanup state and purge stale quarantine files
    Sweep {
        /// Age in hours after which pending state is dispatched
        #[arg(long)]
        max_age_hours: Option<i64>,
    },
    /// Detector reachability and circuit state
    Health,
    /// List configured upload profiles
    Profiles,
    /// Run the periodic cleanup sweep until interrupted
    Worker,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

fn actor_for(tenant: String) -> Actor {
    Actor::new(CLI_ACTOR, Some(tenant))
}

/// Print the client-safe error body and fail the command.
fn fail_with(err: UploadError) -> anyhow::Result<()> {
    let body = ErrorResponse::from_error(&err, Some(err.reason_code()));
    print_json(&body)?;
    anyhow::bail!("{} ({})", body.error, body.code)
}

async fn upload(
    pipeline: &Pipeline,
    file: PathBuf,
    profile: String,
    tenant: String,
    owner: Option<String>,
    mime: Option<String>,
    correlation_id: Option<String>,
) -> anyhow::Result<()> {
    let reader = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let expected_len = reader.metadata().await.ok().map(|m| m.len());
    let declared_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let request = UploadRequest {
        profile_id: profile,
        actor: actor_for(tenant),
        reader,
        declared_name,
        client_mime: mime,
        owner_id: owner,
        correlation_id,
        expected_len,
    };
    match pipeline.service.upload(request).await {
        Ok(record) => print_json(&record),
        Err(err) => fail_with(err),
    }
}

async fn sweep(pipeline: &Pipeline, max_age_hours: Option<i64>) -> anyhow::Result<()> {
    let max_age = max_age_hours
        .map(chrono::Duration::hours)
        .unwrap_or(pipeline.config.cleanup.max_age);
    let report = pipeline
        .scheduler
        .sweep(max_age)
        .await
        .context("Cleanup sweep failed")?;
    let quarantine_purged = pipeline
        .quarantine
        .purge_stale(max_age.to_std().context("Sweep age must be positive")?)
        .await
        .context("Quarantine purge failed")?;
    print_json(&serde_json::json!({
        "purged": report.purged,
        "dispatched": report.dispatched,
        "quarantine_purged": quarantine_purged,
    }))
}

async fn run_worker(pipeline: &Pipeline) -> anyhow::Result<()> {
    let cleanup = &pipeline.config.cleanup;
    let worker = pipeline
        .scheduler
        .clone()
        .start(cleanup.sweep_interval, cleanup.max_age);
    tracing::info!(
        interval_secs = cleanup.sweep_interval.as_secs(),
        "Cleanup worker running, press Ctrl+C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    worker.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = WardenConfig::from_env().context("Failed to load configuration")?;
    init_telemetry(&config.base.log_format, &config.base.environment)?;
    let pipeline = initialize_pipeline(config).await?;

    let result = match cli.command {
        Commands::Upload {
            file,
            profile,
            tenant,
            owner,
            mime,
            correlation_id,
        } => upload(&pipeline, file, profile, tenant, owner, mime, correlation_id).await,
        Commands::Replace {
            tenant,
            previous,
            replacement,
        } => {
            let replacement = pipeline
                .stores
                .uploads
                .get(&tenant, replacement)
                .await
                .context("Failed to load replacement upload")?
                .with_context(|| format!("Upload {} not found", replacement))?;
            match pipeline
                .service
                .replace(&actor_for(tenant), previous, &replacement)
                .await
            {
                Ok(action) => print_json(&serde_json::json!({ "action": action })),
                Err(err) => fail_with(err),
            }
        }
        Commands::Delete { tenant, id } => {
            match pipeline.service.delete(&actor_for(tenant), id).await {
                Ok(action) => print_json(&serde_json::json!({ "action": action })),
                Err(err) => fail_with(err),
            }
        }
        Commands::RenditionComplete { id } => {
            let action = pipeline
                .scheduler
                .on_rendition_event(id)
                .await
                .context("Failed to process rendition event")?;
            print_json(&serde_json::json!({ "action": action }))
        }
        Commands::Sweep { max_age_hours } => sweep(&pipeline, max_age_hours).await,
        Commands::Health => {
            let report = HealthReport::collect(&pipeline.scanner).await;
            print_json(&report)?;
            if !report.healthy {
                anyhow::bail!("One or more detectors are unhealthy");
            }
            Ok(())
        }
        Commands::Profiles => {
            let profiles = pipeline.service.profiles();
            let listed: Vec<_> = profiles
                .ids()
                .iter()
                .filter_map(|id| profiles.get(id))
                .map(|profile| profile.as_ref().clone())
                .collect();
            print_json(&listed)
        }
        Commands::Worker => run_worker(&pipeline).await,
    };

    shutdown_telemetry().await;
    result
}
