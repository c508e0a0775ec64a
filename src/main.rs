//! comp-ledger command-line entry point

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comp_ledger::anchor::{AnchorService, CalendarAnchor};
use comp_ledger::audit::{AuditLedger, InMemoryAuditLogStore, LedgerEntry};
use comp_ledger::config::AppConfig;
use comp_ledger::export::keys::load_public_key;
use comp_ledger::export::{
    create_recipient_config, generate_key_pair, EncryptedExportService, EncryptedLedgerExport,
    RecipientSettings,
};
use comp_ledger::import::{ImportOrchestrator, InMemoryJobStore, JobEvent, JobStatus, NewImportJob};

#[derive(Parser)]
#[command(name = "comp-ledger")]
#[command(about = "Bulk comp import with a tamper-evident audit ledger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (overrides COMP_LEDGER_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import files through the worker and print the audit report
    Import {
        /// Input files, one job each
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Owner recorded on every job
        #[arg(short, long, default_value = "cli")]
        owner: String,

        /// Input format passed to the worker
        #[arg(short, long, default_value = "sqlite")]
        format: String,

        /// Write finalized ledger entries to this JSON file
        #[arg(long)]
        ledger_out: Option<PathBuf>,
    },

    /// Generate an RSA key pair
    Keygen {
        label: String,

        /// Output directory
        #[arg(short, long, default_value = "keys")]
        out_dir: PathBuf,
    },

    /// Register an export recipient
    Recipient {
        label: String,

        #[arg(long)]
        provider: String,

        #[arg(long)]
        bucket: String,

        #[arg(long, default_value = "manual")]
        schedule: String,

        #[arg(long)]
        public_key: Option<PathBuf>,
    },

    /// Seal ledger entries for a recipient
    Export {
        /// JSON file holding ledger entries
        entries: PathBuf,

        /// Recipient public key; defaults to the configured recipient
        #[arg(short, long)]
        recipient_key: Option<PathBuf>,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Verify and open an export package
    Decrypt {
        package: PathBuf,

        #[arg(short = 'k', long)]
        private_key: PathBuf,

        /// Check the package signature with this public key first
        #[arg(short, long)]
        signer_key: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comp_ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Commands::Import {
            files,
            owner,
            format,
            ledger_out,
        } => run_import(&config, files, &owner, &format, ledger_out.as_deref()).await,
        Commands::Keygen { label, out_dir } => {
            let pair = generate_key_pair(&label)?;
            let (public_path, private_path) = pair.write_key_pair(&out_dir)?;
            println!("{}", public_path.display());
            println!("{}", private_path.display());
            Ok(())
        }
        Commands::Recipient {
            label,
            provider,
            bucket,
            schedule,
            public_key,
        } => {
            let settings = RecipientSettings {
                provider,
                bucket,
                schedule,
                public_key_path: public_key,
            };
            let path = create_recipient_config(&config.export.recipients_path, &label, settings)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Export {
            entries,
            recipient_key,
            out,
        } => run_export(&config, &entries, recipient_key.as_deref(), &out).await,
        Commands::Decrypt {
            package,
            private_key,
            signer_key,
        } => run_decrypt(&package, &private_key, signer_key.as_deref()),
    }
}

async fn run_import(
    config: &AppConfig,
    files: Vec<PathBuf>,
    owner: &str,
    format: &str,
    ledger_out: Option<&Path>,
) -> anyhow::Result<()> {
    let anchor = if config.anchor.enabled {
        let calendar = CalendarAnchor::new(
            config.anchor.calendar_url.clone(),
            config.anchor.proofs_path.clone(),
            config.anchor.timeout(),
        )?;
        info!("Anchoring roots via {}", config.anchor.calendar_url);
        Some(Arc::new(calendar) as Arc<dyn AnchorService>)
    } else {
        None
    };

    let ledger = Arc::new(AuditLedger::new(Arc::new(InMemoryAuditLogStore::new()), anchor));
    let orchestrator = ImportOrchestrator::new(
        config.worker.clone(),
        Arc::new(InMemoryJobStore::new()),
        Arc::clone(&ledger),
    );
    let mut events = orchestrator.subscribe();

    let mut waiting = HashSet::new();
    for file in files {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        let id = orchestrator
            .create_job(NewImportJob::new(owner, file_name, &file, format))
            .await
            .with_context(|| format!("Failed to submit {}", file.display()))?;
        waiting.insert(id);
    }
    let submitted = waiting.len();
    let mut failed = 0usize;

    while !waiting.is_empty() {
        match events.recv().await {
            Ok(event) if !waiting.contains(event.job_id()) => {}
            Ok(JobEvent::JobStatusChanged {
                job_id,
                status: JobStatus::Error,
                error_message,
            }) => {
                warn!(
                    "Job {} failed: {}",
                    job_id,
                    error_message.as_deref().unwrap_or("unknown error")
                );
                failed += 1;
                waiting.remove(&job_id);
            }
            Ok(JobEvent::JobCompleted { job_id, root, .. }) => {
                info!("Job {} finalized with root {}", job_id, root);
                waiting.remove(&job_id);
            }
            Ok(JobEvent::FinalizationFailed { job_id, error }) => {
                error!("Job {} imported but its audit trail was not finalized: {}", job_id, error);
                failed += 1;
                waiting.remove(&job_id);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Missed {} job events, re-reading job states", skipped);
                let mut settled = Vec::new();
                for id in &waiting {
                    let status = orchestrator.get_job(id).await?.map(|j| j.status);
                    let finalized = ledger.ledger_entry(id).await?.is_some();
                    match status {
                        None | Some(JobStatus::Error) => {
                            failed += 1;
                            settled.push(id.clone());
                        }
                        Some(JobStatus::Complete) if !finalized => {
                            // The finalization outcome may have been among the missed events
                            if let Err(e) = ledger.finalize(id).await {
                                error!("Failed to finalize audit trail of job {}: {}", id, e);
                                failed += 1;
                            }
                            settled.push(id.clone());
                        }
                        Some(JobStatus::Complete) => settled.push(id.clone()),
                        Some(_) => {}
                    }
                }
                for id in settled {
                    waiting.remove(&id);
                }
            }
            Err(RecvError::Closed) => bail!("Job event stream closed unexpectedly"),
        }
    }

    if let Some(path) = ledger_out {
        let entries = ledger.ledger_entries().await?;
        std::fs::write(path, serde_json::to_string_pretty(&entries)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {} ledger entries to {}", entries.len(), path.display());
    }

    let report = ledger.export_report(None).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if failed > 0 {
        bail!("{} of {} import jobs failed", failed, submitted);
    }
    Ok(())
}

async fn run_export(
    config: &AppConfig,
    entries_path: &Path,
    recipient_key: Option<&Path>,
    out: &Path,
) -> anyhow::Result<()> {
    let entries: Vec<LedgerEntry> = serde_json::from_str(
        &std::fs::read_to_string(entries_path)
            .with_context(|| format!("Failed to read {}", entries_path.display()))?,
    )?;

    let recipient_pem = match recipient_key {
        Some(path) => {
            // Parse up front so a bad key fails before any encryption work
            load_public_key(path)?;
            Some(std::fs::read_to_string(path)?)
        }
        None => None,
    };

    let service = Arc::new(EncryptedExportService::from_config(&config.export)?);
    let package =
        EncryptedExportService::export_encrypted_async(service, entries, recipient_pem).await?;
    std::fs::write(out, package.to_json()?)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!("{}", out.display());
    Ok(())
}

fn run_decrypt(package: &Path, private_key: &Path, signer_key: Option<&Path>) -> anyhow::Result<()> {
    let package = EncryptedLedgerExport::from_json(
        &std::fs::read_to_string(package)
            .with_context(|| format!("Failed to read {}", package.display()))?,
    )?;

    if let Some(signer_key) = signer_key {
        let signer_pem = std::fs::read_to_string(signer_key)
            .with_context(|| format!("Failed to read {}", signer_key.display()))?;
        if !EncryptedExportService::verify_export(&package, &signer_pem)? {
            bail!("Export signature does not verify against {}", signer_key.display());
        }
        info!("Export signature verified");
    }

    let private_pem = std::fs::read_to_string(private_key)
        .with_context(|| format!("Failed to read {}", private_key.display()))?;
    let entries = EncryptedExportService::decrypt_export(&package, &private_pem)?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
