use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, info};

use consult_flow::reconcile::DraftChoice;
use consult_flow::session::{ConsultationSession, LocalDraft};
use consult_flow::{Config, DraftStore, FileStore, HttpConsultationClient, WorkflowController};

/// Resume and inspect clinical consultation workflows
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file (defaults to ~/.consultflow/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides config and environment
    #[arg(long)]
    api_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start or resume the consultation for an appointment and print its status
    Resume {
        appointment_id: String,
    },
    /// Manage local drafts
    Drafts {
        #[command(subcommand)]
        action: DraftAction,
    },
}

#[derive(Subcommand, Debug)]
enum DraftAction {
    /// List saved drafts
    List,
    /// Print one draft as JSON
    Show { session_id: String },
    /// Delete a draft
    Clear { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let mut config = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::load_or_default(),
    }
    .with_env_overrides();
    if let Some(url) = args.api_url {
        config.api_base_url = url;
    }
    debug!("Using backend {}", config.api_base_url);

    let store = FileStore::new(config.drafts_dir()?);

    match args.command {
        Command::Resume { appointment_id } => resume(&config, store, &appointment_id).await,
        Command::Drafts { action } => drafts(DraftStore::new(store), action),
    }
}

async fn resume(config: &Config, store: FileStore, appointment_id: &str) -> Result<()> {
    let client = HttpConsultationClient::from_config(config)?;
    let mut controller = WorkflowController::new(client, store);

    info!("Resuming consultation for appointment {}", appointment_id);
    let outcome = controller
        .start(appointment_id, &mut ask_on_stdin)
        .await
        .context("Failed to start consultation")?;

    let report = serde_json::json!({
        "outcome": outcome,
        "status": controller.status(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Ask whether a newer local draft should be restored. EOF or an
/// unrecognised answer counts as dismissing the prompt.
fn ask_on_stdin(session: &ConsultationSession, draft: &LocalDraft) -> DraftChoice {
    let last_update = session
        .updated_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    eprintln!(
        "A local draft of consultation {} (saved {}) is newer than the server copy (updated {}).",
        session.id,
        draft.saved_at.to_rfc3339(),
        last_update
    );
    eprint!("Restore local draft? [r]estore / [d]iscard: ");
    let _ = std::io::stderr().flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return DraftChoice::Dismissed;
    }
    match answer.trim().to_lowercase().as_str() {
        "r" | "restore" => DraftChoice::Restore,
        "d" | "discard" => DraftChoice::Discard,
        _ => DraftChoice::Dismissed,
    }
}

fn drafts(drafts: DraftStore<FileStore>, action: DraftAction) -> Result<()> {
    match action {
        DraftAction::List => {
            let list = drafts.list()?;
            if list.is_empty() {
                println!("No local drafts in {}", drafts.inner().dir().display());
            }
            for draft in list {
                let step = draft
                    .step()
                    .map(|s| s.title())
                    .unwrap_or("unknown step");
                println!(
                    "{}\t{}\t{}",
                    draft.session_id,
                    step,
                    draft.saved_at.to_rfc3339()
                );
            }
        }
        DraftAction::Show { session_id } => match drafts.load(&session_id)? {
            Some(draft) => println!("{}", serde_json::to_string_pretty(&draft)?),
            None => println!("No local draft for {}", session_id),
        },
        DraftAction::Clear { session_id } => {
            drafts.clear(&session_id)?;
            println!("Cleared local draft for {}", session_id);
        }
    }
    Ok(())
}
