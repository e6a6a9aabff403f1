//! Thin CLI over the `sync` crate. Carries no resolver, parsing, or
//! download logic of its own — every subcommand is a direct call into
//! `sync::{resolve, engine, job_manager, catalog}`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use platform_dirs::AppDirs;
use sync::catalog;
use sync::config::VaultConfig;
use sync::engine::Engine;
use sync::environment::Environment;
use sync::http_client::HttpClient;
use sync::job_manager::{JobManager, JobStatus};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Root directory for the catalog, downloads and temp directories.
    #[arg(short, long)]
    prefix: Option<PathBuf>,

    /// Path to a vault.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a shelfmark, URL or identifier and download every page.
    Fetch {
        /// One of: vaticana, gallica, bodleian, institut, or a bare manifest URL.
        library: String,
        /// Shelfmark, identifier, or already-resolved manifest/viewer URL.
        input: String,
    },
    /// Print the catalog row for a previously fetched document.
    Status { doc_id: String },
    /// Request cancellation of a download job by its job id.
    Cancel { job_id: String },
    /// List catalog rows, or in-flight jobs with --jobs.
    List {
        #[arg(long)]
        jobs: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let prefix = cli.prefix.unwrap_or_else(|| {
        AppDirs::new(Some("iiif-vault"), false)
            .map(|dirs| dirs.data_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let env = Environment::new(&prefix)?;
    let config = VaultConfig::load(cli.config.as_deref())?;
    let catalog = catalog::open(&env.catalog_db_path())?;

    match cli.command {
        Command::Fetch { library, input } => run_fetch(&env, catalog, config, &library, &input),
        Command::Status { doc_id } => run_status(&catalog, &doc_id),
        Command::Cancel { job_id } => run_cancel(&catalog, &job_id),
        Command::List { jobs } => run_list(&catalog, jobs),
    }
}

fn run_fetch(
    env: &Environment,
    catalog: catalog::CatalogPool,
    config: VaultConfig,
    library: &str,
    input: &str,
) -> anyhow::Result<()> {
    let resolved = sync::resolve::resolve(library, input)?;
    println!("resolved {library} '{input}' -> {} ({})", resolved.doc_id, resolved.manifest_url);

    let client = Arc::new(HttpClient::new());
    let manifest_raw = client.get_json(&resolved.manifest_url, Duration::from_secs(30))?;

    let manager = JobManager::new(catalog.clone());
    let env = env.clone();
    let doc_id = resolved.doc_id.clone();
    let library_owned = library.to_string();
    let manifest_url = resolved.manifest_url.clone();

    let doc_id_for_closure = doc_id.clone();
    let job_id = manager.submit_download(&doc_id, library, &resolved.manifest_url, move |progress, should_cancel| {
        let engine = Engine::new(client, catalog, config);
        engine.run(
            &env,
            &doc_id_for_closure,
            &library_owned,
            &manifest_url,
            &manifest_raw,
            progress,
            should_cancel,
        )
    });

    println!("submitted job {job_id}");
    loop {
        match manager.get(&job_id) {
            Some(record)
                if matches!(record.status, JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed) =>
            {
                println!("job {job_id}: {:?} — {}", record.status, record.message);
                break;
            }
            Some(record) => println!("job {job_id}: {}", record.message),
            None => break,
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    Ok(())
}

fn run_status(catalog: &catalog::CatalogPool, doc_id: &str) -> anyhow::Result<()> {
    match catalog::get_manuscript(catalog, doc_id)? {
        Some(manuscript) => println!("{}", serde_json::to_string_pretty(&manuscript_summary(&manuscript))?),
        None => println!("no catalog row for '{doc_id}'"),
    }
    for job in catalog::jobs_for_document(catalog, doc_id)? {
        println!("job {}: {} ({}/{})", job.job_id, job.status, job.current_page, job.total_pages);
    }
    Ok(())
}

/// Marks the persisted job row as cancelling. A still-running `fetch`
/// process only observes cancellation through its own in-memory
/// `JobManager`; this writes the intent for the next time that process (or
/// a future daemon) polls the catalog.
fn run_cancel(catalog: &catalog::CatalogPool, job_id: &str) -> anyhow::Result<()> {
    match catalog::get_job(catalog, job_id)? {
        Some(job) if job.status.is_terminal() => {
            println!("job {job_id} already finished ({})", job.status)
        }
        Some(_) => {
            catalog::mark_job_cancelling(catalog, job_id)?;
            println!("requested cancellation of job {job_id}");
        }
        None => println!("no such job '{job_id}'"),
    }
    Ok(())
}

fn run_list(catalog: &catalog::CatalogPool, jobs_only: bool) -> anyhow::Result<()> {
    if jobs_only {
        for job in catalog::list_jobs(catalog, true)? {
            println!("{} {} {}/{} {}", job.job_id, job.status, job.current_page, job.total_pages, job.doc_id);
        }
        return Ok(());
    }
    for manuscript in catalog::list_manuscripts(catalog)? {
        println!(
            "{} [{}] {} — {} ({}/{})",
            manuscript.doc_id,
            manuscript.library,
            manuscript.display_title,
            manuscript.status,
            manuscript.downloaded_canvases,
            manuscript.total_canvases
        );
    }
    Ok(())
}

fn manuscript_summary(manuscript: &catalog::Manuscript) -> serde_json::Value {
    serde_json::json!({
        "doc_id": manuscript.doc_id,
        "library": manuscript.library,
        "display_title": manuscript.display_title,
        "status": manuscript.status.to_string(),
        "item_type": manuscript.item_type.to_string(),
        "downloaded_canvases": manuscript.downloaded_canvases,
        "total_canvases": manuscript.total_canvases,
        "shelfmark": manuscript.shelfmark,
    })
}
