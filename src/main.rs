use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;

use attendance_warning::config::AppConfig;
use attendance_warning::db::{self, PgStore};
use attendance_warning::import::ImportControl;
use attendance_warning::models::Principal;
use attendance_warning::notify::{Notifier, OutboxNotifier};
use attendance_warning::report;
use attendance_warning::service::AttendanceService;
use attendance_warning::snapshot;

#[derive(Parser)]
#[command(name = "attendance-warning")]
#[command(about = "Course attendance tracker and low-attendance warning gate", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Who the command runs as.
#[derive(Args)]
#[command(group(
    ArgGroup::new("principal")
        .args(["as_principal", "user"])
        .required(true)
        .multiple(false)
))]
struct Caller {
    /// `admin` or `student:<email_id>`
    #[arg(long = "as", value_name = "PRINCIPAL")]
    as_principal: Option<Principal>,
    /// Account name to look up in the user accounts table
    #[arg(long)]
    user: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo snapshot
    Seed,
    /// Import an attendance snapshot CSV
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Stop processing rows after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Print the batch report as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        caller: Caller,
    },
    /// List all records with live warning eligibility
    List {
        #[command(flatten)]
        caller: Caller,
    },
    /// Show the calling student's own record
    Show {
        #[command(flatten)]
        caller: Caller,
    },
    /// Send a low-attendance warning if the student is currently eligible
    SendWarning {
        #[arg(long)]
        email: String,
        #[command(flatten)]
        caller: Caller,
    },
    /// Generate a markdown attendance report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[command(flatten)]
        caller: Caller,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout)
        .connect(&config.database.url)
        .await
        .context("failed to connect to Postgres")?;

    let service = AttendanceService::new(Arc::new(PgStore::new(pool.clone())));

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let report = service
                .import(&Principal::Admin, db::seed_rows(), &ImportControl::new())
                .await?;
            print!("{}", report::render_batch(&report));
        }
        Commands::Import {
            csv,
            timeout_secs,
            json,
            caller,
        } => {
            let principal = resolve(&pool, caller).await?;
            let rows = snapshot::read_snapshot_file(&csv)
                .with_context(|| format!("failed to read snapshot {}", csv.display()))?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling import");
                    let _ = cancel_tx.send(true);
                }
            });

            let mut control = ImportControl::new().with_cancel(cancel_rx);
            if let Some(timeout) = timeout_secs.map(Duration::from_secs).or(config.import_timeout) {
                control = control.with_timeout(timeout);
            }

            let report = service.import(&principal, rows, &control).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report::render_batch(&report));
            }
            if report.fatal.is_some() {
                anyhow::bail!("import aborted after {} committed rows", report.succeeded);
            }
        }
        Commands::List { caller } => {
            let principal = resolve(&pool, caller).await?;
            let views = service.list_records(&principal).await?;
            if views.is_empty() {
                println!("No attendance records yet.");
                return Ok(());
            }
            for view in &views {
                let r = &view.record;
                println!(
                    "- {} ({}) {:.2}% [{} of {} working days] medical: {} eligible: {}",
                    r.student_name(),
                    r.email_id(),
                    r.attendance_percentage(),
                    r.classes_attended(),
                    r.working_days_total(),
                    if r.medical_reason() { "Yes" } else { "No" },
                    if view.eligible { "yes" } else { "no" }
                );
            }
        }
        Commands::Show { caller } => {
            let principal = resolve(&pool, caller).await?;
            let view = service.own_record(&principal).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::SendWarning { email, caller } => {
            let principal = resolve(&pool, caller).await?;
            let notice = service.send_warning(&principal, &email).await?;
            OutboxNotifier::new(&config.notifier).dispatch(&notice).await?;
            println!(
                "Warning queued for {} ({:.2}%).",
                notice.email_id, notice.attendance_percentage
            );
        }
        Commands::Report { out, caller } => {
            let principal = resolve(&pool, caller).await?;
            let views = service.list_records(&principal).await?;
            let markdown = report::build_report(Utc::now().date_naive(), &views);
            std::fs::write(&out, markdown)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn resolve(pool: &PgPool, caller: Caller) -> anyhow::Result<Principal> {
    match (caller.as_principal, caller.user) {
        (Some(principal), _) => Ok(principal),
        (None, Some(user)) => db::resolve_principal(pool, &user)
            .await?
            .with_context(|| format!("unknown user `{user}`")),
        (None, None) => anyhow::bail!("either --as or --user is required"),
    }
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "attendance_warning=info,sqlx=warn".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
