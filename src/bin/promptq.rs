//! promptq CLI: plan prompt fan-outs and drain them through the model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use promptq::config::{Config, RunConfig};
use promptq::db::{Db, WorkStore};
use promptq::engine::{Drain, DrainConfig, DrainReport};
use promptq::llm::OpenAiClient;
use promptq::model::WorkId;
use promptq::planner::{PlanSummary, Planner};
use promptq::sink::{ResultSink, RunLog};
use promptq::source::load_sources;
use promptq::telemetry::{TelemetryConfig, init_telemetry};
use tracing::info;

#[derive(Parser)]
#[command(name = "promptq", about = "Fan prompts out across variants and trials, then generate")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan every prompt in a folder, then drain the backlog
    Run {
        /// Folder of prompt files, one per team
        source: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Plan only
    Plan {
        /// Folder of prompt files, one per team
        source: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Drain work planned by an earlier run
    Drain {
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Show total, completed, and pending counts
    Status {
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Show one work item
    Show {
        /// Work item ID, e.g. final_teamA_B_3
        id: String,
        #[command(flatten)]
        opts: RunOpts,
    },
}

#[derive(Args, Clone)]
struct RunOpts {
    /// TOML file with run settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output root for artifacts, logs, and the default database
    #[arg(long)]
    output: Option<PathBuf>,
    /// Store URL (defaults to DATABASE_URL, then a SQLite file under the output root)
    #[arg(long)]
    database_url: Option<String>,
    /// Trials per (team, variant)
    #[arg(long)]
    trials: Option<u32>,
    /// Maximum concurrent generations
    #[arg(long)]
    max_in_flight: Option<usize>,
    /// Delay before retrying a transient failure
    #[arg(long)]
    retry_backoff_ms: Option<u64>,
    /// Attempts per item before giving up (0 = unbounded)
    #[arg(long)]
    max_attempts: Option<u32>,
}

impl RunOpts {
    fn run_config(&self) -> anyhow::Result<RunConfig> {
        let mut run = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        if let Some(output) = &self.output {
            run.output_root = Some(output.clone());
        }
        if let Some(trials) = self.trials {
            run.trials = trials;
        }
        if let Some(max) = self.max_in_flight {
            run.max_in_flight = max;
        }
        if let Some(ms) = self.retry_backoff_ms {
            run.retry_backoff_ms = ms;
        }
        if let Some(max) = self.max_attempts {
            run.max_attempts = max;
        }
        run.validate()?;
        Ok(run)
    }
}

/// Everything a command needs once startup preconditions hold.
struct Runtime {
    config: Config,
    run: RunConfig,
    output_root: PathBuf,
    db: Arc<Db>,
}

impl Runtime {
    /// Open the store for a run that plans from `source`, creating the
    /// output tree and database as needed.
    async fn create(config: Config, opts: &RunOpts, source: &Path) -> anyhow::Result<Self> {
        let run = opts.run_config()?;
        let output_root = run.resolve_output_root(Some(source));
        tokio::fs::create_dir_all(&output_root).await?;

        let url = store_url(&config, opts, &output_root);
        let db = Db::connect(&url).await?;
        Self::ready(config, run, output_root, db).await
    }

    /// Open the store an earlier `run`/`plan` created. Never creates one.
    async fn existing(config: Config, opts: &RunOpts) -> anyhow::Result<Self> {
        let run = opts.run_config()?;
        let output_root = run.resolve_output_root(None);

        let url = store_url(&config, opts, &output_root);
        let db = Db::open_existing(&url).await?;
        Self::ready(config, run, output_root, db).await
    }

    async fn ready(
        config: Config,
        run: RunConfig,
        output_root: PathBuf,
        db: Db,
    ) -> anyhow::Result<Self> {
        db.migrate().await?;

        Ok(Self {
            config,
            run,
            output_root,
            db: Arc::new(db),
        })
    }

    async fn run_log(&self) -> anyhow::Result<Arc<RunLog>> {
        Ok(Arc::new(
            RunLog::create(&self.output_root, &self.run.stage).await?,
        ))
    }
}

fn store_url(config: &Config, opts: &RunOpts, output_root: &Path) -> String {
    match &opts.database_url {
        Some(url) => url.clone(),
        None => config.database_url_for(output_root),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "promptq".to_string(),
        default_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Run { source, opts } => cmd_run(config, &source, &opts, true).await,
        Command::Plan { source, opts } => cmd_run(config, &source, &opts, false).await,
        Command::Drain { opts } => {
            let rt = Runtime::existing(config, &opts).await?;
            let log = rt.run_log().await?;
            let report = drain(&rt, log).await?;
            print_report(&report);
            Ok(())
        }
        Command::Status { opts } => {
            let rt = Runtime::existing(config, &opts).await?;
            cmd_status(&rt.db).await
        }
        Command::Show { id, opts } => {
            let rt = Runtime::existing(config, &opts).await?;
            cmd_show(&rt.db, id).await
        }
    }
}

async fn cmd_run(
    config: Config,
    source: &Path,
    opts: &RunOpts,
    then_drain: bool,
) -> anyhow::Result<()> {
    if then_drain {
        // Fail before planning rather than leave a backlog nobody can drain.
        config.api_key()?;
    }
    let sources = load_sources(source)?;

    let rt = Runtime::create(config, opts, source).await?;
    let log = rt.run_log().await?;
    info!(
        source = %source.display(),
        output = %rt.output_root.display(),
        log = %log.path().display(),
        "run started"
    );

    let planner = Planner::new(
        Arc::clone(&rt.db),
        Arc::clone(&log),
        &rt.run,
        &rt.output_root,
    );
    let summary = planner.plan_sources(&sources).await?;
    print_summary(&summary);

    if then_drain {
        let report = drain(&rt, log).await?;
        print_report(&report);
    }
    Ok(())
}

async fn drain(rt: &Runtime, log: Arc<RunLog>) -> anyhow::Result<DrainReport> {
    let client = OpenAiClient::new(rt.config.api_key()?, rt.config.model.clone())?;
    info!(model = client.model(), "generation client ready");

    let drain = Drain::new(
        Arc::clone(&rt.db),
        Arc::new(client),
        Arc::new(ResultSink::new(log)),
        DrainConfig::from_run_config(&rt.run),
    );

    let ctrl = drain.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    Ok(drain.run().await?)
}

async fn cmd_status(db: &Db) -> anyhow::Result<()> {
    let total = db.count(None).await?;
    let completed = db.count(Some(true)).await?;

    println!("Total:      {total}");
    println!("Completed:  {completed}");
    println!("Pending:    {}", total.saturating_sub(completed));
    Ok(())
}

async fn cmd_show(db: &Db, id: String) -> anyhow::Result<()> {
    let item = db.get(&WorkId(id)).await?;

    println!("ID:         {}", item.id);
    println!("Team:       {}", item.team);
    println!("Variant:    {}", item.variant);
    println!("Trial:      {}", item.trial);
    println!("Completed:  {}", item.completed);
    println!("Attempts:   {}", item.attempts);
    println!("Created:    {}", item.created_at);
    println!("Updated:    {}", item.updated_at);
    if let Some(done) = item.completed_at {
        println!("Finished:   {done}");
    }
    if let Some(outcome) = item.outcome {
        println!("Outcome:    {outcome}");
        if outcome.has_artifact() {
            println!("Artifact:   {}", item.artifact_path().display());
        }
    }
    if let Some(detail) = &item.detail {
        println!("Detail:     {detail}");
    }
    println!("---");
    println!("{}", item.prompt);
    Ok(())
}

fn print_summary(summary: &PlanSummary) {
    println!(
        "Planned {} team(s): {} new item(s), {} already planned, {} empty source(s), {} failed",
        summary.teams, summary.created, summary.duplicates, summary.skipped_empty, summary.failed
    );
}

fn print_report(report: &DrainReport) {
    println!(
        "Drained {} item(s): {} ok, {} empty, {} fatal, {} exhausted ({} retries, peak {} in flight){}",
        report.dispatched,
        report.succeeded,
        report.empty,
        report.fatal,
        report.exhausted,
        report.retries,
        report.peak_in_flight,
        if report.cancelled { ", cancelled" } else { "" }
    );
}
