use crate::gateway::HttpGateway;
use crate::model::{
    ClientConfig, JobCategory, JobEvent, JobId, JobParameters, JobStatus, ScanProfile, Surface,
};
use crate::orchestrator::{process_job_completion, ControllerSettings, LifecycleController};
use crate::registry::JobRegistry;
use crate::reports::{Report, ReportsClient};
use crate::{storage, text_summary, view};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "scanwatch",
    version,
    about = "Launch and track network scans and forensic jobs on a security-analysis backend"
)]
pub struct Cli {
    /// Base URL of the analysis service
    #[arg(long, global = true, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Path prefix for job routes
    #[arg(long, global = true, default_value = "/api/v1")]
    pub api_prefix: String,

    /// Bearer token sent with every request
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Interval between status checks of a running job
    #[arg(long, global = true, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Per-request timeout
    #[arg(long, global = true, default_value = "30s")]
    pub request_timeout: humantime::Duration,

    /// Where downloaded results are saved (defaults to the platform download directory)
    #[arg(long, global = true)]
    pub download_dir: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Print jobs, results and reports as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Also write every finished job and its results to this JSON file
    #[arg(long, global = true)]
    pub export_json: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a scan against one or more targets and follow it to completion
    Scan(ScanArgs),
    /// Run a forensic tool against one or more paths and follow it to completion
    Forensic(ForensicArgs),
    /// Manage saved reports
    #[command(subcommand)]
    Reports(ReportsCommand),
}

#[derive(Debug, Args, Clone)]
pub struct ScanArgs {
    /// network, vulnerability, network_analysis or full
    pub category: JobCategory,

    /// Hosts, networks or interfaces to scan (one job per target)
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Port range, e.g. 22,80,8000-8100
    #[arg(long)]
    pub ports: Option<String>,

    /// Capture duration for traffic analysis
    #[arg(long)]
    pub duration: Option<humantime::Duration>,

    /// Scan profile
    #[arg(long, value_enum)]
    pub profile: Option<ScanProfile>,

    /// Extra nmap script (repeatable)
    #[arg(long = "script")]
    pub scripts: Vec<String>,

    /// Submit only the options given here, without the default port range and duration
    #[arg(long)]
    pub no_defaults: bool,

    /// Save results of completed jobs into the download directory
    #[arg(long)]
    pub download: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ForensicArgs {
    /// files, shell_history, processes, network_traffic, file_hashes or rootkit_scan
    pub tool: JobCategory,

    /// Paths to inspect (one job per path)
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Save results of completed jobs into the download directory
    #[arg(long)]
    pub download: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ReportsCommand {
    /// List saved reports
    List,
    /// Show one report with its results
    Show { id: String },
    /// Download a report as PDF
    Download { id: String },
    /// Delete a report
    Delete { id: String },
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    ClientConfig {
        base_url: args.base_url.clone(),
        api_prefix: args.api_prefix.clone(),
        token: args.token.clone(),
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: Duration::from(args.request_timeout),
        download_dir: args
            .download_dir
            .clone()
            .unwrap_or_else(storage::default_download_dir),
        ..ClientConfig::default()
    }
}

fn init_logging(args: &Cli) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let layer = if args.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))
}

pub async fn run(args: Cli) -> Result<()> {
    init_logging(&args)?;
    let cfg = build_config(&args);
    if cfg.poll_interval.is_zero() {
        bail!("--poll-interval must be greater than zero");
    }

    match &args.command {
        Command::Scan(scan) => {
            if scan.category.surface() != Surface::Scan {
                bail!(
                    "'{}' is a forensic tool, use `scanwatch forensic {}`",
                    scan.category,
                    scan.category
                );
            }
            let parameters = scan_parameters(scan);
            let requests = scan
                .targets
                .iter()
                .map(|t| (scan.category, t.clone(), parameters.clone()))
                .collect();
            run_jobs(&args, cfg, requests, scan.download).await
        }
        Command::Forensic(forensic) => {
            if forensic.tool.surface() != Surface::Forensic {
                bail!(
                    "'{}' is a scan type, use `scanwatch scan {}`",
                    forensic.tool,
                    forensic.tool
                );
            }
            let requests = forensic
                .paths
                .iter()
                .map(|p| (forensic.tool, p.clone(), JobParameters::default()))
                .collect();
            run_jobs(&args, cfg, requests, forensic.download).await
        }
        Command::Reports(cmd) => run_reports(&args, &cfg, cmd).await,
    }
}

fn scan_parameters(scan: &ScanArgs) -> JobParameters {
    let mut p = if scan.no_defaults {
        JobParameters::default()
    } else {
        JobParameters::dashboard_defaults()
    };
    if let Some(ports) = scan.ports.clone() {
        p.ports = Some(ports);
    }
    if let Some(d) = scan.duration {
        p.duration = Some(Duration::from(d));
    }
    p.profile = scan.profile;
    p.scripts = scan.scripts.clone();
    p
}

/// Submit every request concurrently, follow each job to a terminal state and print
/// what it produced. The first Ctrl-C stops all running jobs; a second one aborts.
async fn run_jobs(
    args: &Cli,
    cfg: ClientConfig,
    requests: Vec<(JobCategory, String, JobParameters)>,
    download: bool,
) -> Result<()> {
    let gateway = Arc::new(HttpGateway::new(&cfg).context("invalid client configuration")?);
    let registry = Arc::new(JobRegistry::new());
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<JobEvent>();
    let controller =
        LifecycleController::new(gateway, registry, ControllerSettings::from(&cfg), evt_tx);
    let (out_tx, out_handle) = spawn_output_writer();

    let submissions = futures::future::join_all(
        requests
            .iter()
            .map(|(category, target, params)| controller.start_job(*category, target, params.clone())),
    )
    .await;

    let mut pending: HashSet<JobId> = HashSet::new();
    let mut rejected = 0usize;
    for ((category, target, _), res) in requests.iter().zip(submissions) {
        match res {
            Ok(job) => {
                pending.insert(job.id);
            }
            Err(e) => {
                rejected += 1;
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "{category} job for {target} was not submitted: {e}"
                )));
            }
        }
    }

    let mut completed = 0usize;
    let mut finished = Vec::new();
    let mut interrupted = false;
    while !pending.is_empty() {
        tokio::select! {
            ev = evt_rx.recv() => {
                let Some(ev) = ev else { break };
                match ev {
                    JobEvent::TrackingEnded { id } => {
                        if !pending.remove(&id) {
                            continue;
                        }
                        let Some(done) = process_job_completion(&controller, &id, download).await else {
                            continue;
                        };
                        if done.job.status == JobStatus::Completed {
                            completed += 1;
                        }
                        let doc = serde_json::json!({
                            "job": done.job,
                            "results": done.payload.as_deref(),
                            "downloaded": done.downloaded,
                        });
                        if args.json {
                            let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&doc)?));
                        } else {
                            for line in done.lines {
                                let _ = out_tx.send(OutputLine::Stdout(line));
                            }
                        }
                        for msg in done.messages {
                            let _ = out_tx.send(OutputLine::Stderr(msg));
                        }
                        finished.push(doc);
                    }
                    JobEvent::Submitted { .. } if args.json => {}
                    other => {
                        let _ = out_tx.send(OutputLine::Stderr(other.to_message()));
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    let _ = out_tx.send(OutputLine::Stderr("aborting".into()));
                    break;
                }
                interrupted = true;
                let _ = out_tx.send(OutputLine::Stderr("stopping all jobs (Ctrl-C again to abort)".into()));
                for (id, res) in controller.stop_all().await {
                    if let Err(e) = res {
                        let _ = out_tx.send(OutputLine::Stderr(format!("[{id}] could not be stopped: {e}")));
                    }
                }
            }
        }
    }

    controller.shutdown().await;
    if let Some(path) = args.export_json.as_deref() {
        match storage::export_json(path, &finished) {
            Ok(()) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Exported JSON: {}", path.display())));
            }
            Err(e) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Export JSON failed: {e}")));
            }
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    let total = requests.len();
    if completed < total {
        let unfinished = total - completed - rejected;
        bail!(
            "{completed} of {total} jobs completed ({rejected} rejected, {unfinished} stopped, failed or untracked)"
        );
    }
    Ok(())
}

async fn run_reports(args: &Cli, cfg: &ClientConfig, cmd: &ReportsCommand) -> Result<()> {
    let client = ReportsClient::new(cfg).context("invalid client configuration")?;
    match cmd {
        ReportsCommand::List => {
            let reports = client.list().await.context("failed to list reports")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else if reports.is_empty() {
                println!("no reports");
            } else {
                for r in &reports {
                    println!(
                        "{:>6}  {:<16} {:<24} {:<20} {}",
                        r.id,
                        r.scan_type,
                        r.target,
                        r.created_at.as_deref().unwrap_or("-"),
                        r.title
                    );
                }
            }
        }
        ReportsCommand::Show { id } => {
            let report = client
                .get(id)
                .await
                .with_context(|| format!("failed to fetch report {id}"))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for line in report_lines(&report) {
                    println!("{line}");
                }
            }
        }
        ReportsCommand::Download { id } => {
            let path = client
                .download(id, &cfg.download_dir)
                .await
                .with_context(|| format!("failed to download report {id}"))?;
            println!("{}", path.display());
        }
        ReportsCommand::Delete { id } => {
            client
                .delete(id)
                .await
                .with_context(|| format!("failed to delete report {id}"))?;
            eprintln!("report {id} deleted");
        }
    }
    Ok(())
}

fn report_lines(report: &Report) -> Vec<String> {
    let mut lines = vec![format!(
        "[{}] {} ({} {})",
        report.id, report.title, report.scan_type, report.target
    )];
    if let Some(desc) = report.description.as_deref().filter(|d| !d.trim().is_empty()) {
        lines.push(format!("  {desc}"));
    }
    match report.payload() {
        Ok(payload) => {
            let view = view::build_view(&payload);
            lines.extend(text_summary::render_sections(
                &view,
                &view::Expansion::all(&view),
            ));
        }
        Err(e) => lines.push(format!("  results unreadable: {e}")),
    }
    lines
}
