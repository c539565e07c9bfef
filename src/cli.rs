use crate::backend::{HttpBackend, PipelineBackend};
use crate::model::{
    parse_date, DateRange, MineId, PipelineEvent, RunConfig, DEFAULT_END_DATE, DEFAULT_START_DATE,
};
use crate::orchestrator::{
    process_session_completion, run_controller, PipelineSession, SubmitFailure, UiCommand,
};
use crate::selection::SelectionState;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

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

fn parse_date_arg(s: &str) -> std::result::Result<String, String> {
    parse_date(s)
        .map(|_| s.to_string())
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "minewatch",
    version,
    about = "Submit mine-analysis pipeline jobs and follow them until they finish"
)]
pub struct Cli {
    /// Base URL of the mine-analysis backend
    #[arg(long, env = "MINEWATCH_API_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    /// Toggle one mine by index (repeatable). Applied after --all
    #[arg(long = "mine", value_name = "INDEX")]
    pub mines: Vec<MineId>,

    /// Toggle select-all before applying --mine
    #[arg(long)]
    pub all: bool,

    /// Number of mines known to the backend
    #[arg(long, default_value_t = 11)]
    pub mine_count: usize,

    /// First day of the processing window
    #[arg(long, default_value = DEFAULT_START_DATE, value_parser = parse_date_arg)]
    pub start_date: String,

    /// Last day of the processing window
    #[arg(long, default_value = DEFAULT_END_DATE, value_parser = parse_date_arg)]
    pub end_date: String,

    /// Delay between status polls
    #[arg(long, default_value = "3s")]
    pub poll_interval: humantime::Duration,

    /// Per-request timeout (none by default)
    #[arg(long)]
    pub request_timeout: Option<humantime::Duration>,

    /// Print the session report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Run silently: suppress progress output, print only the JSON report
    #[arg(long)]
    pub silent: bool,

    /// After the session, fetch KPIs over the window for every completed task
    #[arg(long)]
    pub kpi: bool,

    /// Use the blocking /admin/run endpoint, one mine at a time
    #[arg(long)]
    pub sync: bool,

    /// Query /health and exit
    #[arg(long)]
    pub check_health: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let cfg = build_config(&args)?;
    let backend = HttpBackend::new(&cfg)?;
    info!(api = %backend.base_url(), "using backend");

    if args.check_health {
        return run_health(&args, &backend).await;
    }

    let selection = build_selection(&args, &cfg)?;
    if args.sync {
        return run_sync(&args, &backend, &selection).await;
    }
    run_pipeline(&args, cfg, backend, selection).await
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<RunConfig> {
    let poll_interval = Duration::from(args.poll_interval);
    if poll_interval.is_zero() {
        anyhow::bail!("--poll-interval must be greater than zero");
    }
    Ok(RunConfig {
        api_url: args.api_url.clone(),
        mine_count: args.mine_count,
        date_range: DateRange::new(args.start_date.clone(), args.end_date.clone()),
        poll_interval,
        request_timeout: args.request_timeout.map(Duration::from),
        user_agent: format!("minewatch/{}", env!("CARGO_PKG_VERSION")),
    })
}

/// Apply `--all`, then each `--mine` toggle, then the requested window to a fresh selection.
fn build_selection(args: &Cli, cfg: &RunConfig) -> Result<SelectionState> {
    let mut selection = SelectionState::new(cfg.mine_count, DateRange::default());
    if args.all {
        selection.toggle_select_all();
    }
    for &mine in &args.mines {
        selection.toggle_mine(mine).context("invalid --mine")?;
    }
    if selection.selected_mines().is_empty() {
        anyhow::bail!("no mines selected; pass --mine INDEX or --all");
    }
    selection.set_date_range(cfg.date_range.clone());
    Ok(selection)
}

async fn run_health(args: &Cli, backend: &HttpBackend) -> Result<()> {
    let body = backend.health().await.context("health check failed")?;
    let out = if args.json {
        serde_json::to_string_pretty(&body)?
    } else {
        format!("Backend healthy: {body}")
    };
    println!("{out}");
    Ok(())
}

#[derive(Debug, Serialize)]
struct SyncRunLine {
    mine_id: MineId,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn run_sync(args: &Cli, backend: &HttpBackend, selection: &SelectionState) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let mines = selection.selected_mines();
    if !args.silent {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "Running {} mine(s) synchronously for {}",
            mines.len(),
            selection.date_range()
        )));
    }

    let outcomes = crate::pipeline::run_sync_batch(backend, &mines, selection.date_range()).await;
    let lines: Vec<SyncRunLine> = outcomes
        .into_iter()
        .map(|o| match o.result {
            Ok(v) => SyncRunLine {
                mine_id: o.mine_id,
                result: Some(v),
                error: None,
            },
            Err(e) => SyncRunLine {
                mine_id: o.mine_id,
                result: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    let failed = lines.iter().filter(|l| l.error.is_some()).count();

    if args.json {
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&lines)?));
    } else {
        for line in &lines {
            let msg = match (&line.result, &line.error) {
                (_, Some(err)) => format!("Mine {:>2} failed: {err}", line.mine_id),
                (Some(v), None) => format!("Mine {:>2} done: {v}", line.mine_id),
                (None, None) => format!("Mine {:>2} done", line.mine_id),
            };
            let _ = out_tx.send(OutputLine::Stdout(msg));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    if failed > 0 {
        anyhow::bail!("{failed} of {} synchronous run(s) failed", lines.len());
    }
    Ok(())
}

/// Submit the selection, poll until every task is terminal (or Ctrl-C), then report.
async fn run_pipeline(
    args: &Cli,
    cfg: RunConfig,
    backend: HttpBackend,
    selection: SelectionState,
) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<PipelineEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let backend = Arc::new(backend);
    let session = PipelineSession::new(Arc::clone(&backend), selection, cfg.poll_interval, evt_tx);
    cmd_tx
        .send(UiCommand::RunPipeline)
        .context("controller is not running")?;

    // The signal task owns the only sender, keeping the command channel open.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cmd_tx.send(UiCommand::Quit);
        }
    });
    let controller = tokio::spawn(run_controller(session, cmd_rx, true));

    let mut submit_failures = Vec::new();
    while let Some(ev) = evt_rx.recv().await {
        if let PipelineEvent::SubmitFailed { mine_id, error } = &ev {
            submit_failures.push(SubmitFailure {
                mine_id: *mine_id,
                error: error.clone(),
            });
        }
        if args.silent {
            continue;
        }
        if let Some(line) = crate::text_summary::render_event(&ev) {
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
    }

    let snapshot = controller
        .await
        .context("pipeline controller task failed")??;
    let mut report = process_session_completion(&cfg, snapshot, submit_failures);
    if args.kpi {
        report.kpis =
            crate::pipeline::fetch_completed_kpis(backend.as_ref(), &report.tasks, &cfg.date_range)
                .await;
    }

    if args.json {
        let out = serde_json::to_string_pretty(&report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in crate::text_summary::build_text_summary(&report).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    if !report.all_succeeded() {
        anyhow::bail!(
            "{} task(s) failed, {} unfinished, {} submission(s) rejected",
            report.failed,
            report.unfinished,
            report.submit_failures.len()
        );
    }
    Ok(())
}
