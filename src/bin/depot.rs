use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;
use std::thread;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{Receiver, unbounded};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use switchroot_depot::app::{App, CatalogResult, ScanOptions, Selection};
use switchroot_depot::config::{ComponentsLoader, Settings};
use switchroot_depot::domain::format_size;
use switchroot_depot::error::DepotError;
use switchroot_depot::output::{JsonOutput, OutputMode};
use switchroot_depot::pool::{RunSummary, TaskStatus};
use switchroot_depot::progress::{CancelToken, DownloadEvent, NullSink};
use switchroot_depot::sources::HttpSourceClient;
use switchroot_depot::store::{Store, default_download_dir};
use switchroot_depot::transfer::HttpTransport;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Browse and download Switchroot Linux and Android builds")]
#[command(version, author)]
struct Cli {
    /// Components manifest to use instead of the built-in one
    #[arg(long, global = true)]
    components: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Discover available builds (cached for 24 hours)")]
    Scan(ScanArgs),
    #[command(about = "Show the cached catalog with selection indices")]
    List(ListArgs),
    #[command(about = "Download builds by catalog index")]
    Download(DownloadArgs),
    #[command(about = "Show or update persisted settings")]
    Settings(SettingsArgs),
}

#[derive(Args)]
struct ScanArgs {
    #[arg(long)]
    refresh: bool,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DownloadArgs {
    /// 1-based indices as shown by `depot list`
    #[arg(required_unless_present = "all")]
    indices: Vec<usize>,

    #[arg(long, conflicts_with = "indices")]
    all: bool,

    #[arg(long)]
    dir: Option<Utf8PathBuf>,

    #[arg(long)]
    connections: Option<usize>,

    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SettingsArgs {
    #[arg(long, conflicts_with = "clear_token")]
    token: Option<String>,

    #[arg(long)]
    clear_token: bool,

    #[arg(long)]
    connections: Option<usize>,

    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    dir: Option<Utf8PathBuf>,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(depot) = report.downcast_ref::<DepotError>() {
                return ExitCode::from(map_exit_code(depot));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &DepotError) -> u8 {
    match error {
        DepotError::InvalidSelection(_)
        | DepotError::InvalidDestination(_)
        | DepotError::MissingCatalog => 2,
        DepotError::SourceHttp(_)
        | DepotError::SourceStatus { .. }
        | DepotError::TransferHttp(_)
        | DepotError::TransferStatus { .. }
        | DepotError::Segment { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = Store::new()?;
    let settings = Settings::load(&store);

    match cli.command {
        Commands::Settings(args) => {
            run_settings(args, settings, &store)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scan(args) => {
            let app = build_app(cli.components.as_deref(), store, &settings)?;
            let result = app.scan(ScanOptions {
                refresh: args.refresh,
            })?;
            print_catalog(&result, OutputMode::from_flag(args.json))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::List(args) => {
            let app = build_app(cli.components.as_deref(), store, &settings)?;
            let result = app.list()?;
            print_catalog(&result, OutputMode::from_flag(args.json))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Download(args) => run_download(args, cli.components.as_deref(), store, settings),
    }
}

fn build_app(
    components: Option<&str>,
    store: Store,
    settings: &Settings,
) -> miette::Result<App<HttpSourceClient, HttpTransport>> {
    let components = ComponentsLoader::resolve(components)?;
    let client = HttpSourceClient::new(components.api_urls.clone(), settings.token())?;
    let transport = HttpTransport::new()?;
    Ok(App::new(store, components, settings, client, transport))
}

fn run_download(
    args: DownloadArgs,
    components: Option<&str>,
    store: Store,
    mut settings: Settings,
) -> miette::Result<ExitCode> {
    if let Some(connections) = args.connections {
        settings.download_connections = connections;
    }
    if let Some(chunk_size) = args.chunk_size {
        settings.download_chunk_size = chunk_size;
    }
    if let Some(workers) = args.workers {
        settings.download_workers = workers;
    }
    let root = args
        .dir
        .or_else(|| settings.download_dir.clone())
        .or_else(default_download_dir)
        .ok_or_else(|| DepotError::InvalidDestination("no download directory".to_string()))?;
    fs::create_dir_all(root.as_std_path())
        .map_err(|err| DepotError::InvalidDestination(format!("{root}: {err}")))?;

    let selection = if args.all {
        Selection::All
    } else {
        Selection::Indices(args.indices)
    };
    let mode = OutputMode::from_flag(args.json);
    let app = build_app(components, store, &settings)?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n{YELLOW}Cancelling, waiting for running transfers to stop...{RESET}");
        handler_token.cancel();
    })
    .into_diagnostic()?;

    let summary = match mode {
        OutputMode::Json => app.download(&selection, &root, &NullSink, &cancel)?,
        OutputMode::Human => {
            let (events, receiver) = unbounded();
            let printer = thread::spawn(move || print_events(receiver));
            let result = app.download(&selection, &root, &events, &cancel);
            drop(events);
            let _ = printer.join();
            result?
        }
    };

    match mode {
        OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic()?,
        OutputMode::Human => print_summary(&summary),
    }

    if summary.cancelled {
        return Ok(ExitCode::from(130));
    }
    if summary.failed() > 0 {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_settings(args: SettingsArgs, mut settings: Settings, store: &Store) -> miette::Result<()> {
    let SettingsArgs {
        token,
        clear_token,
        connections,
        chunk_size,
        workers,
        dir,
        json,
    } = args;

    let mut changed = false;
    if let Some(token) = token {
        settings.github_token = Some(token);
        changed = true;
    }
    if clear_token {
        settings.github_token = None;
        changed = true;
    }
    if let Some(connections) = connections {
        settings.download_connections = connections.max(1);
        changed = true;
    }
    if let Some(chunk_size) = chunk_size {
        settings.download_chunk_size = chunk_size.max(1);
        changed = true;
    }
    if let Some(workers) = workers {
        settings.download_workers = workers.max(1);
        changed = true;
    }
    if let Some(dir) = dir {
        settings.download_dir = Some(dir);
        changed = true;
    }
    if changed {
        settings.save(store)?;
    }

    match OutputMode::from_flag(json) {
        OutputMode::Json => JsonOutput::print_settings(&settings).into_diagnostic()?,
        OutputMode::Human => {
            let token = if settings.token().is_some() { "set" } else { "not set" };
            let dir = settings
                .download_dir
                .clone()
                .or_else(default_download_dir)
                .map(|dir| dir.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{CYAN}Settings{RESET} ({})", store.settings_path());
            println!("  github token:  {token}");
            println!("  connections:   {}", settings.download_connections);
            println!("  chunk size:    {}", format_size(settings.download_chunk_size as u64));
            println!("  workers:       {}", settings.download_workers);
            println!("  download dir:  {dir}");
        }
    }
    Ok(())
}

fn print_catalog(result: &CatalogResult, mode: OutputMode) -> miette::Result<()> {
    if let OutputMode::Json = mode {
        return JsonOutput::print_catalog(result).into_diagnostic();
    }
    let origin = if result.from_cache { "cached" } else { "fresh" };
    println!(
        "{CYAN}Available builds{RESET} ({origin}, scanned {})",
        result.scanned_at.format("%Y-%m-%d %H:%M UTC")
    );
    if result.entries.is_empty() {
        println!("{YELLOW}No builds found.{RESET}");
        return Ok(());
    }
    for row in &result.entries {
        let color = if row.size_bytes == 0 { YELLOW } else { GREEN };
        println!(
            "{color}{:>3}. [{}] {:<18} {:<55} {:>10}{RESET}",
            row.index, row.kind, row.distribution, row.name, row.size
        );
    }
    Ok(())
}

fn print_events(receiver: Receiver<DownloadEvent>) {
    let mut stderr = io::stderr();
    let mut in_progress_line = false;
    for event in receiver.iter() {
        if in_progress_line && !matches!(event, DownloadEvent::Progress { .. }) {
            let _ = writeln!(stderr);
            in_progress_line = false;
        }
        match event {
            DownloadEvent::TaskStarted {
                sequence,
                total_tasks,
                filename,
                destination,
            } => {
                let _ = writeln!(
                    stderr,
                    "{CYAN}[{sequence}/{total_tasks}] {filename}{RESET} -> {destination}"
                );
            }
            DownloadEvent::Progress {
                filename,
                completed_tasks,
                total_tasks,
                downloaded_bytes,
                total_bytes,
            } => {
                let total = total_bytes
                    .map(format_size)
                    .unwrap_or_else(|| "?".to_string());
                let _ = write!(
                    stderr,
                    "\r  {filename}: {} / {total} ({completed_tasks}/{total_tasks} files done)\x1b[K",
                    format_size(downloaded_bytes)
                );
                let _ = stderr.flush();
                in_progress_line = true;
            }
            DownloadEvent::TaskFinished {
                completed_tasks,
                total_tasks,
                filename,
                bytes,
                ..
            } => {
                let _ = writeln!(
                    stderr,
                    "{GREEN}  done {filename} ({}) [{completed_tasks}/{total_tasks}]{RESET}",
                    format_size(bytes)
                );
            }
            DownloadEvent::TaskFailed { filename, error, .. } => {
                let _ = writeln!(stderr, "{RED}  failed {filename}: {error}{RESET}");
            }
            DownloadEvent::TaskSkipped {
                filename, reason, ..
            } => {
                let _ = writeln!(stderr, "{YELLOW}  skipped {filename}: {reason}{RESET}");
            }
            DownloadEvent::ProfileFinalized { profile, path } => {
                let _ = writeln!(stderr, "{GREEN}  wrote Android {profile} boot entry {path}{RESET}");
            }
            DownloadEvent::RunFinished { .. } => {}
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("{CYAN}Download summary{RESET}");
    println!(
        "{GREEN}Completed: {}/{}{RESET}",
        summary.completed_tasks, summary.total_tasks
    );
    if summary.failed() > 0 {
        println!("{RED}Failed: {}{RESET}", summary.failed());
    }
    if summary.skipped_tasks() > 0 || !summary.skipped.is_empty() {
        println!(
            "{YELLOW}Skipped: {}{RESET}",
            summary.skipped_tasks() + summary.skipped.len()
        );
    }

    for outcome in &summary.outcomes {
        match &outcome.status {
            TaskStatus::Succeeded { bytes, path } => println!(
                "{GREEN}  ok    {} ({}) {path}{RESET}",
                outcome.filename,
                format_size(*bytes)
            ),
            TaskStatus::Failed { error } => {
                println!("{RED}  fail  {}: {error}{RESET}", outcome.filename)
            }
            TaskStatus::Skipped { reason } => {
                println!("{YELLOW}  skip  {}: {reason}{RESET}", outcome.filename)
            }
        }
    }
    for skipped in &summary.skipped {
        println!("{YELLOW}  skip  {}: {}{RESET}", skipped.filename, skipped.reason);
    }
    for profile in &summary.finalized_profiles {
        println!("{GREEN}Android {} ready: {}{RESET}", profile.profile, profile.path);
    }
    if summary.cancelled {
        println!("{YELLOW}Run cancelled; boot entries were not written.{RESET}");
    }
}
