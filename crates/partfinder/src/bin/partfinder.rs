use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use partfinder::events::EVENT_POLL_INTERVAL;
use partfinder::{FinderConfig, SearchEvent, SearchManager, SessionId, SessionMetrics};

/// Find an inventory folder by code and load its image thumbnails.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory whose immediate subfolders are searched
    root: PathBuf,

    /// Code or name to look for; accents, case and symbols are ignored
    term: String,

    /// JSON configuration file; missing fields use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker pool size (defaults to available parallelism + 4)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Load thumbnails one at a time on the search thread
    #[arg(long)]
    sequential: bool,

    /// Edge of the square thumbnail bounding box, in pixels
    #[arg(long)]
    thumbnail_size: Option<u32>,

    /// Cancel the search after this many milliseconds
    #[arg(long)]
    cancel_after_ms: Option<u64>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> partfinder::Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => FinderConfig::load_or_default(path)?,
        None => FinderConfig::default(),
    };
    if cli.workers.is_some() {
        config.max_workers = cli.workers;
    }
    if let Some(size) = cli.thumbnail_size {
        config.thumbnail_size = size;
    }
    if cli.sequential {
        config.parallel_loading = false;
    }

    let session_id = SessionId::generate();
    let metrics = Arc::new(SessionMetrics::new(session_id.clone()));
    let manager = SearchManager::new(config, session_id, metrics.clone())?;

    let started = Instant::now();
    let cancel_after = cli.cancel_after_ms.map(Duration::from_millis);
    let mut cancel_requested = false;
    let mut events = manager.start(&cli.root, &cli.term)?;

    let code = loop {
        if let Some(limit) = cancel_after {
            if !cancel_requested && started.elapsed() >= limit {
                cancel_requested = true;
                manager.cancel(Duration::ZERO);
            }
        }

        let Some(event) = events.wait_next(EVENT_POLL_INTERVAL) else {
            if events.is_closed() {
                eprintln!("error: search ended without a result");
                break ExitCode::from(2);
            }
            continue;
        };

        println!("{event}");
        if event.is_terminal() {
            break exit_code(&event);
        }
    };

    manager.shutdown();
    metrics.log_summary();
    Ok(code)
}

fn exit_code(event: &SearchEvent) -> ExitCode {
    match event {
        SearchEvent::Done(_) => ExitCode::SUCCESS,
        SearchEvent::NotFound { .. } | SearchEvent::NoAssets { .. } | SearchEvent::Cancelled => {
            ExitCode::from(1)
        }
        _ => ExitCode::from(2),
    }
}
