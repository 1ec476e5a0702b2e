use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand};
use hookwright_core::*;
use hookwright_provider::client::MAX_HOOKS_PAGE;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod render;

use render::{print_hook_page, TranscriptPrinter};

#[derive(Parser)]
#[command(name = "hookwright", version, about = "Stream and bookmark generated hooks")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.hookwright",
        help = "Config root directory (contains config/ and logs/)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Generate hooks for a prompt and stream them to the terminal")]
    Generate {
        #[arg(help = "Prompt sent to the generation backend")]
        query: String,
        #[arg(long, help = "Bookmark every finalized hook once generation ends")]
        bookmark_all: bool,
    },
    #[command(subcommand, about = "Stored hook management")]
    Hooks(HookCommands),
    #[command(about = "Validate config files")]
    Validate,
}

#[derive(Subcommand)]
enum HookCommands {
    #[command(about = "List hooks saved by the backend")]
    List {
        #[arg(long, default_value = "10", help = "Page size (1-50)")]
        limit: u32,
        #[arg(long, default_value = "0", help = "Records to skip")]
        offset: u32,
    },
}

fn expand_home(path: &Path) -> PathBuf {
    if !path.starts_with("~") {
        return path.to_path_buf();
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(path.strip_prefix("~").unwrap_or(path)),
        None => path.to_path_buf(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    cli.config_root = expand_home(&cli.config_root);

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config(&cli.config_root.join("config"))?;
    let _guard = init_logging(&cli.config_root, &config.logging)?;

    match command {
        Commands::Validate => {
            println!(
                "Config valid. Backend {} (stream {}, bookmarks {}).",
                config.backend.base_url, config.backend.stream_path, config.backend.bookmark_path
            );
        }
        Commands::Generate {
            query,
            bookmark_all,
        } => {
            run_generate(&config, &query, bookmark_all).await?;
        }
        Commands::Hooks(HookCommands::List { limit, offset }) => {
            if limit == 0 || limit > MAX_HOOKS_PAGE {
                return Err(anyhow!("--limit must be between 1 and {MAX_HOOKS_PAGE}"));
            }
            let page = config.build_backend().list_hooks(limit, offset).await?;
            print_hook_page(&page, &mut std::io::stdout().lock())?;
        }
    }

    Ok(())
}

fn init_logging(
    config_root: &Path,
    logging: &LoggingConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if !logging.file {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr)
            .init();
        return Ok(None);
    }

    let log_dir = config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "hookwright.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();
    Ok(Some(guard))
}

async fn run_generate(config: &HookwrightConfig, query: &str, bookmark_all: bool) -> Result<()> {
    let session = GenerationSession::with_options(
        Arc::new(config.build_backend()),
        config.session_options(),
    );
    let mut updates = session.subscribe();
    let task = session.generate(query).map_err(|e| match e {
        GenerateError::EmptyQuery => anyhow!(EMPTY_QUERY_MESSAGE),
        other => anyhow!(other),
    })?;

    let mut printer = TranscriptPrinter::default();
    let mut stdout = std::io::stdout();
    let wait = task.wait();
    tokio::pin!(wait);

    let mut completed_at_interrupt = false;
    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            Ok(()) = updates.changed() => {
                let transcript = updates.borrow_and_update().transcript.clone();
                printer.render(&transcript, &mut stdout)?;
            }
            _ = tokio::signal::ctrl_c() => {
                completed_at_interrupt = !session.snapshot().is_generating;
                tracing::info!(completed_at_interrupt, "interrupted, cancelling generation");
                session.cancel();
            }
        }
    };
    let outcome = settle_outcome(outcome, completed_at_interrupt);

    let snapshot = session.snapshot();
    printer.render(&snapshot.transcript, &mut stdout)?;
    println!();

    match outcome {
        AttemptOutcome::Finished => {}
        AttemptOutcome::Cancelled => {
            eprintln!("Generation cancelled.");
            return Ok(());
        }
        AttemptOutcome::Failed(message) => return Err(anyhow!(message)),
    }

    if bookmark_all {
        let mut saved = 0usize;
        for hook in &snapshot.transcript.hooks {
            match session.bookmark(&hook.id).await {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(e) => eprintln!("Failed to bookmark \"{}\": {e}", hook.content),
            }
        }
        println!(
            "Bookmarked {saved} of {} hooks.",
            snapshot.transcript.hooks.len()
        );
    }

    Ok(())
}

/// An interrupt that only closes a stream which already reported
/// completion still counts as a finished generation.
fn settle_outcome(outcome: AttemptOutcome, completed_at_interrupt: bool) -> AttemptOutcome {
    match outcome {
        AttemptOutcome::Cancelled if completed_at_interrupt => AttemptOutcome::Finished,
        other => other,
    }
}
