use clap::{Parser, Subcommand};
use miette::{Error, IntoDiagnostic};
use sr::adapter::get_adapter_from_string;
use sr::catalog::Catalog;
use sr::config::{get_sr_dir, read_settings, SystemClock};
use sr::deck::DeckTree;
use sr::scheduler::impls::sm2::Sm2Scheduler;
use sr::scheduler::{get_scheduler_from_string, Scheduler};
use sr::session::{ReviewFilters, ReviewSession};
use sr::sync::synchronize;
use std::io::{self, Write};
use std::path::PathBuf;

/// Spaced repetition card lifecycle engine
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan paths and reconcile them into the catalog
    Scan(ScanArgs),
    /// Scan paths, then run an interactive review session over them
    Review(ReviewArgs),
    /// Print catalog status aggregates
    Status,
    /// Print the deck tree
    Decks,
}

#[derive(Debug, clap::Args)]
struct ScanArgs {
    /// Markdown files or directories to scan. Defaults to the current directory.
    paths: Vec<PathBuf>,
}

#[derive(Debug, clap::Args)]
struct ReviewArgs {
    /// Markdown files or directories to scan before reviewing. Defaults to the current directory.
    paths: Vec<PathBuf>,
    /// Only review cards carrying this tag.
    #[arg(long)]
    tag: Option<String>,
    /// Only review cards carrying this flag.
    #[arg(long)]
    flag: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Cli::parse();
    if let Err(e) = process_args(args).await {
        println!("{:?}", e);
        std::process::exit(1);
    }
}

fn scan_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    if paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        paths.to_vec()
    }
}

async fn process_args(args: Cli) -> Result<(), Error> {
    let sr_dir = get_sr_dir();
    let settings = read_settings(&sr_dir).into_diagnostic()?;
    let db_path = sr_dir.join("sr.db");
    let catalog = Catalog::connect(&db_path.to_string_lossy())
        .await
        .into_diagnostic()?;
    let mut schedulers: Vec<Box<dyn Scheduler>> = vec![Box::new(
        Sm2Scheduler::connect(&db_path.to_string_lossy())
            .await
            .into_diagnostic()?,
    )];
    let idx = get_scheduler_from_string(&settings.scheduler, &schedulers).into_diagnostic()?;
    let scheduler = schedulers.swap_remove(idx);
    let clock = SystemClock;

    match args.command {
        Commands::Scan(scan_args) => {
            let paths = scan_paths(&scan_args.paths);
            let report = synchronize(
                &catalog,
                &paths,
                &get_adapter_from_string,
                Some(scheduler.as_ref()),
                &clock,
            )
            .await
            .into_diagnostic()?;
            println!(
                "new: {}, updated: {}, unchanged: {}, deleted: {}",
                report.new, report.updated, report.unchanged, report.deleted
            );
        }
        Commands::Review(review_args) => {
            let paths = scan_paths(&review_args.paths);
            synchronize(
                &catalog,
                &paths,
                &get_adapter_from_string,
                Some(scheduler.as_ref()),
                &clock,
            )
            .await
            .into_diagnostic()?;

            let filters = ReviewFilters {
                tag: review_args.tag,
                path_prefix: None,
                flag: review_args.flag,
            };
            run_review(
                catalog,
                Some(scheduler),
                filters,
                &clock,
                settings.edit_command.as_deref(),
            )
            .await?;
        }
        Commands::Status => {
            let mut conn = catalog.pool().acquire().await.into_diagnostic()?;
            let status = Catalog::aggregate_status(&mut conn, scheduler.scheduler_id())
                .await
                .into_diagnostic()?;
            println!("active:   {}", status.active);
            println!("inactive: {}", status.inactive);
            println!("deleted:  {}", status.deleted);
            println!("due:      {}", status.due);
            println!("scheduler: {}", settings.scheduler);
        }
        Commands::Decks => {
            let mut conn = catalog.pool().acquire().await.into_diagnostic()?;
            let tree = Catalog::deck_tree(&mut conn, scheduler.scheduler_id())
                .await
                .into_diagnostic()?;
            print_deck_tree(&tree, 0);
        }
    }
    Ok(())
}

fn print_deck_tree(nodes: &[DeckTree], depth: usize) {
    for node in nodes {
        println!(
            "{}{} ({}/{} active, {} due)",
            "  ".repeat(depth),
            node.name,
            node.stats.active,
            node.stats.total,
            node.stats.due
        );
        print_deck_tree(&node.children, depth + 1);
    }
}

/// Drives an interactive review loop over stdin/stdout, following the
/// reference implementation's terminal review session: show the front,
/// wait for the user to flip, then collect a pass/fail grade.
async fn run_review(
    catalog: Catalog,
    scheduler: Option<Box<dyn Scheduler>>,
    filters: ReviewFilters,
    clock: &SystemClock,
    edit_command: Option<&str>,
) -> Result<(), Error> {
    let mut session = ReviewSession::new(catalog, scheduler, filters);
    loop {
        let remaining = session.remaining_count(clock).await.into_diagnostic()?;
        if remaining == 0 {
            println!("No cards due. Reviewed {} card(s).", session.reviewed());
            return Ok(());
        }
        let Some(card) = session.get_next_card(clock).await.into_diagnostic()?.cloned() else {
            println!("No cards due. Reviewed {} card(s).", session.reviewed());
            return Ok(());
        };
        println!("--- {} ---", card.source_path);
        println!("{}", session.render_front(&card).into_diagnostic()?);

        if !card.gradable {
            prompt("Press enter to continue> ");
            session.skip().await.into_diagnostic()?;
            continue;
        }

        prompt("Press enter to flip> ");
        let back = session.flip(clock).into_diagnostic()?;
        println!("{back}");

        let grade = loop {
            let line = prompt("Pass (p) / Fail (f) / Suspend (s) / Undo (u) / Edit (e)> ");
            match line.trim() {
                "p" => break Some(1),
                "f" => break Some(0),
                "s" => {
                    session.suspend(clock).await.into_diagnostic()?;
                    break None;
                }
                "u" => {
                    session.undo().into_diagnostic()?;
                    break None;
                }
                "e" => {
                    let cmd = sr::session::build_edit_command(
                        edit_command,
                        &card.source_path,
                        card.source_line,
                    );
                    spawn_shell(&cmd);
                }
                _ => println!("Unrecognized input."),
            }
        };
        if let Some(grade) = grade {
            session
                .grade_current(grade, None, None, clock)
                .await
                .into_diagnostic()?;
        }
    }
}

fn prompt(message: &str) -> String {
    print!("{message}");
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin().read_line(&mut line).ok();
    line
}

fn spawn_shell(cmd: &str) {
    match std::process::Command::new("sh").arg("-c").arg(cmd).status() {
        Ok(status) if !status.success() => println!("editor exited with {status}"),
        Err(e) => println!("failed to launch editor: {e}"),
        Ok(_) => {}
    }
}
