mod db;
mod extract;
mod fetch;
mod importer;
mod job;

use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::fetch::PageFetcher;
use crate::importer::ImporterConfig;
use crate::job::ImportJob;

#[derive(Parser)]
#[command(
    name = "hcdn_scraper",
    about = "Imports legislative bills by scraping the HCDN search results"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import bills once, resuming from the stored checkpoint
    Run {
        /// Max pages to dispatch (default: until end of data)
        #[arg(short = 'n', long)]
        limit: Option<u32>,
        /// Concurrent page workers
        #[arg(long, default_value_t = 4)]
        pool: usize,
        /// Bills requested per page
        #[arg(long, default_value_t = 250)]
        page_size: u32,
        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Run the import on a recurring period
    Schedule {
        /// Seconds between runs
        #[arg(long, default_value_t = 86_400)]
        every: u64,
        /// Concurrent page workers
        #[arg(long, default_value_t = 4)]
        pool: usize,
        /// Bills requested per page
        #[arg(long, default_value_t = 250)]
        page_size: u32,
        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Show import statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// List imported bills
    Bills {
        /// Exact bill file id
        #[arg(long)]
        file: Option<String>,
        /// Creation date lower bound (dd/mm/yyyy)
        #[arg(long)]
        from: Option<String>,
        /// Creation date upper bound (dd/mm/yyyy)
        #[arg(long)]
        to: Option<String>,
        /// Subscriber party (repeatable)
        #[arg(long)]
        party: Vec<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show or overwrite the page checkpoint
    Checkpoint {
        /// Overwrite the stored page number (use to reprocess pages)
        #[arg(long)]
        set: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            limit,
            pool,
            page_size,
            timeout,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let job = ImportJob::new(
                ImporterConfig {
                    pool_size: pool,
                    max_pages: limit,
                },
                PageFetcher::new(page_size, Duration::from_secs(timeout))?,
            );
            if let Some(summary) = job.run(&conn).await? {
                print_summary(&summary);
            }
            Ok(())
        }
        Commands::Schedule {
            every,
            pool,
            page_size,
            timeout,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let job = ImportJob::new(
                ImporterConfig {
                    pool_size: pool,
                    max_pages: None,
                },
                PageFetcher::new(page_size, Duration::from_secs(timeout))?,
            );
            job.schedule(&conn, Duration::from_secs(every)).await
        }
        Commands::Stats { json } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let stats = db::get_stats(&conn)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Bills:      {}", stats.bills);
                println!("Persons:    {}", stats.persons);
                println!("Dictums:    {}", stats.dictums);
                println!("Procedures: {}", stats.procedures);
                println!("Committees: {}", stats.committees);
                println!("Checkpoint: page {}", stats.last_page);
            }
            Ok(())
        }
        Commands::Bills {
            file,
            from,
            to,
            party,
            limit,
            json,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let filter = db::BillFilter {
                file,
                from: from.as_deref().map(parse_cli_date).transpose()?,
                to: to.as_deref().map(parse_cli_date).transpose()?,
                parties: party,
            };
            let rows = db::find_bills(&conn, &filter, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("No bills found.");
                return Ok(());
            }

            println!(
                "{:<16} | {:<20} | {:<10} | {:>5} | {:<40}",
                "File", "Type", "Created", "Subs", "Summary"
            );
            println!("{}", "-".repeat(103));
            for r in &rows {
                println!(
                    "{:<16} | {:<20} | {:<10} | {:>5} | {:<40}",
                    truncate(&r.file, 16),
                    truncate(&r.bill_type, 20),
                    r.creation_date,
                    r.subscribers,
                    truncate(&r.summary, 40),
                );
            }
            println!("\n{} bills", rows.len());
            Ok(())
        }
        Commands::Checkpoint { set } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            if let Some(page) = set {
                db::force_checkpoint(&conn, page)?;
                println!("Checkpoint set to page {}", page);
            } else {
                println!("Checkpoint: page {}", db::get_checkpoint(&conn)?);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_summary(summary: &importer::RunSummary) {
    println!(
        "Done: {} pages processed, {} bills imported, {} fragments failed. Checkpoint at page {}.",
        summary.pages.len(),
        summary.bills_succeeded(),
        summary.fragments_failed(),
        summary.checkpoint,
    );
    for page in &summary.pages {
        for failure in &page.failed {
            println!(
                "  page {} [{}] {}: {}",
                page.page,
                failure.stage,
                failure.file.as_deref().unwrap_or("unknown file"),
                failure.error,
            );
        }
    }
}

fn parse_cli_date(value: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%d/%m/%Y")
        .with_context(|| format!("invalid date {:?}, expected dd/mm/yyyy", value))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
