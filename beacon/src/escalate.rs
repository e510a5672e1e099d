//! beacon-escalate - run the proactive insight escalation pass
//!
//! Escalates aging insights (DM, then internal channel, then a comment on
//! the external item) according to each owner's preferences.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/beacon/beacon.db (~/.local/share/beacon/beacon.db)
//! - Logs: $XDG_STATE_HOME/beacon/beacon.log.YYYY-MM-DD (~/.local/state/beacon/)
//! - Config: $XDG_CONFIG_HOME/beacon/config.toml (~/.config/beacon/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use beacon_core::escalation::{Decision, EscalationPreview};
use beacon_core::{Config, Database, EscalationCoordinator, EscalationRunStats, Notifiers};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::{acquire_pass_guard, PassKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "beacon-escalate")]
#[command(about = "Escalate aging insights to their owners")]
#[command(version)]
struct Args {
    /// Show what each insight would get without sending or recording anything
    #[arg(long)]
    dry_run: bool,

    /// Watch mode - run a pass every interval instead of once
    #[arg(short, long)]
    watch: bool,

    /// Seconds between passes (only with --watch)
    #[arg(long, default_value = "900")]
    interval: u64,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        beacon_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(dry_run = args.dry_run, watch = args.watch, "beacon-escalate starting");

    let db_path = Config::database_path();
    let _pass_guard = if args.dry_run {
        None
    } else {
        Some(acquire_pass_guard(PassKind::Escalate, &db_path).context("failed to acquire process lock")?)
    };

    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let notifiers = Notifiers::from_config(&config).context("failed to create notification clients")?;
    let coordinator = EscalationCoordinator::new(&db, &notifiers, &config.escalation);

    if args.dry_run {
        let preview = coordinator
            .preview(chrono::Utc::now())
            .context("failed to preview escalations")?;
        return print_preview(&preview, args.format);
    }

    if args.watch {
        run_watch_mode(&coordinator, &args)
    } else {
        run_single_pass(&coordinator, &args)
    }
}

/// Run one pass with a progress bar
fn run_single_pass(coordinator: &EscalationCoordinator<'_, Database>, args: &Args) -> Result<()> {
    let pb = if args.format == OutputFormat::Text {
        ProgressBar::new(0)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress bar template")?
            .progress_chars("#>-"),
    );

    let stats = coordinator
        .run_with_progress(chrono::Utc::now(), |current, total, insight_id| {
            if current == 0 {
                pb.set_length(total as u64);
            }
            pb.set_position(current as u64);
            pb.set_message(insight_id.to_string());
        })
        .context("escalation pass failed")?;

    pb.finish_and_clear();
    print_stats(&stats, args.format)?;

    tracing::info!(
        checked = stats.total_checked,
        escalated = stats.escalations_performed,
        "beacon-escalate complete"
    );

    Ok(())
}

/// Run passes until Ctrl+C
fn run_watch_mode(coordinator: &EscalationCoordinator<'_, Database>, args: &Args) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let interval = Duration::from_secs(args.interval.max(1));
    println!(
        "Watch mode active (pass every {}s). Press Ctrl+C to stop.",
        interval.as_secs()
    );

    let mut iteration = 0u64;
    while running.load(Ordering::SeqCst) {
        iteration += 1;

        if let Some(stats) = watch_iteration(coordinator, iteration) {
            // Only print passes that did something
            if stats.escalations_performed > 0 || !stats.errors.is_empty() {
                let timestamp = chrono::Local::now().format("%H:%M:%S");
                println!(
                    "[{}] Escalated {} of {} insights ({} failed sub-actions, {} errors)",
                    timestamp,
                    stats.escalations_performed,
                    stats.total_checked,
                    stats.failed_actions,
                    stats.errors.len()
                );
            }

            tracing::info!(
                iteration,
                checked = stats.total_checked,
                escalated = stats.escalations_performed,
                "watch escalation iteration"
            );
        }

        // Sleep in short steps so Ctrl+C is honoured promptly
        let deadline = Instant::now() + interval;
        while running.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(200));
        }
    }

    println!("Watch mode stopped.");
    tracing::info!("beacon-escalate watch mode stopped");

    Ok(())
}

/// Run one watch pass. A failed pass is reported and retried on the next
/// interval instead of ending the loop.
fn watch_iteration(
    coordinator: &EscalationCoordinator<'_, Database>,
    iteration: u64,
) -> Option<EscalationRunStats> {
    match coordinator.run(chrono::Utc::now()) {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::error!(iteration, error = %e, "Escalation pass failed, retrying next interval");
            eprintln!(
                "[{}] Escalation pass failed: {}",
                chrono::Local::now().format("%H:%M:%S"),
                e
            );
            None
        }
    }
}

fn print_stats(stats: &EscalationRunStats, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }

    println!("Escalation pass complete:");
    println!("  Insights checked:     {}", stats.total_checked);
    println!("  Escalations:          {}", stats.escalations_performed);
    println!("  DMs sent:             {}", stats.dm);
    println!("  Channel posts:        {}", stats.channel);
    println!("  External comments:    {}", stats.external_comment);
    println!("  Failed sub-actions:   {}", stats.failed_actions);

    if !stats.skipped.is_empty() {
        println!("\nSkipped ({}):", stats.skipped_total());
        for (reason, count) in &stats.skipped {
            println!("  {}: {}", reason, count);
        }
    }

    if !stats.errors.is_empty() {
        println!("\nErrors ({}):", stats.errors.len());
        for (insight_id, err) in &stats.errors {
            println!("  {}: {}", insight_id, err);
        }
        println!(
            "\nSee {} for details",
            beacon_core::logging::log_file_path().display()
        );
    }

    Ok(())
}

fn print_preview(preview: &[EscalationPreview], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(preview)?);
        return Ok(());
    }

    println!("Dry run - {} active insight(s), nothing sent", preview.len());
    for entry in preview {
        let decision = match entry.decision {
            Decision::Escalate { target_level } => {
                format!("escalate {} -> {}", entry.current_level, target_level)
            }
            Decision::Skip { reason } => format!("skip ({})", reason),
        };
        println!(
            "  {} [{}] {}d {}: {}",
            entry.insight_id, entry.insight_type, entry.age_days, entry.title, decision
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::config::EscalationConfig;
    use beacon_core::notify::RecordingNotifier;

    #[test]
    fn test_failed_watch_pass_does_not_end_the_loop() {
        // No migrations, so listing insights fails
        let db = Database::open_in_memory().unwrap();
        let notifiers = Notifiers::uniform(Arc::new(RecordingNotifier::new()));
        let coordinator = EscalationCoordinator::new(&db, &notifiers, &EscalationConfig::default());

        assert!(watch_iteration(&coordinator, 1).is_none());

        db.migrate().unwrap();
        let stats = watch_iteration(&coordinator, 2).unwrap();
        assert_eq!(stats.total_checked, 0);
    }
}
