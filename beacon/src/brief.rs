//! beacon-brief - deliver the daily brief to every active user
//!
//! Collects each user's undelivered insights into one digest and sends it via
//! Slack and/or email according to their notification preferences.

mod process_lock;

use anyhow::{Context, Result};
use beacon_core::brief::generate_brief;
use beacon_core::store::{PreferenceStore, UserDirectory};
use beacon_core::{BriefGenerator, BriefRunStats, Config, Database, Notifiers};
use clap::{Parser, ValueEnum};
use process_lock::{acquire_pass_guard, PassKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "beacon-brief")]
#[command(about = "Send the daily brief of pending insights")]
#[command(version)]
struct Args {
    /// Print one user's brief instead of sending anything
    #[arg(long, value_name = "USER_ID")]
    preview: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        beacon_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("beacon-brief starting");

    let db_path = Config::database_path();
    let _pass_guard = if args.preview.is_some() {
        None
    } else {
        Some(acquire_pass_guard(PassKind::Brief, &db_path).context("failed to acquire process lock")?)
    };

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    if let Some(user_id) = &args.preview {
        return preview_brief(&db, &config, user_id);
    }

    let notifiers = Notifiers::from_config(&config).context("failed to create notification clients")?;
    let generator = BriefGenerator::new(&db, &notifiers, &config.brief);
    let stats = generator
        .send_all_briefs(chrono::Utc::now())
        .context("daily brief pass failed")?;

    print_stats(&stats, args.format)?;

    tracing::info!(
        users = stats.users_processed,
        delivered = stats.insights_delivered,
        "beacon-brief complete"
    );

    Ok(())
}

/// Render a user's brief to stdout without delivering or marking anything
fn preview_brief(db: &Database, config: &Config, user_id: &str) -> Result<()> {
    let user = db
        .user(user_id)
        .context("failed to load user")?
        .with_context(|| format!("user not found: {}", user_id))?;
    let prefs = db
        .notification_preferences(user_id)
        .context("failed to load notification preferences")?;
    let pending = db
        .list_undelivered_insights(user_id, &config.brief.exclude_types)
        .context("failed to load pending insights")?;

    let brief = generate_brief(&user, &pending, chrono::Utc::now().date_naive());
    if !brief.has_content {
        println!("No pending insights for {}", user.name);
        return Ok(());
    }

    println!(
        "Channels: slack={} email={} (brief {})",
        prefs.slack_enabled && user.dm_handle().is_some(),
        prefs.email_enabled && user.email_address().is_some(),
        if prefs.daily_brief_enabled { "enabled" } else { "disabled" }
    );
    println!();
    print!("{}", brief.text);
    Ok(())
}

fn print_stats(stats: &BriefRunStats, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }

    println!("Daily brief pass complete:");
    println!("  Users processed:     {}", stats.users_processed);
    println!("  Users skipped:       {}", stats.users_skipped);
    println!("  Sent via Slack:      {}", stats.sent_via_slack);
    println!("  Sent via email:      {}", stats.sent_via_email);
    println!("  Insights delivered:  {}", stats.insights_delivered);

    if !stats.errors.is_empty() {
        println!("\nErrors ({}):", stats.errors.len());
        for err in &stats.errors {
            println!("  {}", err);
        }
    }

    Ok(())
}
