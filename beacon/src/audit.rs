//! beacon-audit - inspect the escalation audit trail
//!
//! Read-only: never sends notifications or changes tracking state.

use anyhow::{Context, Result};
use beacon_core::{ChannelSafetyValidator, Config, Database, EscalationRecord};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "beacon-audit")]
#[command(about = "Inspect escalation history and insight tracking")]
#[command(version)]
struct Args {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the audit trail of one insight, oldest first
    History {
        insight_id: String,
    },
    /// Show the most recent escalation attempts across all insights
    Recent {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show an insight with its escalation and delivery state
    Insight {
        insight_id: String,
    },
    /// List allow-listed internal channels, for one project or all
    Channels {
        project_key: Option<String>,

        /// Check whether CHANNEL is safe for the project (any project if none given)
        #[arg(long, value_name = "CHANNEL")]
        check: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        beacon_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    match args.command {
        Command::History { insight_id } => {
            let records = db
                .get_escalation_history(&insight_id)
                .context("failed to load escalation history")?;
            print_records(&records, args.format)
        }
        Command::Recent { limit } => {
            let records = db
                .list_recent_escalation_history(limit)
                .context("failed to load escalation history")?;
            print_records(&records, args.format)
        }
        Command::Insight { insight_id } => {
            let insight = db
                .get_insight(&insight_id)
                .context("failed to load insight")?
                .with_context(|| format!("insight not found: {}", insight_id))?;

            if args.format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&insight)?);
                return Ok(());
            }

            let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
                t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
            };
            println!("{} [{}] {}", insight.id, insight.insight_type, insight.title);
            println!("  Owner:            {}", insight.user_id);
            println!("  Severity:         {}", insight.severity);
            println!("  Project:          {}", insight.resolved_project_key().unwrap_or("-"));
            println!("  Created:          {}", insight.created_at.to_rfc3339());
            println!("  Active:           {}", insight.is_active());
            println!("  Escalation level: {}/3", insight.escalation_level);
            println!("  Escalations:      {}", insight.escalation_count);
            println!("  Last escalated:   {}", fmt_time(insight.last_escalated_at));
            println!("  Delivered Slack:  {}", fmt_time(insight.delivered_via_slack));
            println!("  Delivered email:  {}", fmt_time(insight.delivered_via_email));
            Ok(())
        }
        Command::Channels {
            project_key,
            check: Some(channel),
        } => {
            let safe = ChannelSafetyValidator::new(&db).is_safe(&channel, project_key.as_deref());

            if args.format == OutputFormat::Json {
                let result = serde_json::json!({
                    "channel": channel,
                    "project_key": project_key,
                    "safe": safe,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            let scope = project_key.as_deref().unwrap_or("any project");
            if safe {
                println!("{}: safe for {}", channel, scope);
            } else {
                println!("{}: NOT safe for {}", channel, scope);
            }
            Ok(())
        }
        Command::Channels {
            project_key,
            check: None,
        } => {
            let mut by_project: Vec<(String, Vec<String>)> = match project_key {
                Some(project) => {
                    let channels = db
                        .list_safe_channels(&project)
                        .context("failed to load channel allow-list")?;
                    vec![(project, channels)]
                }
                None => db
                    .list_all_safe_channels()
                    .context("failed to load channel allow-lists")?
                    .into_iter()
                    .collect(),
            };
            by_project.sort();

            if args.format == OutputFormat::Json {
                let map: std::collections::BTreeMap<_, _> = by_project.into_iter().collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
                return Ok(());
            }

            for (project, channels) in by_project {
                if channels.is_empty() {
                    println!("{}: (none - channel escalation disabled)", project);
                } else {
                    println!("{}: {}", project, channels.join(", "));
                }
            }
            Ok(())
        }
    }
}

fn print_records(records: &[EscalationRecord], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No escalation attempts recorded");
        return Ok(());
    }

    for record in records {
        let status = if record.success { "ok" } else { "FAILED" };
        println!(
            "{} {} L{} {:<16} {:<6} {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.insight_id,
            record.escalation_level,
            record.escalation_type.as_str(),
            status,
            record.target.as_deref().unwrap_or("-")
        );
        if let Some(err) = &record.error_message {
            println!("    error: {}", err);
        }
    }
    Ok(())
}
