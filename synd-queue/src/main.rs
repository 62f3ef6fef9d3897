//! synd-queue - Manage the scheduled distribution queue
//!
//! Unix-style tool for scheduling, listing, and cancelling content
//! distributions, and for managing platform credentials.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use libsyndic::audit::{OperationContext, SqliteAuditSink};
use libsyndic::events::EventBus;
use libsyndic::platforms::registry_from_config;
use libsyndic::retry::RetryPolicy;
use libsyndic::timeparse::parse_publish_time;
use libsyndic::tokens::{HttpTokenRefresher, TokenManager};
use libsyndic::types::ScheduledContentRow;
use libsyndic::{Config, Platform, Result, Scheduler, Store, SyndicError};

#[derive(Parser, Debug)]
#[command(name = "synd-queue")]
#[command(version)]
#[command(about = "Manage scheduled content distributions")]
#[command(long_about = "\
synd-queue - Manage scheduled content distributions

DESCRIPTION:
    synd-queue is a Unix-style tool for managing the Syndic distribution
    queue. Use it to schedule approved content for release, list a team's
    distributions, cancel pending releases, inspect queue statistics, and
    manage platform credentials.

COMMANDS:
    schedule    Schedule approved content for release to a platform
    list        List a team's distributions
    cancel      Cancel a pending distribution
    stats       Show queue statistics
    account     Store or revoke platform credentials

USAGE EXAMPLES:
    # Schedule content for tomorrow afternoon
    synd-queue schedule <CONTENT_ID> meta \"tomorrow 3pm\"

    # Schedule with a fixed retry interval and budget
    synd-queue schedule <CONTENT_ID> x \"2h\" --retry-interval 300 --max-retries 5

    # List a team's distributions in JSON
    synd-queue list --team <TEAM_ID> --format json

    # Cancel a pending distribution
    synd-queue cancel <DISTRIBUTION_ID>

    # Store a platform credential
    synd-queue account set <TEAM_ID> meta \"Acme Page\" --access-token ... --refresh-token ...

    # Revoke a credential
    synd-queue account revoke <TEAM_ID> meta

CONFIGURATION:
    Configuration file: ~/.config/syndic/config.toml
    Database location: ~/.local/share/syndic/syndic.db

    Override with environment variables:
        SYNDIC_CONFIG    - Path to config file
        SYNDIC_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad time format, bad publishing window, etc.)
    4 - Content or distribution not found

For more information, visit: https://github.com/syndic-ops/syndic
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Actor recorded in the audit trail
    #[arg(long, global = true, env = "SYNDIC_ACTOR", default_value = "cli")]
    actor: String,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Schedule approved content for release
    Schedule {
        /// Content ID to release
        content_id: String,

        /// Target platform (meta, x, linkedin, instagram, tiktok)
        platform: Platform,

        /// Publish time (e.g., "tomorrow 3pm", "2h", "2026-09-20 15:00")
        time: String,

        /// Fixed delay between retries in seconds (default: exponential backoff)
        #[arg(long, value_name = "SECONDS")]
        retry_interval: Option<i64>,

        /// Maximum retries after the initial attempt
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
    },

    /// List a team's distributions
    List {
        /// Team whose distributions to list
        #[arg(short, long)]
        team: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Page number (1-based)
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Rows per page
        #[arg(long, default_value_t = 50)]
        page_size: u32,
    },

    /// Cancel a pending distribution
    Cancel {
        /// Distribution ID to cancel
        distribution_id: String,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Manage platform credentials
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommands {
    /// Store (or replace) a team's credential for a platform
    Set {
        team_id: String,
        platform: Platform,
        /// Display name of the connected account
        account_name: String,

        #[arg(long)]
        access_token: String,

        #[arg(long)]
        refresh_token: Option<String>,

        /// Access token lifetime in seconds from now
        #[arg(long, value_name = "SECONDS")]
        expires_in: Option<i64>,
    },

    /// Revoke a team's credential for a platform
    Revoke {
        team_id: String,
        platform: Platform,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    libsyndic::logging::init(if cli.verbose { "debug" } else { "error" });

    // Run the main logic and handle errors
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let store = Store::new(&config.database.path).await?;
    let ctx = OperationContext::new(&cli.actor);

    let tokens = Arc::new(TokenManager::new(
        store.clone(),
        Arc::new(HttpTokenRefresher::from_config(&config)),
        config.scheduler.token_refresh_margin_secs,
    ));
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(registry_from_config(&config)),
        tokens.clone(),
        RetryPolicy::new(
            config.scheduler.min_backoff_secs,
            config.scheduler.max_backoff_secs,
        ),
        EventBus::default(),
        Arc::new(SqliteAuditSink::new(store)),
        config.scheduler.in_flight_grace_secs,
    );

    match cli.command {
        Commands::Schedule {
            content_id,
            platform,
            time,
            retry_interval,
            max_retries,
        } => {
            cmd_schedule(
                &scheduler,
                &ctx,
                &content_id,
                platform,
                &time,
                retry_interval,
                max_retries,
            )
            .await?;
        }
        Commands::List {
            team,
            format,
            page,
            page_size,
        } => {
            cmd_list(&scheduler, &team, &format, page, page_size).await?;
        }
        Commands::Cancel { distribution_id } => {
            cmd_cancel(&scheduler, &ctx, &distribution_id).await?;
        }
        Commands::Stats { format } => {
            cmd_stats(&scheduler, &format).await?;
        }
        Commands::Account { command } => {
            cmd_account(&tokens, command).await?;
        }
    }

    // The process exits after one command; in-process timers belong to the
    // daemon.
    scheduler.shutdown_timers();
    Ok(())
}

/// Schedule content for release
async fn cmd_schedule(
    scheduler: &Scheduler,
    ctx: &OperationContext,
    content_id: &str,
    platform: Platform,
    time: &str,
    retry_interval: Option<i64>,
    max_retries: u32,
) -> Result<()> {
    let publish_at = parse_publish_time(time)?;
    let distribution_id = scheduler
        .schedule(
            ctx,
            content_id,
            platform,
            publish_at.timestamp(),
            retry_interval,
            max_retries,
        )
        .await?;
    println!("{}", distribution_id);
    Ok(())
}

/// List a team's distributions
async fn cmd_list(
    scheduler: &Scheduler,
    team: &str,
    format: &str,
    page: u32,
    page_size: u32,
) -> Result<()> {
    validate_format(format)?;
    let rows = scheduler.list_scheduled(team, page, page_size).await?;

    if format == "json" {
        output_list_json(&rows);
    } else {
        output_list_text(&rows);
    }
    Ok(())
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(SyndicError::Validation(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

/// Output distributions as JSON
fn output_list_json(rows: &[ScheduledContentRow]) {
    let json: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            serde_json::json!({
                "distribution_id": r.distribution_id,
                "content_id": r.content_id,
                "title": r.title,
                "platform": r.platform.as_str(),
                "status": r.status.as_str(),
                "publish_at": r.publish_at,
                "published_at": r.published_at,
                "failure_reason": r.failure_reason,
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json).unwrap());
}

/// Output distributions as human-readable text
fn output_list_text(rows: &[ScheduledContentRow]) {
    if rows.is_empty() {
        return;
    }

    let now = chrono::Utc::now().timestamp();

    for row in rows {
        let title_preview = truncate_title(&row.title, 40);
        let timing = match row.status.as_str() {
            "pending" => format_time_until(now, row.publish_at),
            "failed" => row
                .failure_reason
                .clone()
                .unwrap_or_else(|| "failed".to_string()),
            other => other.to_string(),
        };

        println!(
            "{} | {} | {} | {}",
            row.distribution_id, row.platform, title_preview, timing
        );
    }
}

/// Truncate a title to max length with ellipsis
fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let truncated: String = title.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}

/// Format time until the publish instant in human-readable form
fn format_time_until(now: i64, publish_at: i64) -> String {
    let diff = publish_at - now;

    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}

/// Cancel a pending distribution
async fn cmd_cancel(
    scheduler: &Scheduler,
    ctx: &OperationContext,
    distribution_id: &str,
) -> Result<()> {
    scheduler.cancel(ctx, distribution_id).await?;
    println!("cancelled {}", distribution_id);
    Ok(())
}

/// Show queue statistics
async fn cmd_stats(scheduler: &Scheduler, format: &str) -> Result<()> {
    validate_format(format)?;
    let stats = scheduler.stats().await?;

    if format == "json" {
        let json: serde_json::Map<String, serde_json::Value> = stats
            .iter()
            .map(|(status, count)| (status.as_str().to_string(), (*count).into()))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::Value::Object(json)).unwrap()
        );
    } else {
        for (status, count) in stats {
            println!("{:<12} {}", status, count);
        }
    }
    Ok(())
}

/// Store or revoke platform credentials
async fn cmd_account(tokens: &TokenManager, command: AccountCommands) -> Result<()> {
    match command {
        AccountCommands::Set {
            team_id,
            platform,
            account_name,
            access_token,
            refresh_token,
            expires_in,
        } => {
            let expires_at = expires_in.map(|secs| chrono::Utc::now().timestamp() + secs);
            tokens
                .store_tokens(
                    &team_id,
                    platform,
                    &account_name,
                    access_token,
                    refresh_token,
                    expires_at,
                )
                .await?;
            println!("stored credential for {}/{}", team_id, platform);
        }
        AccountCommands::Revoke { team_id, platform } => {
            tokens.revoke_tokens(&team_id, platform).await?;
            println!("revoked credential for {}/{}", team_id, platform);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_until_formats() {
        let now = 1_700_000_000;
        assert_eq!(format_time_until(now, now - 10), "overdue");
        assert_eq!(format_time_until(now, now + 30), "in <1 minute");
        assert_eq!(format_time_until(now, now + 120), "in 2 minutes");
        assert_eq!(format_time_until(now, now + 3600), "in 1 hour");
        assert_eq!(format_time_until(now, now + 2 * 86_400), "in 2 days");
    }

    #[test]
    fn title_truncation() {
        assert_eq!(truncate_title("short", 10), "short");
        assert_eq!(truncate_title("a very long title here", 10), "a very lon...");
    }

    #[test]
    fn format_validation() {
        assert!(validate_format("text").is_ok());
        assert!(validate_format("json").is_ok());
        assert!(validate_format("yaml").is_err());
    }
}
