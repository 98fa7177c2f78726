//! syndi-queue - Manage the scheduled publishing queue
//!
//! Unix-style tool for inspecting and manipulating scheduled posts.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;

use libsyndicast::notify::{NoopPush, NotificationFanout, WebhookSender};
use libsyndicast::platforms::AdapterRegistry;
use libsyndicast::scheduler::PostSnapshot;
use libsyndicast::scheduling::parse_schedule;
use libsyndicast::types::format_ts;
use libsyndicast::{
    Config, Database, PublishScheduler, Result, SyndicastError, TokenLifecycleManager, TokenVault,
};

#[derive(Parser, Debug)]
#[command(name = "syndi-queue")]
#[command(version)]
#[command(about = "Manage the scheduled publishing queue")]
#[command(long_about = "\
syndi-queue - Manage the scheduled publishing queue

DESCRIPTION:
    syndi-queue is a Unix-style tool for managing scheduled posts in the
    Syndicast queue. Use it to list pending posts, schedule, cancel,
    publish immediately, check a post's status, or view queue statistics.

COMMANDS:
    list        List pending scheduled posts
    schedule    Schedule a post for publication
    cancel      Cancel a scheduled post (returns it to draft)
    now         Publish a post immediately
    status      Show a post's status and queue entry
    stats       Show queue statistics

USAGE EXAMPLES:
    # List pending posts
    syndi-queue list

    # Schedule a post for tomorrow afternoon
    syndi-queue schedule <POST_ID> \"tomorrow 3pm\"

    # Schedule with a relative time or random window
    syndi-queue schedule <POST_ID> 2h
    syndi-queue schedule <POST_ID> random:1h-4h

    # Cancel a pending post
    syndi-queue cancel <POST_ID>

    # Publish immediately
    syndi-queue now <POST_ID>

    # Queue statistics as JSON
    syndi-queue stats --format json

CONFIGURATION:
    Configuration file: ~/.config/syndicast/config.toml
    Override with SYNDICAST_CONFIG.

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Authentication error
    3 - Invalid input (bad post ID, time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List pending scheduled posts
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Maximum entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Schedule a post for publication
    Schedule {
        /// Post ID to schedule
        post_id: String,

        /// When to publish (e.g. "tomorrow 3pm", "2h", "random:1h-4h")
        time: String,
    },

    /// Cancel a scheduled post
    Cancel {
        /// Post ID to cancel
        post_id: String,
    },

    /// Publish a post immediately
    Now {
        /// Post ID to publish
        post_id: String,
    },

    /// Show a post's status and queue entry
    Status {
        /// Post ID to inspect
        post_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libsyndicast::logging::init_cli(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let scheduler = build_scheduler(&config, db)?;

    match cli.command {
        Commands::List { format, limit } => {
            validate_format(&format)?;
            cmd_list(&scheduler, &format, limit).await?;
        }
        Commands::Schedule { post_id, time } => {
            cmd_schedule(&scheduler, &post_id, &time).await?;
        }
        Commands::Cancel { post_id } => {
            cmd_cancel(&scheduler, &post_id).await?;
        }
        Commands::Now { post_id } => {
            cmd_now(&scheduler, &post_id).await?;
        }
        Commands::Status { post_id, format } => {
            validate_format(&format)?;
            cmd_status(&scheduler, &post_id, &format).await?;
        }
        Commands::Stats { format } => {
            validate_format(&format)?;
            cmd_stats(&scheduler, &format).await?;
        }
    }

    Ok(())
}

fn build_scheduler(config: &Config, db: Database) -> Result<Arc<PublishScheduler>> {
    let vault_config = config.vault.as_ref().ok_or_else(|| {
        SyndicastError::InvalidInput(
            "missing [vault] section: a passphrase file is required".to_string(),
        )
    })?;
    let vault = TokenVault::from_passphrase_file(&vault_config.expand_passphrase_file_path()?)?;

    let registry = AdapterRegistry::from_config(config)?;
    let tokens = Arc::new(TokenLifecycleManager::new(
        db.clone(),
        vault,
        registry.clone(),
        config.tokens.refresh_buffer_secs,
    ));
    let fanout = Arc::new(NotificationFanout::new(
        db.clone(),
        WebhookSender::new(Duration::from_secs(config.webhooks.attempt_timeout_secs)),
        Arc::new(NoopPush),
    ));

    Ok(PublishScheduler::new(
        db,
        tokens,
        registry,
        fanout,
        config.scheduler.clone(),
    ))
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(SyndicastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

async fn cmd_list(scheduler: &Arc<PublishScheduler>, format: &str, limit: usize) -> Result<()> {
    let jobs = scheduler.pending(limit).await?;

    if format == "json" {
        let entries: Vec<serde_json::Value> = jobs
            .iter()
            .map(|j| {
                json!({
                    "post_id": j.post_id,
                    "due_at": j.due_at,
                    "attempts": j.attempts,
                    "claimed": j.claimed_until.is_some(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries)
                .map_err(|e| SyndicastError::InvalidInput(e.to_string()))?
        );
        return Ok(());
    }

    let now = chrono::Utc::now().timestamp();
    for job in jobs {
        println!(
            "{} | due {} | {} | attempts: {}",
            job.post_id,
            format_ts(job.due_at),
            format_time_until(now, job.due_at),
            job.attempts
        );
    }
    Ok(())
}

async fn cmd_schedule(scheduler: &Arc<PublishScheduler>, post_id: &str, time: &str) -> Result<()> {
    let scheduled_at = parse_schedule(time, None)?;
    scheduler.schedule(post_id, scheduled_at.timestamp()).await?;
    println!(
        "Scheduled {} for {}",
        post_id,
        format_ts(scheduled_at.timestamp())
    );
    Ok(())
}

async fn cmd_cancel(scheduler: &Arc<PublishScheduler>, post_id: &str) -> Result<()> {
    if scheduler.cancel(post_id).await? {
        println!("Cancelled {}", post_id);
        Ok(())
    } else {
        Err(SyndicastError::InvalidInput(format!(
            "Nothing to cancel for {}: no pending job, or publishing already started",
            post_id
        )))
    }
}

async fn cmd_now(scheduler: &Arc<PublishScheduler>, post_id: &str) -> Result<()> {
    let post = scheduler.publish_now(post_id).await?;
    match post.status {
        libsyndicast::PostStatus::Published => {
            println!(
                "Published {} -> {}",
                post.id,
                post.platform_post_url
                    .or(post.platform_post_id)
                    .unwrap_or_else(|| "(no receipt)".to_string())
            );
            Ok(())
        }
        status => Err(SyndicastError::InvalidInput(format!(
            "Publish did not complete: {} is now '{}'{}",
            post.id,
            status,
            post.error_message
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        ))),
    }
}

async fn cmd_status(scheduler: &Arc<PublishScheduler>, post_id: &str, format: &str) -> Result<()> {
    let PostSnapshot { post, job } = scheduler.post_status(post_id).await?;

    if format == "json" {
        let value = json!({
            "id": post.id,
            "status": post.status.as_str(),
            "content": post.content,
            "scheduled_at": post.scheduled_at,
            "published_at": post.published_at,
            "platform_post_id": post.platform_post_id,
            "platform_post_url": post.platform_post_url,
            "error_message": post.error_message,
            "retry_count": post.retry_count,
            "job": job.map(|j| json!({
                "due_at": j.due_at,
                "attempts": j.attempts,
                "claimed": j.claimed_until.is_some(),
            })),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value)
                .map_err(|e| SyndicastError::InvalidInput(e.to_string()))?
        );
        return Ok(());
    }

    println!("Post:    {}", post.id);
    println!("Status:  {}", post.status);
    println!("Content: {}", truncate_content(&post.content, 60));
    if let Some(ts) = post.scheduled_at {
        println!("Scheduled: {}", format_ts(ts));
    }
    if let Some(ts) = post.published_at {
        println!("Published: {}", format_ts(ts));
    }
    if let Some(url) = &post.platform_post_url {
        println!("URL:     {}", url);
    }
    if let Some(err) = &post.error_message {
        println!("Error:   {} (retries: {})", err, post.retry_count);
    }
    if let Some(job) = job {
        println!(
            "Queue:   due {} | attempts: {}{}",
            format_ts(job.due_at),
            job.attempts,
            if job.claimed_until.is_some() {
                " | claimed"
            } else {
                ""
            }
        );
    }
    Ok(())
}

async fn cmd_stats(scheduler: &Arc<PublishScheduler>, format: &str) -> Result<()> {
    let stats = scheduler.stats().await?;

    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats)
                .map_err(|e| SyndicastError::InvalidInput(e.to_string()))?
        );
        return Ok(());
    }

    println!("Pending jobs: {}", stats.pending_jobs);
    match stats.next_due_at {
        Some(ts) => println!("Next due:     {}", format_ts(ts)),
        None => println!("Next due:     -"),
    }
    println!("Posts by status:");
    for (status, count) in &stats.posts_by_status {
        println!("  {:<12} {}", status, count);
    }
    Ok(())
}

/// Truncate content to max length with ellipsis, on a char boundary.
fn truncate_content(content: &str, max_len: usize) -> String {
    if content.chars().count() <= max_len {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}

/// Format time until a due timestamp in human-readable form.
fn format_time_until(now: i64, due_at: i64) -> String {
    let diff = due_at - now;

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_content("short", 10), "short");
        assert_eq!(truncate_content("abcdefghij", 5), "abcde...");
        // Multibyte content must not split a character
        assert_eq!(truncate_content("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_format_time_until() {
        assert_eq!(format_time_until(100, 50), "overdue");
        assert_eq!(format_time_until(0, 30), "in <1 minute");
        assert_eq!(format_time_until(0, 120), "in 2 minutes");
        assert_eq!(format_time_until(0, 7200), "in 2 hours");
        assert_eq!(format_time_until(0, 172800), "in 2 days");
    }

    #[test]
    fn test_validate_format() {
        assert!(validate_format("text").is_ok());
        assert!(validate_format("json").is_ok());
        assert!(validate_format("yaml").is_err());
    }
}
