use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devtrackr_core::{
    AppConfig, JiraClient, PrStatus, PullRequestInput, Scheduler, SqliteStore, SubscriptionUpdate,
    TrackingService,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "devtrackr")]
#[command(about = "Track Jira issues, their pull requests and subscribers")]
#[command(version)]
struct Cli {
    /// Path to a JSON config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "DEVTRACKR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll tracked issues in the foreground until interrupted
    Serve {
        /// Default polling interval in minutes, overriding the config
        #[arg(short, long)]
        poll: Option<u64>,
    },

    /// Start tracking an issue by its URL
    Track { url: String },

    /// List tracked issues
    List,

    /// Show one tracked issue
    Show { key: String },

    /// Stop tracking an issue
    Delete { key: String },

    /// Fetch an issue from the tracker now
    Refresh { key: String },

    /// Manually overwrite an issue's status
    SetStatus { key: String, status: String },

    /// Set an issue's polling interval in seconds (0 = default)
    SetPolling {
        key: String,
        #[arg(allow_negative_numbers = true)]
        seconds: i64,
    },

    /// Subscribe a user to an issue
    Subscribe {
        key: String,
        #[arg(short, long)]
        user: i64,
    },

    /// Unsubscribe a user; refused while the issue has unmerged pull requests
    Unsubscribe {
        key: String,
        #[arg(short, long)]
        user: i64,
    },

    /// List a user's subscriptions
    Subscriptions {
        #[arg(short, long)]
        user: i64,
    },

    /// Activate or deactivate a subscription
    SetActive {
        id: i64,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },

    /// List pull requests linked to an issue
    Prs { key: String },

    /// Link a pull request to an issue
    AddPr {
        key: String,
        #[command(flatten)]
        pr: PrArgs,
    },

    /// Replace a linked pull request's fields
    UpdatePr {
        key: String,
        #[command(flatten)]
        pr: PrArgs,
    },
}

#[derive(clap::Args)]
struct PrArgs {
    /// Pull request number
    number: i64,
    #[arg(short, long)]
    repository: String,
    #[arg(short, long)]
    title: String,
    #[arg(short, long)]
    url: String,
    /// open, draft, review, approved, merged or closed
    #[arg(short, long, default_value = "open")]
    status: PrStatus,
    #[arg(short = 'b', long, default_value = "main")]
    target_branch: String,
    /// Id of the pull request this one backports
    #[arg(long)]
    backport_of: Option<i64>,
}

impl PrArgs {
    fn into_input(self) -> PullRequestInput {
        PullRequestInput {
            number: self.number,
            repository: self.repository,
            title: self.title,
            url: self.url,
            status: self.status,
            target_branch: self.target_branch,
            is_backport: self.backport_of.is_some(),
            original_pr_id: self.backport_of,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(AppConfig::load()),
    }
}

fn build_tracking(config: &AppConfig) -> Result<TrackingService> {
    let store_path = config.storage.store_path();
    let store = SqliteStore::open(&store_path)
        .with_context(|| format!("Failed to open store at {}", store_path.display()))?;
    let source = JiraClient::with_timeout(&config.jira.base_url, config.jira.request_timeout())
        .context("Failed to build Jira client")?;
    Ok(TrackingService::new(Arc::new(store), Arc::new(source)))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(tracking: TrackingService, config: &AppConfig, poll: Option<u64>) -> Result<()> {
    let mut polling = config.polling.clone();
    if let Some(minutes) = poll {
        polling.default_interval_minutes = minutes;
    }
    let poll_config = polling.poll_config();

    let cancel = CancellationToken::new();
    let handle = Scheduler::new(tracking, poll_config, cancel.clone()).spawn();
    info!("devtrackr polling; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");
    handle.stop().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let tracking = build_tracking(&config)?;

    match cli.command {
        Commands::Serve { poll } => serve(tracking, &config, poll).await,

        Commands::Track { url } => print_json(&tracking.track_issue(&url).await?),

        Commands::List => print_json(&tracking.list_issues().await?),

        Commands::Show { key } => print_json(&tracking.get_issue(&key).await?),

        Commands::Delete { key } => {
            tracking.delete_issue(&key).await?;
            println!("Stopped tracking {key}");
            Ok(())
        }

        Commands::Refresh { key } => {
            let (issue, outcome) = tracking.refresh_issue(&key).await?;
            info!(%key, ?outcome, "refreshed");
            print_json(&issue)
        }

        Commands::SetStatus { key, status } => {
            let mut issue = tracking.get_issue(&key).await?;
            tracking.update_issue_status(&mut issue, status).await?;
            print_json(&issue)
        }

        Commands::SetPolling { key, seconds } => {
            print_json(&tracking.update_issue_polling_interval(&key, seconds).await?)
        }

        Commands::Subscribe { key, user } => {
            print_json(&tracking.subscribe_to_issue(&key, user).await?)
        }

        Commands::Unsubscribe { key, user } => {
            tracking.unsubscribe_from_issue(&key, user).await?;
            println!("User {user} unsubscribed from {key}");
            Ok(())
        }

        Commands::Subscriptions { user } => print_json(&tracking.list_subscriptions(user).await?),

        Commands::SetActive { id, active } => print_json(
            &tracking
                .update_subscription(id, SubscriptionUpdate { active })
                .await?,
        ),

        Commands::Prs { key } => print_json(&tracking.list_pull_requests(&key).await?),

        Commands::AddPr { key, pr } => {
            print_json(&tracking.add_pull_request(&key, pr.into_input()).await?)
        }

        Commands::UpdatePr { key, pr } => {
            let number = pr.number;
            let updated = tracking
                .update_pull_request(&key, number, pr.into_input())
                .await?;
            print_json(&json!({ "key": key, "pull_request": updated }))
        }
    }
}
