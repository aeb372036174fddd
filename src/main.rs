use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use merge_gate::{
    config, init_telemetry, registry, AggregateReport, CancellationToken, LandOutcome, MergeGate,
    MergeGateConfig, PullRequestRef, RepositoryCoordinator, RequirementAggregator,
    ShutdownCoordinator,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "merge-gate")]
#[command(about = "Gate pull requests on merge requirements and land them when ready")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PullRequestArgs {
    /// Pull request number
    #[arg(long)]
    number: u64,
    /// When the pull request was opened (RFC 3339)
    #[arg(long)]
    created_at: DateTime<Utc>,
    /// Source commit SHAs, oldest first
    #[arg(long = "commit")]
    commits: Vec<String>,
    /// Pull request title, used for squash commit messages
    #[arg(long, default_value = "")]
    title: String,
    /// Integration branch (defaults to the configured one)
    #[arg(long)]
    base: Option<String>,
}

impl PullRequestArgs {
    fn into_pull_request(self, config: &MergeGateConfig) -> PullRequestRef {
        PullRequestRef::new(self.number, self.created_at)
            .with_title(self.title)
            .with_commits(self.commits)
            .with_base_branch(
                self.base
                    .unwrap_or_else(|| config.repository.integration_branch.clone()),
            )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List registered merge requirements
    Requirements,
    /// Evaluate merge requirements for a pull request
    Evaluate {
        #[command(flatten)]
        pull_request: PullRequestArgs,
    },
    /// Evaluate and, when ready, land a pull request onto its base branch
    Land {
        #[command(flatten)]
        pull_request: PullRequestArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config()?;
    init_telemetry(&config.observability)?;

    registry()
        .disable_all(&config.requirements.disabled)
        .context("Invalid requirements.disabled entry")?;

    tokio::runtime::Runtime::new()?.block_on(async {
        let shutdown = ShutdownCoordinator::new();
        shutdown.install_signal_handlers();
        let cancel = shutdown.token();
        registry().initialize_all(&cancel).await?;

        match cli.command {
            Commands::Requirements => requirements_command(),
            Commands::Evaluate { pull_request } => {
                evaluate_command(config, pull_request.into_pull_request(config), &cancel).await
            }
            Commands::Land { pull_request } => {
                let pull_request = pull_request.into_pull_request(config);
                land_command(config, pull_request, &cancel).await
            }
        }
    })
}

fn requirements_command() -> Result<()> {
    println!("📋 Merge requirements:");
    for requirement in registry().modules() {
        let state = if requirement.enabled() { "✅" } else { "⏸️ " };
        println!("  {state} {} ({})", requirement.name(), requirement.id());
        println!("     {}", requirement.description());
    }
    Ok(())
}

fn print_report(report: &AggregateReport) {
    for outcome in &report.outcomes {
        let icon = if outcome.status.is_ready() { "✅" } else { "⏳" };
        match &outcome.error {
            Some(error) => println!("  ⚠️  {}: {} ({})", outcome.name, outcome.status, error),
            None => println!("  {icon} {}: {}", outcome.name, outcome.status),
        }
    }
}

fn aggregator(config: &MergeGateConfig) -> RequirementAggregator {
    RequirementAggregator::new(config.requirements.failure_reevaluate_seconds)
}

async fn evaluate_command(
    config: &MergeGateConfig,
    pull_request: PullRequestRef,
    cancel: &CancellationToken,
) -> Result<()> {
    let report = aggregator(config)
        .evaluate(registry().modules(), &pull_request, cancel)
        .await?;

    println!("🔍 Pull request #{}", pull_request.number);
    print_report(&report);
    if report.is_ready() {
        println!("✅ Ready to merge");
    } else {
        println!(
            "⏳ Not ready, re-evaluate in {}s",
            report.status.reevaluate_in
        );
    }
    Ok(())
}

async fn land_command(
    config: &MergeGateConfig,
    pull_request: PullRequestRef,
    cancel: &CancellationToken,
) -> Result<()> {
    let token = config
        .repository
        .token
        .clone()
        .context("No push token: set GITHUB_TOKEN or repository.token")?;
    let coordinator = RepositoryCoordinator::initialize(&config.repository, cancel).await?;
    let gate = MergeGate::new(registry(), aggregator(config), Arc::new(coordinator));

    println!("🚄 Landing pull request #{}", pull_request.number);
    match gate.land(&pull_request, &token, cancel).await? {
        LandOutcome::Deferred(report) => {
            print_report(&report);
            println!(
                "⏳ Not ready, re-evaluate in {}s",
                report.status.reevaluate_in
            );
        }
        LandOutcome::Landed { sha, report } => {
            print_report(&report);
            println!("✅ Landed {sha} on {}", pull_request.base_branch);
        }
    }
    Ok(())
}
