use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod diff;
mod dispatch;
mod error;
mod gerrit;
mod jenkins;
mod multipart;
mod store;
mod worker;

use config::Config;
use dispatch::Dispatcher;
use gerrit::{parse_reference, GerritClient};
use jenkins::JenkinsClient;
use worker::JenkinsGerritWorker;

/// Presubmit CL dispatcher - sends new Gerrit changes to Jenkins for testing
#[derive(Parser)]
#[command(name = "presubmit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the review service and send new changes for presubmit testing
    Run(RunArgs),
    /// Resolve change/patchset refs against Gerrit and print what they name
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct RunArgs {
    /// The Gerrit endpoint, e.g. https://foo-review.googlesource.com
    #[arg(long, env = "PRESUBMIT_GERRIT_URL")]
    gerrit: Option<String>,

    /// The Jenkins endpoint, e.g. http://localhost:8090/jenkins
    #[arg(long, env = "PRESUBMIT_JENKINS_URL")]
    jenkins: Option<String>,

    /// The name of the presubmit test job
    #[arg(long, default_value = "presubmit-test")]
    job: String,

    /// Full path of the CL log file to use
    #[arg(long, default_value = "/tmp/presubmit-log.json")]
    logfile: PathBuf,

    /// Gerrit search used to find pending changes
    #[arg(long, default_value = "status:open")]
    query: String,

    /// Comma separated list of projects to test; all projects when absent
    #[arg(long)]
    project: Option<String>,

    /// Comma separated list of test names to run
    #[arg(long, default_value = "presubmit-test")]
    tests: String,

    /// Send all pending changes, even if they've already been sent
    #[arg(short, long)]
    force: bool,
}

#[derive(Args)]
struct ResolveArgs {
    /// The Gerrit endpoint, e.g. https://foo-review.googlesource.com
    #[arg(long, env = "PRESUBMIT_GERRIT_URL")]
    gerrit: Option<String>,

    /// Comma-separated list of change/patchset. Example: 1153/2,1150/1
    #[arg(long = "cl")]
    cls: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run_dispatch(args).await,
        Commands::Resolve(args) => run_resolve(args).await,
    }
}

fn build_config(args: &RunArgs) -> Result<Config> {
    Ok(Config {
        gerrit_url: Config::endpoint("gerrit", args.gerrit.as_deref())?,
        jenkins_url: Config::endpoint("jenkins", args.jenkins.as_deref())?,
        job_name: args.job.clone(),
        log_path: args.logfile.clone(),
        query: args.query.clone(),
        projects: args.project.as_deref().map(Config::split_list),
        test_names: Config::split_list(&args.tests),
        force: args.force,
    })
}

async fn run_dispatch(args: RunArgs) -> Result<()> {
    let config = build_config(&args)?;

    let gerrit = GerritClient::new(config.gerrit_url.clone());
    let jenkins = JenkinsClient::new(config.jenkins_url.clone(), config.job_name.clone());
    let worker = JenkinsGerritWorker::new(jenkins, gerrit.clone(), config.test_names.clone());

    let dispatcher = Dispatcher::new(
        gerrit,
        worker,
        config.log_path,
        config.query,
        config.projects,
        config.force,
    );

    let report = dispatcher.run().await?;

    println!("Sent {} change group(s) for testing", report.groups_sent);
    if !report.errors.is_empty() {
        for err in &report.errors {
            error!("{err}");
        }
        println!(
            "Run completed with {} error(s); see log output above",
            report.errors.len()
        );
    }

    Ok(())
}

async fn run_resolve(args: ResolveArgs) -> Result<()> {
    let gerrit_url = Config::endpoint("gerrit", args.gerrit.as_deref())?;
    let gerrit = GerritClient::new(gerrit_url);

    for raw in args.cls.split(',') {
        // Malformed refs are fatal here: the operator typed them.
        let (number, patchset) = parse_reference(raw.trim())?;

        let change = gerrit.get_change(number).await?;
        if change.patchset != patchset {
            anyhow::bail!(
                "{:?} is outdated; there's a newer patchset ({}/{})",
                raw.trim(),
                change.number,
                change.patchset
            );
        }

        println!("Found patch: {}, {}", change.project, change.reference());
    }

    Ok(())
}
