//! Install command - roll a template out as N replicas

use clap::Args;
use console::style;
use std::path::PathBuf;
use std::time::Duration;

use helmfleet_core::{FleetConfig, TemplateStore, parse_overrides};
use helmfleet_kube::{DeployOptions, Deployer, ReleaseManager, SessionRegistry};

use crate::display;
use crate::error::{CliError, Result};

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Template name
    pub template: String,

    /// Target environment id
    #[arg(short, long)]
    pub env: String,

    /// Number of replicas
    #[arg(short, long, default_value_t = 1)]
    pub replicas: usize,

    /// Index of the first replica
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// Override an overridable parameter (key=value)
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Reinstall releases that already exist
    #[arg(long)]
    pub force: bool,

    /// Pass --dry-run to helm; no namespaces are created
    #[arg(long)]
    pub dry_run: bool,

    /// Do not wait for Deployments to become ready
    #[arg(long)]
    pub no_wait: bool,

    /// Readiness timeout in seconds (config default when unset)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Install attempts per release (config default when unset)
    #[arg(long)]
    pub retries: Option<u32>,

    /// Add and refresh the chart repository first
    #[arg(long)]
    pub add_repo: bool,

    /// Template directory
    #[arg(long)]
    pub templates: Option<PathBuf>,
}

pub async fn run(config: &FleetConfig, args: InstallArgs) -> Result<()> {
    let env = config.environment(&args.env)?;
    let store = super::template_store(config, args.templates.as_deref());
    let template = store.load(&args.template)?;
    let overrides = parse_overrides(&args.set)?;

    if args.replicas == 0 {
        return Err(CliError::config("--replicas must be at least 1"));
    }

    println!(
        "{} Installing {} replica(s) of {} into {} ({})",
        style("→").blue().bold(),
        args.replicas,
        style(&template.name).cyan(),
        style(&env.id).yellow(),
        style(&env.context).dim()
    );

    let helm = ReleaseManager::from_settings(&config.helm).for_environment(env);
    if args.add_repo {
        helm.add_repo(&template.chart).await?;
        helm.update_repos().await?;
    }

    let registry = SessionRegistry::new();
    let session = registry.acquire(env).await?;

    let mut options = DeployOptions::new(args.replicas, &config.defaults)
        .starting_at(args.start)
        .with_overrides(overrides);
    if args.force {
        options = options.force();
    }
    if args.dry_run {
        options.policy = options.policy.dry_run();
    }
    if args.no_wait {
        options = options.no_wait();
    }
    if let Some(secs) = args.timeout {
        options.readiness_timeout = Duration::from_secs(secs);
    }
    if let Some(retries) = args.retries {
        options.policy.max_retries = retries;
    }

    let report = Deployer::new(session.session(), &helm)
        .install_replicas(&template, &options)
        .await;
    session.release();

    display::print_report(&report);

    if report.is_success() {
        Ok(())
    } else {
        let summary = report.summary();
        Err(CliError::DeployFailed {
            failed: summary.failed,
            not_ready: summary.not_ready,
        })
    }
}
