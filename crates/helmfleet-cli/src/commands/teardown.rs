//! Teardown command - uninstall replicas and delete their namespaces

use clap::Args;
use console::style;
use std::path::PathBuf;

use helmfleet_core::{FleetConfig, TemplateStore};
use helmfleet_kube::{Deployer, ReleaseManager, SessionRegistry};

use crate::display;
use crate::error::{CliError, Result};

#[derive(Debug, Args)]
pub struct TeardownArgs {
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

    /// Template directory
    #[arg(long)]
    pub templates: Option<PathBuf>,
}

pub async fn run(config: &FleetConfig, args: TeardownArgs) -> Result<()> {
    let env = config.environment(&args.env)?;
    let store = super::template_store(config, args.templates.as_deref());
    let template = store.load(&args.template)?;

    println!(
        "{} Tearing down {} replica(s) of {} in {}",
        style("→").blue().bold(),
        args.replicas,
        style(&template.name).cyan(),
        style(&env.id).yellow()
    );

    let helm = ReleaseManager::from_settings(&config.helm).for_environment(env);
    let registry = SessionRegistry::new();
    let session = registry.acquire(env).await?;

    let report = Deployer::new(session.session(), &helm)
        .teardown(
            &template,
            args.start,
            args.replicas,
            Some(config.defaults.helm_timeout),
        )
        .await;
    session.release();

    display::print_report(&report);

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::DeployFailed {
            failed: report.summary().failed,
            not_ready: 0,
        })
    }
}
