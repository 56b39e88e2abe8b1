//! Render command - resolve a template's values for one replica

use clap::ValueEnum;
use console::style;
use std::path::Path;

use helmfleet_core::{FleetConfig, TemplateStore, parse_overrides, resolve};

use crate::error::Result;

/// Output format for rendered values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
    /// `path=value` lines, as passed to `helm --set`
    Flat,
}

pub fn run(
    config: &FleetConfig,
    templates: Option<&Path>,
    name: &str,
    index: usize,
    set_values: &[String],
    output: OutputFormat,
    debug: bool,
) -> Result<()> {
    let store = super::template_store(config, templates);
    let template = store.load(name)?;
    let overrides = parse_overrides(set_values)?;

    let namespace = template.namespace_for(index)?;
    let release = template.release_name_for(index)?;
    let values = resolve(&template, index, Some(&overrides))?;

    if debug {
        eprintln!(
            "{} {} replica {} → release {} in {}",
            style("DEBUG").dim(),
            template.name,
            index,
            release,
            namespace
        );
    }

    match output {
        OutputFormat::Yaml => print!("{}", values.to_yaml()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(values.inner())?),
        OutputFormat::Flat => {
            for token in values.flatten() {
                println!("{}", token);
            }
        }
    }

    Ok(())
}
