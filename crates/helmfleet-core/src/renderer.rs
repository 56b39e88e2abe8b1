//! Parameter resolution: template + replica index + overrides → values

use indexmap::IndexMap;
use std::collections::BTreeMap;

use crate::context::RenderContext;
use crate::error::{ConfigError, CoreError};
use crate::params::{ParamKind, ParameterConfig, ReleaseTemplate};
use crate::template;
use crate::values::{RenderedValues, coerce};

/// Caller-supplied values keyed by parameter path
pub type Overrides = BTreeMap<String, String>;

/// Resolve a release template for replica `index`
///
/// Either every parameter resolves and the full tree is returned, or the
/// first failure is returned and nothing is produced.
pub fn resolve(
    template: &ReleaseTemplate,
    index: usize,
    overrides: Option<&Overrides>,
) -> Result<RenderedValues, ConfigError> {
    let ctx = RenderContext::for_replica(&template.image, index);
    resolve_parameters(&template.parameters, &ctx, overrides)
}

/// Resolve a parameter list against an explicit context
pub fn resolve_parameters(
    params: &[ParameterConfig],
    ctx: &RenderContext,
    overrides: Option<&Overrides>,
) -> Result<RenderedValues, ConfigError> {
    let mut resolved: IndexMap<&str, String> = IndexMap::with_capacity(params.len());

    for param in params {
        param.validate()?;

        let value = match &param.kind {
            ParamKind::Fixed {
                default_value,
                overridable,
            } => match overrides.and_then(|o| o.get(&param.key)) {
                Some(value) if *overridable => value.clone(),
                _ => default_value.clone(),
            },
            ParamKind::Dynamic { template_string } => template::render(template_string, ctx)
                .map_err(|message| ConfigError::TemplateRender {
                    key: param.key.clone(),
                    message,
                })?,
        };

        if value.is_empty() {
            if param.required {
                return Err(ConfigError::MissingRequiredParameter {
                    key: param.key.clone(),
                });
            }
            tracing::debug!(key = %param.key, "omitting empty optional parameter");
            continue;
        }

        resolved.insert(param.key.as_str(), value);
    }

    let mut values = RenderedValues::new();
    for (key, value) in resolved {
        values.set(key, coerce(&value))?;
    }
    Ok(values)
}

/// Parse `key=value` override arguments
pub fn parse_overrides(args: &[String]) -> Result<Overrides, CoreError> {
    let mut overrides = Overrides::new();

    for arg in args {
        let (key, val) = arg.split_once('=').ok_or_else(|| CoreError::InvalidConfig {
            message: format!("Invalid override format: '{}'. Expected key=value", arg),
        })?;
        overrides.insert(key.trim().to_string(), val.to_string());
    }

    Ok(overrides)
}
