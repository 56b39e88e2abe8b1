//! Release templates and their parameter definitions
//!
//! A [`ReleaseTemplate`] describes one deployable system: the image it runs,
//! the chart that installs it, how replica namespaces are named, and the
//! ordered list of [`ParameterConfig`]s that produce its helm values.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::template;

/// How a parameter obtains its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ParamKind {
    /// A constant default, optionally replaceable by a caller override
    Fixed {
        #[serde(default, deserialize_with = "scalar_string")]
        default_value: String,
        #[serde(default)]
        overridable: bool,
    },

    /// Rendered per replica from the image coordinates and replica index
    Dynamic {
        #[serde(default, deserialize_with = "scalar_string")]
        template_string: String,
    },
}

/// Accept any YAML scalar as its string form (`8080`, `true`, `1.5`)
///
/// `null` reads as the empty string.
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::Null => Ok(String::new()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::String(s) => Ok(s),
        other => Err(D::Error::custom(format!(
            "expected a scalar value, found {}",
            serde_yaml::to_string(&other).unwrap_or_default().trim()
        ))),
    }
}

fn optional_scalar_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = scalar_string(deserializer)?;
    Ok((!value.is_empty()).then_some(value))
}

/// A single typed parameter of a release template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterConfig {
    /// Dot-path into the values tree (e.g. `global.image.tag`)
    pub key: String,

    #[serde(flatten)]
    pub kind: ParamKind,

    /// Opaque classification, carried through untouched
    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub required: bool,
}

impl ParameterConfig {
    /// Create a fixed, non-overridable parameter
    pub fn fixed(key: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: ParamKind::Fixed {
                default_value: default_value.into(),
                overridable: false,
            },
            category: String::new(),
            required: false,
        }
    }

    /// Create a dynamic parameter rendered from `template_string`
    pub fn dynamic(key: impl Into<String>, template_string: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: ParamKind::Dynamic {
                template_string: template_string.into(),
            },
            category: String::new(),
            required: false,
        }
    }

    /// Allow callers to override this parameter (no effect on dynamic ones)
    pub fn overridable(mut self) -> Self {
        if let ParamKind::Fixed { overridable, .. } = &mut self.kind {
            *overridable = true;
        }
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Check the structural invariants of this parameter
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key.is_empty() || self.key.split('.').any(str::is_empty) {
            return Err(ConfigError::InvalidKey {
                key: self.key.clone(),
            });
        }
        if let ParamKind::Dynamic { template_string } = &self.kind
            && template_string.trim().is_empty()
        {
            return Err(ConfigError::MissingTemplateString {
                key: self.key.clone(),
            });
        }
        Ok(())
    }
}

/// Container image coordinate: `registry/namespace/repository:tag`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    pub registry: String,
    pub namespace: String,
    pub repository: String,
    pub tag: String,
}

const DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";

impl ImageRef {
    /// Parse an image reference such as `docker.io/org/app:1.2`
    ///
    /// The first path component is treated as a registry only when it looks
    /// like a host (contains `.` or `:`, or is `localhost`).
    pub fn parse(reference: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidImage {
            reference: reference.to_string(),
        };

        let reference = reference.trim();
        if reference.is_empty() || reference.contains(char::is_whitespace) {
            return Err(invalid());
        }

        // A colon after the last slash separates the tag; earlier colons are ports
        let (path, tag) = match reference.rsplit_once(':') {
            Some((path, tag)) if !tag.contains('/') => (path, tag),
            _ => (reference, DEFAULT_TAG),
        };
        if tag.is_empty() {
            return Err(invalid());
        }

        let mut parts: Vec<&str> = path.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        let registry = if parts.len() > 1
            && (parts[0].contains('.') || parts[0].contains(':') || parts[0] == "localhost")
        {
            parts.remove(0).to_string()
        } else {
            DEFAULT_REGISTRY.to_string()
        };

        let repository = parts.pop().ok_or_else(invalid)?.to_string();

        Ok(Self {
            registry,
            namespace: parts.join("/"),
            repository,
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
        } else {
            write!(
                f,
                "{}/{}/{}:{}",
                self.registry, self.namespace, self.repository, self.tag
            )
        }
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(image: ImageRef) -> Self {
        image.to_string()
    }
}

/// Helm chart coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRef {
    /// Local name of the helm repository
    pub repo_name: String,

    /// Repository URL used for `helm repo add`
    pub repo_url: String,

    /// Chart name within the repository
    pub chart_name: String,

    /// Chart version (latest when unset)
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub version: Option<String>,
}

impl ChartRef {
    /// Reference as understood by `helm install` (`repo/chart`)
    pub fn reference(&self) -> String {
        format!("{}/{}", self.repo_name, self.chart_name)
    }
}

/// A deployable system: image, chart, naming, and parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseTemplate {
    pub name: String,

    pub image: ImageRef,

    pub chart: ChartRef,

    /// printf-style pattern applied to the replica index (e.g. `ts%d`)
    pub namespace_pattern: String,

    /// printf-style pattern for the release name; defaults to the namespace
    #[serde(default)]
    pub release_name_pattern: Option<String>,

    /// Extra values file passed to helm with `-f`
    #[serde(default)]
    pub values_file: Option<PathBuf>,

    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
}

impl ReleaseTemplate {
    /// Validate the template and every parameter it carries
    pub fn validate(&self) -> Result<(), ConfigError> {
        template::format_index(&self.namespace_pattern, 0).map_err(|message| {
            ConfigError::TemplateRender {
                key: "namespacePattern".to_string(),
                message,
            }
        })?;
        for param in &self.parameters {
            param.validate()?;
        }
        Ok(())
    }

    /// Namespace name for replica `index`
    pub fn namespace_for(&self, index: usize) -> Result<String, ConfigError> {
        let name = template::format_index(&self.namespace_pattern, index).map_err(|message| {
            ConfigError::TemplateRender {
                key: "namespacePattern".to_string(),
                message,
            }
        })?;
        if name.is_empty() {
            return Err(ConfigError::TemplateRender {
                key: "namespacePattern".to_string(),
                message: "pattern renders an empty namespace".to_string(),
            });
        }
        Ok(name)
    }

    /// Release name for replica `index`
    pub fn release_name_for(&self, index: usize) -> Result<String, ConfigError> {
        match &self.release_name_pattern {
            Some(pattern) => template::format_index(pattern, index).map_err(|message| {
                ConfigError::TemplateRender {
                    key: "releaseNamePattern".to_string(),
                    message,
                }
            }),
            None => self.namespace_for(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_full() {
        let image = ImageRef::parse("registry.example.com:5000/opspai/ts-ui:1.0.3").unwrap();
        assert_eq!(image.registry, "registry.example.com:5000");
        assert_eq!(image.namespace, "opspai");
        assert_eq!(image.repository, "ts-ui");
        assert_eq!(image.tag, "1.0.3");
        assert_eq!(
            image.to_string(),
            "registry.example.com:5000/opspai/ts-ui:1.0.3"
        );
    }

    #[test]
    fn test_image_ref_defaults() {
        let image = ImageRef::parse("nginx").unwrap();
        assert_eq!(image.registry, "docker.io");
        assert_eq!(image.namespace, "");
        assert_eq!(image.repository, "nginx");
        assert_eq!(image.tag, "latest");

        let image = ImageRef::parse("library/redis:7").unwrap();
        assert_eq!(image.registry, "docker.io");
        assert_eq!(image.namespace, "library");
        assert_eq!(image.tag, "7");
    }

    #[test]
    fn test_image_ref_invalid() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("a//b").is_err());
        assert!(ImageRef::parse("app:").is_err());
        assert!(ImageRef::parse("my app").is_err());
    }

    #[test]
    fn test_parameter_yaml() {
        let yaml = r#"
- key: global.image.tag
  kind: fixed
  defaultValue: v1
  overridable: true
  category: image
- key: services.port
  kind: dynamic
  templateString: "31%03d"
  required: true
"#;
        let params: Vec<ParameterConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            params[0],
            ParameterConfig::fixed("global.image.tag", "v1")
                .overridable()
                .with_category("image")
        );
        assert_eq!(
            params[1],
            ParameterConfig::dynamic("services.port", "31%03d").required()
        );
    }

    #[test]
    fn test_parameter_yaml_unquoted_scalars() {
        let yaml = r#"
- key: services.port
  kind: fixed
  defaultValue: 8080
- key: global.debug
  kind: fixed
  defaultValue: true
  overridable: true
- key: global.ratio
  kind: fixed
  defaultValue: 0.5
- key: global.empty
  kind: fixed
  defaultValue:
"#;
        let params: Vec<ParameterConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(params[0], ParameterConfig::fixed("services.port", "8080"));
        assert_eq!(
            params[1],
            ParameterConfig::fixed("global.debug", "true").overridable()
        );
        assert_eq!(params[2], ParameterConfig::fixed("global.ratio", "0.5"));
        assert_eq!(params[3], ParameterConfig::fixed("global.empty", ""));
    }

    #[test]
    fn test_parameter_yaml_rejects_nested_default() {
        let yaml = "- key: a\n  kind: fixed\n  defaultValue: [1, 2]\n";
        let err = serde_yaml::from_str::<Vec<ParameterConfig>>(yaml).unwrap_err();
        assert!(err.to_string().contains("expected a scalar"), "{}", err);
    }

    #[test]
    fn test_validate_dynamic_without_template() {
        let param = ParameterConfig::dynamic("a.b", "  ");
        assert_eq!(
            param.validate(),
            Err(ConfigError::MissingTemplateString {
                key: "a.b".to_string()
            })
        );
    }

    #[test]
    fn test_validate_bad_key() {
        assert!(ParameterConfig::fixed("a..b", "x").validate().is_err());
        assert!(ParameterConfig::fixed("", "x").validate().is_err());
        assert!(ParameterConfig::fixed("a.b", "").validate().is_ok());
    }

    #[test]
    fn test_overridable_ignored_for_dynamic() {
        let param = ParameterConfig::dynamic("a", "%d").overridable();
        assert!(matches!(param.kind, ParamKind::Dynamic { .. }));
    }

    fn sample_template() -> ReleaseTemplate {
        ReleaseTemplate {
            name: "train-ticket".to_string(),
            image: ImageRef::parse("docker.io/opspai/ts-ui:1.0").unwrap(),
            chart: ChartRef {
                repo_name: "train-ticket".to_string(),
                repo_url: "https://charts.example.com".to_string(),
                chart_name: "trainticket".to_string(),
                version: Some("0.1.0".to_string()),
            },
            namespace_pattern: "ts%d".to_string(),
            release_name_pattern: None,
            values_file: None,
            parameters: vec![],
        }
    }

    #[test]
    fn test_namespace_and_release_names() {
        let mut template = sample_template();
        assert_eq!(template.namespace_for(3).unwrap(), "ts3");
        assert_eq!(template.release_name_for(3).unwrap(), "ts3");

        template.release_name_pattern = Some("trainticket-%02d".to_string());
        assert_eq!(template.release_name_for(3).unwrap(), "trainticket-03");
        assert_eq!(template.chart.reference(), "train-ticket/trainticket");
    }

    #[test]
    fn test_template_validate_rejects_bad_pattern() {
        let mut template = sample_template();
        template.namespace_pattern = "ts%q".to_string();
        assert!(template.validate().is_err());

        template.namespace_pattern = "ts%99999999999999999999d".to_string();
        assert!(matches!(
            template.validate(),
            Err(ConfigError::TemplateRender { .. })
        ));
    }
}
