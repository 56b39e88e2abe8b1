//! helmfleet Core - parameter templates and values rendering
//!
//! This crate provides the pure, I/O-free half of helmfleet:
//! - `ReleaseTemplate` / `ParameterConfig`: typed parameter definitions
//! - `resolve`: turn a template, replica index, and overrides into values
//! - `RenderedValues`: nested values with `flatten`/`nest`
//! - `TemplateStore`: "load template by name" collaborators
//! - `FleetConfig`: environments and deployment defaults

pub mod config;
pub mod context;
pub mod error;
pub mod params;
pub mod renderer;
pub mod store;
pub mod template;
pub mod values;

pub use config::{Defaults, Environment, FleetConfig, HelmSettings};
pub use context::RenderContext;
pub use error::{ConfigError, CoreError};
pub use params::{ChartRef, ImageRef, ParamKind, ParameterConfig, ReleaseTemplate};
pub use renderer::{Overrides, parse_overrides, resolve, resolve_parameters};
pub use store::{DirectoryStore, MemoryStore, TemplateStore};
pub use template::TemplateSyntax;
pub use values::RenderedValues;
