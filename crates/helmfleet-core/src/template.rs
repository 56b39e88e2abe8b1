//! Dynamic parameter template rendering
//!
//! Two syntaxes share the `templateString` field and are told apart by a
//! syntactic probe:
//! - **Placeholder**: contains `{{`, e.g. `{{ .Registry }}/{{ .Repository }}`.
//!   Fields resolve against [`RenderContext`]; unknown fields are errors.
//! - **Printf**: contains `%` and no `{{`, e.g. `31%03d`. The single operand
//!   is the replica index.
//! - Anything else is returned verbatim.

use minijinja::{Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::RenderContext;

/// `{{ .Field` (with optional trim marker) rewritten to `{{ Field`
static GO_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{(-?)\s*\.([A-Za-z_][A-Za-z0-9_]*)").expect("field pattern is valid")
});

/// Template syntax detected from a template string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSyntax {
    Placeholder,
    Printf,
    Literal,
}

impl TemplateSyntax {
    pub fn detect(template: &str) -> Self {
        if template.contains("{{") {
            Self::Placeholder
        } else if template.contains('%') {
            Self::Printf
        } else {
            Self::Literal
        }
    }
}

/// Render a dynamic template string against `ctx`
///
/// Errors are returned as plain messages; the caller attaches the key.
pub fn render(template: &str, ctx: &RenderContext) -> Result<String, String> {
    match TemplateSyntax::detect(template) {
        TemplateSyntax::Placeholder => render_placeholders(template, ctx),
        TemplateSyntax::Printf => format_index(template, ctx.index),
        TemplateSyntax::Literal => Ok(template.to_string()),
    }
}

fn render_placeholders(template: &str, ctx: &RenderContext) -> Result<String, String> {
    let source = GO_FIELD.replace_all(template, "{{$1 $2");

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    env.render_str(&source, ctx).map_err(|e| e.to_string())
}

/// Widest field a verb may request
const MAX_WIDTH: usize = 256;

/// Apply a printf-style pattern to `index`
///
/// Supports the verbs `%d %v %s %x %X %o` and the literal `%%`, with the
/// `-` and `0` flags and a field width of at most 256. At most one verb may
/// consume the index.
pub fn format_index(pattern: &str, index: usize) -> Result<String, String> {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars().peekable();
    let mut consumed = false;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut left = false;
        let mut zero = false;
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => left = true,
                '0' => zero = true,
                _ => break,
            }
            chars.next();
        }

        let mut width = 0usize;
        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width
                .checked_mul(10)
                .and_then(|w| w.checked_add(digit as usize))
                .filter(|w| *w <= MAX_WIDTH)
                .ok_or_else(|| format!("width too large in '{}'", pattern))?;
            chars.next();
        }

        let verb = chars
            .next()
            .ok_or_else(|| format!("incomplete verb at end of '{}'", pattern))?;

        let rendered = match verb {
            '%' => {
                out.push('%');
                continue;
            }
            'd' | 'v' | 's' => index.to_string(),
            'x' => format!("{:x}", index),
            'X' => format!("{:X}", index),
            'o' => format!("{:o}", index),
            other => return Err(format!("unsupported verb '%{}' in '{}'", other, pattern)),
        };

        if consumed {
            return Err(format!("'{}' needs more than one operand", pattern));
        }
        consumed = true;

        out.push_str(&pad(&rendered, width, left, zero));
    }

    Ok(out)
}

fn pad(value: &str, width: usize, left: bool, zero: bool) -> String {
    let len = value.chars().count();
    if len >= width {
        return value.to_string();
    }
    let fill = width - len;
    if left {
        format!("{}{}", value, " ".repeat(fill))
    } else if zero {
        format!("{}{}", "0".repeat(fill), value)
    } else {
        format!("{}{}", " ".repeat(fill), value)
    }
}
