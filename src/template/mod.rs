//! Template parsing and rendering engine
//!
//! Templates embed variable references as `${path}` placeholders, with
//! optional dotted/nested access (`${host.data.site}`), array indexing
//! (`${members[0]}`), and a default-value combinator (`${timeout:-600}`).
//! Parsed templates are cached; rendering resolves each placeholder through a
//! [`VarSource`], which is the seam between the engine and the tiered
//! variable resolver.

use crate::error::TemplateError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("invalid placeholder regex"));

/// Returns true if the string contains template placeholders and therefore
/// needs rendering. Plain strings are passed through untouched by callers.
pub fn has_markers(text: &str) -> bool {
    text.contains("${")
}

/// Source of variable values consulted during rendering.
///
/// Implementations decide what a dotted path means: the per-host resolver
/// routes `global.` to the shared namespace, `host.` to the inventory
/// provider, and everything else through the tier precedence scan. The
/// assembly-time context is a flat map.
pub trait VarSource {
    /// Resolve a dotted path to its value. The first segment is the variable
    /// name; remaining segments index into the value.
    fn lookup(&self, path: &[String]) -> Result<Value, TemplateError>;
}

/// Flat-map source used for assembly-time contexts and extra bindings.
pub struct MapSource<'a> {
    vars: &'a HashMap<String, Value>,
}

impl<'a> MapSource<'a> {
    pub fn new(vars: &'a HashMap<String, Value>) -> Self {
        Self { vars }
    }
}

impl VarSource for MapSource<'_> {
    fn lookup(&self, path: &[String]) -> Result<Value, TemplateError> {
        let root = self
            .vars
            .get(&path[0])
            .ok_or_else(|| TemplateError::Resolution {
                variable: path.join("."),
                host: None,
            })?;
        walk_value(&path[0], root, &path[1..], None)
    }
}

/// Walks nested segments (object keys and `[n]` array indexes) into a value.
pub fn walk_value(
    root_name: &str,
    root: &Value,
    rest: &[String],
    host: Option<&str>,
) -> Result<Value, TemplateError> {
    let mut current = root.clone();
    let mut seen = root_name.to_string();

    for segment in rest {
        if let Some(index_str) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let index: usize = index_str.parse().map_err(|_| TemplateError::Syntax {
                template: format!("{seen}[{index_str}]"),
                reason: format!("invalid array index '{index_str}'"),
            })?;
            current = match current {
                Value::Array(arr) => {
                    arr.get(index)
                        .cloned()
                        .ok_or_else(|| TemplateError::Resolution {
                            variable: format!("{seen}[{index}]"),
                            host: host.map(String::from),
                        })?
                }
                _ => {
                    return Err(TemplateError::Resolution {
                        variable: format!("{seen}[{index}]"),
                        host: host.map(String::from),
                    })
                }
            };
            seen = format!("{seen}[{index}]");
        } else {
            current = match current {
                Value::Object(map) => {
                    map.get(segment)
                        .cloned()
                        .ok_or_else(|| TemplateError::Resolution {
                            variable: format!("{seen}.{segment}"),
                            host: host.map(String::from),
                        })?
                }
                _ => {
                    return Err(TemplateError::Resolution {
                        variable: format!("{seen}.{segment}"),
                        host: host.map(String::from),
                    })
                }
            };
            seen = format!("{seen}.{segment}");
        }
    }

    Ok(current)
}

/// Parsed template representation.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Variable {
        path: Vec<String>,
        default: Option<String>,
    },
}

impl Template {
    /// True when the template is a single placeholder with no surrounding
    /// literal text; such templates preserve the resolved value's type.
    fn is_bare_placeholder(&self) -> bool {
        matches!(self.segments.as_slice(), [Segment::Variable { .. }])
    }
}

/// Template engine with a cache of parsed templates.
///
/// Rendering is `&self`; the cache is guarded internally so one engine can be
/// shared across per-host execution threads.
pub struct TemplateEngine {
    cache: Mutex<HashMap<String, Arc<Template>>>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Render a template to a string. Placeholder values are stringified;
    /// null renders as the empty string, objects and arrays as compact JSON.
    pub fn render(&self, template: &str, source: &dyn VarSource) -> Result<String, TemplateError> {
        let parsed = self.parse(template)?;
        let mut out = String::new();
        for segment in &parsed.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable { path, default } => match source.lookup(path) {
                    Ok(value) => out.push_str(&value_to_string(&value)),
                    Err(TemplateError::Resolution { .. }) if default.is_some() => {
                        out.push_str(default.as_deref().unwrap());
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(out)
    }

    /// Render a template, preserving the value type when the template is a
    /// single bare placeholder (`"${vlans}"` yields the list itself, not its
    /// string form). Mixed templates render to strings.
    pub fn render_value(
        &self,
        template: &str,
        source: &dyn VarSource,
    ) -> Result<Value, TemplateError> {
        let parsed = self.parse(template)?;
        if parsed.is_bare_placeholder() {
            if let Segment::Variable { path, default } = &parsed.segments[0] {
                return match source.lookup(path) {
                    Ok(value) => Ok(value),
                    Err(TemplateError::Resolution { .. }) if default.is_some() => {
                        Ok(Value::String(default.clone().unwrap()))
                    }
                    Err(e) => Err(e),
                };
            }
        }
        self.render(template, source).map(Value::String)
    }

    fn parse(&self, template: &str) -> Result<Arc<Template>, TemplateError> {
        if let Some(cached) = self.cache.lock().unwrap().get(template) {
            return Ok(cached.clone());
        }
        let parsed = Arc::new(parse_template(template)?);
        self.cache
            .lock()
            .unwrap()
            .insert(template.to_string(), parsed.clone());
        Ok(parsed)
    }
}

fn parse_template(template: &str) -> Result<Template, TemplateError> {
    let mut segments = Vec::new();
    let mut last_end = 0;

    for cap in VARIABLE_RE.captures_iter(template) {
        let full = cap.get(0).unwrap();
        let expr = cap.get(1).unwrap().as_str();

        if full.start() > last_end {
            push_literal(&mut segments, template, &template[last_end..full.start()])?;
        }

        let (path, default) = parse_expression(template, expr)?;
        segments.push(Segment::Variable { path, default });
        last_end = full.end();
    }

    if last_end < template.len() {
        push_literal(&mut segments, template, &template[last_end..])?;
    }

    if segments.is_empty() {
        segments.push(Segment::Literal(String::new()));
    }

    Ok(Template { segments })
}

fn push_literal(
    segments: &mut Vec<Segment>,
    template: &str,
    text: &str,
) -> Result<(), TemplateError> {
    // An unmatched opener in literal text is malformed, not literal content.
    if text.contains("${") {
        return Err(TemplateError::Syntax {
            template: template.to_string(),
            reason: "unclosed '${' placeholder".to_string(),
        });
    }
    segments.push(Segment::Literal(text.to_string()));
    Ok(())
}

/// Parses a placeholder expression like `host.platform` or `timeout:-600`.
fn parse_expression(
    template: &str,
    expr: &str,
) -> Result<(Vec<String>, Option<String>), TemplateError> {
    let (path_str, default) = match expr.find(":-") {
        Some(idx) => (&expr[..idx], Some(expr[idx + 2..].to_string())),
        None => (expr, None),
    };

    let path = parse_path(path_str);
    if path.is_empty() || path.iter().any(|s| s.is_empty()) {
        return Err(TemplateError::Syntax {
            template: template.to_string(),
            reason: format!("empty variable path in '${{{expr}}}'"),
        });
    }

    Ok((path, default))
}

/// Splits a dotted path into segments, keeping `[n]` index accessors as their
/// own segments.
fn parse_path(path_str: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;

    for ch in path_str.trim().chars() {
        match ch {
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                in_brackets = true;
                current.push(ch);
            }
            ']' => {
                current.push(ch);
                in_brackets = false;
            }
            '.' if !in_brackets => {
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

/// Deep resolution over a YAML/JSON tree: strings carrying template markers
/// are rendered (bare placeholders preserve their value type), sequences and
/// mappings recurse, all other scalars pass through untouched.
pub fn resolve_value_deep(
    engine: &TemplateEngine,
    data: &Value,
    source: &dyn VarSource,
) -> Result<Value, TemplateError> {
    match data {
        Value::String(s) if has_markers(s) => engine.render_value(s, source),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value_deep(engine, item, source))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_value_deep(engine, v, source)?)))
            .collect::<Result<serde_json::Map<_, _>, TemplateError>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Converts a resolved value to its string rendering.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}
