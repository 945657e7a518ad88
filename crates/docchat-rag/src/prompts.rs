//! Prompt template library
//!
//! Templates live in a YAML file whose top-level keys are template names:
//!
//! ```yaml
//! master_response:
//!   prompt: |
//!     Question: {incoming_msg}
//!     Documents: {docs}
//! ```
//!
//! `{name}` is a placeholder, `{{` and `}}` are literal braces.

use docchat_core::{DocChatError, Result, TemplateError};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::path::Path;

/// Named values substituted into a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptVars {
    values: BTreeMap<String, String>,
}

impl PromptVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, coerced to its string form
    pub fn set(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Display) {
        self.values.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl<K: Into<String>, V: Display> FromIterator<(K, V)> for PromptVars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Self::new();
        for (key, value) in iter {
            vars.insert(key, value);
        }
        vars
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

/// Split a template into literal runs and placeholder names
fn parse_template<'a>(
    name: &str,
    template: &'a str,
) -> std::result::Result<Vec<Segment<'a>>, TemplateError> {
    let malformed = |position| TemplateError::Malformed {
        name: name.to_string(),
        position,
    };

    let bytes = template.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
                // Doubled brace: keep one, skip the other
                segments.push(Segment::Literal(&template[literal_start..=i]));
                i += 2;
                literal_start = i;
            }
            b'{' => {
                let close = template[i + 1..]
                    .find(|c: char| c == '{' || c == '}')
                    .map(|offset| i + 1 + offset)
                    .filter(|&end| bytes[end] == b'}')
                    .ok_or_else(|| malformed(i))?;

                let field = &template[i + 1..close];
                // Drop conversion and format specifier, as in `{name!r}` or `{name:>10}`
                let key = field
                    .split(|c: char| c == '!' || c == ':')
                    .next()
                    .unwrap_or_default()
                    .trim();
                if key.is_empty() {
                    return Err(malformed(i));
                }

                if literal_start < i {
                    segments.push(Segment::Literal(&template[literal_start..i]));
                }
                segments.push(Segment::Placeholder(key));
                i = close + 1;
                literal_start = i;
            }
            b'}' => return Err(malformed(i)),
            _ => i += 1,
        }
    }

    if literal_start < template.len() {
        segments.push(Segment::Literal(&template[literal_start..]));
    }

    Ok(segments)
}

/// Templates loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    prompts: HashMap<String, Value>,
}

impl PromptLibrary {
    /// Load a YAML prompt file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DocChatError::Config(format!(
                "Failed to read prompt library {}: {e}",
                path.display()
            ))
        })?;

        let library = Self::from_yaml_str(&content).map_err(|e| {
            DocChatError::Config(format!("Invalid prompt library {}: {e}", path.display()))
        })?;

        tracing::info!(
            path = %path.display(),
            templates = library.prompts.len(),
            "Prompt library loaded"
        );
        Ok(library)
    }

    /// Parse a YAML document
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let prompts: HashMap<String, Value> = serde_yaml::from_str(source)
            .map_err(|e| DocChatError::Config(format!("Failed to parse prompt library: {e}")))?;

        Ok(Self { prompts })
    }

    /// Template names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.prompts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn template(&self, name: &str) -> std::result::Result<&str, TemplateError> {
        let body = self
            .prompts
            .get(name)
            .and_then(|entry| entry.get("prompt"))
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;

        body.as_str()
            .ok_or_else(|| TemplateError::NotAString(name.to_string()))
    }

    /// Placeholders declared by a template, in first-use order
    pub fn placeholders(&self, name: &str) -> std::result::Result<Vec<String>, TemplateError> {
        let template = self.template(name)?;
        let mut keys: Vec<String> = Vec::new();
        for segment in parse_template(name, template)? {
            if let Segment::Placeholder(key) = segment {
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    /// Fill a template. Unused variables are ignored.
    pub fn render(
        &self,
        name: &str,
        vars: &PromptVars,
    ) -> std::result::Result<String, TemplateError> {
        let template = self.template(name)?;
        let segments = parse_template(name, template)?;

        if let Some(Segment::Placeholder(key)) = segments
            .iter()
            .find(|s| matches!(s, Segment::Placeholder(key) if vars.get(key).is_none()))
        {
            return Err(TemplateError::MissingKey(key.to_string()));
        }

        let mut rendered = String::with_capacity(template.len());
        for segment in segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Placeholder(key) => {
                    rendered.push_str(vars.get(key).unwrap_or_default())
                }
            }
        }
        Ok(rendered)
    }
}
