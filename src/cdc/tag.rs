//! Tag template expansion.
//!
//! A template such as `replicator.mydb.users.${event}.${primary_key}` is
//! expanded once per emitted event. Tokens look like `${identifier}`, with
//! an optional `[n]` index suffix that is accepted and ignored.

use crate::{Error, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([a-z_]+)(\[[0-9]+\])?\}").expect("placeholder regex"));

/// Placeholder identifiers supplied for every event.
pub const KNOWN_PLACEHOLDERS: &[&str] = &["event", "primary_key"];

/// Expands every `${identifier}` token found in `params`.
///
/// Unknown identifiers log a warning and expand to the empty string.
pub fn expand(template: &str, params: &HashMap<&str, &str>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match params.get(name) {
                Some(value) => (*value).to_string(),
                None => {
                    warn!(
                        tag = %template,
                        placeholder = %&caps[0],
                        "Missing placeholder in tag template"
                    );
                    String::new()
                }
            }
        })
        .into_owned()
}

/// A validated tag template, fixed at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTemplate {
    template: String,
}

impl TagTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if template.trim().is_empty() {
            return Err(Error::Config("tag template must not be empty".to_string()));
        }
        Ok(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Identifiers referenced by the template, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        PLACEHOLDER
            .captures_iter(&self.template)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Placeholders that will never be substituted.
    pub fn unknown_placeholders(&self) -> Vec<&str> {
        self.placeholders()
            .into_iter()
            .filter(|name| !KNOWN_PLACEHOLDERS.contains(name))
            .collect()
    }

    /// Renders the tag for one event.
    pub fn render(&self, event: &str, primary_key: &str) -> String {
        let params = HashMap::from([("event", event), ("primary_key", primary_key)]);
        expand(&self.template, &params)
    }
}
