//! `{name}` placeholder resolution for agent and task templates.
//!
//! Placeholders are identifiers wrapped in single braces. Anything else in
//! braces (JSON examples, code) is left untouched. Substituted values are
//! inserted verbatim and never re-scanned, so an inquiry that itself contains
//! `{foo}` cannot trigger a lookup.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::core::types::InputBindings;

/// Reserved placeholder resolved from the latest completed stage's output.
pub const PRIOR_OUTPUT_KEY: &str = "prior_output";

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("{template} references `{{{key}}}` but no binding named `{key}` was supplied")]
    MissingBinding { template: String, key: String },
    #[error("{template} references `{{{PRIOR_OUTPUT_KEY}}}` but no earlier stage has completed")]
    PriorOutputUnavailable { template: String },
}

impl TemplateError {
    pub fn key(&self) -> &str {
        match self {
            TemplateError::MissingBinding { key, .. } => key,
            TemplateError::PriorOutputUnavailable { .. } => PRIOR_OUTPUT_KEY,
        }
    }
}

/// Unique placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        if let Some(name) = caps.get(1).map(|m| m.as_str())
            && !names.contains(&name)
        {
            names.push(name);
        }
    }
    names
}

/// Resolves templates against the run's bindings, then the prior stage output.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    bindings: &'a InputBindings,
    prior_output: Option<&'a str>,
}

impl<'a> Resolver<'a> {
    pub fn new(bindings: &'a InputBindings) -> Self {
        Self {
            bindings,
            prior_output: None,
        }
    }

    pub fn with_prior_output(mut self, prior_output: Option<&'a str>) -> Self {
        self.prior_output = prior_output;
        self
    }

    /// Check that every placeholder can be resolved without substituting.
    ///
    /// `prior_available` states whether a prior stage will exist when the
    /// template is eventually resolved.
    pub fn check(
        &self,
        label: &str,
        template: &str,
        prior_available: bool,
    ) -> Result<(), TemplateError> {
        for key in placeholders(template) {
            if self.bindings.contains(key) {
                continue;
            }
            if key == PRIOR_OUTPUT_KEY {
                if prior_available {
                    continue;
                }
                return Err(TemplateError::PriorOutputUnavailable {
                    template: label.to_string(),
                });
            }
            return Err(TemplateError::MissingBinding {
                template: label.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Produce the fully substituted template or fail on the first unresolved key.
    pub fn resolve(&self, label: &str, template: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER_RE.captures_iter(template) {
            let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            out.push_str(self.lookup(label, key.as_str())?);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    fn lookup(&self, label: &str, key: &str) -> Result<&'a str, TemplateError> {
        if let Some(value) = self.bindings.get(key) {
            return Ok(value);
        }
        if key == PRIOR_OUTPUT_KEY {
            return self
                .prior_output
                .ok_or_else(|| TemplateError::PriorOutputUnavailable {
                    template: label.to_string(),
                });
        }
        Err(TemplateError::MissingBinding {
            template: label.to_string(),
            key: key.to_string(),
        })
    }
}
