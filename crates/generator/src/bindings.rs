//! Bind-time credentials
//!
//! The [`Bindings`] descriptor lists which template outputs are handed to a
//! consumer. [`binding_entries`] expands it into the variable names a bound
//! application actually sees, each with the Ansible expression reading it
//! from the provisioned stack.

use crate::injector::{ACCESS_KEY_ID_OUTPUT, SECRET_ACCESS_KEY_OUTPUT};
use apb_packager_common::{Bindings, BindingsInput, PackagerError, Result};
use apb_packager_parser::CloudFormationTemplate;
use regex::Regex;
use serde::Serialize;

/// One variable exposed to a bound application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingEntry {
    pub name: String,
    pub description: String,
    /// Expression resolving the value from the stack outputs
    pub value: String,
}

/// Ansible expression for a stack output
pub fn stack_output_expression(output: &str) -> String {
    format!("{{{{ cfn.stack_outputs.{} }}}}", output)
}

/// Outputs in template order, filtered by the `CFNOutputs` include-list
pub fn compute_bindings(template: &CloudFormationTemplate, input: &BindingsInput) -> Bindings {
    let cfn_outputs = template
        .output_names()
        .into_iter()
        .filter(|name| {
            input
                .cfn_outputs
                .as_ref()
                .map_or(true, |include| include.iter().any(|i| i.as_str() == *name))
        })
        .map(String::from)
        .collect();
    Bindings {
        cfn_outputs,
        iam_user: input.wants_keypair(),
    }
}

/// Variable names and descriptions for a binding
pub fn binding_entries(
    bindings: &Bindings,
    template: &CloudFormationTemplate,
    service_name: &str,
    display_name: &str,
) -> Result<Vec<BindingEntry>> {
    let mut entries = Vec::new();
    if bindings.iam_user {
        let prefix = service_name.to_uppercase().replace('-', "_");
        entries.push(BindingEntry {
            name: format!("{}_AWS_ACCESS_KEY_ID", prefix),
            description: format!(
                "AWS IAM Access Key ID, your application must use this for authenticating runtime calls to the {} service",
                display_name
            ),
            value: stack_output_expression(ACCESS_KEY_ID_OUTPUT),
        });
        entries.push(BindingEntry {
            name: format!("{}_AWS_SECRET_ACCESS_KEY", prefix),
            description: format!(
                "AWS IAM Secret Access Key, your application must use this for authenticating runtime calls to the {} service",
                display_name
            ),
            value: stack_output_expression(SECRET_ACCESS_KEY_OUTPUT),
        });
    }

    let case = SnakeCase::new()?;
    for output in &bindings.cfn_outputs {
        entries.push(BindingEntry {
            name: case.screaming(output),
            description: template
                .output_description(output)
                .unwrap_or_default()
                .to_string(),
            value: stack_output_expression(output),
        });
    }
    Ok(entries)
}

/// CamelCase to SCREAMING_SNAKE_CASE converter
pub struct SnakeCase {
    word_start: Regex,
    lower_upper: Regex,
}

impl SnakeCase {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                PackagerError::Parse(format!("Failed to compile pattern {}: {}", pattern, e))
            })
        };
        Ok(Self {
            word_start: compile(r"(.)([A-Z][a-z]+)")?,
            lower_upper: compile(r"([a-z0-9])([A-Z])")?,
        })
    }

    pub fn screaming(&self, name: &str) -> String {
        let spaced = self.word_start.replace_all(name, "${1}_${2}");
        self.lower_upper
            .replace_all(&spaced, "${1}_${2}")
            .to_uppercase()
    }
}
