//! `AWS::CloudFormation::Interface` metadata
//!
//! Supplies display labels and groups for template parameters. Everything
//! here is optional; malformed entries are skipped.

use serde_yaml::{Mapping, Value};

/// Interface section holding per-parameter labels
pub const PARAMETER_LABELS: &str = "ParameterLabels";
/// Interface section holding parameter groups
pub const PARAMETER_GROUPS: &str = "ParameterGroups";

/// A labelled group of parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterGroup {
    pub label: String,
    pub parameters: Vec<String>,
}

/// Parsed UI metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterInterface {
    labels: Vec<(String, String)>,
    groups: Vec<ParameterGroup>,
}

impl ParameterInterface {
    pub fn from_mapping(interface: &Mapping) -> Self {
        let labels = interface
            .get(PARAMETER_LABELS)
            .and_then(Value::as_mapping)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(name, label)| {
                        let text = label.get("default").and_then(Value::as_str)?;
                        Some((name.as_str()?.to_string(), text.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let groups = interface
            .get(PARAMETER_GROUPS)
            .and_then(Value::as_sequence)
            .map(|groups| groups.iter().filter_map(parse_group).collect())
            .unwrap_or_default();

        Self { labels, groups }
    }

    /// `ParameterLabels.<name>.default`
    pub fn label(&self, parameter: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(name, _)| name == parameter)
            .map(|(_, label)| label.as_str())
    }

    /// Label of the first group listing `parameter`
    pub fn group_of(&self, parameter: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| g.parameters.iter().any(|p| p == parameter))
            .map(|g| g.label.as_str())
    }

    /// Value an interface section provides for a parameter
    pub fn value_for(&self, section: &str, parameter: &str) -> Option<&str> {
        match section {
            PARAMETER_LABELS => self.label(parameter),
            PARAMETER_GROUPS => self.group_of(parameter),
            _ => None,
        }
    }

    pub fn groups(&self) -> &[ParameterGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.groups.is_empty()
    }
}

fn parse_group(group: &Value) -> Option<ParameterGroup> {
    let label = group
        .get("Label")
        .and_then(|l| l.get("default"))
        .and_then(Value::as_str)?
        .to_string();
    let parameters = group
        .get("Parameters")
        .and_then(Value::as_sequence)?
        .iter()
        .filter_map(|p| p.as_str().map(String::from))
        .collect();
    Some(ParameterGroup { label, parameters })
}
