//! CloudFormation template document
//!
//! The template is held as an order-preserving YAML mapping so that it can
//! be written back out with its original key order and intrinsic tags.

use crate::intrinsics::{self, IntrinsicForm};
use crate::interface::ParameterInterface;
use apb_packager_common::{PackagerError, Result, ServiceBrokerSpec};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

/// Metadata key holding the embedded service broker specification
pub const SERVICE_BROKER_METADATA: &str = "AWS::ServiceBroker::Specification";
/// Metadata key holding parameter UI hints
pub const INTERFACE_METADATA: &str = "AWS::CloudFormation::Interface";

pub const PARAMETERS: &str = "Parameters";
pub const RESOURCES: &str = "Resources";
pub const OUTPUTS: &str = "Outputs";
pub const CONDITIONS: &str = "Conditions";
pub const METADATA: &str = "Metadata";

/// A parsed CloudFormation template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloudFormationTemplate {
    doc: Mapping,
}

impl CloudFormationTemplate {
    pub fn from_mapping(doc: Mapping) -> Self {
        Self { doc }
    }

    /// Parse YAML (or JSON) template text
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)
            .map_err(|e| PackagerError::Parse(format!("Failed to parse template: {}", e)))?;
        match value {
            Value::Mapping(doc) => Ok(Self { doc }),
            _ => Err(PackagerError::Parse(
                "CloudFormation template must be a mapping".to_string(),
            )),
        }
    }

    /// Load a template from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            PackagerError::Parse(format!(
                "Failed to read template {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.doc
    }

    /// Top level `Description`
    pub fn description(&self) -> Option<&str> {
        self.doc.get("Description").and_then(Value::as_str)
    }

    /// A top level section, if present and a mapping
    pub fn section(&self, name: &str) -> Option<&Mapping> {
        self.doc.get(name).and_then(Value::as_mapping)
    }

    /// A top level section, created empty when missing
    pub fn section_mut(&mut self, name: &str) -> &mut Mapping {
        let slot = self.doc.entry(Value::from(name)).or_insert(Value::Null);
        if !slot.is_mapping() {
            *slot = Value::Mapping(Mapping::new());
        }
        match slot {
            Value::Mapping(m) => m,
            _ => unreachable!("section slot was just set to a mapping"),
        }
    }

    pub fn parameters(&self) -> Option<&Mapping> {
        self.section(PARAMETERS)
    }

    pub fn resources(&self) -> Option<&Mapping> {
        self.section(RESOURCES)
    }

    pub fn outputs(&self) -> Option<&Mapping> {
        self.section(OUTPUTS)
    }

    pub fn conditions(&self) -> Option<&Mapping> {
        self.section(CONDITIONS)
    }

    pub fn metadata(&self) -> Option<&Mapping> {
        self.section(METADATA)
    }

    pub fn resources_mut(&mut self) -> &mut Mapping {
        self.section_mut(RESOURCES)
    }

    pub fn outputs_mut(&mut self) -> &mut Mapping {
        self.section_mut(OUTPUTS)
    }

    pub fn conditions_mut(&mut self) -> &mut Mapping {
        self.section_mut(CONDITIONS)
    }

    /// Names of template parameters in declaration order
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters()
            .map(|p| p.keys().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Definition of a single parameter
    pub fn parameter(&self, name: &str) -> Option<&Mapping> {
        self.parameters()?.get(name).and_then(Value::as_mapping)
    }

    /// `Default` of a parameter
    pub fn parameter_default(&self, name: &str) -> Option<&Value> {
        self.parameter(name)?.get("Default")
    }

    pub fn resource(&self, name: &str) -> Option<&Value> {
        self.resources()?.get(name)
    }

    pub fn resource_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.doc.get_mut(RESOURCES)?.as_mapping_mut()?.get_mut(name)
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resource(name).is_some()
    }

    /// Output names in declaration order
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs()
            .map(|o| o.keys().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// `Description` of an output
    pub fn output_description(&self, name: &str) -> Option<&str> {
        self.outputs()?
            .get(name)?
            .get("Description")
            .and_then(Value::as_str)
    }

    /// The embedded `AWS::ServiceBroker::Specification` block
    pub fn service_broker_spec(&self) -> Result<Option<ServiceBrokerSpec>> {
        match self.metadata().and_then(|m| m.get(SERVICE_BROKER_METADATA)) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => ServiceBrokerSpec::from_value(value.clone()).map(Some),
        }
    }

    /// UI metadata; empty when the template has none
    pub fn interface(&self) -> ParameterInterface {
        self.metadata()
            .and_then(|m| m.get(INTERFACE_METADATA))
            .and_then(Value::as_mapping)
            .map(ParameterInterface::from_mapping)
            .unwrap_or_default()
    }

    /// Rewrite every `Ref` to `target` anywhere in the template
    ///
    /// See [`intrinsics::rewrite_references`]. Returns the number of
    /// references replaced.
    pub fn rewrite_references<F>(&mut self, target: &str, mut replace: F) -> usize
    where
        F: FnMut(IntrinsicForm) -> Value,
    {
        let mut count = 0;
        for value in self.doc.values_mut() {
            count += intrinsics::rewrite_references(value, target, &mut replace);
        }
        count
    }

    /// Number of `Ref`s to `target` anywhere in the template
    pub fn count_references(&self, target: &str) -> usize {
        self.doc
            .values()
            .map(|v| intrinsics::count_references(v, target))
            .sum()
    }

    /// Drop top level keys whose value is null or an empty collection
    pub fn prune_empty_sections(&mut self) {
        self.doc.retain(|_, v| !is_empty_value(v));
    }

    /// Serialize to YAML, omitting empty sections
    pub fn to_yaml_string(&self) -> Result<String> {
        let mut pruned = self.clone();
        pruned.prune_empty_sections();
        Ok(serde_yaml::to_string(&Value::Mapping(pruned.doc))?)
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Mapping(m) => m.is_empty(),
        Value::Sequence(s) => s.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
