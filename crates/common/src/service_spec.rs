//! Service broker specification block
//!
//! The `AWS::ServiceBroker::Specification` metadata block (or a standalone
//! spec file) is kept as an ordered mapping, since most of its keys are
//! routed through the key-mapping table. `ServicePlans` and `Bindings`
//! get typed views.

use crate::{PackagerError, Result};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

/// Parsed `AWS::ServiceBroker::Specification` block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceBrokerSpec {
    fields: Mapping,
}

impl ServiceBrokerSpec {
    /// Wrap an already-parsed mapping
    pub fn from_mapping(fields: Mapping) -> Self {
        Self { fields }
    }

    /// Accept any YAML value, failing unless it is a mapping
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Mapping(fields) => Ok(Self { fields }),
            other => Err(PackagerError::Parse(format!(
                "service broker specification must be a mapping, found {}",
                kind_of(&other)
            ))),
        }
    }

    /// Parse a standalone spec document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)
            .map_err(|e| PackagerError::Parse(format!("Failed to parse service spec: {}", e)))?;
        Self::from_value(value)
    }

    /// Load a standalone spec file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            PackagerError::Parse(format!(
                "Failed to read service spec {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// All top level fields in declaration order
    pub fn fields(&self) -> &Mapping {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Declared plans in declaration order
    pub fn service_plans(&self) -> Result<Vec<(String, PlanInput)>> {
        let plans = match self.fields.get("ServicePlans") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Mapping(plans)) => plans,
            Some(other) => {
                return Err(PackagerError::Parse(format!(
                    "ServicePlans must be a mapping of plan name to plan, found {}",
                    kind_of(other)
                )))
            }
        };

        plans
            .iter()
            .map(|(name, body)| {
                let name = name.as_str().ok_or_else(|| {
                    PackagerError::Parse("ServicePlans keys must be strings".to_string())
                })?;
                let fields = match body {
                    Value::Mapping(m) => m.clone(),
                    Value::Null => Mapping::new(),
                    other => {
                        return Err(PackagerError::Parse(format!(
                            "plan \"{}\" must be a mapping, found {}",
                            name,
                            kind_of(other)
                        )))
                    }
                };
                Ok((name.to_string(), PlanInput { fields }))
            })
            .collect()
    }

    /// The `Bindings` block; absent means no bindings configuration
    pub fn bindings(&self) -> Result<BindingsInput> {
        let bindings = match self.fields.get("Bindings") {
            None | Some(Value::Null) => return Ok(BindingsInput::default()),
            Some(Value::Mapping(m)) => m,
            Some(other) => {
                return Err(PackagerError::Parse(format!(
                    "Bindings must be a mapping, found {}",
                    kind_of(other)
                )))
            }
        };

        let cfn_outputs = match bindings.get("CFNOutputs") {
            None | Some(Value::Null) => None,
            Some(Value::Sequence(outputs)) => Some(
                outputs
                    .iter()
                    .filter_map(|o| o.as_str().map(String::from))
                    .collect(),
            ),
            Some(Value::String(single)) => Some(vec![single.clone()]),
            Some(other) => {
                return Err(PackagerError::Parse(format!(
                    "Bindings.CFNOutputs must be a list of output names, found {}",
                    kind_of(other)
                )))
            }
        };

        let iam = match bindings.get("IAM") {
            None | Some(Value::Null) => None,
            Some(Value::Mapping(iam)) => Some(IamBindingInput::from_mapping(iam)?),
            Some(other) => {
                return Err(PackagerError::Parse(format!(
                    "Bindings.IAM must be a mapping, found {}",
                    kind_of(other)
                )))
            }
        };

        Ok(BindingsInput { cfn_outputs, iam })
    }
}

/// One `ServicePlans` entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanInput {
    fields: Mapping,
}

impl PlanInput {
    pub fn from_mapping(fields: Mapping) -> Self {
        Self { fields }
    }

    /// Every field of the plan, including `ParameterValues`
    pub fn fields(&self) -> &Mapping {
        &self.fields
    }

    /// Prescribed values, empty when the plan declares none
    pub fn parameter_values(&self) -> Mapping {
        match self.fields.get("ParameterValues") {
            Some(Value::Mapping(values)) => values.clone(),
            _ => Mapping::new(),
        }
    }
}

/// Typed view of `Bindings`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingsInput {
    /// Output include-list; `None` exposes every template output
    pub cfn_outputs: Option<Vec<String>>,
    pub iam: Option<IamBindingInput>,
}

impl BindingsInput {
    /// True when an IAM user with an access key pair should be injected
    pub fn wants_keypair(&self) -> bool {
        self.iam.as_ref().is_some_and(|iam| iam.add_keypair)
    }
}

/// `Bindings.IAM`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IamBindingInput {
    pub add_keypair: bool,
    pub policies: Vec<IamPolicy>,
}

impl IamBindingInput {
    fn from_mapping(iam: &Mapping) -> Result<Self> {
        let add_keypair = iam
            .get("AddKeypair")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let policies = match iam.get("Policies") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(entries)) => entries
                .iter()
                .map(IamPolicy::from_value)
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(PackagerError::Parse(format!(
                    "Bindings.IAM.Policies must be a list, found {}",
                    kind_of(other)
                )))
            }
        };

        Ok(Self {
            add_keypair,
            policies,
        })
    }
}

/// A policy attached to the injected IAM user
#[derive(Debug, Clone, PartialEq)]
pub enum IamPolicy {
    /// Managed policy ARN
    Arn(String),
    /// Inline policy; holds the `PolicyDocument` value
    Inline(Value),
}

impl IamPolicy {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(arn) => Ok(IamPolicy::Arn(arn.clone())),
            Value::Mapping(m) => m
                .get("PolicyDocument")
                .cloned()
                .map(IamPolicy::Inline)
                .ok_or_else(|| {
                    PackagerError::Parse(
                        "inline IAM policies must contain a PolicyDocument".to_string(),
                    )
                }),
            other => Err(PackagerError::Parse(format!(
                "IAM policy must be an ARN or a PolicyDocument mapping, found {}",
                kind_of(other)
            ))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
