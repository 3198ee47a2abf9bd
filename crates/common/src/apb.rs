//! APB specification data model
//!
//! These are the types written out as `apb.yml` and the per-plan vars
//! files. Field names follow the APB schema (camelCase metadata, lower
//! case parameter attributes).

use crate::{PackagerError, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Prescribed parameter values for a single plan, in declaration order
pub type PrescribedParameters = Mapping;

/// Top level APB specification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApbSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub bindable: bool,
    /// Remaining mapped scalar fields (version, async, tags, ...)
    #[serde(flatten)]
    pub extra: Mapping,
    pub metadata: Mapping,
    pub plans: Vec<Plan>,
}

impl ApbSpec {
    /// Assemble a spec from mapped fields and built plans
    ///
    /// Fails with [`PackagerError::MissingRequiredField`] when no `name`
    /// was mapped; the spec is never handed out partially built.
    pub fn from_fields(mut fields: Mapping, plans: Vec<Plan>) -> Result<Self> {
        let name = fields
            .shift_remove("name")
            .as_ref()
            .and_then(scalar_to_string)
            .ok_or_else(|| PackagerError::MissingRequiredField {
                field: "name".to_string(),
            })?;
        let description = fields
            .shift_remove("description")
            .as_ref()
            .and_then(scalar_to_string);
        let bindable = fields
            .shift_remove("bindable")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let metadata = match fields.shift_remove("metadata") {
            Some(Value::Mapping(m)) => m,
            _ => Mapping::new(),
        };
        fields.shift_remove("plans");

        Ok(Self {
            name,
            description,
            bindable,
            extra: fields,
            metadata,
            plans,
        })
    }

    /// `metadata.displayName`, falling back to the spec name
    pub fn display_name(&self) -> &str {
        self.metadata
            .get("displayName")
            .and_then(Value::as_str)
            .unwrap_or(&self.name)
    }

    /// Find a plan by name
    pub fn plan(&self, name: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.name == name)
    }
}

/// A service plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub name: String,
    #[serde(flatten)]
    pub extra: Mapping,
    pub free: bool,
    pub metadata: PlanMetadata,
    pub parameters: Vec<ApbParameter>,
}

impl Plan {
    /// Build a plan from its mapped body; `free` defaults to false
    pub fn from_fields(
        name: impl Into<String>,
        mut body: Mapping,
        metadata: PlanMetadata,
        parameters: Vec<ApbParameter>,
    ) -> Self {
        let free = body
            .shift_remove("free")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        body.shift_remove("name");
        Self {
            name: name.into(),
            extra: body,
            free,
            metadata,
            parameters,
        }
    }

    /// Find a parameter by name
    pub fn parameter(&self, name: &str) -> Option<&ApbParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Display metadata attached to a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<String>,
}

impl PlanMetadata {
    /// Set a metadata field by its lower-camel name. Returns false for
    /// names this model does not carry.
    pub fn set(&mut self, field: &str, value: String) -> bool {
        match field {
            "displayName" => self.display_name = Some(value),
            "longDescription" => self.long_description = Some(value),
            "cost" => self.cost = Some(value),
            _ => return false,
        }
        true
    }
}

/// APB parameter types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Int,
    Enum,
}

/// A parameter presented to the user at provision time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApbParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub param_type: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxlength: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updatable: Option<bool>,
}

impl ApbParameter {
    /// A required string parameter with no other attributes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            param_type: ParameterType::String,
            description: None,
            default: None,
            required: true,
            enum_values: None,
            pattern: None,
            maxlength: None,
            display_group: None,
            display_type: None,
            updatable: None,
        }
    }
}

/// Values exposed to a consumer at bind time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bindings {
    #[serde(rename = "CFNOutputs")]
    pub cfn_outputs: Vec<String>,
    #[serde(rename = "IAMUser")]
    pub iam_user: bool,
}

/// Render a YAML scalar as a string. Mappings, sequences and nulls yield `None`.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
