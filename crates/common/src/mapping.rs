//! Mapping tables
//!
//! Four tables drive the transformation:
//! - `spec_mappings.yaml`: service broker spec key -> APB key (dotted for nesting)
//! - `parameter_mappings.yaml`: APB parameter field -> CloudFormation source
//! - `inject_parameters.yaml`: parameters prepended to every plan
//! - `spec.yaml`: schema of the spec block (required / default / kind)
//!
//! The tables are compiled into the crate and can be replaced wholesale by
//! loading them from a directory. Either way they are immutable once loaded.

use crate::{ApbParameter, PackagerError, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

const SPEC_MAPPINGS: &str = include_str!("../data/spec_mappings.yaml");
const PARAMETER_MAPPINGS: &str = include_str!("../data/parameter_mappings.yaml");
const INJECT_PARAMETERS: &str = include_str!("../data/inject_parameters.yaml");
const SPEC_SCHEMA: &str = include_str!("../data/spec.yaml");

/// Literal value marking a key as unmapped
const UNMAPPED: &str = "None";

/// The complete set of tables
#[derive(Debug, Clone)]
pub struct MappingTables {
    pub spec_mappings: SpecMappings,
    pub parameter_mappings: ParameterMappings,
    pub injected_parameters: Vec<ApbParameter>,
    pub schema: SpecSchema,
}

impl MappingTables {
    /// Tables shipped with the packager
    pub fn builtin() -> Result<Self> {
        Self::from_sources(
            SPEC_MAPPINGS,
            PARAMETER_MAPPINGS,
            INJECT_PARAMETERS,
            SPEC_SCHEMA,
        )
    }

    /// Load all four tables from a directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let read = |name: &str| -> Result<String> {
            let path = dir.join(name);
            fs::read_to_string(&path).map_err(|e| {
                PackagerError::Parse(format!(
                    "Failed to read mapping table {}: {}",
                    path.display(),
                    e
                ))
            })
        };

        Self::from_sources(
            &read("spec_mappings.yaml")?,
            &read("parameter_mappings.yaml")?,
            &read("inject_parameters.yaml")?,
            &read("spec.yaml")?,
        )
    }

    fn from_sources(
        spec_mappings: &str,
        parameter_mappings: &str,
        inject_parameters: &str,
        schema: &str,
    ) -> Result<Self> {
        let injected_parameters: Vec<ApbParameter> = serde_yaml::from_str(inject_parameters)
            .map_err(|e| table_error("inject_parameters.yaml", e))?;

        let tables = Self {
            spec_mappings: SpecMappings::from_yaml(spec_mappings)?,
            parameter_mappings: ParameterMappings::from_yaml(parameter_mappings)?,
            injected_parameters,
            schema: SpecSchema::from_yaml(schema)?,
        };
        tracing::debug!(
            spec_mappings = tables.spec_mappings.len(),
            injected_parameters = tables.injected_parameters.len(),
            schema_fields = tables.schema.fields().len(),
            "loaded mapping tables"
        );
        Ok(tables)
    }
}

fn table_error(table: &str, e: impl std::fmt::Display) -> PackagerError {
    PackagerError::Parse(format!("Invalid mapping table {}: {}", table, e))
}

/// Ordered spec key -> APB key table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecMappings {
    entries: Vec<(String, Option<String>)>,
}

impl SpecMappings {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: Mapping =
            serde_yaml::from_str(yaml).map_err(|e| table_error("spec_mappings.yaml", e))?;

        let entries = raw
            .into_iter()
            .map(|(k, v)| {
                let key = k
                    .as_str()
                    .ok_or_else(|| table_error("spec_mappings.yaml", "keys must be strings"))?
                    .to_string();
                let target = match v {
                    Value::Null => None,
                    Value::String(s) if s == UNMAPPED => None,
                    Value::String(s) => Some(s),
                    _ => {
                        return Err(table_error(
                            "spec_mappings.yaml",
                            format!("value for {} must be a string", key),
                        ))
                    }
                };
                Ok((key, target))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries })
    }

    /// Build a table from literal pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.map(Into::into).filter(|v: &String| v != UNMAPPED)))
                .collect(),
        }
    }

    /// Mapped APB key for a spec key. Unknown and unmapped keys are `None`.
    pub fn apb_key(&self, cfn_key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == cfn_key)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Every spec key mapped to `apb_key`, in table order
    pub fn cfn_keys(&self, apb_key: &str) -> impl Iterator<Item = &str> {
        let apb_key = apb_key.to_string();
        self.entries
            .iter()
            .filter(move |(_, v)| v.as_deref() == Some(apb_key.as_str()))
            .map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a spec field is handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Copied through the key mapping as-is
    #[default]
    Scalar,
    /// Nested structure with a dedicated builder
    Object,
}

/// One schema entry
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SchemaField {
    #[serde(rename = "Required", default)]
    pub required: bool,
    #[serde(rename = "Default", default)]
    pub default: Option<Value>,
    #[serde(rename = "Type", default)]
    pub kind: FieldKind,
}

/// Ordered schema of the spec block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecSchema {
    fields: Vec<(String, SchemaField)>,
}

impl SpecSchema {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: Mapping = serde_yaml::from_str(yaml).map_err(|e| table_error("spec.yaml", e))?;
        let fields = raw
            .into_iter()
            .map(|(k, v)| {
                let key = k
                    .as_str()
                    .ok_or_else(|| table_error("spec.yaml", "keys must be strings"))?
                    .to_string();
                let field: SchemaField = serde_yaml::from_value(v)
                    .map_err(|e| table_error("spec.yaml", format!("{}: {}", key, e)))?;
                Ok((key, field))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[(String, SchemaField)] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, f)| f)
    }

    /// Kind of a spec key; keys outside the schema count as scalars
    pub fn kind_of(&self, key: &str) -> FieldKind {
        self.field(key).map(|f| f.kind).unwrap_or_default()
    }
}

/// APB parameter fields a mapping may target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterField {
    Default,
    Type,
    Description,
    Pattern,
    #[serde(rename = "maxlength")]
    MaxLength,
    Title,
    DisplayGroup,
    DisplayType,
    Updatable,
}

/// Where a parameter field's value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterSource {
    /// An attribute of the template parameter (`CFN::Parameters.<Attribute>`)
    Attribute(String),
    /// A section of `AWS::CloudFormation::Interface` (`CFN::Interface::<Section>`)
    Interface(String),
}

impl ParameterSource {
    fn parse(raw: &str) -> Option<Self> {
        if let Some(attr) = raw.strip_prefix("CFN::Parameters.") {
            Some(ParameterSource::Attribute(attr.to_string()))
        } else {
            raw.strip_prefix("CFN::Interface::")
                .map(|section| ParameterSource::Interface(section.to_string()))
        }
    }
}

/// APB parameter field -> source table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterMappings {
    entries: Vec<(ParameterField, ParameterSource)>,
}

impl ParameterMappings {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: Mapping = serde_yaml::from_str(yaml)
            .map_err(|e| table_error("parameter_mappings.yaml", e))?;
        let entries = raw
            .into_iter()
            .map(|(k, v)| {
                let field: ParameterField = serde_yaml::from_value(k)
                    .map_err(|e| table_error("parameter_mappings.yaml", e))?;
                let source = v
                    .as_str()
                    .and_then(ParameterSource::parse)
                    .ok_or_else(|| {
                        table_error(
                            "parameter_mappings.yaml",
                            format!("{:?} must map to CFN::Parameters.* or CFN::Interface::*", field),
                        )
                    })?;
                Ok((field, source))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// APB field fed by a template parameter attribute
    pub fn field_for_attribute(&self, attribute: &str) -> Option<ParameterField> {
        self.entries.iter().find_map(|(field, source)| match source {
            ParameterSource::Attribute(a) if a == attribute => Some(*field),
            _ => None,
        })
    }

    /// APB field fed by an interface metadata section
    pub fn field_for_interface(&self, section: &str) -> Option<ParameterField> {
        self.entries.iter().find_map(|(field, source)| match source {
            ParameterSource::Interface(s) if s == section => Some(*field),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ParameterField, ParameterSource)> {
        self.entries.iter()
    }
}
