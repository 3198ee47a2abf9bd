//! Common types and utilities for the APB packager
//!
//! This crate contains the APB data model, the service broker specification
//! model, the mapping tables that drive the transformation, and the shared
//! error type used across the parser, generator, and CLI components.

pub mod apb;
pub mod mapping;
pub mod service_spec;

pub use apb::{
    scalar_to_string, ApbParameter, ApbSpec, Bindings, ParameterType, Plan, PlanMetadata,
    PrescribedParameters,
};
pub use mapping::{
    FieldKind, MappingTables, ParameterField, ParameterMappings, ParameterSource, SchemaField,
    SpecMappings, SpecSchema,
};
pub use service_spec::{BindingsInput, IamBindingInput, IamPolicy, PlanInput, ServiceBrokerSpec};

use thiserror::Error;

/// Errors that can occur while packaging a template
#[derive(Error, Debug)]
pub enum PackagerError {
    #[error("plan name \"{plan}\" is invalid, plan names can only consist of lower case letters, numbers and dashes (-)")]
    InvalidPlanName { plan: String },

    #[error("required field \"{field}\" is missing from the service broker specification")]
    MissingRequiredField { field: String },

    #[error("mapping key type must be either 'cfn' or 'apb', got '{0}'")]
    InvalidMappingKeyType(String),

    #[error("helper {helper} is malformed: {detail}")]
    MalformedHelperData { helper: String, detail: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PackagerError {
    /// Shorthand for a [`PackagerError::MalformedHelperData`]
    pub fn malformed(helper: impl Into<String>, detail: impl Into<String>) -> Self {
        PackagerError::MalformedHelperData {
            helper: helper.into(),
            detail: detail.into(),
        }
    }
}

/// Result type for packager operations
pub type Result<T> = std::result::Result<T, PackagerError>;
