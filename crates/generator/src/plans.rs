//! Plan building

use crate::parameters::ParameterProjector;
use apb_packager_common::{
    scalar_to_string, PackagerError, Plan, PlanInput, PlanMetadata, PrescribedParameters, Result,
};
use apb_packager_parser::KeyMapper;
use regex::Regex;
use serde_yaml::{Mapping, Value};

/// Plan fields that go into `metadata` instead of the plan body
const METADATA_FIELDS: [&str; 3] = ["LongDescription", "DisplayName", "Cost"];

/// Builds one [`Plan`] per `ServicePlans` entry
pub struct PlanBuilder<'a> {
    mapper: KeyMapper<'a>,
    projector: &'a ParameterProjector<'a>,
    name_pattern: Regex,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(mapper: KeyMapper<'a>, projector: &'a ParameterProjector<'a>) -> Result<Self> {
        let name_pattern = Regex::new(r"^[-a-z0-9]+$")
            .map_err(|e| PackagerError::Parse(format!("Failed to compile plan name pattern: {}", e)))?;
        Ok(Self {
            mapper,
            projector,
            name_pattern,
        })
    }

    /// Build a plan and its resolved prescribed parameter values
    pub fn build_plan(&self, name: &str, input: &PlanInput) -> Result<(Plan, PrescribedParameters)> {
        if !self.name_pattern.is_match(name) {
            return Err(PackagerError::InvalidPlanName {
                plan: name.to_string(),
            });
        }

        let mut body = Mapping::new();
        let mut metadata = PlanMetadata::default();
        for (field, value) in input.fields() {
            let Some(field) = field.as_str() else {
                continue;
            };
            if matches!(value, Value::Mapping(_) | Value::Sequence(_) | Value::Null | Value::Tagged(_)) {
                continue;
            }

            if METADATA_FIELDS.contains(&field) {
                if let Some(text) = scalar_to_string(value) {
                    metadata.set(&lower_first(field), text);
                }
                continue;
            }

            match self.mapper.map_plan_field(field).and_then(|path| path.tail()) {
                Some(path) => path.insert_into(&mut body, value.clone()),
                None => tracing::debug!(plan = name, field, "plan field has no mapping, skipping"),
            }
        }

        let (parameters, prescribed) = self.projector.project(&input.parameter_values());
        tracing::debug!(
            plan = name,
            parameters = parameters.len(),
            prescribed = prescribed.len(),
            "built plan"
        );
        Ok((Plan::from_fields(name, body, metadata, parameters), prescribed))
    }
}

fn lower_first(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
