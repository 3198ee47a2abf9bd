//! Parameter projection
//!
//! Turns the template's `Parameters` section into the parameter list of a
//! plan. Parameters a plan prescribes a value for are not shown to the user;
//! the baseline parameters from `inject_parameters.yaml` are prepended.

use apb_packager_common::{
    scalar_to_string, ApbParameter, MappingTables, ParameterField, ParameterMappings,
    ParameterSource, ParameterType, PrescribedParameters,
};
use apb_packager_parser::{CloudFormationTemplate, ParameterInterface};
use serde_yaml::{Mapping, Value};

/// Prescribed value meaning "use the parameter's own default"
const DEFAULT_SENTINEL: &str = "default";

/// Builds APB parameters from one template
pub struct ParameterProjector<'a> {
    template: &'a CloudFormationTemplate,
    mappings: &'a ParameterMappings,
    injected: &'a [ApbParameter],
    interface: ParameterInterface,
}

impl<'a> ParameterProjector<'a> {
    pub fn new(template: &'a CloudFormationTemplate, tables: &'a MappingTables) -> Self {
        Self {
            template,
            mappings: &tables.parameter_mappings,
            injected: &tables.injected_parameters,
            interface: template.interface(),
        }
    }

    /// Every template parameter as an APB parameter, in template order
    pub fn template_parameters(&self) -> Vec<ApbParameter> {
        let Some(parameters) = self.template.parameters() else {
            return Vec::new();
        };
        parameters
            .iter()
            .filter_map(|(name, definition)| {
                let name = name.as_str()?;
                let empty = Mapping::new();
                let definition = definition.as_mapping().unwrap_or(&empty);
                Some(self.build_parameter(name, definition))
            })
            .collect()
    }

    /// Build one parameter from its template definition
    pub fn build_parameter(&self, name: &str, definition: &Mapping) -> ApbParameter {
        let mut param = ApbParameter::new(name);

        for (attribute, value) in definition {
            let Some(field) = attribute
                .as_str()
                .and_then(|a| self.mappings.field_for_attribute(a))
            else {
                continue;
            };
            apply_field(&mut param, field, value);
        }

        for (field, source) in self.mappings.iter() {
            if let ParameterSource::Interface(section) = source {
                if let Some(text) = self.interface.value_for(section, name) {
                    apply_field(&mut param, *field, &Value::from(text));
                }
            }
        }

        // An empty default means the user has to supply a value
        param.required = match &param.default {
            Some(Value::String(s)) if s.is_empty() => {
                param.default = None;
                true
            }
            Some(_) => false,
            None => true,
        };

        if definition
            .get("NoEcho")
            .is_some_and(|v| v.as_bool() != Some(false) && v.as_str() != Some("false"))
        {
            param.display_type = Some("password".to_string());
        }

        match definition.get("AllowedValues") {
            Some(Value::Sequence(values)) => {
                param.param_type = ParameterType::Enum;
                param.enum_values = Some(values.clone());
            }
            _ if definition.get("Type").and_then(Value::as_str) == Some("Number") => {
                param.param_type = ParameterType::Int;
            }
            _ => param.param_type = ParameterType::String,
        }

        if let Some(default) = param.default.take() {
            param.default = Some(coerce_numeric(default));
        }

        param
    }

    /// Parameters for a plan and its resolved prescribed values
    ///
    /// A prescribed value of `"default"` (any case) is replaced by the
    /// parameter's default. Prescribed parameters are left out of the list.
    pub fn project(
        &self,
        prescribed: &PrescribedParameters,
    ) -> (Vec<ApbParameter>, PrescribedParameters) {
        let built = self.template_parameters();

        let mut resolved = PrescribedParameters::new();
        for (name, value) in prescribed {
            let param = name
                .as_str()
                .and_then(|n| built.iter().find(|p| p.name == n));
            let value = match (value, param) {
                (Value::String(s), Some(param)) if s.eq_ignore_ascii_case(DEFAULT_SENTINEL) => {
                    match &param.default {
                        Some(default) => default.clone(),
                        None => {
                            tracing::warn!(
                                parameter = %param.name,
                                "prescribed value is \"default\" but the parameter has no default"
                            );
                            value.clone()
                        }
                    }
                }
                (_, None) => {
                    tracing::debug!(
                        parameter = ?name,
                        "prescribed parameter is not declared by the template"
                    );
                    value.clone()
                }
                _ => value.clone(),
            };
            resolved.insert(name.clone(), value);
        }

        let template_names: Vec<&str> = built.iter().map(|p| p.name.as_str()).collect();
        let mut parameters: Vec<ApbParameter> = self
            .injected
            .iter()
            .filter(|p| !template_names.contains(&p.name.as_str()) && !prescribed.contains_key(p.name.as_str()))
            .cloned()
            .collect();
        parameters.extend(
            built
                .iter()
                .filter(|p| !prescribed.contains_key(p.name.as_str()))
                .cloned(),
        );

        (parameters, resolved)
    }
}

fn apply_field(param: &mut ApbParameter, field: ParameterField, value: &Value) {
    match field {
        ParameterField::Default => param.default = Some(value.clone()),
        // type is inferred from the whole definition
        ParameterField::Type => {}
        ParameterField::Description => param.description = scalar_to_string(value),
        ParameterField::Pattern => param.pattern = scalar_to_string(value),
        ParameterField::MaxLength => {
            param.maxlength = match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
        }
        ParameterField::Title => param.title = scalar_to_string(value),
        ParameterField::DisplayGroup => param.display_group = scalar_to_string(value),
        ParameterField::DisplayType => param.display_type = scalar_to_string(value),
        ParameterField::Updatable => param.updatable = value.as_bool(),
    }
}

/// Digit-only strings become integers; anything else is returned unchanged
fn coerce_numeric(value: Value) -> Value {
    match &value {
        Value::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => s
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(value),
        _ => value,
    }
}
