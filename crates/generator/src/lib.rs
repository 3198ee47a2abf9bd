//! APB spec generation from CloudFormation templates
//!
//! This crate turns a parsed template and its service broker spec into an
//! APB artifact bundle:
//! - `apb.yml` (the APB spec)
//! - the rewritten template with injected resources
//! - per-plan prescribed values
//! - stack parameter pass-through
//! - binding variable listing
//! - README.md
//!
//! [`SpecAssembler`] runs the transformation; [`ApbGenerator`] writes the
//! result to disk.

mod assembler;
mod bindings;
pub mod collaborators;
mod config;
mod injector;
mod parameters;
mod plans;
mod staging;
mod templates;

pub use assembler::{ArtifactBundle, SpecAssembler};
pub use bindings::{
    binding_entries, compute_bindings, stack_output_expression, BindingEntry, SnakeCase,
};
pub use collaborators::{
    AccountIdentity, BlobStore, Collaborators, FunctionPackager, HelperCatalog, HelperCode,
};
pub use config::{PackagerConfig, DEFAULT_ACL};
pub use injector::{
    AutoUtility, ResourceInjector, ACCESS_KEY_ID_OUTPUT, AUTO_UTILITIES, COPY_ZIPS_RESOURCE,
    IAM_USER, IAM_USER_CREATOR, INJECTED_PREFIX, LAMBDA_ZIPS_BUCKET, SECRET_ACCESS_KEY_OUTPUT,
};
pub use parameters::ParameterProjector;
pub use plans::PlanBuilder;
pub use staging::{StagedFunction, StagingArea};

use apb_packager_common::{
    scalar_to_string, ApbParameter, IamPolicy, PackagerError, Plan, PrescribedParameters, Result,
};
use apb_packager_parser::CloudFormationTemplate;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tera::Tera;

/// Ansible expression identifying one provisioned instance
const PARAMS_STRING: &str =
    "{{ namespace }}::{{ _apb_plan_id }}::{{ _apb_service_class_id }}::{{ _apb_service_instance_id }}";
const PARAMS_HASH: &str = "{{ params_string | checksum }}";
/// Vars file mapping every stack parameter to its provision-time expression
const TEMPLATE_PARAMETERS_FILE: &str = "template_parameters.yml";

/// APB artifact writer
///
/// Writes an [`ArtifactBundle`] as:
/// - apb.yml
/// - template.yaml
/// - vars/<plan>.yml
/// - vars/template_parameters.yml
/// - bindings.yml
/// - functions/<name>/lambda_function.zip
/// - README.md
pub struct ApbGenerator {
    bundle: ArtifactBundle,
    generic: HashSet<String>,
    tera: Tera,
}

impl ApbGenerator {
    /// Create a generator; `generic` are the broker-injected parameters
    pub fn new(bundle: ArtifactBundle, generic: &[ApbParameter]) -> Result<Self> {
        let tera = templates::load_templates()?;
        Ok(Self {
            bundle,
            generic: generic.iter().map(|p| p.name.clone()).collect(),
            tera,
        })
    }

    pub fn bundle(&self) -> &ArtifactBundle {
        &self.bundle
    }

    /// Generate all APB artifacts to a directory
    pub fn generate_to_directory(&self, output_dir: &Path) -> Result<()> {
        create_dir(output_dir)?;
        create_dir(&output_dir.join("vars"))?;

        self.generate_apb_yml(output_dir)?;
        self.generate_template(output_dir)?;
        self.generate_vars(&output_dir.join("vars"))?;
        self.generate_template_parameters(&output_dir.join("vars"))?;
        self.generate_bindings(output_dir)?;
        self.generate_functions(&output_dir.join("functions"))?;
        self.generate_readme(output_dir)?;

        tracing::info!(path = %output_dir.display(), "wrote APB artifacts");
        Ok(())
    }

    /// Generate apb.yml
    fn generate_apb_yml(&self, output_dir: &Path) -> Result<()> {
        let rendered = serde_yaml::to_string(&self.bundle.apb_spec)?;
        write_file(&output_dir.join("apb.yml"), rendered.as_bytes())
    }

    /// Generate the rewritten template
    fn generate_template(&self, output_dir: &Path) -> Result<()> {
        let rendered = self.bundle.template.to_yaml_string()?;
        write_file(&output_dir.join("template.yaml"), rendered.as_bytes())
    }

    /// Generate one vars file per plan
    fn generate_vars(&self, vars_dir: &Path) -> Result<()> {
        for (plan, prescribed) in &self.bundle.prescribed_parameters {
            let mut vars = prescribed.clone();
            vars.insert(Value::from("params_string"), Value::from(PARAMS_STRING));
            vars.insert(Value::from("params_hash"), Value::from(PARAMS_HASH));

            let rendered = serde_yaml::to_string(&vars)?;
            write_file(&vars_dir.join(format!("{}.yml", plan)), rendered.as_bytes())?;
        }
        Ok(())
    }

    /// Generate the create-stack parameter expressions
    fn generate_template_parameters(&self, vars_dir: &Path) -> Result<()> {
        let parameters = template_parameters(&self.bundle.template);
        let rendered = serde_yaml::to_string(&parameters)?;
        write_file(&vars_dir.join(TEMPLATE_PARAMETERS_FILE), rendered.as_bytes())
    }

    /// Generate bindings.yml
    fn generate_bindings(&self, output_dir: &Path) -> Result<()> {
        let rendered = serde_yaml::to_string(&self.bundle.binding_entries)?;
        write_file(&output_dir.join("bindings.yml"), rendered.as_bytes())
    }

    /// Copy staged function archives
    fn generate_functions(&self, functions_dir: &Path) -> Result<()> {
        for function in &self.bundle.functions {
            let dir = functions_dir.join(&function.name);
            create_dir(&dir)?;
            write_file(&dir.join("lambda_function.zip"), &function.archive)?;
        }
        Ok(())
    }

    /// Generate README.md
    fn generate_readme(&self, output_dir: &Path) -> Result<()> {
        let context = self.create_context()?;
        let rendered = self
            .tera
            .render("README.md", &context)
            .map_err(|e| PackagerError::Render(format!("Template error: {:?}", e)))?;
        write_file(&output_dir.join("README.md"), rendered.as_bytes())
    }

    /// Create template context from the bundle
    fn create_context(&self) -> Result<tera::Context> {
        let spec = &self.bundle.apb_spec;
        let plans: Vec<PlanDoc> = spec
            .plans
            .iter()
            .map(|plan| self.plan_doc(plan))
            .collect();

        let mut context = tera::Context::new();
        context.insert("name", &spec.name);
        context.insert("display_name", spec.display_name());
        context.insert("description", spec.description.as_deref().unwrap_or_default());
        context.insert(
            "long_description",
            spec.metadata
                .get("longDescription")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        context.insert("plans", &plans);
        context.insert("bindings", &self.bundle.binding_entries);
        context.insert("add_iam", &self.bundle.bindings.iam_user);
        context.insert("iam_policy", &iam_policy_json(&self.bundle.iam_policies)?);
        Ok(context)
    }

    fn plan_doc(&self, plan: &Plan) -> PlanDoc {
        let mut required = Vec::new();
        let mut optional = Vec::new();
        let mut generic = Vec::new();
        for param in &plan.parameters {
            let doc = ParamDoc::from(param);
            if self.generic.contains(&param.name) {
                generic.push(doc);
            } else if param.default.is_none() {
                required.push(doc);
            } else {
                optional.push(doc);
            }
        }

        let prescribed: Vec<PrescribedDoc> = self
            .bundle
            .prescribed_for(&plan.name)
            .map(prescribed_docs)
            .unwrap_or_default();

        PlanDoc {
            name: plan.name.clone(),
            display_name: plan
                .metadata
                .display_name
                .clone()
                .unwrap_or_else(|| plan.name.clone()),
            description: plan
                .extra
                .get("description")
                .and_then(scalar_to_string)
                .unwrap_or_default(),
            long_description: plan.metadata.long_description.clone().unwrap_or_default(),
            cost: plan.metadata.cost.clone().unwrap_or_default(),
            free: plan.free,
            lengths: Lengths {
                required: required.len(),
                optional: optional.len(),
                generic: generic.len(),
                prescribed: prescribed.len(),
            },
            required,
            optional,
            generic,
            prescribed,
        }
    }
}

/// `{{ <name> | default("<Default>") | string }}` for every template parameter
///
/// A parameter without a default gets an empty fallback.
pub fn template_parameters(template: &CloudFormationTemplate) -> Mapping {
    let mut parameters = Mapping::new();
    for name in template.parameter_names() {
        let default = template
            .parameter_default(name)
            .map(value_text)
            .unwrap_or_default()
            .replace('\\', "\\\\")
            .replace('"', "\\\"");
        parameters.insert(
            Value::from(name),
            Value::from(format!(
                "{{{{ {} | default(\"{}\") | string }}}}",
                name, default
            )),
        );
    }
    parameters
}

#[derive(Debug, Serialize)]
struct PlanDoc {
    name: String,
    display_name: String,
    description: String,
    long_description: String,
    cost: String,
    free: bool,
    lengths: Lengths,
    required: Vec<ParamDoc>,
    optional: Vec<ParamDoc>,
    generic: Vec<ParamDoc>,
    prescribed: Vec<PrescribedDoc>,
}

#[derive(Debug, Serialize)]
struct Lengths {
    required: usize,
    optional: usize,
    generic: usize,
    prescribed: usize,
}

#[derive(Debug, Serialize)]
struct ParamDoc {
    name: String,
    title: String,
    param_type: String,
    description: String,
    default: String,
}

impl From<&ApbParameter> for ParamDoc {
    fn from(param: &ApbParameter) -> Self {
        Self {
            name: param.name.clone(),
            title: param.title.clone().unwrap_or_default(),
            param_type: format!("{:?}", param.param_type).to_lowercase(),
            description: param.description.clone().unwrap_or_default(),
            default: param.default.as_ref().map(value_text).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PrescribedDoc {
    name: String,
    value: String,
}

fn prescribed_docs(values: &PrescribedParameters) -> Vec<PrescribedDoc> {
    values
        .iter()
        .filter_map(|(name, value)| {
            Some(PrescribedDoc {
                name: name.as_str()?.to_string(),
                value: value_text(value),
            })
        })
        .collect()
}

/// Scalars as-is, anything else as flow-ish YAML on one line
fn value_text(value: &Value) -> String {
    scalar_to_string(value).unwrap_or_else(|| {
        serde_yaml::to_string(value)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    })
}

/// Policies as pretty JSON; ARNs as strings, inline documents under `PolicyDocument`
fn iam_policy_json(policies: &[IamPolicy]) -> Result<String> {
    let entries = policies
        .iter()
        .map(|policy| match policy {
            IamPolicy::Arn(arn) => Ok(serde_json::Value::String(arn.clone())),
            IamPolicy::Inline(document) => {
                let document = serde_json::to_value(document)?;
                Ok(serde_json::json!({ "PolicyDocument": document }))
            }
        })
        .collect::<std::result::Result<Vec<_>, serde_json::Error>>()?;
    Ok(serde_json::to_string_pretty(&entries)?)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        PackagerError::Storage(format!("Failed to create {}: {}", path.display(), e))
    })
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).map_err(|e| {
        PackagerError::Storage(format!("Failed to write {}: {}", path.display(), e))
    })
}
