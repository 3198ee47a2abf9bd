//! Spec assembly
//!
//! Drives one packaging run: maps the spec block onto the APB spec, builds
//! plans, computes bindings, runs the template injections and finally
//! uploads everything that was staged. Uploads happen last, so a failing
//! run writes nothing to the blob store.

use crate::bindings::{binding_entries, compute_bindings, BindingEntry};
use crate::collaborators::Collaborators;
use crate::config::PackagerConfig;
use crate::injector::ResourceInjector;
use crate::parameters::ParameterProjector;
use crate::plans::PlanBuilder;
use crate::staging::{StagedFunction, StagingArea};
use apb_packager_common::{
    ApbSpec, Bindings, FieldKind, IamPolicy, MappingTables, PackagerError, PrescribedParameters,
    Result, ServiceBrokerSpec,
};
use apb_packager_parser::{CloudFormationTemplate, KeyMapper};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// Everything produced by one packaging run
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub apb_spec: ApbSpec,
    /// Resolved prescribed values per plan, in plan order
    pub prescribed_parameters: Vec<(String, PrescribedParameters)>,
    pub bindings: Bindings,
    pub binding_entries: Vec<BindingEntry>,
    /// Policies attached to the injected IAM user
    pub iam_policies: Vec<IamPolicy>,
    /// The rewritten template
    pub template: CloudFormationTemplate,
    /// Function archives uploaded with the template
    pub functions: Vec<StagedFunction>,
    pub staging_bucket: String,
    /// Keys written to the staging bucket, in upload order
    pub uploaded_keys: Vec<String>,
}

impl ArtifactBundle {
    /// Prescribed values of a plan
    pub fn prescribed_for(&self, plan: &str) -> Option<&PrescribedParameters> {
        self.prescribed_parameters
            .iter()
            .find(|(name, _)| name == plan)
            .map(|(_, values)| values)
    }
}

/// Turns a template and its service broker spec into an [`ArtifactBundle`]
pub struct SpecAssembler {
    tables: MappingTables,
    config: PackagerConfig,
    collaborators: Collaborators,
}

impl SpecAssembler {
    pub fn new(tables: MappingTables, config: PackagerConfig, collaborators: Collaborators) -> Self {
        Self {
            tables,
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    pub fn tables(&self) -> &MappingTables {
        &self.tables
    }

    /// Load a template from disk and assemble it
    ///
    /// Function directories are looked up next to the template.
    pub fn package(&self, template_path: &Path, spec_file: Option<&Path>) -> Result<ArtifactBundle> {
        let template = apb_packager_parser::load_template(template_path)?;
        let spec = apb_packager_parser::load_service_spec(&template, spec_file)?;
        let template_dir = template_path.parent().unwrap_or_else(|| Path::new("."));
        self.assemble(&spec, template, template_dir)
    }

    /// Run the full transformation
    pub fn assemble(
        &self,
        spec: &ServiceBrokerSpec,
        mut template: CloudFormationTemplate,
        template_dir: &Path,
    ) -> Result<ArtifactBundle> {
        let bucket = self
            .config
            .staging_bucket(self.collaborators.identity.as_ref())?;
        let mut staging = StagingArea::new(bucket.as_str(), self.config.acl.as_str());

        let fields = self.map_fields(spec, &template)?;

        let mut plans = Vec::new();
        let mut prescribed_parameters = Vec::new();
        {
            let projector = ParameterProjector::new(&template, &self.tables);
            let builder = PlanBuilder::new(KeyMapper::new(&self.tables.spec_mappings), &projector)?;
            for (name, input) in spec.service_plans()? {
                let (plan, prescribed) = builder.build_plan(&name, &input)?;
                plans.push(plan);
                prescribed_parameters.push((name, prescribed));
            }
        }
        let apb_spec = ApbSpec::from_fields(fields, plans)?;

        let bindings_input = spec.bindings()?;
        let bindings = compute_bindings(&template, &bindings_input);
        let iam_policies = match bindings_input.iam {
            Some(iam) if bindings.iam_user => iam.policies,
            _ => Vec::new(),
        };

        {
            let mut injector = ResourceInjector::new(
                &self.config,
                self.collaborators.helpers.as_ref(),
                self.collaborators.packager.as_ref(),
                &mut staging,
            );
            if bindings.iam_user {
                injector.inject_iam(&mut template, &iam_policies)?;
            }
            injector.inject_auto_parameters(&mut template)?;
            injector.publish_function_dirs(&mut template, template_dir)?;
        }

        template.prune_empty_sections();
        let binding_entries = binding_entries(
            &bindings,
            &template,
            &apb_spec.name,
            apb_spec.display_name(),
        )?;
        staging.stage_template(
            self.config.template_key(),
            template.to_yaml_string()?.into_bytes(),
        );

        let uploaded_keys = staging.commit(self.collaborators.store.as_ref())?;
        tracing::info!(
            service = %apb_spec.name,
            plans = apb_spec.plans.len(),
            uploaded = uploaded_keys.len(),
            "assembled APB spec"
        );

        Ok(ArtifactBundle {
            apb_spec,
            prescribed_parameters,
            bindings,
            binding_entries,
            iam_policies,
            template,
            functions: staging.functions().to_vec(),
            staging_bucket: bucket,
            uploaded_keys,
        })
    }

    /// Map the spec block's scalar fields and fill in schema defaults
    ///
    /// Fails with [`PackagerError::MissingRequiredField`] naming the spec
    /// key when a required field has neither a value nor a default.
    pub fn map_fields(
        &self,
        spec: &ServiceBrokerSpec,
        template: &CloudFormationTemplate,
    ) -> Result<Mapping> {
        let mapper = KeyMapper::new(&self.tables.spec_mappings);
        let schema = &self.tables.schema;
        let mut fields = Mapping::new();

        for (key, value) in spec.fields() {
            let Some(key) = key.as_str() else {
                continue;
            };
            if schema.kind_of(key) == FieldKind::Object {
                continue;
            }
            let Some(path) = mapper.map_to_apb(key) else {
                continue;
            };
            match value {
                Value::Mapping(_) | Value::Tagged(_) | Value::Null => {
                    tracing::debug!(key, "skipping non-scalar spec field");
                }
                _ => path.insert_into(&mut fields, value.clone()),
            }
        }

        for (key, field) in schema.fields() {
            let Some(path) = mapper.map_to_apb(key) else {
                continue;
            };
            if field.kind == FieldKind::Object {
                if field.required && spec.get(key).is_none() {
                    return Err(PackagerError::MissingRequiredField { field: key.clone() });
                }
                continue;
            }
            if path.lookup_in(&fields).is_some() {
                continue;
            }

            let default = if path.to_string() == "description" {
                match template_description(template)? {
                    Some(description) => Some(Value::from(description)),
                    None => field.default.clone(),
                }
            } else {
                field.default.clone()
            };
            match default {
                Some(value) => path.insert_into(&mut fields, value),
                None if field.required => {
                    return Err(PackagerError::MissingRequiredField { field: key.clone() })
                }
                None => {}
            }
        }

        Ok(fields)
    }

    /// Delete every object a run uploaded
    pub fn cleanup_staging(&self, bundle: &ArtifactBundle) -> Result<()> {
        tracing::info!(
            bucket = %bundle.staging_bucket,
            objects = bundle.uploaded_keys.len(),
            "removing staged objects"
        );
        self.collaborators
            .store
            .delete(&bundle.staging_bucket, &bundle.uploaded_keys)
    }
}

/// Template `Description` without QuickStart tracking tags
fn template_description(template: &CloudFormationTemplate) -> Result<Option<String>> {
    let Some(description) = template.description() else {
        return Ok(None);
    };
    let tag = Regex::new(r"\(?qs-[a-z0-9]{9}\)?")
        .map_err(|e| PackagerError::Parse(format!("Failed to compile tag pattern: {}", e)))?;
    let stripped = tag.replace_all(description, "").trim().to_string();
    Ok((!stripped.is_empty()).then_some(stripped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        MemoryBlobStore, MockAccountIdentity, MockBlobStore, StaticAccountIdentity, ZipPackager,
    };
    use crate::injector::tests::inline_helpers;
    use crate::injector::{IAM_USER, IAM_USER_CREATOR};

    const TEMPLATE: &str = r#"
Description: Amazon SQS queue qs-1nb14cqcl
Metadata:
  AWS::ServiceBroker::Specification:
    Name: sqs
    DisplayName: Amazon SQS
    ServicePlans:
      basic:
        DisplayName: Basic
Parameters:
  Name:
    Type: String
  Color:
    Type: String
    Default: blue
Resources:
  Queue:
    Type: AWS::SQS::Queue
Outputs:
  QueueURL:
    Description: Queue URL
    Value: !Ref Queue
"#;

    fn collaborators(store: MemoryBlobStore) -> Collaborators {
        Collaborators {
            store: Box::new(store),
            identity: Box::new(StaticAccountIdentity::new("123456789012")),
            packager: Box::new(ZipPackager::new()),
            helpers: Box::new(inline_helpers()),
        }
    }

    fn assembler(store: MemoryBlobStore) -> SpecAssembler {
        SpecAssembler::new(
            MappingTables::builtin().unwrap(),
            PackagerConfig::new("sqs"),
            collaborators(store),
        )
    }

    fn template(yaml: &str) -> CloudFormationTemplate {
        CloudFormationTemplate::from_yaml_str(yaml).unwrap()
    }

    fn run(assembler: &SpecAssembler, yaml: &str) -> Result<ArtifactBundle> {
        let t = template(yaml);
        let spec = t.service_broker_spec()?.unwrap();
        let dir = tempfile::tempdir().unwrap();
        assembler.assemble(&spec, t, dir.path())
    }

    #[test]
    fn test_basic_plan() {
        let store = MemoryBlobStore::new();
        let bundle = run(&assembler(store.clone()), TEMPLATE).unwrap();

        let spec = &bundle.apb_spec;
        assert_eq!(spec.name, "sqs");
        assert_eq!(spec.description.as_deref(), Some("Amazon SQS queue"));
        assert!(spec.bindable);
        assert_eq!(spec.display_name(), "Amazon SQS");
        assert_eq!(spec.extra.get("async").and_then(Value::as_str), Some("optional"));

        let plan = spec.plan("basic").unwrap();
        let name = plan.parameter("Name").unwrap();
        assert!(name.required);
        assert!(name.default.is_none());
        let color = plan.parameter("Color").unwrap();
        assert!(!color.required);
        assert_eq!(color.default, Some(Value::from("blue")));
        for injected in &MappingTables::builtin().unwrap().injected_parameters {
            assert!(plan.parameter(&injected.name).is_some(), "{}", injected.name);
        }

        assert_eq!(bundle.bindings.cfn_outputs, vec!["QueueURL"]);
        assert!(!bundle.bindings.iam_user);
        assert!(!bundle.template.has_resource(IAM_USER));

        let bucket = "awsservicebroker-assets-123456789012";
        assert_eq!(bundle.staging_bucket, bucket);
        assert_eq!(store.keys(bucket), vec!["templates/sqs/template.yaml"]);
        assert_eq!(bundle.prescribed_for("basic"), Some(&Mapping::new()));
    }

    #[test]
    fn test_keypair_with_managed_policy() {
        let yaml = TEMPLATE.replace(
            "    ServicePlans:",
            "    Bindings:\n      IAM:\n        AddKeypair: true\n        Policies:\n          - arn:aws:iam::aws:policy/AmazonSQSFullAccess\n    ServicePlans:",
        );
        let bundle = run(&assembler(MemoryBlobStore::new()), &yaml).unwrap();

        assert!(bundle.bindings.iam_user);
        assert!(bundle.template.has_resource(IAM_USER_CREATOR));
        let user = bundle.template.resource(IAM_USER).unwrap();
        assert_eq!(
            user["Properties"]["ManagedPolicyArns"],
            Value::Sequence(vec![Value::from("arn:aws:iam::aws:policy/AmazonSQSFullAccess")])
        );
        // bindings are taken from the outputs the template declared itself
        assert_eq!(bundle.bindings.cfn_outputs, vec!["QueueURL"]);
        let names: Vec<&str> = bundle.binding_entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["SQS_AWS_ACCESS_KEY_ID", "SQS_AWS_SECRET_ACCESS_KEY", "QUEUE_URL"]
        );
    }

    #[test]
    fn test_invalid_plan_writes_nothing() {
        let mut store = MockBlobStore::new();
        store.expect_put().never();
        store.expect_create().never();
        store.expect_exists().never();
        let assembler = SpecAssembler::new(
            MappingTables::builtin().unwrap(),
            PackagerConfig::new("sqs").with_bucket("assets"),
            Collaborators {
                store: Box::new(store),
                identity: Box::new(MockAccountIdentity::new()),
                packager: Box::new(ZipPackager::new()),
                helpers: Box::new(inline_helpers()),
            },
        );

        let yaml = TEMPLATE.replace("      basic:", "      Basic_Plan:");
        let err = run(&assembler, &yaml).unwrap_err();
        assert!(matches!(err, PackagerError::InvalidPlanName { plan } if plan == "Basic_Plan"));
    }

    #[test]
    fn test_missing_required_fields() {
        let assembler = assembler(MemoryBlobStore::new());

        let yaml = TEMPLATE.replace("    DisplayName: Amazon SQS\n", "");
        let err = run(&assembler, &yaml).unwrap_err();
        assert!(matches!(err, PackagerError::MissingRequiredField { field } if field == "DisplayName"));

        let yaml = TEMPLATE.replace("    Name: sqs\n", "");
        let err = run(&assembler, &yaml).unwrap_err();
        assert!(matches!(err, PackagerError::MissingRequiredField { field } if field == "Name"));

        let spec = ServiceBrokerSpec::from_yaml_str("Name: sqs\nDisplayName: SQS\n").unwrap();
        let err = assembler.map_fields(&spec, &template(TEMPLATE)).unwrap_err();
        assert!(matches!(err, PackagerError::MissingRequiredField { field } if field == "ServicePlans"));
    }

    #[test]
    fn test_explicit_fields_win_over_defaults() {
        let assembler = assembler(MemoryBlobStore::new());
        let spec = ServiceBrokerSpec::from_yaml_str(
            "Name: sqs\nDisplayName: SQS\nDescription: Queues\nBindable: false\nTags: [aws, sqs]\nServicePlans: {}\nImageUrl: {nested: true}\n",
        )
        .unwrap();
        let fields = assembler.map_fields(&spec, &template(TEMPLATE)).unwrap();

        assert_eq!(fields.get("description").and_then(Value::as_str), Some("Queues"));
        assert_eq!(fields.get("bindable").and_then(Value::as_bool), Some(false));
        assert_eq!(fields.get("tags").and_then(Value::as_sequence).map(Vec::len), Some(2));
        assert_eq!(fields.get("version"), Some(&Value::from(1.0)));
        assert!(!fields.contains_key("plans"));
        let metadata = fields.get("metadata").and_then(Value::as_mapping).unwrap();
        assert!(!metadata.contains_key("imageUrl"));
        assert_eq!(
            metadata.get("providerDisplayName").and_then(Value::as_str),
            Some("Amazon Web Services")
        );
    }

    #[test]
    fn test_description_falls_back_to_schema_default() {
        let assembler = assembler(MemoryBlobStore::new());
        let spec =
            ServiceBrokerSpec::from_yaml_str("Name: sqs\nDisplayName: SQS\nServicePlans: {}\n")
                .unwrap();
        let fields = assembler
            .map_fields(&spec, &template("Description: qs-abcdefghi \n"))
            .unwrap();
        assert_eq!(
            fields.get("description").and_then(Value::as_str),
            Some("AWS Service Broker managed service")
        );
    }

    #[test]
    fn test_cleanup_removes_uploads() {
        let store = MemoryBlobStore::new();
        let assembler = assembler(store.clone());
        let bundle = run(&assembler, TEMPLATE).unwrap();
        assert_eq!(store.keys(&bundle.staging_bucket).len(), 1);

        assembler.cleanup_staging(&bundle).unwrap();
        assert!(store.keys(&bundle.staging_bucket).is_empty());
    }

    #[test]
    fn test_identity_only_consulted_without_bucket() {
        let mut identity = MockAccountIdentity::new();
        identity
            .expect_account_id()
            .times(1)
            .returning(|| Ok("000000000000".to_string()));
        let store = MemoryBlobStore::new();
        let assembler = SpecAssembler::new(
            MappingTables::builtin().unwrap(),
            PackagerConfig::new("sqs").with_key_prefix("ci"),
            Collaborators {
                store: Box::new(store.clone()),
                identity: Box::new(identity),
                packager: Box::new(ZipPackager::new()),
                helpers: Box::new(inline_helpers()),
            },
        );
        let bundle = run(&assembler, TEMPLATE).unwrap();
        assert_eq!(bundle.staging_bucket, "awsservicebroker-assets-000000000000");
        assert_eq!(bundle.uploaded_keys, vec!["ci/templates/sqs/template.yaml"]);
    }
}
