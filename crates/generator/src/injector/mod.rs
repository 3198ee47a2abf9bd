//! Resource injection
//!
//! Adds helper infrastructure to a template: an IAM user with a key pair
//! for bindings, Lambda-backed custom resources that compute parameter
//! values at stack creation, and the zip-copy resource those functions
//! are deployed through. Each injection is keyed on a marker resource and
//! does nothing when the marker is already present.
//!
//! Resource fragments live in `snippets/*.yaml` and are compiled in.

mod auto_params;
mod copy_zips;
mod iam;

pub use auto_params::{AutoUtility, AUTO_UTILITIES};
pub use copy_zips::{COPY_ZIPS_RESOURCE, LAMBDA_ZIPS_BUCKET};
pub use iam::{ACCESS_KEY_ID_OUTPUT, IAM_USER, IAM_USER_CREATOR, SECRET_ACCESS_KEY_OUTPUT};

use crate::collaborators::{FunctionPackager, HelperCatalog, HelperCode};
use crate::config::PackagerConfig;
use crate::staging::StagingArea;
use apb_packager_common::{PackagerError, Result};
use apb_packager_parser::{CloudFormationTemplate, IntrinsicForm, RESOURCES};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

/// Prefix shared by every injected resource
pub const INJECTED_PREFIX: &str = "AWSSBInjected";

/// Handler of functions deployed from a staged archive
const PACKAGED_HANDLER: &str = "lambda_function.handler";

/// Applies injections to a template, staging any archives they need
pub struct ResourceInjector<'a> {
    config: &'a PackagerConfig,
    helpers: &'a dyn HelperCatalog,
    packager: &'a dyn FunctionPackager,
    staging: &'a mut StagingArea,
}

impl<'a> ResourceInjector<'a> {
    pub fn new(
        config: &'a PackagerConfig,
        helpers: &'a dyn HelperCatalog,
        packager: &'a dyn FunctionPackager,
        staging: &'a mut StagingArea,
    ) -> Self {
        Self {
            config,
            helpers,
            packager,
            staging,
        }
    }

    /// Archive a function directory, stage it and list it on the zip-copy
    /// resource. Returns the staged key.
    pub fn publish_function(
        &mut self,
        template: &mut CloudFormationTemplate,
        name: &str,
        dir: &Path,
    ) -> Result<String> {
        self.inject_copy_zips(template)?;
        let archive = self.packager.package(dir)?;
        let key = self.config.function_key(name);
        self.staging.stage_function(name, key.clone(), archive);
        self.add_copy_object(template, &format!("{}/lambda_function.zip", name))?;
        tracing::info!(function = name, key = %key, "published function");
        Ok(key)
    }

    /// Publish every directory below `<template_dir>/functions`
    ///
    /// Returns the published function names in directory name order.
    pub fn publish_function_dirs(
        &mut self,
        template: &mut CloudFormationTemplate,
        template_dir: &Path,
    ) -> Result<Vec<String>> {
        let functions_dir = template_dir.join("functions");
        if !functions_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names: Vec<String> = fs::read_dir(&functions_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(String::from))
            .collect();
        names.sort();

        for name in &names {
            self.publish_function(template, name, &functions_dir.join(name))?;
        }
        Ok(names)
    }

    /// Point a snippet's Lambda at its helper code
    ///
    /// Inline helpers are embedded as `Code.ZipFile`; packaged helpers are
    /// staged and referenced through the zip-copy bucket.
    fn install_helper_code(
        &mut self,
        template: &mut CloudFormationTemplate,
        snippet: &mut Snippet,
        lambda: &str,
    ) -> Result<()> {
        let helper = snippet.helper;
        match self.helpers.helper_code(helper)? {
            HelperCode::Inline(code) => {
                let props = snippet.properties_mut(lambda)?;
                let code_block = props
                    .get_mut("Code")
                    .and_then(Value::as_mapping_mut)
                    .ok_or_else(|| {
                        PackagerError::malformed(helper, format!("{} has no Code block", lambda))
                    })?;
                code_block.insert(Value::from("ZipFile"), Value::from(code));
            }
            HelperCode::Packaged(dir) => {
                if helper == copy_zips::HELPER {
                    return Err(PackagerError::malformed(
                        helper,
                        "the zip-copy function must be shipped as inline code",
                    ));
                }
                let key = self.publish_function(template, helper, &dir)?;
                let mut code_block = Mapping::new();
                code_block.insert(
                    Value::from("S3Bucket"),
                    IntrinsicForm::Short.reference(LAMBDA_ZIPS_BUCKET),
                );
                code_block.insert(Value::from("S3Key"), Value::from(key));

                let props = snippet.properties_mut(lambda)?;
                props.insert(Value::from("Code"), Value::Mapping(code_block));
                props.insert(Value::from("Handler"), Value::from(PACKAGED_HANDLER));
            }
        }
        Ok(())
    }
}

/// A parsed resource fragment
#[derive(Debug, Clone)]
pub(crate) struct Snippet {
    helper: &'static str,
    doc: Mapping,
}

impl Snippet {
    pub(crate) fn parse(helper: &'static str, source: &str) -> Result<Self> {
        match serde_yaml::from_str(source) {
            Ok(Value::Mapping(doc)) => Ok(Self { helper, doc }),
            Ok(_) => Err(PackagerError::malformed(helper, "snippet is not a mapping")),
            Err(e) => Err(PackagerError::malformed(helper, e.to_string())),
        }
    }

    fn resources_mut(&mut self) -> Result<&mut Mapping> {
        let helper = self.helper;
        self.doc
            .get_mut(RESOURCES)
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| PackagerError::malformed(helper, "snippet has no Resources"))
    }

    fn resource_mut(&mut self, name: &str) -> Result<&mut Mapping> {
        let helper = self.helper;
        self.resources_mut()?
            .get_mut(name)
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| PackagerError::malformed(helper, format!("missing resource {}", name)))
    }

    fn properties_mut(&mut self, resource: &str) -> Result<&mut Mapping> {
        let helper = self.helper;
        self.resource_mut(resource)?
            .get_mut("Properties")
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| {
                PackagerError::malformed(helper, format!("{} has no Properties", resource))
            })
    }

    /// Remove a resource, returning its definition
    fn take_resource(&mut self, name: &str) -> Result<Value> {
        let helper = self.helper;
        self.resources_mut()?
            .shift_remove(name)
            .ok_or_else(|| PackagerError::malformed(helper, format!("missing resource {}", name)))
    }

    /// Replace placeholders in every string of the snippet
    fn substitute(&mut self, replacements: &[(&str, &str)]) {
        for value in self.doc.values_mut() {
            substitute_strings(value, replacements);
        }
    }

    /// Copy every section into the template, later names replacing earlier
    fn merge_into(self, template: &mut CloudFormationTemplate) {
        for (section, content) in self.doc {
            let (Some(section), Value::Mapping(content)) = (section.as_str(), content) else {
                continue;
            };
            let target = template.section_mut(section);
            for (name, value) in content {
                target.insert(name, value);
            }
        }
    }
}

fn substitute_strings(value: &mut Value, replacements: &[(&str, &str)]) {
    match value {
        Value::String(s) => {
            for (placeholder, replacement) in replacements {
                if s.contains(placeholder) {
                    *s = s.replace(placeholder, replacement);
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                substitute_strings(item, replacements);
            }
        }
        Value::Mapping(m) => {
            for item in m.values_mut() {
                substitute_strings(item, replacements);
            }
        }
        Value::Tagged(t) => substitute_strings(&mut t.value, replacements),
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collaborators::{MockFunctionPackager, MockHelperCatalog};
    use std::path::PathBuf;

    /// Helper catalog returning inline code for every helper
    pub(crate) fn inline_helpers() -> MockHelperCatalog {
        let mut helpers = MockHelperCatalog::new();
        helpers
            .expect_helper_code()
            .returning(|helper| Ok(HelperCode::Inline(format!("# {}\n", helper))));
        helpers
    }

    pub(crate) fn fixed_packager() -> MockFunctionPackager {
        let mut packager = MockFunctionPackager::new();
        packager.expect_package().returning(|_| Ok(b"PK".to_vec()));
        packager
    }

    pub(crate) fn template(yaml: &str) -> CloudFormationTemplate {
        CloudFormationTemplate::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn test_snippet_substitution_reaches_tagged_strings() {
        let mut snippet = Snippet::parse(
            "copy_zips",
            "Resources:\n  R:\n    Properties:\n      A: ${KeyPrefix}x\n      B: !Sub \"${AWS::Region}/${KeyPrefix}\"\n",
        )
        .unwrap();
        snippet.substitute(&[("${KeyPrefix}", "pre/")]);
        let props = snippet.properties_mut("R").unwrap();
        assert_eq!(props.get("A").and_then(Value::as_str), Some("pre/x"));
        let yaml = serde_yaml::to_string(&props.get("B").unwrap()).unwrap();
        assert!(yaml.contains("${AWS::Region}/pre/"));
    }

    #[test]
    fn test_snippet_missing_resource_is_malformed() {
        let mut snippet = Snippet::parse("get_azs", "Resources: {}\n").unwrap();
        let err = snippet.properties_mut("AWSSBInjectedGetAzsLambda").unwrap_err();
        assert!(matches!(
            err,
            PackagerError::MalformedHelperData { ref helper, .. } if helper == "get_azs"
        ));
        assert!(Snippet::parse("get_azs", "- not\n- a mapping\n").is_err());
    }

    #[test]
    fn test_publish_function_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("functions/zeta")).unwrap();
        fs::create_dir_all(dir.path().join("functions/alpha")).unwrap();
        fs::write(dir.path().join("functions/README"), "not a function").unwrap();

        let config = PackagerConfig::new("sqs").with_key_prefix("pre");
        let helpers = inline_helpers();
        let packager = fixed_packager();
        let mut staging = StagingArea::new("assets", "private");
        let mut t = template("Resources: {}\n");

        let names = ResourceInjector::new(&config, &helpers, &packager, &mut staging)
            .publish_function_dirs(&mut t, dir.path())
            .unwrap();
        assert_eq!(names, vec!["alpha", "zeta"]);

        let objects = &t.resource(COPY_ZIPS_RESOURCE).unwrap()["Properties"]["Objects"];
        assert_eq!(
            objects.as_sequence().unwrap(),
            &vec![
                Value::from("alpha/lambda_function.zip"),
                Value::from("zeta/lambda_function.zip")
            ]
        );
        let keys: Vec<&str> = staging.functions().iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "pre/functions/alpha/lambda_function.zip",
                "pre/functions/zeta/lambda_function.zip"
            ]
        );
    }

    #[test]
    fn test_no_functions_dir_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let config = PackagerConfig::new("sqs");
        let helpers = MockHelperCatalog::new();
        let packager = MockFunctionPackager::new();
        let mut staging = StagingArea::new("assets", "private");
        let mut t = template("Resources: {}\n");

        let names = ResourceInjector::new(&config, &helpers, &packager, &mut staging)
            .publish_function_dirs(&mut t, &PathBuf::from(dir.path()))
            .unwrap();
        assert!(names.is_empty());
        assert!(!t.has_resource(COPY_ZIPS_RESOURCE));
    }
}
