//! IAM user injection
//!
//! Adds an IAM user whose access key pair is created by a custom resource
//! at stack time, and attaches the policies listed in `Bindings.IAM`.

use super::{ResourceInjector, Snippet};
use apb_packager_common::{IamPolicy, PackagerError, Result};
use apb_packager_parser::CloudFormationTemplate;
use serde_yaml::Value;

/// The injected IAM user
pub const IAM_USER: &str = "AWSSBInjectedIAMUser";
/// Marker resource of the IAM injection
pub const IAM_USER_CREATOR: &str = "AWSSBInjectedIAMUserCreator";
/// Output carrying the injected user's access key id
pub const ACCESS_KEY_ID_OUTPUT: &str = "UserKeyId";
/// Output carrying the injected user's secret access key
pub const SECRET_ACCESS_KEY_OUTPUT: &str = "UserSecretKey";

const HELPER: &str = "create_keypair";
const LAMBDA: &str = "AWSSBInjectedIAMUserLambda";
const POLICY_TEMPLATE: &str = "AWSSBInjectedIAMUserPolicy";
const MANAGED_POLICY_PREFIX: &str = "arn:aws:iam";
const SNIPPET: &str = include_str!("../../snippets/iam_user.yaml");

impl ResourceInjector<'_> {
    /// Add the IAM user resources unless the template already has them
    ///
    /// Inline policies become `AWSSBInjectedIAMUserPolicy<N>` resources
    /// numbered from 1; managed policy ARNs are attached to the user.
    pub fn inject_iam(
        &mut self,
        template: &mut CloudFormationTemplate,
        policies: &[IamPolicy],
    ) -> Result<bool> {
        if template.has_resource(IAM_USER_CREATOR) {
            tracing::debug!("template already carries an injected IAM user");
            return Ok(false);
        }

        let mut snippet = Snippet::parse(HELPER, SNIPPET)?;
        let policy_template = snippet.take_resource(POLICY_TEMPLATE)?;

        let mut managed = Vec::new();
        let mut inline = 0usize;
        for policy in policies {
            match policy {
                IamPolicy::Inline(document) => {
                    inline += 1;
                    let name = format!("{}{}", POLICY_TEMPLATE, inline);
                    let mut resource = policy_template.clone();
                    let props = resource
                        .get_mut("Properties")
                        .and_then(Value::as_mapping_mut)
                        .ok_or_else(|| {
                            PackagerError::malformed(
                                HELPER,
                                format!("{} has no Properties", POLICY_TEMPLATE),
                            )
                        })?;
                    props.insert(Value::from("PolicyName"), Value::from(name.as_str()));
                    props.insert(Value::from("PolicyDocument"), document.clone());
                    snippet.resources_mut()?.insert(Value::from(name), resource);
                }
                IamPolicy::Arn(arn) if arn.starts_with(MANAGED_POLICY_PREFIX) => {
                    managed.push(Value::from(arn.as_str()));
                }
                IamPolicy::Arn(other) => {
                    tracing::warn!(policy = %other, "skipping policy that is not an IAM ARN");
                }
            }
        }

        if managed.is_empty() {
            snippet.resource_mut(IAM_USER)?.shift_remove("Properties");
        } else {
            snippet
                .properties_mut(IAM_USER)?
                .insert(Value::from("ManagedPolicyArns"), Value::Sequence(managed));
        }

        self.install_helper_code(template, &mut snippet, LAMBDA)?;
        snippet.merge_into(template);
        tracing::info!(inline_policies = inline, "injected IAM user");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{inline_helpers, template};
    use super::*;
    use crate::collaborators::{MockFunctionPackager, MockHelperCatalog};
    use crate::config::PackagerConfig;
    use crate::staging::StagingArea;

    fn inject(t: &mut CloudFormationTemplate, policies: &[IamPolicy]) -> Result<bool> {
        let config = PackagerConfig::new("sqs");
        let helpers = inline_helpers();
        let packager = MockFunctionPackager::new();
        let mut staging = StagingArea::new("assets", "private");
        ResourceInjector::new(&config, &helpers, &packager, &mut staging).inject_iam(t, policies)
    }

    fn policy_resources(t: &CloudFormationTemplate) -> Vec<String> {
        t.resources()
            .unwrap()
            .keys()
            .filter_map(Value::as_str)
            .filter(|name| name.starts_with(POLICY_TEMPLATE))
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_managed_arn_only() {
        let mut t = template("Resources:\n  Queue:\n    Type: AWS::SQS::Queue\n");
        let arn = "arn:aws:iam::aws:policy/AmazonSQSFullAccess";
        assert!(inject(&mut t, &[IamPolicy::Arn(arn.to_string())]).unwrap());

        let user = t.resource(IAM_USER).unwrap();
        assert_eq!(
            user["Properties"]["ManagedPolicyArns"],
            Value::Sequence(vec![Value::from(arn)])
        );
        assert!(policy_resources(&t).is_empty());
        assert!(t.has_resource(IAM_USER_CREATOR));
        assert!(t.has_resource("Queue"));
    }

    #[test]
    fn test_inline_policies_are_numbered() {
        let mut t = template("Resources: {}\n");
        let doc_a: Value = serde_yaml::from_str("Version: '2012-10-17'\nStatement: []\n").unwrap();
        let doc_b: Value = serde_yaml::from_str("Version: '2012-10-17'\nStatement: [{}]\n").unwrap();
        inject(
            &mut t,
            &[IamPolicy::Inline(doc_a.clone()), IamPolicy::Inline(doc_b)],
        )
        .unwrap();

        assert_eq!(
            policy_resources(&t),
            vec!["AWSSBInjectedIAMUserPolicy1", "AWSSBInjectedIAMUserPolicy2"]
        );
        let first = &t.resource("AWSSBInjectedIAMUserPolicy1").unwrap()["Properties"];
        assert_eq!(first["PolicyName"].as_str(), Some("AWSSBInjectedIAMUserPolicy1"));
        assert_eq!(first["PolicyDocument"], doc_a);
        // no managed policies leaves the user without properties
        assert!(t.resource(IAM_USER).unwrap().get("Properties").is_none());
    }

    #[test]
    fn test_outputs_and_code_installed() {
        let mut t = template("Outputs:\n  QueueURL:\n    Value: x\n");
        inject(&mut t, &[]).unwrap();

        let names = t.output_names();
        assert_eq!(names, vec!["QueueURL", "UserKeyId", "UserSecretKey", "UserArn"]);
        let code = &t.resource(LAMBDA).unwrap()["Properties"]["Code"]["ZipFile"];
        assert_eq!(code.as_str(), Some("# create_keypair\n"));
    }

    #[test]
    fn test_non_iam_arn_is_skipped() {
        let mut t = template("Resources: {}\n");
        inject(&mut t, &[IamPolicy::Arn("arn:aws:s3:::bucket".to_string())]).unwrap();
        assert!(t.resource(IAM_USER).unwrap().get("Properties").is_none());
    }

    #[test]
    fn test_iam_injection_is_idempotent() {
        let mut t = template("Resources: {}\n");
        assert!(inject(&mut t, &[]).unwrap());
        let before = t.clone();
        assert!(!inject(&mut t, &[IamPolicy::Arn("arn:aws:iam::aws:policy/X".to_string())]).unwrap());
        assert_eq!(t, before);
    }

    #[test]
    fn test_missing_helper_is_an_error() {
        let config = PackagerConfig::new("sqs");
        let mut helpers = MockHelperCatalog::new();
        helpers
            .expect_helper_code()
            .returning(|helper| Err(PackagerError::malformed(helper, "no lambda_function.py")));
        let packager = MockFunctionPackager::new();
        let mut staging = StagingArea::new("assets", "private");
        let mut t = template("Resources: {}\n");

        let result = ResourceInjector::new(&config, &helpers, &packager, &mut staging)
            .inject_iam(&mut t, &[]);
        assert!(matches!(result, Err(PackagerError::MalformedHelperData { .. })));
        assert!(!t.has_resource(IAM_USER_CREATOR));
    }
}
