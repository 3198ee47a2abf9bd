//! CloudFormation template loading for the APB packager
//!
//! This crate reads CloudFormation templates into an order-preserving
//! document that keeps intrinsic function tags intact, extracts the
//! embedded service broker specification and UI metadata, and translates
//! spec keys into APB keys.
//!
//! ## Template handling
//!
//! - `intrinsics` builds and rewrites `Ref` / `GetAtt` / `If` / `Equals`
//!   nodes in either the short (`!Ref`) or long (`{"Ref": ...}`) form
//! - `template` wraps the document and exposes its sections
//! - `interface` reads `AWS::CloudFormation::Interface` labels and groups
//! - `key_mapper` maps `DisplayName` to `metadata.displayName` and back

pub mod intrinsics;
mod interface;
mod key_mapper;
mod template;

pub use interface::{ParameterGroup, ParameterInterface, PARAMETER_GROUPS, PARAMETER_LABELS};
pub use intrinsics::{count_references, reference_form, rewrite_references, IntrinsicForm};
pub use key_mapper::{ApbKeyPath, KeyMapper, KeyType};
pub use template::{
    CloudFormationTemplate, CONDITIONS, INTERFACE_METADATA, METADATA, OUTPUTS, PARAMETERS,
    RESOURCES, SERVICE_BROKER_METADATA,
};

use apb_packager_common::{PackagerError, Result, ServiceBrokerSpec};
use std::path::Path;

/// Load a CloudFormation template from disk
pub fn load_template(path: &Path) -> Result<CloudFormationTemplate> {
    tracing::debug!(path = %path.display(), "loading template");
    CloudFormationTemplate::from_file(path)
}

/// Resolve the service broker spec for a template
///
/// A standalone spec file takes precedence over the template's
/// `AWS::ServiceBroker::Specification` metadata block.
pub fn load_service_spec(
    template: &CloudFormationTemplate,
    spec_file: Option<&Path>,
) -> Result<ServiceBrokerSpec> {
    if let Some(path) = spec_file {
        tracing::debug!(path = %path.display(), "using standalone service spec");
        return ServiceBrokerSpec::from_file(path);
    }

    template.service_broker_spec()?.ok_or_else(|| {
        PackagerError::Parse(format!(
            "template has no {} metadata and no spec file was given",
            SERVICE_BROKER_METADATA
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_spec_file_overrides_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("spec.yaml");
        fs::write(&spec_path, "Name: from-file\n").unwrap();

        let template = CloudFormationTemplate::from_yaml_str(
            "Metadata:\n  AWS::ServiceBroker::Specification:\n    Name: from-metadata\n",
        )
        .unwrap();

        let spec = load_service_spec(&template, Some(&spec_path)).unwrap();
        assert_eq!(spec.get("Name").and_then(|v| v.as_str()), Some("from-file"));

        let spec = load_service_spec(&template, None).unwrap();
        assert_eq!(spec.get("Name").and_then(|v| v.as_str()), Some("from-metadata"));
    }

    #[test]
    fn test_missing_spec_is_an_error() {
        let template = CloudFormationTemplate::from_yaml_str("Resources: {}\n").unwrap();
        let err = load_service_spec(&template, None).unwrap_err();
        assert!(matches!(err, PackagerError::Parse(_)));
    }
}
