//! Packaging configuration

use crate::collaborators::AccountIdentity;
use apb_packager_common::Result;
use std::path::PathBuf;

/// Default ACL for staged objects
pub const DEFAULT_ACL: &str = "private";

/// Settings for one packaging run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagerConfig {
    /// Service name used in staged keys and output paths
    pub service_name: String,
    /// Staging bucket; derived from the account id when unset
    pub bucket: Option<String>,
    key_prefix: String,
    pub acl: String,
    /// Directory artifact bundles are written below
    pub build_path: Option<PathBuf>,
}

impl PackagerConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            bucket: None,
            key_prefix: String::new(),
            acl: DEFAULT_ACL.to_string(),
            build_path: None,
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the key prefix; a non-empty prefix always ends with `/`
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.key_prefix = prefix;
        self
    }

    pub fn with_acl(mut self, acl: impl Into<String>) -> Self {
        self.acl = acl.into();
        self
    }

    pub fn with_build_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_path = Some(path.into());
        self
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Configured bucket, or `awsservicebroker-assets-<account id>`
    pub fn staging_bucket(&self, identity: &dyn AccountIdentity) -> Result<String> {
        match &self.bucket {
            Some(bucket) => Ok(bucket.clone()),
            None => {
                let account = identity.account_id()?;
                Ok(format!("awsservicebroker-assets-{}", account))
            }
        }
    }

    /// Key prefix all staged function archives live under
    pub fn functions_prefix(&self) -> String {
        format!("{}functions/", self.key_prefix)
    }

    /// Key of a staged function archive
    pub fn function_key(&self, function: &str) -> String {
        format!("{}{}/lambda_function.zip", self.functions_prefix(), function)
    }

    /// Key the rendered template is uploaded to
    pub fn template_key(&self) -> String {
        format!(
            "{}templates/{}/template.yaml",
            self.key_prefix, self.service_name
        )
    }

    /// `<build_path>/<service_name>`, when a build path is set
    pub fn output_dir(&self) -> Option<PathBuf> {
        self.build_path
            .as_ref()
            .map(|base| base.join(&self.service_name))
    }
}
