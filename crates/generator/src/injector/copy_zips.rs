//! Zip-copy injection
//!
//! Lambda code has to live in a bucket in the stack's own region. The
//! injected custom resource copies every staged archive listed in its
//! `Objects` property from the staging bucket into a fresh bucket created
//! with the stack.

use super::{ResourceInjector, Snippet};
use apb_packager_common::{PackagerError, Result};
use apb_packager_parser::CloudFormationTemplate;
use serde_yaml::Value;

/// Marker resource of the zip-copy injection
pub const COPY_ZIPS_RESOURCE: &str = "AWSSBInjectedCopyZips";
/// Destination bucket packaged functions are deployed from
pub const LAMBDA_ZIPS_BUCKET: &str = "AWSSBInjectedLambdaZipsBucket";

pub(super) const HELPER: &str = "copy_zips";
const LAMBDA: &str = "AWSSBInjectedCopyZipsLambda";
const SNIPPET: &str = include_str!("../../snippets/copy_zips.yaml");

impl ResourceInjector<'_> {
    /// Add the zip-copy resources unless the template already has them
    ///
    /// Returns true when the resources were added.
    pub fn inject_copy_zips(&mut self, template: &mut CloudFormationTemplate) -> Result<bool> {
        if template.has_resource(COPY_ZIPS_RESOURCE) {
            return Ok(false);
        }

        let mut snippet = Snippet::parse(HELPER, SNIPPET)?;
        let bucket = self.staging.bucket().to_string();
        snippet.substitute(&[
            ("${SourceBucketName}", bucket.as_str()),
            ("${KeyPrefix}", self.config.key_prefix()),
        ]);

        let props = snippet.properties_mut(COPY_ZIPS_RESOURCE)?;
        if !props.get("Objects").is_some_and(Value::is_sequence) {
            return Err(PackagerError::malformed(
                HELPER,
                format!("{} has no Objects list", COPY_ZIPS_RESOURCE),
            ));
        }

        self.install_helper_code(template, &mut snippet, LAMBDA)?;
        snippet.merge_into(template);
        tracing::info!(source_bucket = %bucket, "injected zip-copy resources");
        Ok(true)
    }

    /// Append an object to the zip-copy list
    ///
    /// Returns false when the object was already listed.
    pub fn add_copy_object(
        &self,
        template: &mut CloudFormationTemplate,
        object: &str,
    ) -> Result<bool> {
        let objects = template
            .resource_mut(COPY_ZIPS_RESOURCE)
            .and_then(|r| r.get_mut("Properties"))
            .and_then(|p| p.get_mut("Objects"))
            .and_then(Value::as_sequence_mut)
            .ok_or_else(|| {
                PackagerError::malformed(
                    HELPER,
                    format!("{} has no Objects list", COPY_ZIPS_RESOURCE),
                )
            })?;

        let entry = Value::from(object);
        if objects.contains(&entry) {
            return Ok(false);
        }
        objects.push(entry);
        tracing::debug!(object, "added object to zip-copy list");
        Ok(true)
    }
}
