//! Deferred uploads to the staging bucket
//!
//! Nothing reaches the blob store until [`StagingArea::commit`] runs, so a
//! failed assembly leaves no partial artifacts behind.

use crate::collaborators::BlobStore;
use apb_packager_common::Result;

/// A packaged function archive waiting for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFunction {
    pub name: String,
    pub key: String,
    pub archive: Vec<u8>,
}

/// Objects collected during one assembly run
#[derive(Debug, Clone)]
pub struct StagingArea {
    bucket: String,
    acl: String,
    functions: Vec<StagedFunction>,
    template: Option<(String, Vec<u8>)>,
}

impl StagingArea {
    pub fn new(bucket: impl Into<String>, acl: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            acl: acl.into(),
            functions: Vec::new(),
            template: None,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Queue a function archive; a later archive for the same key replaces it
    pub fn stage_function(&mut self, name: &str, key: String, archive: Vec<u8>) {
        self.functions.retain(|f| f.key != key);
        self.functions.push(StagedFunction {
            name: name.to_string(),
            key,
            archive,
        });
    }

    pub fn stage_template(&mut self, key: String, body: Vec<u8>) {
        self.template = Some((key, body));
    }

    pub fn functions(&self) -> &[StagedFunction] {
        &self.functions
    }

    /// Create the bucket if needed and upload everything, functions first
    ///
    /// Returns the uploaded keys in upload order.
    pub fn commit(&self, store: &dyn BlobStore) -> Result<Vec<String>> {
        if !store.exists(&self.bucket)? {
            tracing::info!(bucket = %self.bucket, "creating staging bucket");
            store.create(&self.bucket)?;
        }

        let mut uploaded = Vec::new();
        for function in &self.functions {
            store.put(&self.bucket, &function.key, &function.archive, &self.acl)?;
            tracing::info!(bucket = %self.bucket, key = %function.key, "uploaded function archive");
            uploaded.push(function.key.clone());
        }
        if let Some((key, body)) = &self.template {
            store.put(&self.bucket, key, body, &self.acl)?;
            tracing::info!(bucket = %self.bucket, key = %key, "uploaded template");
            uploaded.push(key.clone());
        }
        Ok(uploaded)
    }
}
