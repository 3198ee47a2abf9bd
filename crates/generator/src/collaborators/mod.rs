//! External collaborators
//!
//! Everything the assembler needs from the outside world goes through one
//! of these traits: object storage for staged artifacts, the identity of
//! the account doing the packaging, archiving of function directories, and
//! the source code of the injected helper functions.

mod packaging;
mod storage;

pub use packaging::{DirectoryHelperCatalog, StaticAccountIdentity, ZipPackager};
pub use storage::{LocalBlobStore, MemoryBlobStore};

use apb_packager_common::Result;
use std::path::{Path, PathBuf};

/// Object storage holding staged templates and function archives
#[cfg_attr(test, mockall::automock)]
pub trait BlobStore {
    fn put(&self, bucket: &str, key: &str, body: &[u8], acl: &str) -> Result<()>;

    fn exists(&self, bucket: &str) -> Result<bool>;

    fn create(&self, bucket: &str) -> Result<()>;

    /// Delete objects; keys that do not exist are ignored
    fn delete(&self, bucket: &str, keys: &[String]) -> Result<()>;
}

/// Identity of the account artifacts are staged in
#[cfg_attr(test, mockall::automock)]
pub trait AccountIdentity {
    fn account_id(&self) -> Result<String>;
}

/// Turns a function source directory into a deployable archive
#[cfg_attr(test, mockall::automock)]
pub trait FunctionPackager {
    fn package(&self, dir: &Path) -> Result<Vec<u8>>;
}

/// Source of the helper functions backing injected custom resources
#[cfg_attr(test, mockall::automock)]
pub trait HelperCatalog {
    fn helper_code(&self, helper: &str) -> Result<HelperCode>;
}

/// How a helper function is shipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperCode {
    /// Source small enough to embed as `Code.ZipFile`
    Inline(String),
    /// Directory with third-party requirements; archived and staged
    Packaged(PathBuf),
}

/// The collaborator handles a [`crate::SpecAssembler`] is built with
pub struct Collaborators {
    pub store: Box<dyn BlobStore>,
    pub identity: Box<dyn AccountIdentity>,
    pub packager: Box<dyn FunctionPackager>,
    pub helpers: Box<dyn HelperCatalog>,
}
