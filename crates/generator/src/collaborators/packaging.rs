//! Function archiving, helper sources and account identity

use super::{AccountIdentity, FunctionPackager, HelperCatalog, HelperCode};
use apb_packager_common::{PackagerError, Result};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Entry point file every helper directory carries
pub const HANDLER_FILE: &str = "lambda_function.py";
/// Marks a helper whose dependencies have to be shipped alongside it
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Zips a directory tree, paths relative to the directory root
///
/// Entries are added in file name order so identical trees produce
/// identical archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipPackager;

impl ZipPackager {
    pub fn new() -> Self {
        Self
    }
}

impl FunctionPackager for ZipPackager {
    fn package(&self, dir: &Path) -> Result<Vec<u8>> {
        if !dir.is_dir() {
            return Err(PackagerError::Storage(format!(
                "function directory {} does not exist",
                dir.display()
            )));
        }
        if dir.join(REQUIREMENTS_FILE).is_file() {
            tracing::warn!(
                dir = %dir.display(),
                "function declares requirements; they must already be vendored into the directory"
            );
        }

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut files = 0usize;

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                PackagerError::Storage(format!("Failed to walk {}: {}", dir.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(dir).map_err(|e| {
                PackagerError::Storage(format!("Failed to package {}: {}", dir.display(), e))
            })?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let body = fs::read(entry.path())?;
            writer
                .start_file(name, entry_options())
                .map_err(|e| PackagerError::Storage(format!("Failed to add file to archive: {}", e)))?;
            writer.write_all(&body)?;
            files += 1;
        }

        let archive = writer
            .finish()
            .map_err(|e| PackagerError::Storage(format!("Failed to finish archive: {}", e)))?
            .into_inner();
        tracing::debug!(dir = %dir.display(), files, bytes = archive.len(), "packaged function");
        Ok(archive)
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// Reads helpers from `<root>/<helper>/lambda_function.py`
#[derive(Debug, Clone)]
pub struct DirectoryHelperCatalog {
    root: PathBuf,
}

impl DirectoryHelperCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl HelperCatalog for DirectoryHelperCatalog {
    fn helper_code(&self, helper: &str) -> Result<HelperCode> {
        let dir = self.root.join(helper);
        let handler = dir.join(HANDLER_FILE);
        if !handler.is_file() {
            return Err(PackagerError::malformed(
                helper,
                format!("no {} found at {}", HANDLER_FILE, handler.display()),
            ));
        }
        if dir.join(REQUIREMENTS_FILE).is_file() {
            return Ok(HelperCode::Packaged(dir));
        }
        Ok(HelperCode::Inline(fs::read_to_string(&handler)?))
    }
}

/// A fixed account id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAccountIdentity {
    account_id: String,
}

impl StaticAccountIdentity {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

impl AccountIdentity for StaticAccountIdentity {
    fn account_id(&self) -> Result<String> {
        Ok(self.account_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn test_zip_packager_relative_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(HANDLER_FILE), "def handler(e, c): pass\n").unwrap();
        fs::create_dir_all(dir.path().join("vendor/lib")).unwrap();
        fs::write(dir.path().join("vendor/lib/util.py"), "X = 1\n").unwrap();

        let bytes = ZipPackager::new().package(dir.path()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["lambda_function.py", "vendor/lib/util.py"]);

        let mut content = String::new();
        archive
            .by_name("vendor/lib/util.py")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "X = 1\n");
    }

    #[test]
    fn test_zip_packager_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.py"), "b").unwrap();
        fs::write(dir.path().join("a.py"), "a").unwrap();
        let first = ZipPackager::new().package(dir.path()).unwrap();
        let second = ZipPackager::new().package(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zip_packager_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ZipPackager::new().package(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_helper_catalog_inline_and_packaged() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("get_azs")).unwrap();
        fs::write(root.path().join("get_azs").join(HANDLER_FILE), "azs").unwrap();
        fs::create_dir_all(root.path().join("get_cidrs")).unwrap();
        fs::write(root.path().join("get_cidrs").join(HANDLER_FILE), "cidrs").unwrap();
        fs::write(root.path().join("get_cidrs").join(REQUIREMENTS_FILE), "netaddr\n").unwrap();

        let catalog = DirectoryHelperCatalog::new(root.path());
        assert_eq!(
            catalog.helper_code("get_azs").unwrap(),
            HelperCode::Inline("azs".to_string())
        );
        assert_eq!(
            catalog.helper_code("get_cidrs").unwrap(),
            HelperCode::Packaged(root.path().join("get_cidrs"))
        );
        assert!(matches!(
            catalog.helper_code("copy_zips"),
            Err(PackagerError::MalformedHelperData { .. })
        ));
    }
}
