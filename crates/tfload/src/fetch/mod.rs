//! module retrieval
//!
//! A [FetchClient] turns a module source string into a directory on disk. [SourceFetcher] is the default
//! client and understands the address forms described in [crate::source].
mod archive;
mod git;

use crate::source::{ModuleSource, SourceKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Where a fetched module ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// Module is used from where it already lives (local paths)
    InPlace(PathBuf),
    /// Module was written to the requested destination
    Staged,
}

#[async_trait]
pub trait FetchClient: Send + Sync {
    /// Materializes `source`
    ///
    /// Remote packages are written to `dest`, which does not exist yet. Its parent directory does.
    async fn fetch(&self, source: &str, dest: &Path) -> Result<Fetched, FetchError>;
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Unsupported module source: {0}")]
    Unsupported(String),
    #[error("Local module directory not found: {}", .0.display())]
    LocalNotFound(PathBuf),
    #[error("Subdirectory \"{0}\" not found in module package")]
    SubdirNotFound(String),
    #[error("Git error")]
    Git(#[from] git2::Error),
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),
    #[error("Unable to extract module archive")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Fetch task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// Default [FetchClient]: local directories, git repositories and http archives
#[derive(Debug, Default, Clone)]
pub struct SourceFetcher {
    http: reqwest::Client,
}

impl SourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FetchClient for SourceFetcher {
    async fn fetch(&self, source: &str, dest: &Path) -> Result<Fetched, FetchError> {
        let ModuleSource { kind, subdir } = ModuleSource::parse(source);

        match kind {
            SourceKind::Local(path) => match tokio::fs::canonicalize(&path).await {
                Ok(dir) if dir.is_dir() => Ok(Fetched::InPlace(dir)),
                _ => Err(FetchError::LocalNotFound(path)),
            },
            SourceKind::Git { url, reference } => {
                git::fetch(url, reference, subdir, dest.to_path_buf()).await?;
                Ok(Fetched::Staged)
            }
            SourceKind::Archive { url, format } => {
                archive::fetch(&self.http, &url, format, subdir, dest.to_path_buf()).await?;
                Ok(Fetched::Staged)
            }
            SourceKind::Registry(address) => Err(FetchError::Unsupported(format!(
                "{address} (registry modules must be referenced by their git or archive address)"
            ))),
            SourceKind::Unknown(address) => Err(FetchError::Unsupported(address)),
        }
    }
}

/// Scratch space next to `dest`, removed on drop
fn scratch_dir(dest: &Path) -> Result<tempfile::TempDir, FetchError> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    Ok(tempfile::Builder::new()
        .prefix(".scratch-")
        .tempdir_in(parent)?)
}

/// Moves the module root (`package/subdir` or `package`) to `dest`
fn promote(package: &Path, subdir: Option<&str>, dest: &Path) -> Result<(), FetchError> {
    let root = match subdir {
        Some(subdir) => package.join(subdir),
        None => package.to_path_buf(),
    };

    if !root.is_dir() {
        return Err(FetchError::SubdirNotFound(
            subdir.unwrap_or_default().to_string(),
        ));
    }

    std::fs::rename(&root, dest)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn local_sources_are_used_in_place() {
        let module = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let source = module.path().display().to_string();
        let fetched = SourceFetcher::new()
            .fetch(&source, &dest.path().join("module"))
            .await
            .unwrap();

        assert_eq!(
            fetched,
            Fetched::InPlace(module.path().canonicalize().unwrap())
        );
        assert!(!dest.path().join("module").exists());
    }

    #[tokio::test]
    async fn missing_local_source() {
        let dest = tempfile::tempdir().unwrap();
        let err = SourceFetcher::new()
            .fetch("./does/not/exist", &dest.path().join("module"))
            .await
            .expect_err("must error");
        assert!(matches!(err, FetchError::LocalNotFound(_)));
    }

    #[tokio::test]
    async fn unsupported_sources() {
        let dest = tempfile::tempdir().unwrap();
        for source in ["hashicorp/consul/aws", "s3::https://s3.amazonaws.com/b/vpc.zip"] {
            let err = SourceFetcher::new()
                .fetch(source, &dest.path().join("module"))
                .await
                .expect_err("must error");
            assert!(matches!(err, FetchError::Unsupported(_)), "{source}");
        }
    }

    #[test]
    fn promote_subdir() {
        let scratch = tempfile::tempdir().unwrap();
        let package = scratch.path().join("package");
        std::fs::create_dir_all(package.join("modules/vpc")).unwrap();
        std::fs::write(package.join("modules/vpc/main.tf"), "").unwrap();

        let dest = scratch.path().join("module");
        promote(&package, Some("modules/vpc"), &dest).unwrap();
        assert!(dest.join("main.tf").is_file());

        let err = promote(&package, Some("missing"), &scratch.path().join("other"))
            .expect_err("must error");
        assert!(matches!(err, FetchError::SubdirNotFound(_)));
    }
}
