//! Per-request sandbox directories and file materialization
//!
//! Every request gets a fresh temporary directory with a single `files`
//! subdirectory. Declared files are written below `files` only; a name that
//! would land anywhere else fails the whole request. The directory is removed
//! when the [`Sandbox`] is dropped, so every exit path cleans up.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::job::FileEntry;
use crate::source::write_source;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

/// Name of the directory holding materialized files
pub const FILES_DIR: &str = "files";

const SANDBOX_PREFIX: &str = "pandoc-job-";

/// An isolated working directory owned by one request
pub struct Sandbox {
    root: TempDir,
    files_dir: PathBuf,
}

impl Sandbox {
    /// Create a sandbox under `work_dir`, or the system temp directory.
    ///
    /// The filesystem work runs on the blocking thread pool.
    pub async fn create(work_dir: Option<&Path>) -> Result<Self> {
        let work_dir = work_dir.map(Path::to_path_buf);
        tokio::task::spawn_blocking(move || Self::create_blocking(work_dir.as_deref()))
            .await
            .map_err(|e| Error::Internal {
                reason: format!("Task join error: {}", e),
            })?
    }

    fn create_blocking(work_dir: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SANDBOX_PREFIX);

        let root = match work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };

        // Containment checks compare against the canonical form
        let files_dir = std::fs::canonicalize(root.path())?.join(FILES_DIR);
        std::fs::create_dir(&files_dir)?;

        Ok(Self { root, files_dir })
    }

    /// Root of the sandbox
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Directory the tool runs in
    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Resolve a declared file name to a path strictly inside `files`.
    ///
    /// `..` segments are applied lexically; absolute names and names that end
    /// up outside `files` (or at `files` itself) are rejected.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let traversal = || Error::PathTraversal {
            name: name.to_string(),
        };

        let mut resolved = self.files_dir.clone();
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::RootDir | Component::Prefix(_) => return Err(traversal()),
            }
        }

        if resolved == self.files_dir || !resolved.starts_with(&self.files_dir) {
            return Err(traversal());
        }
        Ok(resolved)
    }

    /// Write every entry into the sandbox, stopping at the first failure.
    pub async fn materialize(&self, entries: &[&FileEntry], config: &ServerConfig) -> Result<()> {
        for entry in entries {
            let path = self.resolve(&entry.name)?;
            let source = entry.source.as_ref().ok_or_else(|| Error::NullContent {
                name: entry.name.clone(),
            })?;

            self.prepare_parent(&path, &entry.name).await?;

            tracing::info!(file = %entry.name, source = source.kind(), "Materializing file");
            let size = write_source(source, &path, config).await?;
            tracing::debug!(file = %entry.name, bytes = size, "File written");
        }
        Ok(())
    }

    /// Create the parent directories of `path` and make sure they did not
    /// escape through a symlink.
    async fn prepare_parent(&self, path: &Path, name: &str) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Err(Error::PathTraversal {
                name: name.to_string(),
            });
        };

        tokio::fs::create_dir_all(parent).await?;
        let canonical_parent = tokio::fs::canonicalize(parent).await?;
        if !canonical_parent.starts_with(&self.files_dir) {
            return Err(Error::PathTraversal {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Remove the sandbox on the blocking thread pool, reporting failures
    /// instead of ignoring them.
    pub async fn close(self) -> Result<()> {
        tokio::task::spawn_blocking(move || self.root.close())
            .await
            .map_err(|e| Error::Internal {
                reason: format!("Task join error: {}", e),
            })??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobRequest;
    use pretty_assertions::assert_eq;

    async fn sandbox_in(dir: &TempDir) -> Sandbox {
        Sandbox::create(Some(dir.path())).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_layout() {
        let work = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&work).await;

        assert!(sandbox.files_dir().is_dir());
        assert!(sandbox.files_dir().ends_with(FILES_DIR));
        let name = sandbox.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(SANDBOX_PREFIX));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_create_and_close_off_the_runtime_thread() {
        let work = tempfile::tempdir().unwrap();
        let nested = work.path().join("jobs").join("pending");

        let sandbox = Sandbox::create(Some(nested.as_path())).await.unwrap();
        assert!(sandbox.files_dir().starts_with(std::fs::canonicalize(&nested).unwrap()));
        std::fs::write(sandbox.files_dir().join("a.md"), vec![b'x'; 1024 * 1024]).unwrap();

        sandbox.close().await.unwrap();
        assert_eq!(std::fs::read_dir(&nested).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let work = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&work).await;
        let root = sandbox.path().to_path_buf();
        std::fs::write(sandbox.files_dir().join("a.md"), b"x").unwrap();

        drop(sandbox);
        assert!(!root.exists());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_close_removes_directory() {
        let work = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&work).await;
        let root = sandbox.path().to_path_buf();

        sandbox.close().await.unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_resolve_inside() {
        let work = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&work).await;
        let files = sandbox.files_dir().to_path_buf();

        assert_eq!(sandbox.resolve("a.md").unwrap(), files.join("a.md"));
        assert_eq!(
            sandbox.resolve("img/logo.png").unwrap(),
            files.join("img").join("logo.png")
        );
        assert_eq!(sandbox.resolve("./a/../b.md").unwrap(), files.join("b.md"));
        assert_eq!(
            sandbox.resolve("../files/c.md").unwrap(),
            files.join("c.md")
        );
    }

    #[tokio::test]
    async fn test_resolve_rejects_escapes() {
        let work = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&work).await;

        for name in [
            "../a.md",
            "../../etc/passwd",
            "a/../../b.md",
            "/etc/passwd",
            "",
            ".",
            "a/..",
        ] {
            assert!(
                matches!(sandbox.resolve(name), Err(Error::PathTraversal { .. })),
                "{name} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_materialize_writes_decoded_bytes() {
        let work = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&work).await;
        let job = JobRequest::from_slice(
            br#"{
                "files": {"a.md": "IyBUaXRsZQ=="},
                "extra_files": {"img/dot.txt": "data:text/plain,dot"},
                "args": []
            }"#,
        )
        .unwrap();

        sandbox
            .materialize(&job.merged_files(), &ServerConfig::default())
            .await
            .unwrap();

        let files = sandbox.files_dir();
        assert_eq!(std::fs::read(files.join("a.md")).unwrap(), b"# Title");
        assert_eq!(std::fs::read(files.join("img/dot.txt")).unwrap(), b"dot");
    }

    #[tokio::test]
    async fn test_materialize_uses_extra_files_value() {
        let work = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&work).await;
        let job = JobRequest::from_slice(
            br#"{"files":{"a.md":"YQ=="},"extra_files":{"a.md":"QQ=="},"args":[]}"#,
        )
        .unwrap();

        sandbox
            .materialize(&job.merged_files(), &ServerConfig::default())
            .await
            .unwrap();
        assert_eq!(std::fs::read(sandbox.files_dir().join("a.md")).unwrap(), b"A");
    }

    #[tokio::test]
    async fn test_materialize_rejects_traversal_without_writing() {
        let work = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&work).await;
        let job =
            JobRequest::from_slice(br#"{"files":{"../escape.md":"YQ=="},"args":[]}"#).unwrap();

        let result = sandbox
            .materialize(&job.merged_files(), &ServerConfig::default())
            .await;
        assert!(matches!(result, Err(Error::PathTraversal { .. })));
        assert!(!sandbox.path().join("escape.md").exists());
    }

    #[tokio::test]
    async fn test_materialize_rejects_null_content() {
        let work = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&work).await;
        let job = JobRequest::from_slice(br#"{"files":{"a.md":null},"args":[]}"#).unwrap();

        let result = sandbox
            .materialize(&job.merged_files(), &ServerConfig::default())
            .await;
        assert!(matches!(result, Err(Error::NullContent { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_materialize_rejects_symlinked_parent() {
        let work = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&work).await;
        std::os::unix::fs::symlink(outside.path(), sandbox.files_dir().join("link")).unwrap();

        let job =
            JobRequest::from_slice(br#"{"files":{"link/evil.md":"YQ=="},"args":[]}"#).unwrap();
        let result = sandbox
            .materialize(&job.merged_files(), &ServerConfig::default())
            .await;

        assert!(matches!(result, Err(Error::PathTraversal { .. })));
        assert!(!outside.path().join("evil.md").exists());
    }
}
