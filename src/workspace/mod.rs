//! Ephemeral per-run workspaces.
//!
//! A [`Workspace`] is a private copy of the reference repository created
//! under the scratch root for exactly one grading run. Nothing in the source
//! tree is ever modified.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::WorkspaceSetupError;

/// Prefix of every workspace directory name.
pub const WORKSPACE_PREFIX: &str = "grading_workspace_";

/// Creates isolated copies of a source repository.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    scratch_root: PathBuf,
}

/// A filesystem root owned by a single grading run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    run_id: Uuid,
}

impl WorkspaceManager {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Copies `source` into a fresh `grading_workspace_<uuid>` directory.
    ///
    /// Regular files keep their permissions, symlinks are recreated rather
    /// than followed, and `.git` is copied like any other directory.
    pub async fn create(&self, source: &Path) -> Result<Workspace, WorkspaceSetupError> {
        self.create_with_id(Uuid::new_v4(), source).await
    }

    /// Like [`create`](Self::create), naming the workspace after `run_id`.
    pub async fn create_with_id(
        &self,
        run_id: Uuid,
        source: &Path,
    ) -> Result<Workspace, WorkspaceSetupError> {
        if !source.exists() {
            return Err(WorkspaceSetupError::SourceMissing(source.to_path_buf()));
        }
        if !source.is_dir() {
            return Err(WorkspaceSetupError::NotADirectory(source.to_path_buf()));
        }

        let root = self
            .scratch_root
            .join(format!("{}{}", WORKSPACE_PREFIX, run_id));

        let src = source.to_path_buf();
        let dst = root.clone();
        let scratch = self.scratch_root.clone();
        tokio::task::spawn_blocking(move || -> Result<(), WorkspaceSetupError> {
            fs::create_dir_all(&scratch)?;
            // create_dir, not create_dir_all: a name collision must fail.
            fs::create_dir(&dst)?;
            if let Err(e) = copy_tree(&src, &dst) {
                let _ = fs::remove_dir_all(&dst);
                return Err(e);
            }
            Ok(())
        })
        .await
        .map_err(|e| WorkspaceSetupError::Join(e.to_string()))??;

        tracing::info!(
            source = %source.display(),
            workspace = %root.display(),
            run_id = %run_id,
            "Workspace prepared"
        );
        Ok(Workspace { root, run_id })
    }
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Resolves a repository-relative path inside the workspace.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Removes the workspace tree.
    pub async fn destroy(self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                tracing::debug!(workspace = %self.root.display(), "Workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), WorkspaceSetupError> {
    // The destination may live under the source when the scratch root does.
    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !e.path().starts_with(dst));
    for entry in walker {
        let entry = entry.map_err(|e| WorkspaceSetupError::Walk(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| WorkspaceSetupError::Walk(e.to_string()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        let file_type = entry.file_type();

        let copied = if file_type.is_dir() {
            fs::create_dir_all(&target)
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map(|_| ())
        } else {
            // Opening a FIFO or device would block or read without end.
            tracing::warn!(path = %entry.path().display(), "Skipping special file");
            continue;
        };
        copied.map_err(|source| WorkspaceSetupError::Copy {
            path: entry.path().to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    let points_to = fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    fs::copy(link, target).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join("src/lib.go"), "package lib\n").unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(dir.path().join("README.md"), "# repo\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_create_copies_tree_including_git() {
        let repo = sample_repo();
        let scratch = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(scratch.path());

        let ws = manager.create(repo.path()).await.unwrap();
        assert!(ws.root().starts_with(scratch.path()));
        assert!(ws
            .root()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(WORKSPACE_PREFIX));
        assert_eq!(fs::read_to_string(ws.path("src/lib.go")).unwrap(), "package lib\n");
        assert!(ws.path(".git/HEAD").exists());
        assert!(ws.path(".git/objects").is_dir());
    }

    #[tokio::test]
    async fn test_workspaces_are_isolated() {
        let repo = sample_repo();
        let scratch = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(scratch.path());

        let a = manager.create(repo.path()).await.unwrap();
        let b = manager.create(repo.path()).await.unwrap();
        assert_ne!(a.root(), b.root());
        assert_ne!(a.run_id(), b.run_id());

        fs::write(a.path("README.md"), "changed").unwrap();
        assert_eq!(fs::read_to_string(b.path("README.md")).unwrap(), "# repo\n");
        assert_eq!(fs::read_to_string(repo.path().join("README.md")).unwrap(), "# repo\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_recreated_not_followed() {
        let repo = sample_repo();
        std::os::unix::fs::symlink("src/lib.go", repo.path().join("link.go")).unwrap();
        let scratch = TempDir::new().unwrap();

        let ws = WorkspaceManager::new(scratch.path())
            .create(repo.path())
            .await
            .unwrap();
        let meta = fs::symlink_metadata(ws.path("link.go")).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(ws.path("link.go")).unwrap(), PathBuf::from("src/lib.go"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_special_files_are_skipped() {
        let repo = sample_repo();
        let status = std::process::Command::new("mkfifo")
            .arg(repo.path().join("src/pipe"))
            .status()
            .unwrap();
        assert!(status.success());
        let scratch = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(scratch.path());

        let ws = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            manager.create(repo.path()),
        )
        .await
        .expect("copy blocked on a FIFO")
        .unwrap();
        assert!(ws.path("src/lib.go").exists());
        assert!(fs::symlink_metadata(ws.path("src/pipe")).is_err());
    }

    #[tokio::test]
    async fn test_reused_run_id_collides() {
        let repo = sample_repo();
        let scratch = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(scratch.path());
        let id = Uuid::new_v4();

        let ws = manager.create_with_id(id, repo.path()).await.unwrap();
        assert_eq!(ws.run_id(), id);
        let err = manager.create_with_id(id, repo.path()).await.unwrap_err();
        assert!(matches!(err, WorkspaceSetupError::Io(_)));
        // The existing workspace is left alone.
        assert!(ws.path("README.md").exists());
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let scratch = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(scratch.path());
        let err = manager
            .create(&scratch.path().join("does-not-exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceSetupError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn test_file_source_fails() {
        let scratch = TempDir::new().unwrap();
        let file = scratch.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        let err = WorkspaceManager::new(scratch.path())
            .create(&file)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceSetupError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_destroy_removes_tree() {
        let repo = sample_repo();
        let scratch = TempDir::new().unwrap();
        let ws = WorkspaceManager::new(scratch.path())
            .create(repo.path())
            .await
            .unwrap();
        let root = ws.root().to_path_buf();
        ws.destroy().await.unwrap();
        assert!(!root.exists());
        assert!(repo.path().join("src/lib.go").exists());
    }
}
