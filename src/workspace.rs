//! Per-task workspace directories.
//!
//! Every task owns `base_path/<task_id>`. Action paths are always relative to
//! that directory and may not leave it.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("path '{0}' is outside the task workspace")]
    OutsideWorkspace(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Workspace rooted on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    base_path: PathBuf,
}

impl LocalWorkspace {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Root directory of a task.
    pub fn task_root(&self, task_id: &str) -> PathBuf {
        self.base_path.join(task_id)
    }

    /// Resolve `path` inside the task root, rejecting absolute paths, `..`
    /// escapes and symlinks that lead out of the root.
    pub fn resolve(&self, task_id: &str, path: &str) -> Result<PathBuf, WorkspaceError> {
        let mut relative = PathBuf::new();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !relative.pop() {
                        return Err(WorkspaceError::OutsideWorkspace(path.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkspaceError::OutsideWorkspace(path.to_string()));
                }
            }
        }
        let root = self.task_root(task_id);
        let full = root.join(relative);
        ensure_within(&root, &full, path)?;
        Ok(full)
    }

    pub async fn read(&self, task_id: &str, path: &str) -> Result<Vec<u8>, WorkspaceError> {
        let full = self.resolve(task_id, path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|e| WorkspaceError::io(&full, e))
    }

    /// Write `data`, creating parent directories as needed.
    pub async fn write(
        &self,
        task_id: &str,
        path: &str,
        data: &[u8],
    ) -> Result<PathBuf, WorkspaceError> {
        let full = self.resolve(task_id, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::io(parent, e))?;
        }
        tokio::fs::write(&full, data)
            .await
            .map_err(|e| WorkspaceError::io(&full, e))?;
        Ok(full)
    }

    pub async fn delete(&self, task_id: &str, path: &str) -> Result<(), WorkspaceError> {
        let full = self.resolve(task_id, path)?;
        let result = if tokio::fs::metadata(&full)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            tokio::fs::remove_dir_all(&full).await
        } else {
            tokio::fs::remove_file(&full).await
        };
        result.map_err(|e| WorkspaceError::io(&full, e))
    }

    pub async fn exists(&self, task_id: &str, path: &str) -> Result<bool, WorkspaceError> {
        let full = self.resolve(task_id, path)?;
        Ok(tokio::fs::try_exists(&full).await.unwrap_or(false))
    }

    /// List the direct entries of a directory as paths relative to the task
    /// root, sorted by name.
    pub async fn list(&self, task_id: &str, path: &str) -> Result<Vec<String>, WorkspaceError> {
        let full = self.resolve(task_id, path)?;
        let root = self.task_root(task_id);

        let listed = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            for entry in WalkDir::new(&full).min_depth(1).max_depth(1) {
                let entry = entry.map_err(|e| {
                    let path = e.path().unwrap_or(&full).to_path_buf();
                    WorkspaceError::io(&path, e.into())
                })?;
                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                entries.push(relative.to_string_lossy().to_string());
            }
            entries.sort();
            Ok::<_, WorkspaceError>(entries)
        })
        .await
        .map_err(|e| WorkspaceError::io(Path::new(path), std::io::Error::other(e)))??;

        Ok(listed)
    }
}

/// Check that the deepest existing ancestor of `full` (following symlinks)
/// still lies under `root`.
fn ensure_within(root: &Path, full: &Path, raw: &str) -> Result<(), WorkspaceError> {
    // Nothing below a missing root can be a link.
    let Ok(canonical_root) = root.canonicalize() else {
        return Ok(());
    };

    let mut candidate = full;
    loop {
        if let Ok(meta) = candidate.symlink_metadata() {
            if meta.file_type().is_symlink() && !candidate.exists() {
                // Dangling link: writing through it would create its target.
                return Err(WorkspaceError::OutsideWorkspace(raw.to_string()));
            }
            let canonical = candidate
                .canonicalize()
                .map_err(|e| WorkspaceError::io(candidate, e))?;
            if canonical.starts_with(&canonical_root) {
                return Ok(());
            }
            return Err(WorkspaceError::OutsideWorkspace(raw.to_string()));
        }
        match candidate.parent() {
            Some(parent) if parent.starts_with(root) => candidate = parent,
            _ => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_escapes() {
        let ws = LocalWorkspace::new("/tmp/base");
        assert!(matches!(
            ws.resolve("t1", "../other/secret"),
            Err(WorkspaceError::OutsideWorkspace(_))
        ));
        assert!(matches!(
            ws.resolve("t1", "/etc/passwd"),
            Err(WorkspaceError::OutsideWorkspace(_))
        ));
        assert_eq!(
            ws.resolve("t1", "a/../b/./c.txt").unwrap(),
            PathBuf::from("/tmp/base/t1/b/c.txt")
        );
    }

    #[tokio::test]
    async fn write_read_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());

        ws.write("task", "src/main.rs", b"fn main() {}").await.unwrap();
        ws.write("task", "README.md", b"hi").await.unwrap();

        assert_eq!(ws.read("task", "src/main.rs").await.unwrap(), b"fn main() {}");
        assert_eq!(
            ws.list("task", ".").await.unwrap(),
            vec!["README.md".to_string(), "src".to_string()]
        );
        assert_eq!(
            ws.list("task", "src").await.unwrap(),
            vec!["src/main.rs".to_string()]
        );

        assert!(ws.exists("task", "README.md").await.unwrap());
        ws.delete("task", "README.md").await.unwrap();
        assert!(!ws.exists("task", "README.md").await.unwrap());
    }

    #[tokio::test]
    async fn tasks_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        ws.write("a", "f.txt", b"a").await.unwrap();
        assert!(ws.read("b", "f.txt").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_cannot_leave_the_task_root() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path().join("ws"));
        tokio::fs::write(dir.path().join("secret.txt"), "top secret").await.unwrap();
        ws.write("t", "inside.txt", b"ok").await.unwrap();
        let root = ws.task_root("t");

        std::os::unix::fs::symlink("../../secret.txt", root.join("link")).unwrap();
        std::os::unix::fs::symlink(dir.path(), root.join("outdir")).unwrap();
        std::os::unix::fs::symlink("../../missing.txt", root.join("dangling")).unwrap();
        std::os::unix::fs::symlink("inside.txt", root.join("alias")).unwrap();

        assert!(matches!(
            ws.read("t", "link").await,
            Err(WorkspaceError::OutsideWorkspace(_))
        ));
        assert!(matches!(
            ws.write("t", "outdir/new.txt", b"x").await,
            Err(WorkspaceError::OutsideWorkspace(_))
        ));
        assert!(matches!(
            ws.write("t", "dangling", b"x").await,
            Err(WorkspaceError::OutsideWorkspace(_))
        ));
        assert!(!dir.path().join("new.txt").exists());
        assert!(!dir.path().join("missing.txt").exists());

        assert_eq!(ws.read("t", "alias").await.unwrap(), b"ok");
        ws.write("t", "fresh/dir/file.txt", b"y").await.unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        let err = tokio_test::assert_err!(tokio_test::block_on(ws.read("task", "nope.txt")));
        assert!(matches!(err, WorkspaceError::Io { .. }));
        assert!(!tokio_test::assert_ok!(tokio_test::block_on(ws.exists("task", "nope.txt"))));
    }
}
