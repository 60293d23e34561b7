//! Per-invocation workspaces
//!
//! Each invocation gets a uniquely named directory under the configured temp
//! root holding `<Entry>.java` and whatever `javac` writes next to it. The
//! [`Workspace`] guard owns that directory and removes it when dropped, so
//! the tree goes away on normal return, on error, on panic and when the
//! invocation future is cancelled. Removal problems are logged and never
//! reach the caller.

use crate::{Result, SandboxError};
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Directory name prefix for workspaces
pub const WORKSPACE_PREFIX: &str = "java_compile_";

/// Extension of the written source file
pub const SOURCE_EXT: &str = "java";

/// Scoped ownership of one invocation's directory
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    source_file: PathBuf,
}

impl Workspace {
    /// Create a fresh directory under `root` and write `source` to
    /// `<entry>.java` inside it.
    pub fn create(root: &Path, entry: &str, source: &str) -> Result<Self> {
        if entry.contains(std::path::is_separator) || entry.contains('\0') {
            return Err(SandboxError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("class name {entry:?} cannot be used as a file name"),
            )));
        }

        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        let source_file = path.join(format!("{entry}.{SOURCE_EXT}"));

        // From here on a failed write still drops through `release`.
        let workspace = Self {
            dir: Some(dir),
            path,
            source_file,
        };
        fs::write(&workspace.source_file, source)?;

        tracing::debug!(workspace = ?workspace.path, entry, "workspace created");
        Ok(workspace)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match dir.close() {
            Ok(()) => tracing::debug!(workspace = ?self.path, "workspace removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(workspace = ?self.path, "workspace already gone");
            }
            Err(e) => {
                if let Some(retry) = remove_again(&self.path) {
                    tracing::warn!(
                        workspace = ?self.path,
                        error = %retry,
                        first_error = %e,
                        "failed to remove workspace"
                    );
                }
            }
        }
    }
}

/// A second pass picks up entries that raced the first one. Returns the
/// error of that pass unless the tree is gone.
fn remove_again(path: &Path) -> Option<io::Error> {
    match fs::remove_dir_all(path) {
        Ok(()) => None,
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => Some(e),
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Run `f` against a fresh workspace and remove the workspace afterwards.
///
/// The workspace outlives the future returned by `f`, so anything `f` holds
/// open inside the directory is released before the tree is deleted.
pub async fn with_workspace<F, Fut, T>(root: &Path, entry: &str, source: &str, f: F) -> Result<T>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = T>,
{
    let workspace = Workspace::create(root, entry, source)?;
    let value = f(workspace.path().to_path_buf()).await;
    drop(workspace);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entries(root: &Path) -> usize {
        fs::read_dir(root).map(Iterator::count).unwrap_or(0)
    }

    #[test]
    fn second_removal_pass_reports_its_own_error() {
        let root = tempfile::tempdir().unwrap();

        let leftover = root.path().join("leftover");
        fs::create_dir_all(leftover.join("classes")).unwrap();
        assert!(remove_again(&leftover).is_none());
        assert!(!leftover.exists());
        assert!(remove_again(&leftover).is_none());

        // A file where a directory is expected fails with its own error.
        let file = root.path().join("Main.java");
        fs::write(&file, "").unwrap();
        let err = remove_again(&file).unwrap();
        assert_ne!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn writes_source_named_after_entry() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), "Main", "public class Main {}").unwrap();

        assert_eq!(ws.source_file(), ws.path().join("Main.java"));
        assert_eq!(fs::read_to_string(ws.source_file()).unwrap(), "public class Main {}");
        assert!(ws.path().starts_with(root.path()));
        let name = ws.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(WORKSPACE_PREFIX));
    }

    #[test]
    fn drop_removes_nested_tree() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), "Main", "").unwrap();
        let path = ws.path().to_path_buf();
        fs::create_dir_all(path.join("pkg/inner")).unwrap();
        fs::write(path.join("pkg/inner/Main.class"), b"\xca\xfe\xba\xbe").unwrap();

        drop(ws);
        assert!(!path.exists());
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn tolerates_tree_removed_underneath() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), "Main", "").unwrap();
        fs::remove_dir_all(ws.path()).unwrap();
        drop(ws);
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn workspaces_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(root.path(), "Main", "a").unwrap();
        let b = Workspace::create(root.path(), "Main", "b").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(fs::read_to_string(a.source_file()).unwrap(), "a");
        assert_eq!(fs::read_to_string(b.source_file()).unwrap(), "b");
    }

    #[test]
    fn creates_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("not/yet/here");
        let ws = Workspace::create(&nested, "Main", "").unwrap();
        assert!(ws.path().starts_with(&nested));
    }

    #[test]
    fn rejects_names_that_escape_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let err = Workspace::create(root.path(), "../Escape", "").unwrap_err();
        assert!(matches!(err, SandboxError::Io(ref e) if e.kind() == io::ErrorKind::InvalidInput));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn with_workspace_cleans_up_after_success_and_error_values() {
        let root = tempfile::tempdir().unwrap();

        let seen = with_workspace(root.path(), "Main", "x", |path| async move { path })
            .await
            .unwrap();
        assert!(!seen.exists());

        let failed: Result<()> = with_workspace(root.path(), "Main", "x", |_| async {
            Err(SandboxError::NonZeroExit(1))
        })
        .await
        .unwrap();
        assert!(failed.is_err());
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn with_workspace_cleans_up_after_panic() {
        let root = tempfile::tempdir().unwrap();
        let root_path = root.path().to_path_buf();

        let joined = tokio::spawn(async move {
            with_workspace(&root_path, "Main", "x", |path| async move {
                assert!(path.exists());
                panic!("boom");
            })
            .await
        })
        .await;

        assert!(joined.unwrap_err().is_panic());
        assert_eq!(entries(root.path()), 0);
    }
}
