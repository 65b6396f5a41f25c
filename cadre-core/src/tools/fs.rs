//! Workspace-rooted file store
//!
//! The only filesystem writer in the core. Paths are validated against the
//! whitelisted roots, traversal is rejected, symlinks that resolve outside
//! the roots are refused, sizes are capped, and writers to the same path
//! are serialized by per-path locks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::tools::{audit, FileStore, ToolError};

const DEFAULT_MAX_BYTES: u64 = 1_000_000;
const MAX_NESTING: usize = 16;

/// Root-whitelisted, size-capped [`FileStore`] over the run workspace
pub struct WorkspaceFileStore {
    roots: Vec<PathBuf>,
    max_bytes: u64,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl WorkspaceFileStore {
    /// Create a store over the given roots; the first root is the default
    /// base for relative paths
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            max_bytes: DEFAULT_MAX_BYTES,
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolve a path against the roots, rejecting traversal, absolute
    /// escapes, and excessive nesting
    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::Denied("empty path".to_string()));
        }
        if path.contains('\0') {
            return Err(ToolError::Denied("path contains a null byte".to_string()));
        }
        let candidate = Path::new(path);
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ToolError::Denied(format!("path traversal: {path}")));
        }
        if candidate.components().count() > MAX_NESTING {
            return Err(ToolError::Denied(format!("path nested too deeply: {path}")));
        }

        let resolved = if candidate.is_absolute() {
            let inside = self.roots.iter().any(|root| candidate.starts_with(root));
            if !inside {
                return Err(ToolError::Denied(format!(
                    "absolute path outside workspace roots: {path}"
                )));
            }
            candidate.to_path_buf()
        } else {
            let root = self
                .roots
                .first()
                .ok_or_else(|| ToolError::Denied("no workspace roots configured".to_string()))?;
            root.join(candidate)
        };
        self.check_symlink_escape(&resolved)?;
        Ok(resolved)
    }

    fn canonical_roots(&self) -> Vec<PathBuf> {
        self.roots
            .iter()
            .map(|root| root.canonicalize().unwrap_or_else(|_| root.clone()))
            .collect()
    }

    /// Canonicalize the deepest existing ancestor of `resolved` and require
    /// it to stay under a whitelisted root.
    ///
    /// The textual checks in `resolve` cannot see a symlink planted under a
    /// root that points outside it; this follows the on-disk links before
    /// any read or write happens. Dangling or unresolvable links are
    /// refused outright.
    fn check_symlink_escape(&self, resolved: &Path) -> Result<(), ToolError> {
        let canonical_roots = self.canonical_roots();
        for ancestor in resolved.ancestors() {
            // Only inspect ancestors inside the whitelisted subtree; a
            // not-yet-created root has nothing on disk to escape through.
            if !self.roots.iter().any(|root| ancestor.starts_with(root)) {
                break;
            }
            if ancestor.symlink_metadata().is_ok() {
                let canonical = ancestor.canonicalize().map_err(|e| {
                    ToolError::Denied(format!(
                        "cannot resolve {}: {e}",
                        ancestor.display()
                    ))
                })?;
                if !canonical_roots
                    .iter()
                    .any(|root| canonical.starts_with(root))
                {
                    return Err(ToolError::Denied(format!(
                        "path escapes workspace roots via symlink: {}",
                        resolved.display()
                    )));
                }
                return Ok(());
            }
        }
        Ok(())
    }

    async fn lock_for(&self, path: &PathBuf) -> Arc<Mutex<()>> {
        let mut locks = self.path_locks.lock().await;
        locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl FileStore for WorkspaceFileStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>, ToolError> {
        let result = async {
            let resolved = self.resolve(path)?;
            let metadata = tokio::fs::metadata(&resolved)
                .await
                .map_err(|_| ToolError::NotFound(path.to_string()))?;
            if metadata.len() > self.max_bytes {
                return Err(ToolError::TooLarge {
                    path: path.to_string(),
                    size: metadata.len(),
                    limit: self.max_bytes,
                });
            }
            tokio::fs::read(&resolved)
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("read {path}: {e}")))
        }
        .await;
        audit(
            "file_store",
            "read",
            &[("path", path)],
            result.as_ref().map(|_| ()).map_err(|e| e),
        );
        result
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), ToolError> {
        let result = async {
            let resolved = self.resolve(path)?;
            if bytes.len() as u64 > self.max_bytes {
                return Err(ToolError::TooLarge {
                    path: path.to_string(),
                    size: bytes.len() as u64,
                    limit: self.max_bytes,
                });
            }
            let lock = self.lock_for(&resolved).await;
            let _guard = lock.lock().await;
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(format!("mkdir {path}: {e}")))?;
            }
            // The parent chain exists now; re-resolve it so a link smuggled
            // into the chain cannot carry the write outside the roots.
            self.check_symlink_escape(&resolved)?;
            tokio::fs::write(&resolved, bytes)
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("write {path}: {e}")))
        }
        .await;
        audit(
            "file_store",
            "write",
            &[("path", path), ("bytes", &bytes.len().to_string())],
            result.as_ref().map(|_| ()).map_err(|e| e),
        );
        result
    }

    async fn list(&self, dir: &str) -> Result<Vec<PathBuf>, ToolError> {
        let result = async {
            let resolved = self.resolve(dir)?;
            let mut entries = tokio::fs::read_dir(&resolved)
                .await
                .map_err(|_| ToolError::NotFound(dir.to_string()))?;
            let mut out = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("list {dir}: {e}")))?
            {
                out.push(entry.path());
            }
            out.sort();
            Ok(out)
        }
        .await;
        audit(
            "file_store",
            "list",
            &[("dir", dir)],
            result.as_ref().map(|_| ()).map_err(|e| e),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> WorkspaceFileStore {
        WorkspaceFileStore::new(vec![dir.path().to_path_buf()])
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let fs = store(&dir);
        fs.write("src/app.py", b"app = 1").await.unwrap();
        let bytes = fs.read("src/app.py").await.unwrap();
        assert_eq!(bytes, b"app = 1");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let fs = store(&dir);
        let err = fs.read("nope.txt").await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_traversal_denied() {
        let dir = TempDir::new().unwrap();
        let fs = store(&dir);
        let err = fs.write("../escape.txt", b"x").await.unwrap_err();
        assert!(matches!(err, ToolError::Denied(_)));
    }

    #[tokio::test]
    async fn test_absolute_path_outside_roots_denied() {
        let dir = TempDir::new().unwrap();
        let fs = store(&dir);
        let err = fs.read("/etc/hostname").await.unwrap_err();
        assert!(matches!(err, ToolError::Denied(_)));
    }

    #[tokio::test]
    async fn test_absolute_path_inside_root_allowed() {
        let dir = TempDir::new().unwrap();
        let fs = store(&dir);
        let target = dir.path().join("direct.txt");
        fs.write(target.to_str().unwrap(), b"ok").await.unwrap();
        assert!(target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directory_escape_rejected() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let fs = store(&dir);
        let err = fs.write("link/escape.txt", b"x").await.unwrap_err();
        assert!(matches!(err, ToolError::Denied(_)));
        assert!(!outside.path().join("escape.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_file_escape_rejected_on_read() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            dir.path().join("alias.txt"),
        )
        .unwrap();

        let fs = store(&dir);
        let err = fs.read("alias.txt").await.unwrap_err();
        assert!(matches!(err, ToolError::Denied(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_within_roots_allowed() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::fs::write(dir.path().join("real/data.txt"), b"inside").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("view")).unwrap();

        let fs = store(&dir);
        let bytes = fs.read("view/data.txt").await.unwrap();
        assert_eq!(bytes, b"inside");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_symlink_rejected() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", dir.path().join("broken")).unwrap();

        let fs = store(&dir);
        let err = fs.write("broken", b"x").await.unwrap_err();
        assert!(matches!(err, ToolError::Denied(_)));
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let dir = TempDir::new().unwrap();
        let fs = store(&dir).with_max_bytes(8);
        let err = fs.write("big.txt", b"way too many bytes").await.unwrap_err();
        assert!(matches!(err, ToolError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn test_list_returns_sorted_entries() {
        let dir = TempDir::new().unwrap();
        let fs = store(&dir);
        fs.write("b.txt", b"b").await.unwrap();
        fs.write("a.txt", b"a").await.unwrap();
        let entries = fs.list(".").await.unwrap();
        let names: Vec<String> = entries
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_same_path_serialize() {
        let dir = TempDir::new().unwrap();
        let fs = Arc::new(store(&dir));
        let mut handles = Vec::new();
        for i in 0..8 {
            let fs = fs.clone();
            handles.push(tokio::spawn(async move {
                fs.write("shared.txt", format!("writer {i}").as_bytes())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let bytes = fs.read("shared.txt").await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("writer "));
    }
}
