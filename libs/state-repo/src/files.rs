//! Resource files handed to committers.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::StateRepoError;

/// A file to write into (or remove from) the state repository.
///
/// `path` is relative to the repository root and uses `/` separators.
/// When `delete` is set the path is removed, recursively if it is a
/// directory, and `contents` is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
    pub path: String,
    pub contents: Vec<u8>,
    pub delete: bool,
}

impl ResourceFile {
    pub fn write(path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            delete: false,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: Vec::new(),
            delete: true,
        }
    }

    /// Resolve the path below `root`, rejecting anything that escapes it.
    pub(crate) fn resolve(&self, root: &Path) -> Result<PathBuf, StateRepoError> {
        let invalid = |reason| StateRepoError::InvalidPath {
            path: self.path.clone(),
            reason,
        };

        if self.path.is_empty() {
            return Err(invalid("path is empty"));
        }

        let relative = Path::new(&self.path);
        for component in relative.components() {
            match component {
                Component::Normal(part) if part == ".git" => {
                    return Err(invalid("path may not touch .git"))
                }
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => return Err(invalid("path may not contain '..'")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("path must be relative"))
                }
            }
        }

        Ok(root.join(relative))
    }
}

/// Write or delete every file below `root`.
///
/// All paths are validated before anything touches the disk.
pub(crate) async fn apply(root: &Path, files: &[ResourceFile]) -> Result<(), StateRepoError> {
    let resolved = files
        .iter()
        .map(|file| file.resolve(root).map(|path| (file, path)))
        .collect::<Result<Vec<_>, _>>()?;

    for (file, path) in resolved {
        let write_err = |source| StateRepoError::Write {
            path: path.clone(),
            source,
        };

        if file.delete {
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => {
                    tokio::fs::remove_dir_all(&path).await.map_err(write_err)?
                }
                Ok(_) => tokio::fs::remove_file(&path).await.map_err(write_err)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %file.path, "Nothing to delete");
                }
                Err(e) => return Err(write_err(e)),
            }
            continue;
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(write_err)?;
        }
        tokio::fs::write(&path, &file.contents)
            .await
            .map_err(write_err)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_escaping_paths() {
        let root = Path::new("/repo");
        for bad in ["", "../etc/passwd", "state/../../x", "/abs/path", ".git/config"] {
            let err = ResourceFile::write(bad, "x").resolve(root).unwrap_err();
            assert!(matches!(err, StateRepoError::InvalidPath { .. }), "{bad}");
        }
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let path = ResourceFile::write("state/dev/app.json", "x")
            .resolve(Path::new("/repo"))
            .unwrap();
        assert_eq!(path, Path::new("/repo/state/dev/app.json"));
    }

    #[tokio::test]
    async fn apply_writes_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        apply(
            root,
            &[
                ResourceFile::write("state/dev/a/one.json", "1"),
                ResourceFile::write("state/dev/a/two.json", "2"),
                ResourceFile::write("state/dev/b.json", "b"),
            ],
        )
        .await
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join("state/dev/a/two.json")).unwrap(),
            "2"
        );

        apply(
            root,
            &[
                ResourceFile::delete("state/dev/a"),
                ResourceFile::delete("state/dev/b.json"),
                ResourceFile::delete("state/dev/missing.json"),
            ],
        )
        .await
        .unwrap();
        assert!(!root.join("state/dev/a").exists());
        assert!(!root.join("state/dev/b.json").exists());
    }

    #[tokio::test]
    async fn apply_validates_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let result = apply(
            dir.path(),
            &[
                ResourceFile::write("ok.json", "1"),
                ResourceFile::write("../escape.json", "2"),
            ],
        )
        .await;
        assert!(result.is_err());
        assert!(!dir.path().join("ok.json").exists());
    }
}
